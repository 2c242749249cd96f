//! Match-and-act pipeline.
//!
//! Every batch flows through:
//! 1. `folders::ensure_folder()`: provision filter folders
//! 2. `normalize::TextNormalizer`: message → one line of text
//! 3. `EmbeddingProvider::embed()`: texts → unit vectors
//! 4. `classifier::SimilarityClassifier`: candidates vs. exemplar set
//! 5. `actions::apply_actions()`: tag, move, auto-respond
//!
//! `batch::run_batch()` wires the steps together.

pub mod actions;
pub mod batch;
pub mod classifier;
pub mod exemplars;
pub mod folders;
pub mod normalize;

pub use actions::{ActionConfig, ActionReport, FilterMode, apply_actions};
pub use batch::{BatchReport, run_batch, run_once};
pub use classifier::{SimilarityClassifier, Threshold};
pub use exemplars::{BuiltinVectors, ExemplarSet};
pub use folders::{DEFAULT_SEPARATORS, ResolvedFolder, ensure_folder};
pub use normalize::{HtmlToText, NormalizedText, TextNormalizer};
