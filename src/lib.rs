//! Mail Receptionist: similarity-based email triage.
//!
//! Unseen inbox mail is embedded and compared against curated example
//! folders; matches are tagged, moved and optionally answered.

pub mod config;
pub mod embedding;
pub mod error;
pub mod mail;
pub mod pipeline;

pub use config::{ReceptionistConfig, Settings};
pub use error::{Error, Result};
pub use pipeline::{BatchReport, run_batch, run_once};
