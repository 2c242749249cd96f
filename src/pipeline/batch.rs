//! One end-to-end receptionist run.
//!
//! Flow:
//! 1. Provision example, negative and filtered folders (persisting any
//!    separator fallback to the settings file)
//! 2. Fetch unseen inbox mail and examples; stop early when there is no
//!    mail, but only after checking that positive examples exist
//! 3. Normalize and embed texts, assemble the exemplar set and check that
//!    candidate vectors share its dimension
//! 4. Classify candidates and apply the filter action to matches

use std::fmt;
use std::path::Path;

use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{ReceptionistConfig, Settings, keys};
use crate::embedding::{EmbeddingProvider, EmbeddingVector, check_batch_len};
use crate::error::{ConfigError, EmbeddingError, Result};
use crate::mail::{Credential, ImapSession, MailMessage, MailSender, MailStore, SmtpSender};
use crate::pipeline::actions::{ActionConfig, ActionReport, apply_actions};
use crate::pipeline::classifier::SimilarityClassifier;
use crate::pipeline::exemplars::{BuiltinVectors, ExemplarSet, missing_positives};
use crate::pipeline::folders::{DEFAULT_SEPARATORS, ensure_folder};
use crate::pipeline::normalize::TextNormalizer;

/// Summary of one batch, logged when it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub run_id: Uuid,
    /// Positive examples embedded from the example folder.
    pub examples: usize,
    /// Negative examples embedded from the negative folder.
    pub negatives: usize,
    /// Unseen inbox messages with usable text.
    pub candidates: usize,
    /// Messages skipped because they had no text at all.
    pub empty_texts: usize,
    pub matched: usize,
    pub actions: ActionReport,
}

impl BatchReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            examples: 0,
            negatives: 0,
            candidates: 0,
            empty_texts: 0,
            matched: 0,
            actions: ActionReport::default(),
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: {} examples, {} negatives, {} candidates ({} without text), {} matched; {}",
            self.run_id,
            self.examples,
            self.negatives,
            self.candidates,
            self.empty_texts,
            self.matched,
            self.actions
        )
    }
}

/// Connect to the account, run one batch, and log out.
///
/// `credential` is consumed. It moves into the SMTP sender and is dropped
/// (and zeroized) with it before this returns, whatever the outcome.
pub fn run_once(
    config: &ReceptionistConfig,
    settings: &mut Settings,
    embedder: &dyn EmbeddingProvider,
    credential: Credential,
) -> Result<BatchReport> {
    let auto_response = load_auto_response(config.mail.auto_response_template.as_deref())?;

    let mut session = ImapSession::connect(&config.mail, &credential)?;
    let sender = SmtpSender::new(&config.mail, credential)?;

    let result = run_batch(
        config,
        settings,
        &mut session,
        &sender,
        embedder,
        auto_response,
    );
    if let Err(e) = session.logout() {
        warn!("IMAP logout failed: {e}");
    }
    result
}

/// Run one batch against an open store session.
pub fn run_batch<S, N>(
    config: &ReceptionistConfig,
    settings: &mut Settings,
    store: &mut S,
    sender: &N,
    embedder: &dyn EmbeddingProvider,
    auto_response: Option<String>,
) -> Result<BatchReport>
where
    S: MailStore + ?Sized,
    N: MailSender + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("batch", run_id = %run_id);
    let _guard = span.enter();
    let mut report = BatchReport::new(run_id);

    // Folders (once per session), fallback results written back.
    let filter = &config.filter;
    let positive_folder =
        provision(store, settings, keys::POSITIVE_FOLDER, &filter.positive_folder)?;
    let negative_folder =
        provision(store, settings, keys::NEGATIVE_FOLDER, &filter.negative_folder)?;
    let filtered_folder = match &filter.filtered_folder {
        Some(folder) => Some(provision(store, settings, keys::FILTERED_FOLDER, folder)?),
        None => None,
    };

    let inbox = &config.mail.inbox_folder;
    if !store.folder_exists(inbox)? {
        return Err(ConfigError::invalid(format!(
            "Setting <{}> names folder {inbox:?}, which does not exist.",
            keys::INBOX_FOLDER
        ))
        .into());
    }

    let builtin = if config.ml.use_builtin {
        let path = config.ml.builtin_vectors.as_deref().ok_or_else(|| {
            ConfigError::invalid(format!("Setting <{}> is empty.", keys::BUILTIN_VECTORS))
        })?;
        Some(BuiltinVectors::load(path)?)
    } else {
        None
    };

    let action_config = ActionConfig {
        tag: filter.tag.clone(),
        filtered_folder,
        inbox_folder: inbox.clone(),
        auto_response,
    };
    let mode = action_config.mode().ok_or_else(|| {
        ConfigError::invalid(format!(
            "Settings <{}> and <{}> are both empty.",
            keys::FILTER_TAG,
            keys::FILTERED_FOLDER
        ))
    })?;

    let candidates = store.fetch(inbox, true)?;
    let examples = store.fetch(&positive_folder, false)?;
    let builtin_positives = builtin.as_ref().map_or(0, |b| b.positive.len());
    if examples.is_empty() && builtin_positives == 0 {
        return Err(missing_positives().into());
    }
    if candidates.is_empty() {
        info!("No unseen messages in {inbox}");
        return Ok(report);
    }
    let negatives = store.fetch(&negative_folder, false)?;

    let normalizer = TextNormalizer::new(config.ml.max_text_chars);
    let candidates = embed_messages(&candidates, &normalizer, embedder)?;
    let examples = embed_messages(&examples, &normalizer, embedder)?;
    let negatives = embed_messages(&negatives, &normalizer, embedder)?;
    report.candidates = candidates.messages.len();
    report.examples = examples.vectors.len();
    report.negatives = negatives.vectors.len();
    report.empty_texts = candidates.empty + examples.empty + negatives.empty;

    let exemplars = ExemplarSet::assemble(examples.vectors, negatives.vectors, builtin)?;
    exemplars.check_dimension(&candidates.vectors)?;

    let classifier = SimilarityClassifier::new(config.ml.threshold);
    let verdicts = classifier.verdicts(&candidates.vectors, &exemplars, mode);
    let matched: Vec<MailMessage> = candidates
        .messages
        .iter()
        .zip(verdicts)
        .filter(|(_, verdict)| verdict.matched)
        .map(|(message, verdict)| {
            debug!(id = %message.id, subject = %message.subject, mode = ?verdict.mode, "Matched");
            (*message).clone()
        })
        .collect();
    report.matched = matched.len();

    report.actions = apply_actions(&matched, &action_config, store, sender)?;

    info!("Batch finished: {report}");
    Ok(report)
}

/// Read the auto-response body. An empty template file is a settings error.
pub fn load_auto_response(path: Option<&Path>) -> std::result::Result<Option<String>, ConfigError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let body = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::invalid(format!(
            "Cannot read auto-response template {}: {e}",
            path.display()
        ))
    })?;
    if body.trim().is_empty() {
        return Err(ConfigError::invalid(format!(
            "Auto-response template {} is empty.",
            path.display()
        )));
    }
    Ok(Some(body))
}

/// Ensure one filter folder exists; persist the path if the separator changed.
fn provision<S: MailStore + ?Sized>(
    store: &mut S,
    settings: &mut Settings,
    key: &str,
    path: &str,
) -> Result<String> {
    let resolved = ensure_folder(store, path, &DEFAULT_SEPARATORS)?;
    if resolved.fell_back {
        settings.persist(keys::FILTER, key, &resolved.path)?;
        info!(key = %key, path = %resolved.path, "Saved folder path with fallback separator");
    }
    Ok(resolved.path)
}

/// Messages with text, and their vectors in the same order.
struct Embedded<'m> {
    messages: Vec<&'m MailMessage>,
    vectors: Vec<EmbeddingVector>,
    empty: usize,
}

/// Normalize and embed `messages`.
///
/// Messages whose normalized text is empty are counted in `empty` and never
/// sent to the embedder. They have no vector, so they can never match and
/// stay in place for the user.
fn embed_messages<'m>(
    messages: &'m [MailMessage],
    normalizer: &TextNormalizer,
    embedder: &dyn EmbeddingProvider,
) -> std::result::Result<Embedded<'m>, EmbeddingError> {
    let mut kept = Vec::with_capacity(messages.len());
    let mut texts = Vec::with_capacity(messages.len());
    for message in messages {
        let text = normalizer.normalize(message);
        if text.is_empty() {
            continue;
        }
        kept.push(message);
        texts.push(text.into_string());
    }

    let vectors = if texts.is_empty() {
        Vec::new()
    } else {
        embedder.embed(&texts)?
    };
    check_batch_len(texts.len(), vectors.len())?;

    Ok(Embedded {
        empty: messages.len() - kept.len(),
        messages: kept,
        vectors,
    })
}
