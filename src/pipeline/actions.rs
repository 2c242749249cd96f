//! Filtering actions on matched messages.
//!
//! Each message goes through its own unit of work (respond, then append in
//! tag mode; respond in move mode). Processing stops at the first failing
//! unit, and only messages whose unit completed are finalized (originals
//! deleted, or flagged and moved). Everything else stays untouched and
//! unseen for the next run.

use std::fmt;

use tracing::{info, warn};

use crate::error::{ActionError, MailError};
use crate::mail::{Flag, MailMessage, MailSender, MailStore, MessageId};

/// How matched messages are filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Tagged clone goes back into the inbox.
    Tag,
    /// Original is moved to the filtered folder unchanged.
    Move,
    /// Tagged clone goes into the filtered folder.
    TagAndMove,
}

#[derive(Debug, Clone, Default)]
pub struct ActionConfig {
    pub tag: Option<String>,
    pub filtered_folder: Option<String>,
    pub inbox_folder: String,
    /// Auto-response body; `None` disables responses.
    pub auto_response: Option<String>,
}

impl ActionConfig {
    /// `None` when neither a tag nor a filtered folder is configured.
    pub fn mode(&self) -> Option<FilterMode> {
        match (self.tag.as_deref(), self.filtered_folder.as_deref()) {
            (Some(_), Some(_)) => Some(FilterMode::TagAndMove),
            (Some(_), None) => Some(FilterMode::Tag),
            (None, Some(_)) => Some(FilterMode::Move),
            (None, None) => None,
        }
    }
}

/// What a run of [`apply_actions`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionReport {
    pub tagged: usize,
    pub moved: usize,
    pub auto_responses: usize,
}

impl fmt::Display for ActionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tagged, {} moved, {} auto-responses",
            self.tagged, self.moved, self.auto_responses
        )
    }
}

/// Apply the configured action to every matched message.
pub fn apply_actions<S, N>(
    matched: &[MailMessage],
    config: &ActionConfig,
    store: &mut S,
    sender: &N,
) -> Result<ActionReport, ActionError>
where
    S: MailStore + ?Sized,
    N: MailSender + ?Sized,
{
    if matched.is_empty() {
        return Ok(ActionReport::default());
    }

    let Some(mode) = config.mode() else {
        warn!("Neither a filter tag nor a filtered folder is configured; nothing to do");
        return Ok(ActionReport::default());
    };
    let tag = config.tag.as_deref().unwrap_or_default();
    let folder = config
        .filtered_folder
        .as_deref()
        .unwrap_or(&config.inbox_folder);

    match mode {
        FilterMode::Tag => tag_messages(matched, tag, &config.inbox_folder, config, store, sender),
        FilterMode::TagAndMove => tag_messages(matched, tag, folder, config, store, sender),
        FilterMode::Move => move_messages(matched, folder, config, store, sender),
    }
}

fn tag_messages<S, N>(
    matched: &[MailMessage],
    tag: &str,
    target: &str,
    config: &ActionConfig,
    store: &mut S,
    sender: &N,
) -> Result<ActionReport, ActionError>
where
    S: MailStore + ?Sized,
    N: MailSender + ?Sized,
{
    let mut report = ActionReport::default();
    let mut completed: Vec<MessageId> = Vec::new();
    let mut failure = None;

    for message in matched {
        let answered = match respond(message, config.auto_response.as_deref(), sender) {
            Ok(answered) => answered,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        if answered {
            report.auto_responses += 1;
        }

        let mut flags = vec![Flag::Seen];
        if answered {
            flags.push(Flag::Answered);
        }
        let appended = store.append(target, &message.tagged_raw(tag), message.received_at, &flags);
        if let Err(e) = appended {
            failure = Some(e);
            break;
        }
        report.tagged += 1;
        completed.push(message.id);
    }

    if !completed.is_empty() {
        let deleted = store
            .select_folder(&config.inbox_folder)
            .and_then(|()| store.delete(&completed));
        if let Err(e) = deleted {
            return Err(partial(report, e));
        }
        info!(count = completed.len(), folder = %target, tag = %tag, "Tagged matched messages");
    }

    match failure {
        Some(e) => Err(partial(report, e)),
        None => Ok(report),
    }
}

fn move_messages<S, N>(
    matched: &[MailMessage],
    folder: &str,
    config: &ActionConfig,
    store: &mut S,
    sender: &N,
) -> Result<ActionReport, ActionError>
where
    S: MailStore + ?Sized,
    N: MailSender + ?Sized,
{
    let mut report = ActionReport::default();
    let mut processed: Vec<MessageId> = Vec::new();
    let mut answered: Vec<MessageId> = Vec::new();
    let mut failure = None;

    for message in matched {
        match respond(message, config.auto_response.as_deref(), sender) {
            Ok(true) => {
                report.auto_responses += 1;
                answered.push(message.id);
            }
            Ok(false) => {}
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
        processed.push(message.id);
    }

    if !processed.is_empty() {
        let finalized = finalize_move(store, &config.inbox_folder, &processed, &answered, folder);
        if let Err(e) = finalized {
            return Err(partial(report, e));
        }
        report.moved = processed.len();
        info!(count = processed.len(), folder = %folder, "Moved matched messages");
    }

    match failure {
        Some(e) => Err(partial(report, e)),
        None => Ok(report),
    }
}

fn finalize_move<S: MailStore + ?Sized>(
    store: &mut S,
    inbox: &str,
    processed: &[MessageId],
    answered: &[MessageId],
    folder: &str,
) -> Result<(), MailError> {
    store.select_folder(inbox)?;
    if !answered.is_empty() {
        store.flag(answered, &[Flag::Answered], true)?;
    }
    store.mark_seen(processed, true)?;
    store.move_messages(processed, folder)
}

/// Send the auto-response, if configured. Returns whether one was sent.
fn respond<N: MailSender + ?Sized>(
    message: &MailMessage,
    template: Option<&str>,
    sender: &N,
) -> Result<bool, MailError> {
    let Some(body) = template else {
        return Ok(false);
    };
    if message.sender.is_empty() {
        warn!(subject = %message.subject, "No sender address; skipping auto-response");
        return Ok(false);
    }
    sender.send(&message.sender, &format!("Re: {}", message.subject), body)?;
    Ok(true)
}

fn partial(completed: ActionReport, source: MailError) -> ActionError {
    warn!(%completed, error = %source, "Filtering stopped early");
    ActionError::Partial { completed, source }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::mail::fake::{FakeSender, FakeStore};

    fn message(id: u32, subject: &str) -> MailMessage {
        let raw =
            format!("From: sender{id}@example.org\r\nSubject: {subject}\r\n\r\nBody {id}\r\n");
        let received = DateTime::from_timestamp(1_622_541_600 + i64::from(id), 0).unwrap();
        MailMessage::parse(MessageId(id), raw.into_bytes(), vec![], Some(received))
    }

    fn tag_config(folder: Option<&str>, response: Option<&str>) -> ActionConfig {
        ActionConfig {
            tag: Some("VAC".into()),
            filtered_folder: folder.map(String::from),
            inbox_folder: "INBOX".into(),
            auto_response: response.map(String::from),
        }
    }

    fn move_config(response: Option<&str>) -> ActionConfig {
        ActionConfig {
            tag: None,
            filtered_folder: Some("Filtered".into()),
            inbox_folder: "INBOX".into(),
            auto_response: response.map(String::from),
        }
    }

    fn subject_of(raw: &[u8]) -> String {
        MailMessage::parse(MessageId(0), raw.to_vec(), vec![], None).subject
    }

    #[test]
    fn mode_follows_configuration() {
        assert_eq!(tag_config(None, None).mode(), Some(FilterMode::Tag));
        assert_eq!(tag_config(Some("F"), None).mode(), Some(FilterMode::TagAndMove));
        assert_eq!(move_config(None).mode(), Some(FilterMode::Move));
        assert_eq!(ActionConfig::default().mode(), None);
    }

    #[test]
    fn unconfigured_mode_leaves_matches_alone() {
        let mut store = FakeStore::default();
        let sender = FakeSender::default();
        let config = ActionConfig {
            inbox_folder: "INBOX".into(),
            auto_response: Some("Danke.".into()),
            ..Default::default()
        };

        let report = apply_actions(&[message(1, "A")], &config, &mut store, &sender).unwrap();

        assert_eq!(report, ActionReport::default());
        assert!(store.selected.is_none());
        assert!(store.appended.is_empty());
        assert!(sender.sent.borrow().is_empty());
    }

    #[test]
    fn tag_mode_clones_into_filtered_folder_and_deletes_originals() {
        let mut store = FakeStore::default();
        let sender = FakeSender::default();
        let matched = vec![message(1, "Original subject"), message(2, "[VAC] Already")];

        let config = tag_config(Some("Filtered"), None);
        let report = apply_actions(&matched, &config, &mut store, &sender).unwrap();

        assert_eq!(report, ActionReport { tagged: 2, moved: 0, auto_responses: 0 });
        assert_eq!(store.appended.len(), 2);
        assert_eq!(store.appended[0].folder, "Filtered");
        assert_eq!(subject_of(&store.appended[0].raw), "[VAC] Original subject");
        assert_eq!(subject_of(&store.appended[1].raw), "[VAC] Already");
        assert_eq!(store.appended[0].flags, vec![Flag::Seen]);
        assert_eq!(store.appended[0].timestamp, matched[0].received_at);
        assert_eq!(store.deleted, vec![MessageId(1), MessageId(2)]);
        assert_eq!(store.selected.as_deref(), Some("INBOX"));
        assert!(sender.sent.borrow().is_empty());
    }

    #[test]
    fn tag_only_mode_appends_to_inbox() {
        let mut store = FakeStore::default();
        let config = tag_config(None, None);
        apply_actions(&[message(1, "Hi")], &config, &mut store, &FakeSender::default()).unwrap();
        assert_eq!(store.appended[0].folder, "INBOX");
    }

    #[test]
    fn auto_response_precedes_answered_flag() {
        let mut store = FakeStore::default();
        let sender = FakeSender::default();
        let report = apply_actions(
            &[message(1, "Termin")],
            &tag_config(Some("Filtered"), Some("Wir melden uns.")),
            &mut store,
            &sender,
        )
        .unwrap();

        assert_eq!(report.auto_responses, 1);
        assert_eq!(
            *sender.sent.borrow(),
            vec![(
                "sender1@example.org".to_string(),
                "Re: Termin".to_string(),
                "Wir melden uns.".to_string()
            )]
        );
        assert_eq!(store.appended[0].flags, vec![Flag::Seen, Flag::Answered]);
    }

    #[test]
    fn move_mode_flags_then_moves() {
        let mut store = FakeStore::default();
        let sender = FakeSender::default();
        let matched = vec![message(3, "A"), message(4, "B")];

        let report =
            apply_actions(&matched, &move_config(Some("Danke.")), &mut store, &sender).unwrap();

        assert_eq!(report, ActionReport { tagged: 0, moved: 2, auto_responses: 2 });
        let ids = vec![MessageId(3), MessageId(4)];
        assert_eq!(
            store.flagged,
            vec![
                (ids.clone(), vec![Flag::Answered], true),
                (ids.clone(), vec![Flag::Seen], true),
            ]
        );
        assert_eq!(store.moved, vec![(ids, "Filtered".to_string())]);
        assert!(store.appended.is_empty());
        assert!(store.deleted.is_empty());
    }

    #[test]
    fn empty_match_set_touches_nothing() {
        let mut store = FakeStore::default();
        let report =
            apply_actions(&[], &move_config(None), &mut store, &FakeSender::default()).unwrap();
        assert_eq!(report, ActionReport::default());
        assert!(store.selected.is_none());
        assert!(store.flagged.is_empty());
    }

    #[test]
    fn failed_append_keeps_unprocessed_originals() {
        let mut store = FakeStore {
            fail_append_on_call: Some(1),
            ..Default::default()
        };
        let matched = vec![message(1, "A"), message(2, "B"), message(3, "C")];

        let config = tag_config(Some("Filtered"), None);
        let err = apply_actions(&matched, &config, &mut store, &FakeSender::default()).unwrap_err();

        let ActionError::Partial { completed, source } = err;
        assert_eq!(completed.tagged, 1);
        assert!(matches!(source, MailError::Rejected { .. }));
        assert_eq!(store.deleted, vec![MessageId(1)]);
    }

    #[test]
    fn failed_response_stops_before_moving_that_message() {
        let mut store = FakeStore::default();
        let sender = FakeSender {
            fail_on_call: Some(1),
            ..Default::default()
        };
        let matched = vec![message(5, "A"), message(6, "B")];

        let err = apply_actions(&matched, &move_config(Some("Danke.")), &mut store, &sender)
            .unwrap_err();

        let ActionError::Partial { completed, .. } = err;
        assert_eq!(completed, ActionReport { tagged: 0, moved: 1, auto_responses: 1 });
        assert_eq!(store.moved, vec![(vec![MessageId(5)], "Filtered".to_string())]);
    }

    #[test]
    fn first_failure_touches_nothing() {
        let mut store = FakeStore {
            fail_append_on_call: Some(0),
            ..Default::default()
        };
        let config = tag_config(None, None);
        let matched = [message(1, "A")];
        let err = apply_actions(&matched, &config, &mut store, &FakeSender::default()).unwrap_err();
        let ActionError::Partial { completed, .. } = err;
        assert_eq!(completed, ActionReport::default());
        assert!(store.deleted.is_empty());
        assert!(store.selected.is_none());
    }
}
