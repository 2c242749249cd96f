//! Mail store and mail sender abstractions.
//!
//! The pipeline only talks to [`MailStore`] and [`MailSender`]; the IMAP and
//! SMTP implementations live in [`imap`] and [`smtp`].

pub mod credentials;
pub mod imap;
pub mod message;
pub mod smtp;

pub use credentials::Credential;
pub use imap::ImapSession;
pub use message::{MailMessage, MessageId};
pub use smtp::SmtpSender;

use chrono::{DateTime, Utc};

use crate::error::MailError;

/// System flags the receptionist reads or sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Keyword(String),
}

impl Flag {
    /// IMAP wire form.
    pub fn as_imap(&self) -> &str {
        match self {
            Flag::Seen => "\\Seen",
            Flag::Answered => "\\Answered",
            Flag::Flagged => "\\Flagged",
            Flag::Deleted => "\\Deleted",
            Flag::Draft => "\\Draft",
            Flag::Keyword(k) => k,
        }
    }

    /// Parse an IMAP flag atom.
    pub fn from_imap(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "\\seen" => Flag::Seen,
            "\\answered" => Flag::Answered,
            "\\flagged" => Flag::Flagged,
            "\\deleted" => Flag::Deleted,
            "\\draft" => Flag::Draft,
            _ => Flag::Keyword(raw.to_string()),
        }
    }
}

/// A mail store session (one exclusive connection per batch).
///
/// Identifier-based operations act on the currently selected folder.
pub trait MailStore {
    fn select_folder(&mut self, path: &str) -> Result<(), MailError>;

    fn folder_exists(&mut self, path: &str) -> Result<bool, MailError>;

    /// Create a folder. A server that does not support the requested
    /// nesting answers with [`MailError::Rejected`].
    fn create_folder(&mut self, path: &str) -> Result<(), MailError>;

    /// Select `folder` and fetch its messages without marking them seen.
    fn fetch(&mut self, folder: &str, unseen_only: bool) -> Result<Vec<MailMessage>, MailError>;

    fn append(
        &mut self,
        folder: &str,
        raw: &[u8],
        timestamp: DateTime<Utc>,
        flags: &[Flag],
    ) -> Result<(), MailError>;

    fn delete(&mut self, ids: &[MessageId]) -> Result<(), MailError>;

    fn move_messages(&mut self, ids: &[MessageId], folder: &str) -> Result<(), MailError>;

    fn flag(&mut self, ids: &[MessageId], flags: &[Flag], value: bool) -> Result<(), MailError>;

    fn mark_seen(&mut self, ids: &[MessageId], value: bool) -> Result<(), MailError> {
        self.flag(ids, &[Flag::Seen], value)
    }

    fn logout(&mut self) -> Result<(), MailError>;
}

/// Outbound mail (auto-responses).
pub trait MailSender {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_round_trip_is_case_insensitive() {
        assert_eq!(Flag::from_imap("\\SEEN"), Flag::Seen);
        assert_eq!(Flag::from_imap("\\Answered").as_imap(), "\\Answered");
        assert_eq!(
            Flag::from_imap("$Junk"),
            Flag::Keyword("$Junk".to_string())
        );
    }
}
