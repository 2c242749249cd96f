//! Fetched mail messages and raw-header rewriting.

use std::fmt;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, PartType};

use super::Flag;

/// Store-assigned identifier (IMAP UID), stable within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message fetched from the store, held read-only for one batch.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub id: MessageId,
    /// Sender address (bare `user@host`).
    pub sender: String,
    /// Decoded subject, empty if absent.
    pub subject: String,
    /// Plain-text body, if the message has one.
    pub text: Option<String>,
    /// HTML body, if the message has one.
    pub html: Option<String>,
    /// Transport form, used to clone the message.
    pub raw: Vec<u8>,
    pub flags: Vec<Flag>,
    /// Arrival time (server internal date, else the Date header).
    pub received_at: DateTime<Utc>,
}

impl MailMessage {
    /// Parse a raw RFC 5322 message.
    ///
    /// Unparseable input still yields a message (empty fields) so one broken
    /// mail never aborts a batch.
    pub fn parse(
        id: MessageId,
        raw: Vec<u8>,
        flags: Vec<Flag>,
        internal_date: Option<DateTime<Utc>>,
    ) -> Self {
        let mut message = Self {
            id,
            sender: String::new(),
            subject: String::new(),
            text: None,
            html: None,
            raw: Vec::new(),
            flags,
            received_at: internal_date.unwrap_or_else(Utc::now),
        };

        if let Some(parsed) = MessageParser::default().parse(&raw[..]) {
            message.sender = parsed
                .from()
                .and_then(|addr| addr.first())
                .and_then(|a| a.address())
                .map(|s| s.to_string())
                .unwrap_or_default();
            message.subject = parsed.subject().unwrap_or_default().to_string();
            message.text = parsed.text_part(0).and_then(|part| match &part.body {
                PartType::Text(text) => Some(text.to_string()),
                _ => None,
            });
            message.html = parsed.html_part(0).and_then(|part| match &part.body {
                PartType::Html(html) => Some(html.to_string()),
                _ => None,
            });
            if internal_date.is_none()
                && let Some(date) = parsed
                    .date()
                    .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
            {
                message.received_at = date;
            }
        }

        message.raw = raw;
        message
    }

    pub fn is_seen(&self) -> bool {
        self.flags.contains(&Flag::Seen)
    }

    /// Whether the subject already carries the `[tag]` prefix.
    pub fn has_tag(&self, tag: &str) -> bool {
        let marker = format!("[{tag}]");
        let subject = self.subject.trim_start();
        subject == marker || subject.starts_with(&format!("{marker} "))
    }

    /// Raw form with `"[tag] "` prepended to the Subject header.
    ///
    /// Already-tagged messages come back unchanged. The existing header value
    /// keeps its original encoding; only the prefix is inserted.
    pub fn tagged_raw(&self, tag: &str) -> Vec<u8> {
        if self.has_tag(tag) {
            return self.raw.clone();
        }
        prefix_subject(&self.raw, &format!("[{tag}] "))
    }
}

/// Insert `prefix` at the start of the Subject header value, adding the
/// header when it is missing.
fn prefix_subject(raw: &[u8], prefix: &str) -> Vec<u8> {
    let header_end = header_block_end(raw);
    let mut line_start = 0;

    while line_start < header_end {
        let line_end = raw[line_start..header_end]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(header_end, |p| line_start + p + 1);
        let line = &raw[line_start..line_end];

        if line.len() >= 8 && line[..8].eq_ignore_ascii_case(b"subject:") {
            let mut insert_at = line_start + 8;
            let value_start = insert_at;
            while insert_at < line_end && matches!(raw[insert_at], b' ' | b'\t') {
                insert_at += 1;
            }
            let mut out = Vec::with_capacity(raw.len() + prefix.len() + 1);
            out.extend_from_slice(&raw[..insert_at]);
            if insert_at == value_start {
                out.push(b' ');
            }
            out.extend_from_slice(prefix.as_bytes());
            out.extend_from_slice(&raw[insert_at..]);
            return out;
        }

        line_start = line_end;
    }

    let newline: &[u8] = if raw.windows(2).any(|w| w == b"\r\n") {
        b"\r\n"
    } else {
        b"\n"
    };
    let mut out = Vec::with_capacity(raw.len() + prefix.len() + 12);
    out.extend_from_slice(b"Subject: ");
    out.extend_from_slice(prefix.trim_end().as_bytes());
    out.extend_from_slice(newline);
    out.extend_from_slice(raw);
    out
}

/// Offset of the blank line ending the header block (or the end of input).
fn header_block_end(raw: &[u8]) -> usize {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = raw.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(a), Some(b)) if a < b => a + 2,
        (_, Some(b)) => b + 1,
        (Some(a), None) => a + 2,
        (None, None) => raw.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "From: Alice Example <alice@example.org>\r\n\
        To: desk@example.org\r\n\
        Subject: Original subject\r\n\
        Date: Tue, 1 Jun 2021 10:00:00 +0000\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Hello\tthere\r\n";

    const HTML_ONLY: &str = "From: bob@example.org\r\n\
        Subject: Html only\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <html><body><p>Hi <b>Bob</b></p></body></html>\r\n";

    fn parse(raw: &str) -> MailMessage {
        MailMessage::parse(MessageId(7), raw.as_bytes().to_vec(), vec![], None)
    }

    #[test]
    fn parses_headers_and_text() {
        let msg = parse(PLAIN);
        assert_eq!(msg.sender, "alice@example.org");
        assert_eq!(msg.subject, "Original subject");
        assert!(msg.text.as_deref().unwrap().starts_with("Hello\tthere"));
        assert!(msg.html.is_none());
        assert_eq!(msg.received_at.to_rfc3339(), "2021-06-01T10:00:00+00:00");
    }

    #[test]
    fn html_only_message_has_no_text() {
        let msg = parse(HTML_ONLY);
        assert!(msg.text.is_none());
        assert!(msg.html.as_deref().unwrap().contains("<b>Bob</b>"));
    }

    #[test]
    fn internal_date_wins_over_header() {
        let internal = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let msg =
            MailMessage::parse(MessageId(1), PLAIN.as_bytes().to_vec(), vec![], Some(internal));
        assert_eq!(msg.received_at, internal);
    }

    #[test]
    fn garbage_still_yields_message() {
        let msg = MailMessage::parse(MessageId(3), Vec::new(), vec![Flag::Seen], None);
        assert_eq!(msg.subject, "");
        assert!(msg.is_seen());
    }

    #[test]
    fn tagging_prefixes_subject() {
        let msg = parse(PLAIN);
        let tagged = parse(std::str::from_utf8(&msg.tagged_raw("VAC")).unwrap());
        assert_eq!(tagged.subject, "[VAC] Original subject");
        assert_eq!(tagged.sender, "alice@example.org");
    }

    #[test]
    fn tagging_is_idempotent() {
        let once = parse(PLAIN).tagged_raw("VAC");
        let msg = MailMessage::parse(MessageId(7), once.clone(), vec![], None);
        assert_eq!(msg.subject, "[VAC] Original subject");
        let twice = msg.tagged_raw("VAC");
        assert_eq!(once, twice);
        let reparsed = MailMessage::parse(MessageId(7), twice, vec![], None);
        assert_eq!(reparsed.subject, "[VAC] Original subject");
    }

    #[test]
    fn tagging_keeps_encoded_words() {
        let raw = "Subject: =?utf-8?B?SW1wZnRlcm1pbiDDpG5kZXJu?=\r\n\r\nbody\r\n";
        let msg = parse(raw);
        assert_eq!(msg.subject, "Impftermin ändern");
        let tagged = parse(std::str::from_utf8(&msg.tagged_raw("VAC")).unwrap());
        assert_eq!(tagged.subject, "[VAC] Impftermin ändern");
    }

    #[test]
    fn tagging_adds_missing_subject() {
        let raw = "From: carol@example.org\r\n\r\nbody\r\n";
        let msg = parse(raw);
        let tagged_raw = msg.tagged_raw("VAC");
        assert!(tagged_raw.starts_with(b"Subject: [VAC]\r\nFrom:"));
        assert!(parse(std::str::from_utf8(&tagged_raw).unwrap()).has_tag("VAC"));
    }

    #[test]
    fn subject_in_body_is_not_touched() {
        let raw = "From: dave@example.org\n\nSubject: not a header\n";
        let tagged = prefix_subject(raw.as_bytes(), "[VAC] ");
        assert_eq!(
            std::str::from_utf8(&tagged).unwrap(),
            "Subject: [VAC]\nFrom: dave@example.org\n\nSubject: not a header\n"
        );
    }
}
