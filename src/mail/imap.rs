//! Blocking IMAP session over rustls.
//!
//! One session per batch. Commands are tagged `A0001`, `A0002`, ... and every
//! response is read to its tagged completion before the next command goes out.
//! Server literals (`{n}`) are read as raw bytes, so message bodies arrive
//! byte-exact.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{GeneralPurpose, general_purpose};
use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::zeroize::Zeroize;
use tracing::{debug, info, warn};

use super::{Credential, Flag, MailMessage, MailStore, MessageId};
use crate::config::{MailConfig, TlsVersion};
use crate::error::MailError;

/// TLS stream used for real connections.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// UIDs per FETCH command, keeps command lines and responses bounded.
const FETCH_CHUNK: usize = 100;

const MUTF7: GeneralPurpose = GeneralPurpose::new(&alphabet::IMAP_MUTF7, general_purpose::NO_PAD);

static FETCH_UID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bUID (\d+)").unwrap());
static FETCH_FLAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bFLAGS \(([^)]*)\)").unwrap());
static FETCH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bINTERNALDATE "([^"]+)""#).unwrap());

/// A response line with any literals it carried.
#[derive(Debug)]
struct Line {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// All untagged lines of a command plus its tagged completion.
#[derive(Debug)]
struct Response {
    untagged: Vec<Line>,
    /// Completion text after the tag, e.g. `OK SELECT completed`.
    status: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status.starts_with("OK")
    }
}

/// An IMAP session over any byte stream.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    server: String,
    tag_counter: u32,
    capabilities: HashSet<String>,
    closed: bool,
}

impl ImapSession<TlsStream> {
    /// Connect over TLS, log in, and load server capabilities.
    pub fn connect(config: &MailConfig, credential: &Credential) -> Result<Self, MailError> {
        let server = format!("{}:{}", config.imap_host, config.imap_port);
        let connection_error = |reason: String| MailError::Connection {
            server: server.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
            .map_err(|e| connection_error(e.to_string()))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;

        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| connection_error(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_client_config(config.tls), server_name)
            .map_err(|e| connection_error(format!("TLS setup failed: {e}")))?;

        let mut session = Self::from_stream(rustls::StreamOwned::new(conn, tcp), &server)?;
        session.login(&config.login, credential)?;
        session.load_capabilities()?;
        info!(server = %server, "Connected to IMAP account");
        Ok(session)
    }
}

/// rustls client configuration with the webpki root store.
pub fn tls_client_config(version: TlsVersion) -> Arc<rustls::ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let builder = match version {
        TlsVersion::Tls12 => rustls::ClientConfig::builder(),
        TlsVersion::Tls13 => {
            rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        }
    };
    Arc::new(
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap an established stream and consume the server greeting.
    pub fn from_stream(stream: S, server: &str) -> Result<Self, MailError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            server: server.to_string(),
            tag_counter: 0,
            capabilities: HashSet::new(),
            closed: false,
        };

        let greeting = session.read_line()?;
        if !(greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH")) {
            session.closed = true;
            return Err(MailError::Connection {
                server: server.to_string(),
                reason: format!("unexpected greeting: {}", greeting.text.trim_end()),
            });
        }
        Ok(session)
    }

    /// Authenticate with LOGIN. The command line holding the password is
    /// zeroized right after it is written.
    pub fn login(&mut self, user: &str, credential: &Credential) -> Result<(), MailError> {
        let tag = self.next_tag();
        let mut line = format!(
            "{tag} LOGIN {} {}\r\n",
            quote(user),
            quote(credential.expose())
        );
        let written = self.write_bytes(line.as_bytes());
        line.zeroize();
        written?;

        let response = self.read_response(&tag)?;
        if !response.is_ok() {
            warn!(server = %self.server, "IMAP login rejected");
            return Err(MailError::AuthFailed {
                server: self.server.clone(),
            });
        }
        Ok(())
    }

    /// Query and cache server capabilities.
    pub fn load_capabilities(&mut self) -> Result<(), MailError> {
        let response = self.command("CAPABILITY")?;
        self.capabilities = response
            .untagged
            .iter()
            .filter_map(|l| l.text.strip_prefix("* CAPABILITY "))
            .flat_map(|caps| caps.split_whitespace())
            .map(str::to_ascii_uppercase)
            .collect();
        debug!(capabilities = ?self.capabilities, "IMAP capabilities");
        Ok(())
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(&capability.to_ascii_uppercase())
    }

    // ── Wire helpers ────────────────────────────────────────────────

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{:04}", self.tag_counter)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), MailError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Read one logical line, following any literals it announces.
    fn read_line(&mut self) -> Result<Line, MailError> {
        let mut text = String::new();
        let mut literals = Vec::new();

        loop {
            let mut buf = Vec::new();
            if self.stream.read_until(b'\n', &mut buf)? == 0 {
                return Err(MailError::Protocol("IMAP connection closed".into()));
            }
            let chunk = String::from_utf8_lossy(&buf);
            let chunk = chunk.trim_end_matches(['\r', '\n']);

            match literal_size(chunk) {
                Some((prefix, size)) => {
                    text.push_str(prefix);
                    let mut literal = vec![0u8; size];
                    self.stream.read_exact(&mut literal)?;
                    literals.push(literal);
                }
                None => {
                    text.push_str(chunk);
                    return Ok(Line { text, literals });
                }
            }
        }
    }

    fn read_response(&mut self, tag: &str) -> Result<Response, MailError> {
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line
                .text
                .strip_prefix(tag)
                .and_then(|rest| rest.strip_prefix(' '))
            {
                return Ok(Response {
                    untagged,
                    status: status.to_string(),
                });
            }
            untagged.push(line);
        }
    }

    /// Send a command and read its full response, without judging the status.
    fn send(&mut self, command: &str) -> Result<Response, MailError> {
        let tag = self.next_tag();
        debug!(tag = %tag, command = %command, "IMAP command");
        self.write_bytes(format!("{tag} {command}\r\n").as_bytes())?;
        self.read_response(&tag)
    }

    /// Send a command; NO/BAD become [`MailError::Rejected`].
    fn command(&mut self, command: &str) -> Result<Response, MailError> {
        let response = self.send(command)?;
        if response.is_ok() {
            Ok(response)
        } else {
            Err(MailError::Rejected {
                command: command.to_string(),
                reason: response.status,
            })
        }
    }

    fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, MailError> {
        let response = self.command(&format!("UID SEARCH {criteria}"))?;
        Ok(response
            .untagged
            .iter()
            .filter_map(|l| l.text.strip_prefix("* SEARCH"))
            .flat_map(|ids| ids.split_whitespace())
            .filter_map(|id| id.parse().ok())
            .collect())
    }

    fn store_flags(
        &mut self,
        ids: &[MessageId],
        flags: &[Flag],
        value: bool,
    ) -> Result<(), MailError> {
        let sign = if value { '+' } else { '-' };
        self.command(&format!(
            "UID STORE {} {sign}FLAGS.SILENT ({})",
            uid_set(ids),
            flag_list(flags)
        ))?;
        Ok(())
    }

    /// Expunge exactly `ids`. Without UIDPLUS a plain EXPUNGE would also
    /// remove messages the user flagged `\Deleted` themselves, so the
    /// messages stay flagged and hidden from later searches instead.
    fn expunge(&mut self, ids: &[MessageId]) -> Result<(), MailError> {
        if self.has_capability("UIDPLUS") {
            self.command(&format!("UID EXPUNGE {}", uid_set(ids)))?;
        } else {
            warn!(
                server = %self.server,
                count = ids.len(),
                "Server lacks UIDPLUS; leaving messages flagged \\Deleted without expunging"
            );
        }
        Ok(())
    }
}

impl<S: Read + Write> MailStore for ImapSession<S> {
    fn select_folder(&mut self, path: &str) -> Result<(), MailError> {
        self.command(&format!("SELECT {}", mailbox(path)))?;
        Ok(())
    }

    fn folder_exists(&mut self, path: &str) -> Result<bool, MailError> {
        let response = self.command(&format!("LIST \"\" {}", mailbox(path)))?;
        Ok(response.untagged.iter().any(|l| l.text.starts_with("* LIST")))
    }

    fn create_folder(&mut self, path: &str) -> Result<(), MailError> {
        self.command(&format!("CREATE {}", mailbox(path)))?;
        Ok(())
    }

    fn fetch(&mut self, folder: &str, unseen_only: bool) -> Result<Vec<MailMessage>, MailError> {
        self.select_folder(folder)?;
        let uids = self.uid_search(if unseen_only { "UNSEEN UNDELETED" } else { "UNDELETED" })?;

        let mut messages = Vec::with_capacity(uids.len());
        for chunk in uids.chunks(FETCH_CHUNK) {
            let ids: Vec<MessageId> = chunk.iter().copied().map(MessageId).collect();
            let response = self.command(&format!(
                "UID FETCH {} (UID FLAGS INTERNALDATE BODY.PEEK[])",
                uid_set(&ids)
            ))?;
            messages.extend(response.untagged.into_iter().filter_map(parse_fetch));
        }
        debug!(folder = %folder, count = messages.len(), "Fetched messages");
        Ok(messages)
    }

    fn append(
        &mut self,
        folder: &str,
        raw: &[u8],
        timestamp: DateTime<Utc>,
        flags: &[Flag],
    ) -> Result<(), MailError> {
        let tag = self.next_tag();
        let command = format!(
            "APPEND {} ({}) \"{}\"",
            mailbox(folder),
            flag_list(flags),
            imap_date(timestamp)
        );
        debug!(tag = %tag, command = %command, size = raw.len(), "IMAP command");
        self.write_bytes(format!("{tag} {command} {{{}}}\r\n", raw.len()).as_bytes())?;

        // Wait for the continuation request before sending the literal.
        loop {
            let line = self.read_line()?;
            if line.text.starts_with('+') {
                break;
            }
            if let Some(status) = line.text.strip_prefix(&format!("{tag} ")) {
                return Err(MailError::Rejected {
                    command,
                    reason: status.to_string(),
                });
            }
        }

        self.write_bytes(raw)?;
        self.write_bytes(b"\r\n")?;
        let response = self.read_response(&tag)?;
        if !response.is_ok() {
            return Err(MailError::Rejected {
                command,
                reason: response.status,
            });
        }
        Ok(())
    }

    fn delete(&mut self, ids: &[MessageId]) -> Result<(), MailError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store_flags(ids, &[Flag::Deleted], true)?;
        self.expunge(ids)
    }

    fn move_messages(&mut self, ids: &[MessageId], folder: &str) -> Result<(), MailError> {
        if ids.is_empty() {
            return Ok(());
        }
        if self.has_capability("MOVE") {
            self.command(&format!("UID MOVE {} {}", uid_set(ids), mailbox(folder)))?;
            return Ok(());
        }
        self.command(&format!("UID COPY {} {}", uid_set(ids), mailbox(folder)))?;
        self.delete(ids)
    }

    fn flag(&mut self, ids: &[MessageId], flags: &[Flag], value: bool) -> Result<(), MailError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store_flags(ids, flags, value)
    }

    fn logout(&mut self) -> Result<(), MailError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.send("LOGOUT")?;
        info!(server = %self.server, "Disconnected from IMAP account");
        Ok(())
    }
}

impl<S: Read + Write> Drop for ImapSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.logout() {
            debug!("IMAP logout on drop failed: {e}");
        }
    }
}

// ── Encoding and parsing helpers ────────────────────────────────────

/// If `line` ends with a `{n}` literal announcement, split it off.
fn literal_size(line: &str) -> Option<(&str, usize)> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    let size = body[open + 1..].parse().ok()?;
    Some((&line[..open], size))
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Quoted mailbox name in modified UTF-7.
fn mailbox(name: &str) -> String {
    quote(&encode_mailbox_name(name))
}

/// Encode a mailbox name as modified UTF-7 (RFC 3501, 5.1.3).
pub fn encode_mailbox_name(name: &str) -> String {
    fn flush(out: &mut String, pending: &mut Vec<u16>) {
        if pending.is_empty() {
            return;
        }
        let bytes: Vec<u8> = pending.iter().flat_map(|u| u.to_be_bytes()).collect();
        out.push('&');
        out.push_str(&MUTF7.encode(bytes));
        out.push('-');
        pending.clear();
    }

    let mut out = String::with_capacity(name.len());
    let mut pending: Vec<u16> = Vec::new();
    for ch in name.chars() {
        if (' '..='~').contains(&ch) {
            flush(&mut out, &mut pending);
            if ch == '&' {
                out.push_str("&-");
            } else {
                out.push(ch);
            }
        } else {
            let mut buf = [0u16; 2];
            pending.extend_from_slice(ch.encode_utf16(&mut buf));
        }
    }
    flush(&mut out, &mut pending);
    out
}

fn uid_set(ids: &[MessageId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn flag_list(flags: &[Flag]) -> String {
    flags
        .iter()
        .map(Flag::as_imap)
        .collect::<Vec<_>>()
        .join(" ")
}

/// IMAP `date-time`, e.g. `01-Jun-2021 10:00:00 +0000`.
fn imap_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%d-%b-%Y %H:%M:%S %z").to_string()
}

fn parse_imap_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    // Single-digit days are sent space-padded.
    let padded = if raw.as_bytes().get(1) == Some(&b'-') {
        format!("0{raw}")
    } else {
        raw.to_string()
    };
    DateTime::parse_from_str(&padded, "%d-%b-%Y %H:%M:%S %z")
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Turn one untagged FETCH line into a message; other lines yield `None`.
fn parse_fetch(line: Line) -> Option<MailMessage> {
    if !line.text.starts_with("* ") || !line.text.contains(" FETCH (") {
        return None;
    }
    let uid = FETCH_UID
        .captures(&line.text)
        .and_then(|c| c[1].parse().ok())?;
    let flags = FETCH_FLAGS
        .captures(&line.text)
        .map(|c| c[1].split_whitespace().map(Flag::from_imap).collect())
        .unwrap_or_default();
    let internal_date = FETCH_DATE
        .captures(&line.text)
        .and_then(|c| parse_imap_date(&c[1]));
    let raw = line.literals.into_iter().next()?;
    Some(MailMessage::parse(MessageId(uid), raw, flags, internal_date))
}
