//! Auto-response delivery over SMTP via lettre.

use lettre::message::header::ContentType;
use lettre::transport::smtp::SmtpTransportBuilder;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters, TlsVersion as SmtpTlsVersion};
use lettre::{Message, SmtpTransport, Transport};

use super::{Credential, MailSender};
use crate::config::{MailConfig, TlsVersion};
use crate::error::MailError;

/// Submission port that speaks STARTTLS; every other port gets implicit TLS.
const STARTTLS_PORT: u16 = 587;

/// Sends plain-text replies from the configured login address.
///
/// The password stays in the scrubbed [`Credential`] and a transport is built
/// per send. lettre's `Credentials` only accepts an owned `String`, so one
/// plain copy exists for the duration of each send and is released (not
/// zeroized) when the transport drops.
pub struct SmtpSender {
    host: String,
    port: u16,
    tls: TlsParameters,
    from: String,
    credential: Credential,
}

impl SmtpSender {
    pub fn new(config: &MailConfig, credential: Credential) -> Result<Self, MailError> {
        let min_version = match config.tls {
            TlsVersion::Tls12 => SmtpTlsVersion::Tlsv12,
            TlsVersion::Tls13 => SmtpTlsVersion::Tlsv13,
        };
        let tls = TlsParameters::builder(config.smtp_host.clone())
            .set_min_tls_version(min_version)
            .build_rustls()
            .map_err(|e| MailError::Connection {
                server: format!("{}:{}", config.smtp_host, config.smtp_port),
                reason: format!("TLS setup failed: {e}"),
            })?;

        let sender = Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            tls,
            from: config.login.clone(),
            credential,
        };
        // Surface relay errors now rather than on the first reply.
        sender.relay()?;
        Ok(sender)
    }

    fn relay(&self) -> Result<SmtpTransportBuilder, MailError> {
        let relay_error = |e: lettre::transport::smtp::Error| MailError::Connection {
            server: format!("{}:{}", self.host, self.port),
            reason: format!("SMTP relay error: {e}"),
        };
        let builder = if self.port == STARTTLS_PORT {
            SmtpTransport::starttls_relay(&self.host)
                .map_err(relay_error)?
                .tls(Tls::Required(self.tls.clone()))
        } else {
            SmtpTransport::relay(&self.host)
                .map_err(relay_error)?
                .tls(Tls::Wrapper(self.tls.clone()))
        };
        Ok(builder.port(self.port))
    }

    /// Authenticated transport for a single send.
    fn transport(&self) -> Result<SmtpTransport, MailError> {
        let credentials =
            Credentials::new(self.from.clone(), self.credential.expose().to_string());
        Ok(self.relay()?.credentials(credentials).build())
    }
}

impl MailSender for SmtpSender {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let email = build_message(&self.from, to, subject, body)?;
        self.transport()?
            .send(&email)
            .map_err(|e| MailError::SendFailed {
                to: to.to_string(),
                reason: format!("SMTP send failed: {e}"),
            })?;
        tracing::info!("Auto-response sent to {to}");
        Ok(())
    }
}

fn build_message(from: &str, to: &str, subject: &str, body: &str) -> Result<Message, MailError> {
    let failed = |reason: String| MailError::SendFailed {
        to: to.to_string(),
        reason,
    };
    Message::builder()
        .from(from.parse().map_err(|e| failed(format!("Invalid from address: {e}")))?)
        .to(to.parse().map_err(|e| failed(format!("Invalid to address: {e}")))?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| failed(format!("Failed to build email: {e}")))
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn builds_plain_text_reply() {
        let email = build_message(
            "desk@example.org",
            "alice@example.org",
            "Re: Termin",
            "Wir melden uns.",
        )
        .unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("From: desk@example.org"));
        assert!(formatted.contains("To: alice@example.org"));
        assert!(formatted.contains("Subject: Re: Termin"));
        assert!(formatted.contains("Content-Type: text/plain; charset=utf-8"));
    }

    fn mail_config(port: u16) -> MailConfig {
        MailConfig {
            login: "desk@example.org".into(),
            imap_host: "imap.example.org".into(),
            imap_port: 993,
            smtp_host: "smtp.example.org".into(),
            smtp_port: port,
            inbox_folder: "INBOX".into(),
            auto_response_template: None,
            tls: TlsVersion::Tls13,
        }
    }

    #[test]
    fn sender_owns_credential_and_builds_transport_per_send() {
        for port in [465, STARTTLS_PORT] {
            let credential = Credential::new(SecretString::from("hunter2".to_string()));
            let sender = SmtpSender::new(&mail_config(port), credential).unwrap();
            assert_eq!(sender.credential.expose(), "hunter2");
            assert!(sender.transport().is_ok());
            assert!(sender.transport().is_ok());
        }
    }

    #[test]
    fn invalid_recipient_is_send_failure() {
        let err = build_message("desk@example.org", "not an address", "Re: x", "body").unwrap_err();
        assert!(matches!(err, MailError::SendFailed { .. }));
    }
}
