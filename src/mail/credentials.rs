//! Mail account credential.
//!
//! The password lives in a [`SecretString`], which zeroizes its buffer when
//! dropped. A `Credential` is acquired per batch and moved into the batch, so
//! every exit path (success, error, panic unwind) scrubs it.

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Password for the configured login, scrubbed on drop.
pub struct Credential {
    secret: SecretString,
}

impl Credential {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Read the password from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(Self::new(SecretString::from(value))),
            _ => Err(ConfigError::MissingEnvVar(var.to_string())),
        }
    }

    pub(crate) fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}
