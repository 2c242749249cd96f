//! Error types for Mail Receptionist.

use crate::pipeline::actions::ActionReport;

/// Top-level error type for a receptionist run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail server error: {0}")]
    Mail(#[from] MailError),

    #[error("Folder error: {0}")]
    Folder(#[from] FolderError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),
}

impl Error {
    /// Whether the run failed because of the settings rather than the environment.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Folder(FolderError::FallbackExhausted { .. })
        )
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Every violation found in one validation pass.
    #[error("Invalid settings:\n{}", format_violations(.0))]
    Invalid(Vec<String>),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Failed to load built-in vectors from {path}: {reason}")]
    BuiltinVectors { path: String, reason: String },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Single-violation shorthand.
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(vec![message.into()])
    }

    /// The list of violations, if this is a validation error.
    pub fn violations(&self) -> &[String] {
        match self {
            ConfigError::Invalid(list) => list,
            _ => &[],
        }
    }
}

fn format_violations(violations: &[String]) -> String {
    violations
        .iter()
        .map(|v| format!("- {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mail store (IMAP) and mail sender (SMTP) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Connection to {server} failed: {reason}")]
    Connection { server: String, reason: String },

    #[error("Authentication failed for {server}")]
    AuthFailed { server: String },

    /// The server answered NO or BAD to a command.
    #[error("Server rejected {command}: {reason}")]
    Rejected { command: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to send mail to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Folder provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum FolderError {
    #[error("Folder path is empty")]
    EmptyPath,

    #[error("Could not create folder {path} with separators {separators:?}: {reason}")]
    FallbackExhausted {
        path: String,
        separators: Vec<char>,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] MailError),
}

/// Embedding provider errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("Provider returned {got} embeddings for {expected} texts")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Mail action errors.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// A per-message step failed; `completed` covers the messages that were
    /// fully processed and finalized before the failure.
    #[error("Filtering stopped after {completed}: {source}")]
    Partial {
        completed: ActionReport,
        #[source]
        source: MailError,
    },
}

/// Result type alias for the receptionist.
pub type Result<T> = std::result::Result<T, Error>;
