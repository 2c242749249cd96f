//! Configuration types.
//!
//! Settings are a JSON document of categories, each a map of named string
//! values:
//!
//! ```json
//! { "Mail": { "imap server": "imap.example.org", "imap port": "993" },
//!   "Filter": { "filter tag": "VAC" },
//!   "Machine Learning": { "threshold": "55" } }
//! ```
//!
//! [`Settings`] is the raw, persistable form. [`ReceptionistConfig`] is the
//! validated form handed to the pipeline at construction time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::classifier::Threshold;

/// Setting categories and keys.
pub mod keys {
    pub const MAIL: &str = "Mail";
    pub const FILTER: &str = "Filter";
    pub const MACHINE_LEARNING: &str = "Machine Learning";

    pub const LOGIN: &str = "login mail address";
    pub const IMAP_SERVER: &str = "imap server";
    pub const IMAP_PORT: &str = "imap port";
    pub const SMTP_SERVER: &str = "smtp server";
    pub const SMTP_PORT: &str = "smtp port";
    pub const INBOX_FOLDER: &str = "default mail folder";
    pub const AUTO_RESPONSE: &str = "send auto-response mail";
    pub const TLS_VERSION: &str = "tls version";

    pub const POSITIVE_FOLDER: &str = "folder for positive examples";
    pub const NEGATIVE_FOLDER: &str = "folder for negative examples";
    pub const FILTERED_FOLDER: &str = "filtered folder";
    pub const FILTER_TAG: &str = "filter tag";

    pub const THRESHOLD: &str = "threshold";
    pub const USE_BUILTIN: &str = "use built-in model";
    pub const BUILTIN_VECTORS: &str = "built-in vectors";
    pub const MAX_TEXT_CHARS: &str = "max text chars";
    pub const EMBEDDING_BACKEND: &str = "embedding backend";
    pub const EMBEDDING_MODEL: &str = "embedding model";
    pub const EMBEDDING_ENDPOINT: &str = "embedding endpoint";
}

/// Environment variable holding the mail account password.
pub const PASSWORD_ENV: &str = "MAIL_RECEPTIONIST_MAIL_PW";

/// Environment variable holding the optional embedding service API key.
pub const EMBEDDING_KEY_ENV: &str = "MAIL_RECEPTIONIST_EMBEDDING_KEY";

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

type Sections = BTreeMap<String, BTreeMap<String, String>>;

// ── Raw settings ────────────────────────────────────────────────────

/// Categorized string settings, optionally backed by a file on disk.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    path: Option<PathBuf>,
    sections: Sections,
}

impl Settings {
    /// Read settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let sections: Sections = serde_json::from_str(&raw)?;
        info!(path = %path.display(), "Settings loaded");
        Ok(Self {
            path: Some(path.to_path_buf()),
            sections,
        })
    }

    /// Settings that live only in memory; [`Settings::persist`] never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Builder-style setter, mainly for tests and defaults.
    pub fn with(mut self, section: &str, key: &str, value: &str) -> Self {
        self.set(section, key, value);
        self
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a raw value.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Look up a value, treating blank strings as absent.
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Set a value in memory.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Set a value and write the settings back to their file.
    pub fn persist(&mut self, section: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set(section, key, value);
        self.save()
    }

    /// Write all settings back to their file. No-op for in-memory settings.
    pub fn save(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.sections)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Resolve a file name relative to the settings file directory.
    pub fn resolve(&self, file: &str) -> PathBuf {
        let file = Path::new(file);
        if file.is_absolute() {
            return file.to_path_buf();
        }
        match self.path.as_deref().and_then(Path::parent) {
            Some(dir) => dir.join(file),
            None => file.to_path_buf(),
        }
    }
}

// ── Validated configuration ─────────────────────────────────────────

/// Minimum TLS version for IMAP and SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2 and 1.3.
    #[default]
    Tls12,
    /// TLS 1.3 only.
    Tls13,
}

/// Which embedding provider to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingBackend {
    /// OpenAI-compatible HTTP embedding service.
    #[default]
    Http,
    /// Local ONNX model via fastembed (requires the `fastembed` feature).
    Fastembed,
}

/// Mail account settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub login: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Folder new mail is fetched from.
    pub inbox_folder: String,
    /// Auto-response template file, resolved against the settings directory.
    pub auto_response_template: Option<PathBuf>,
    pub tls: TlsVersion,
}

/// Filtering settings.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub positive_folder: String,
    pub negative_folder: String,
    pub filtered_folder: Option<String>,
    pub tag: Option<String>,
}

/// Classification settings.
#[derive(Debug, Clone)]
pub struct MlConfig {
    pub threshold: Threshold,
    pub use_builtin: bool,
    pub builtin_vectors: Option<PathBuf>,
    pub max_text_chars: Option<usize>,
    pub backend: EmbeddingBackend,
    pub model: String,
    pub endpoint: Option<String>,
}

/// Fully validated configuration for one run.
#[derive(Debug, Clone)]
pub struct ReceptionistConfig {
    pub mail: MailConfig,
    pub filter: FilterConfig,
    pub ml: MlConfig,
}

impl ReceptionistConfig {
    /// Validate settings, collecting every violation before failing.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut v = Validator {
            settings,
            violations: Vec::new(),
        };

        let login = v.required(keys::MAIL, keys::LOGIN);
        let imap_host = v.required(keys::MAIL, keys::IMAP_SERVER);
        let imap_port = v.port(keys::MAIL, keys::IMAP_PORT, DEFAULT_IMAP_PORT);
        let smtp_host = v.required(keys::MAIL, keys::SMTP_SERVER);
        let smtp_port = v.port(keys::MAIL, keys::SMTP_PORT, DEFAULT_SMTP_PORT);
        let inbox_folder = v.required(keys::MAIL, keys::INBOX_FOLDER);
        let auto_response_template = settings
            .get_non_empty(keys::MAIL, keys::AUTO_RESPONSE)
            .map(|f| settings.resolve(f));
        let tls = v.tls_version();

        let positive_folder = v.required(keys::FILTER, keys::POSITIVE_FOLDER);
        let negative_folder = v.required(keys::FILTER, keys::NEGATIVE_FOLDER);
        let filtered_folder = settings
            .get_non_empty(keys::FILTER, keys::FILTERED_FOLDER)
            .map(String::from);
        let tag = settings
            .get_non_empty(keys::FILTER, keys::FILTER_TAG)
            .map(String::from);
        if filtered_folder.is_none() && tag.is_none() {
            v.violations.push(format!(
                "Both <{}> and <{}> are empty. At least one of them has to be set.",
                keys::FILTER_TAG,
                keys::FILTERED_FOLDER
            ));
        }

        let threshold = v.threshold();
        let use_builtin = v.flag(keys::MACHINE_LEARNING, keys::USE_BUILTIN);
        let builtin_vectors = settings
            .get_non_empty(keys::MACHINE_LEARNING, keys::BUILTIN_VECTORS)
            .map(|f| settings.resolve(f));
        if use_builtin && builtin_vectors.is_none() {
            v.violations.push(format!(
                "Setting <{}> is enabled but <{}> is empty.",
                keys::USE_BUILTIN,
                keys::BUILTIN_VECTORS
            ));
        }
        let max_text_chars = v.optional_count(keys::MACHINE_LEARNING, keys::MAX_TEXT_CHARS);
        let backend = v.backend();
        let model = settings
            .get_non_empty(keys::MACHINE_LEARNING, keys::EMBEDDING_MODEL)
            .unwrap_or(DEFAULT_EMBEDDING_MODEL)
            .to_string();
        let endpoint = settings
            .get_non_empty(keys::MACHINE_LEARNING, keys::EMBEDDING_ENDPOINT)
            .map(String::from);
        if backend == EmbeddingBackend::Http && endpoint.is_none() {
            v.violations.push(format!(
                "Setting <{}> is required for the http embedding backend.",
                keys::EMBEDDING_ENDPOINT
            ));
        }

        let threshold = match threshold {
            Some(t) if v.violations.is_empty() => t,
            _ => return Err(ConfigError::Invalid(v.violations)),
        };

        Ok(Self {
            mail: MailConfig {
                login,
                imap_host,
                imap_port,
                smtp_host,
                smtp_port,
                inbox_folder,
                auto_response_template,
                tls,
            },
            filter: FilterConfig {
                positive_folder,
                negative_folder,
                filtered_folder,
                tag,
            },
            ml: MlConfig {
                threshold,
                use_builtin,
                builtin_vectors,
                max_text_chars,
                backend,
                model,
                endpoint,
            },
        })
    }
}

/// Collects violations while extracting typed values.
struct Validator<'a> {
    settings: &'a Settings,
    violations: Vec<String>,
}

impl Validator<'_> {
    fn required(&mut self, section: &str, key: &str) -> String {
        match self.settings.get_non_empty(section, key) {
            Some(value) => value.to_string(),
            None => {
                self.violations
                    .push(format!("Setting <{key}> is not a string or is empty."));
                String::new()
            }
        }
    }

    fn port(&mut self, section: &str, key: &str, default: u16) -> u16 {
        match self.settings.get_non_empty(section, key) {
            None => default,
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    self.violations
                        .push(format!("Setting <{key}> is not a valid port number: {raw:?}."));
                    default
                }
            },
        }
    }

    fn flag(&mut self, section: &str, key: &str) -> bool {
        match self.settings.get_non_empty(section, key) {
            None => false,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                self.violations
                    .push(format!("Setting <{key}> is not a boolean: {raw:?}."));
                false
            }),
        }
    }

    fn optional_count(&mut self, section: &str, key: &str) -> Option<usize> {
        let raw = self.settings.get_non_empty(section, key)?;
        match raw.parse::<usize>() {
            Ok(0) | Err(_) => {
                self.violations
                    .push(format!("Setting <{key}> is not a positive integer: {raw:?}."));
                None
            }
            Ok(n) => Some(n),
        }
    }

    fn threshold(&mut self) -> Option<Threshold> {
        let key = keys::THRESHOLD;
        let Some(raw) = self.settings.get_non_empty(keys::MACHINE_LEARNING, key) else {
            self.violations
                .push(format!("Setting <{key}> is not a string or is empty."));
            return None;
        };
        match raw.parse::<u8>().ok().and_then(Threshold::from_percent) {
            Some(t) => Some(t),
            None => {
                self.violations.push(format!(
                    "Setting <{key}> must be an integer percentage between 1 and 99: {raw:?}."
                ));
                None
            }
        }
    }

    fn tls_version(&mut self) -> TlsVersion {
        match self.settings.get_non_empty(keys::MAIL, keys::TLS_VERSION) {
            None | Some("1.2") => TlsVersion::Tls12,
            Some("1.3") => TlsVersion::Tls13,
            Some(other) => {
                self.violations.push(format!(
                    "Setting <{}> must be 1.2 or 1.3: {other:?}.",
                    keys::TLS_VERSION
                ));
                TlsVersion::Tls12
            }
        }
    }

    fn backend(&mut self) -> EmbeddingBackend {
        let raw = self
            .settings
            .get_non_empty(keys::MACHINE_LEARNING, keys::EMBEDDING_BACKEND);
        match raw.map(str::to_lowercase).as_deref() {
            None | Some("http") => EmbeddingBackend::Http,
            Some("fastembed") => EmbeddingBackend::Fastembed,
            Some(other) => {
                self.violations.push(format!(
                    "Setting <{}> must be http or fastembed: {other:?}.",
                    keys::EMBEDDING_BACKEND
                ));
                EmbeddingBackend::Http
            }
        }
    }
}

/// Parse a boolean the lenient way settings files spell them.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        Settings::in_memory()
            .with(keys::MAIL, keys::LOGIN, "desk@example.org")
            .with(keys::MAIL, keys::IMAP_SERVER, "imap.example.org")
            .with(keys::MAIL, keys::IMAP_PORT, "993")
            .with(keys::MAIL, keys::SMTP_SERVER, "smtp.example.org")
            .with(keys::MAIL, keys::SMTP_PORT, "465")
            .with(keys::MAIL, keys::INBOX_FOLDER, "INBOX")
            .with(keys::FILTER, keys::POSITIVE_FOLDER, "Receptionist/Positive")
            .with(keys::FILTER, keys::NEGATIVE_FOLDER, "Receptionist/Negative")
            .with(keys::FILTER, keys::FILTERED_FOLDER, "Receptionist/Filtered")
            .with(keys::FILTER, keys::FILTER_TAG, "VAC")
            .with(keys::MACHINE_LEARNING, keys::THRESHOLD, "55")
            .with(keys::MACHINE_LEARNING, keys::EMBEDDING_ENDPOINT, "http://localhost:8080/v1")
    }

    #[test]
    fn valid_settings_parse() {
        let config = ReceptionistConfig::from_settings(&valid_settings()).unwrap();
        assert_eq!(config.mail.imap_port, 993);
        assert_eq!(config.filter.tag.as_deref(), Some("VAC"));
        assert!((config.ml.threshold.value() - 0.55).abs() < 1e-6);
        assert_eq!(config.ml.backend, EmbeddingBackend::Http);
        assert_eq!(config.mail.tls, TlsVersion::Tls12);
        assert!(config.mail.auto_response_template.is_none());
    }

    #[test]
    fn ports_default_when_absent() {
        let mut settings = valid_settings();
        settings.set(keys::MAIL, keys::IMAP_PORT, "");
        settings.set(keys::MAIL, keys::SMTP_PORT, " ");
        let config = ReceptionistConfig::from_settings(&settings).unwrap();
        assert_eq!(config.mail.imap_port, 993);
        assert_eq!(config.mail.smtp_port, 465);
    }

    #[test]
    fn collects_all_violations() {
        let settings = valid_settings()
            .with(keys::MAIL, keys::IMAP_PORT, "nine-nine-three")
            .with(keys::MAIL, keys::LOGIN, "")
            .with(keys::FILTER, keys::FILTER_TAG, "")
            .with(keys::FILTER, keys::FILTERED_FOLDER, "")
            .with(keys::MACHINE_LEARNING, keys::THRESHOLD, "150");

        let err = ReceptionistConfig::from_settings(&settings).unwrap_err();
        let violations = err.violations();
        assert_eq!(violations.len(), 4, "{violations:?}");
        assert!(violations.iter().any(|v| v.contains(keys::IMAP_PORT)));
        assert!(violations.iter().any(|v| v.contains(keys::LOGIN)));
        assert!(violations.iter().any(|v| v.contains("At least one")));
        assert!(violations.iter().any(|v| v.contains(keys::THRESHOLD)));
    }

    #[test]
    fn builtin_requires_vector_file() {
        let settings = valid_settings().with(keys::MACHINE_LEARNING, keys::USE_BUILTIN, "yes");
        let err = ReceptionistConfig::from_settings(&settings).unwrap_err();
        assert!(err.violations()[0].contains(keys::BUILTIN_VECTORS));
    }

    #[test]
    fn tag_only_is_enough() {
        let settings = valid_settings().with(keys::FILTER, keys::FILTERED_FOLDER, "");
        let config = ReceptionistConfig::from_settings(&settings).unwrap();
        assert!(config.filter.filtered_folder.is_none());
    }

    #[test]
    fn unknown_backend_and_tls_rejected() {
        let settings = valid_settings()
            .with(keys::MACHINE_LEARNING, keys::EMBEDDING_BACKEND, "tensorflow")
            .with(keys::MAIL, keys::TLS_VERSION, "1.0");
        let err = ReceptionistConfig::from_settings(&settings).unwrap_err();
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn fastembed_backend_needs_no_endpoint() {
        let settings = valid_settings()
            .with(keys::MACHINE_LEARNING, keys::EMBEDDING_BACKEND, "FastEmbed")
            .with(keys::MACHINE_LEARNING, keys::EMBEDDING_ENDPOINT, "");
        let config = ReceptionistConfig::from_settings(&settings).unwrap();
        assert_eq!(config.ml.backend, EmbeddingBackend::Fastembed);
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn persist_writes_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"Filter": {"filtered folder": "A/B"}}"#).unwrap();

        let mut settings = Settings::load(&path).unwrap();
        settings
            .persist(keys::FILTER, keys::FILTERED_FOLDER, "A|B")
            .unwrap();

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.get(keys::FILTER, keys::FILTERED_FOLDER), Some("A|B"));
    }

    #[test]
    fn resolve_is_relative_to_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{}").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.resolve("auto-response.txt"), dir.path().join("auto-response.txt"));
    }

    #[test]
    fn in_memory_persist_does_not_touch_disk() {
        let mut settings = Settings::in_memory();
        settings.persist(keys::FILTER, keys::FILTER_TAG, "VAC").unwrap();
        assert_eq!(settings.get(keys::FILTER, keys::FILTER_TAG), Some("VAC"));
        assert!(settings.path().is_none());
    }
}
