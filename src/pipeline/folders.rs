//! Folder provisioning with hierarchy-separator fallback.
//!
//! Folders are walked root to leaf and each missing prefix is created. If
//! the server rejects a create (it does not nest with that separator), the
//! whole walk is retried once with the next separator candidate.

use std::fmt;

use tracing::{debug, info, warn};

use crate::error::{FolderError, MailError};
use crate::mail::MailStore;

/// Separators tried in order: `/` first, then `|`.
pub const DEFAULT_SEPARATORS: [char; 2] = ['/', '|'];

/// A folder path as ordered segments plus the separator joining them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderPath {
    segments: Vec<String>,
    separator: char,
}

impl FolderPath {
    /// Split `path` on `separator`, dropping empty segments.
    pub fn parse(path: &str, separator: char) -> Option<Self> {
        let segments: Vec<String> = path
            .split(separator)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        (!segments.is_empty()).then_some(Self {
            segments,
            separator,
        })
    }

    /// Same segments joined by another separator.
    pub fn with_separator(&self, separator: char) -> Self {
        Self {
            segments: self.segments.clone(),
            separator,
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Cumulative prefixes, root first: `A`, `A/B`, `A/B/C`.
    pub fn prefixes(&self) -> Vec<String> {
        let sep = self.separator.to_string();
        (1..=self.segments.len())
            .map(|n| self.segments[..n].join(&sep))
            .collect()
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(&self.separator.to_string()))
    }
}

/// Where a folder ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFolder {
    pub path: String,
    pub separator: char,
    /// The first separator was rejected; callers persist `path`.
    pub fell_back: bool,
}

/// Make sure `path` exists, creating missing levels.
///
/// An existing path costs only existence checks.
pub fn ensure_folder<S: MailStore + ?Sized>(
    store: &mut S,
    path: &str,
    separators: &[char],
) -> Result<ResolvedFolder, FolderError> {
    let separators = if separators.is_empty() {
        &DEFAULT_SEPARATORS[..]
    } else {
        separators
    };
    let first = separators[0];
    let folder = FolderPath::parse(path, first).ok_or(FolderError::EmptyPath)?;

    let reason = match walk(store, &folder) {
        Ok(()) => return Ok(resolved(&folder, false)),
        Err(MailError::Rejected { reason, .. }) => reason,
        Err(e) => return Err(e.into()),
    };

    let Some(&next) = separators.get(1) else {
        return Err(FolderError::FallbackExhausted {
            path: path.to_string(),
            separators: vec![first],
            reason,
        });
    };

    let retry = folder.with_separator(next);
    warn!(
        folder = %folder,
        fallback = %retry,
        "Server rejected nested folder; retrying with separator '{next}'"
    );
    match walk(store, &retry) {
        Ok(()) => {
            info!(folder = %retry, "Folder provisioned with fallback separator");
            Ok(resolved(&retry, true))
        }
        Err(MailError::Rejected { reason, .. }) => Err(FolderError::FallbackExhausted {
            path: path.to_string(),
            separators: vec![first, next],
            reason,
        }),
        Err(e) => Err(e.into()),
    }
}

fn walk<S: MailStore + ?Sized>(store: &mut S, folder: &FolderPath) -> Result<(), MailError> {
    for prefix in folder.prefixes() {
        if store.folder_exists(&prefix)? {
            continue;
        }
        debug!(folder = %prefix, "Creating folder");
        store.create_folder(&prefix)?;
    }
    Ok(())
}

fn resolved(folder: &FolderPath, fell_back: bool) -> ResolvedFolder {
    ResolvedFolder {
        path: folder.to_string(),
        separator: folder.separator(),
        fell_back,
    }
}
