use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::probe::{absent_on_error, modified_at};
use crate::types::{CandidateFile, OutputKind};

/// Lowercase extension allow-list. Empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn for_kind(kind: OutputKind) -> Self {
        Self::of(kind.extensions())
    }

    pub fn is_unrestricted(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn accepts(&self, path: &Path) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .map(|ext| self.extensions.iter().any(|allowed| *allowed == ext))
            .unwrap_or(false)
    }
}

/// Finds the newest qualifying file in a single directory.
#[derive(Debug, Clone, Default)]
pub struct FileLocator {
    filter: ExtensionFilter,
    excluded: Vec<PathBuf>,
}

impl FileLocator {
    pub fn new(filter: ExtensionFilter) -> Self {
        Self {
            filter,
            excluded: Vec::new(),
        }
    }

    /// Never report `path`, even when it qualifies.
    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    /// Newest regular file in `directory` modified strictly after `since`.
    ///
    /// Listing and per-entry stat failures are treated as absence. Ties on
    /// mtime resolve to whichever entry the listing yields first.
    pub async fn find_newest(&self, since: DateTime<Utc>, directory: &Path) -> Option<CandidateFile> {
        let mut entries = absent_on_error("list", directory, tokio::fs::read_dir(directory).await)?;
        let mut newest: Option<CandidateFile> = None;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    debug!(dir = %directory.display(), error = %err, "directory listing interrupted");
                    break;
                }
            };

            let path = entry.path();
            if !self.filter.accepts(&path) || self.excluded.iter().any(|skip| *skip == path) {
                continue;
            }

            let Some(metadata) = absent_on_error("stat", &path, entry.metadata().await) else {
                continue;
            };
            let Some(modified) = modified_at(&path, &metadata) else {
                continue;
            };
            if modified <= since {
                continue;
            }

            if newest
                .as_ref()
                .map_or(true, |current| modified > current.discovered_at)
            {
                newest = Some(CandidateFile::new(path, modified));
            }
        }

        newest
    }
}
