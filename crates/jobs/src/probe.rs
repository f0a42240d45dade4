//! Best-effort filesystem access for discovery.
//!
//! Producers write concurrently with our scans, so a failed listing, stat or
//! read during discovery means "not there (yet)". Every swallow goes through
//! [`absent_on_error`] so the boundary stays in one place.

use std::fmt::Display;
use std::fs::Metadata;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::trace;

/// Maps a failed discovery step to absence, logging at trace level.
pub(crate) fn absent_on_error<T, E: Display>(
    step: &str,
    path: &Path,
    result: Result<T, E>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            trace!(path = %path.display(), error = %err, "{step} failed, treating as absent");
            None
        }
    }
}

pub(crate) async fn stat(path: &Path) -> Option<Metadata> {
    absent_on_error("stat", path, tokio::fs::metadata(path).await)
}

/// Modification time of a regular file.
pub(crate) fn modified_at(path: &Path, metadata: &Metadata) -> Option<DateTime<Utc>> {
    if !metadata.is_file() {
        return None;
    }
    absent_on_error("mtime", path, metadata.modified()).map(DateTime::<Utc>::from)
}
