//! Discovery over a history root holding one directory per session.
//!
//! A session may keep an `entries.json` manifest of `{id, timestamp}` records.
//! The manifest timestamp is authoritative for that record. Sessions without
//! a readable manifest are scanned by mtime like a plain output directory.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::locator::{ExtensionFilter, FileLocator};
use crate::probe::{absent_on_error, stat};
use crate::types::{CandidateFile, TEXT_EXTENSIONS};

pub const MANIFEST_FILE: &str = "entries.json";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Manifest {
    Wrapped { entries: Vec<ManifestEntry> },
    Bare(Vec<ManifestEntry>),
}

impl Manifest {
    fn into_entries(self) -> Vec<ManifestEntry> {
        match self {
            Manifest::Wrapped { entries } | Manifest::Bare(entries) => entries,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: String,
    /// Milliseconds since the epoch.
    timestamp: f64,
}

impl ManifestEntry {
    fn recorded_at(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp.is_finite() {
            return None;
        }
        DateTime::<Utc>::from_timestamp_millis(self.timestamp as i64)
    }
}

#[derive(Debug, Clone)]
pub struct HistoryLocator {
    filter: ExtensionFilter,
}

impl Default for HistoryLocator {
    fn default() -> Self {
        Self {
            filter: ExtensionFilter::of(TEXT_EXTENSIONS),
        }
    }
}

impl HistoryLocator {
    pub fn new(filter: ExtensionFilter) -> Self {
        Self { filter }
    }

    /// Newest record or file across every session under `root` that is
    /// strictly newer than `since`.
    pub async fn find_newest(&self, since: DateTime<Utc>, root: &Path) -> Option<CandidateFile> {
        let mut sessions = absent_on_error("list", root, tokio::fs::read_dir(root).await)?;
        let mut newest: Option<CandidateFile> = None;

        loop {
            let entry = match sessions.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    debug!(root = %root.display(), error = %err, "history listing interrupted");
                    break;
                }
            };

            let session = entry.path();
            let is_dir = absent_on_error("stat", &session, entry.file_type().await)
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            let found = match read_manifest(&session).await {
                Some(entries) => self.newest_recorded(since, &session, entries).await,
                None => {
                    FileLocator::new(self.filter.clone())
                        .excluding(session.join(MANIFEST_FILE))
                        .find_newest(since, &session)
                        .await
                }
            };

            if let Some(candidate) = found {
                if newest
                    .as_ref()
                    .map_or(true, |current| candidate.discovered_at > current.discovered_at)
                {
                    newest = Some(candidate);
                }
            }
        }

        newest
    }

    async fn newest_recorded(
        &self,
        since: DateTime<Utc>,
        session: &Path,
        entries: Vec<ManifestEntry>,
    ) -> Option<CandidateFile> {
        let mut newest: Option<CandidateFile> = None;

        for entry in entries {
            let Some(recorded_at) = entry.recorded_at() else {
                continue;
            };
            if recorded_at <= since {
                continue;
            }
            if newest
                .as_ref()
                .is_some_and(|current| recorded_at <= current.discovered_at)
            {
                continue;
            }
            if let Some(path) = self.resolve_record(session, &entry.id).await {
                newest = Some(CandidateFile::new(path, recorded_at));
            }
        }

        newest
    }

    /// Maps a record id to an existing file inside the session directory:
    /// `<id>` itself, else `<id>.<ext>` for the first matching extension.
    async fn resolve_record(&self, session: &Path, id: &str) -> Option<PathBuf> {
        let mut components = Path::new(id).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            debug!(session = %session.display(), id, "ignoring history record with unsafe id");
            return None;
        }

        let exact = session.join(id);
        if is_regular_file(&exact).await {
            return Some(exact);
        }

        for ext in TEXT_EXTENSIONS {
            let candidate = session.join(format!("{id}.{ext}"));
            if is_regular_file(&candidate).await {
                return Some(candidate);
            }
        }

        None
    }
}

async fn is_regular_file(path: &Path) -> bool {
    stat(path).await.map(|meta| meta.is_file()).unwrap_or(false)
}

/// `None` when the manifest is missing, unreadable or malformed.
async fn read_manifest(session: &Path) -> Option<Vec<ManifestEntry>> {
    let path = session.join(MANIFEST_FILE);
    let raw = absent_on_error("read manifest", &path, tokio::fs::read_to_string(&path).await)?;
    absent_on_error(
        "parse manifest",
        &path,
        serde_json::from_str::<Manifest>(&raw),
    )
    .map(Manifest::into_entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, write_at};
    use serde_json::json;

    fn write_manifest(session: &Path, entries: serde_json::Value) {
        std::fs::write(session.join(MANIFEST_FILE), entries.to_string()).expect("manifest");
    }

    #[tokio::test]
    async fn manifest_timestamp_wins_over_mtime() {
        let root = tempfile::tempdir().expect("tempdir");
        let session = root.path().join("session-a");
        std::fs::create_dir(&session).expect("mkdir");

        // mtimes are far in the past; only the manifest says they are fresh
        write_at(&session.join("rec-1.md"), b"one", 10);
        write_at(&session.join("rec-2.md"), b"two", 10);
        write_manifest(
            &session,
            json!({"entries": [
                {"id": "rec-1", "timestamp": 2_000_000},
                {"id": "rec-2", "timestamp": 3_000_000}
            ]}),
        );

        let found = HistoryLocator::default()
            .find_newest(at(1_000), root.path())
            .await
            .expect("candidate");
        assert_eq!(found.name, "rec-2.md");
        assert_eq!(found.discovered_at, at(3_000));
    }

    #[tokio::test]
    async fn records_not_after_start_are_ignored() {
        let root = tempfile::tempdir().expect("tempdir");
        let session = root.path().join("s");
        std::fs::create_dir(&session).expect("mkdir");
        write_at(&session.join("old.txt"), b"old", 5_000);
        write_manifest(&session, json!([{"id": "old.txt", "timestamp": 1_000_000}]));

        let found = HistoryLocator::default()
            .find_newest(at(1_000), root.path())
            .await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn malformed_manifest_falls_back_to_mtime_scan() {
        let root = tempfile::tempdir().expect("tempdir");
        let session = root.path().join("broken");
        std::fs::create_dir(&session).expect("mkdir");
        std::fs::write(session.join(MANIFEST_FILE), "{not json").expect("manifest");
        write_at(&session.join("reply.md"), b"hello", 1_500);
        write_at(&session.join("image.png"), b"png", 1_600);

        let found = HistoryLocator::default()
            .find_newest(at(1_000), root.path())
            .await
            .expect("candidate");
        assert_eq!(found.name, "reply.md");
        assert_eq!(found.discovered_at, at(1_500));
    }

    #[tokio::test]
    async fn newest_is_tracked_across_sessions_and_modes() {
        let root = tempfile::tempdir().expect("tempdir");
        let indexed = root.path().join("indexed");
        let loose = root.path().join("loose");
        std::fs::create_dir(&indexed).expect("mkdir");
        std::fs::create_dir(&loose).expect("mkdir");

        write_at(&indexed.join("a.md"), b"a", 10);
        write_manifest(&indexed, json!({"entries": [{"id": "a.md", "timestamp": 1_200_000}]}));
        write_at(&loose.join("b.md"), b"b", 1_300);

        let found = HistoryLocator::default()
            .find_newest(at(1_000), root.path())
            .await
            .expect("candidate");
        assert_eq!(found.name, "b.md");

        write_manifest(&indexed, json!({"entries": [{"id": "a.md", "timestamp": 1_400_000}]}));
        let found = HistoryLocator::default()
            .find_newest(at(1_000), root.path())
            .await
            .expect("candidate");
        assert_eq!(found.name, "a.md");
    }

    #[tokio::test]
    async fn records_without_files_or_with_unsafe_ids_are_skipped() {
        let root = tempfile::tempdir().expect("tempdir");
        let session = root.path().join("s");
        std::fs::create_dir(&session).expect("mkdir");
        write_at(&root.path().join("outside.md"), b"x", 10);
        write_manifest(
            &session,
            json!({"entries": [
                {"id": "missing", "timestamp": 5_000_000},
                {"id": "../outside.md", "timestamp": 6_000_000}
            ]}),
        );

        let found = HistoryLocator::default()
            .find_newest(at(1_000), root.path())
            .await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn unreadable_root_yields_none() {
        let root = tempfile::tempdir().expect("tempdir");
        let found = HistoryLocator::default()
            .find_newest(at(0), &root.path().join("missing"))
            .await;
        assert!(found.is_none());
    }
}
