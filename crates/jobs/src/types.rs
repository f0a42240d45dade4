use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000; // 5 minutes
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 30 * 60 * 1000;

pub const DEFAULT_IMAGE_DIR: &str = "images";
pub const DEFAULT_TEXT_DIR: &str = "texts";
pub const DEFAULT_FIXED_TEXT_FILE: &str = "result.json";

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg"];
pub const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "json", "html", "csv"];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Image,
    Text,
}

impl OutputKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Some(OutputKind::Image),
            "text" => Some(OutputKind::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Image => "image",
            OutputKind::Text => "text",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            OutputKind::Image => IMAGE_EXTENSIONS,
            OutputKind::Text => TEXT_EXTENSIONS,
        }
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

/// Discovery channel a claim is recorded under.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClaimChannel {
    History,
    OutputScan,
}

/// Which probe produced a delivered file.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    FixedPath,
    History,
    OutputScan,
}

/// A file some discovery probe considers a possible result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub name: String,
    /// File mtime, or the manifest timestamp for history records.
    pub discovered_at: DateTime<Utc>,
    /// Content already extracted by the probe; read from disk when absent.
    pub payload: Option<Vec<u8>>,
}

impl CandidateFile {
    pub fn new(path: PathBuf, discovered_at: DateTime<Utc>) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            discovered_at,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: String,
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub content_type: String,
    pub size: u64,
    /// Base64 encoded file content.
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub source: CandidateSource,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ProcessFailed,
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "E_TIMEOUT",
            FailureKind::ProcessFailed => "E_PROCESS_FAILED",
        }
    }
}

/// Terminal failure cached on a job and replayed on every later poll.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl JobFailure {
    pub fn timeout(timeout_ms: u64, failed_at: DateTime<Utc>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("no result was produced within {timeout_ms}ms"),
            failed_at,
        }
    }

    pub fn process_failed(diagnostic: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            kind: FailureKind::ProcessFailed,
            message: diagnostic.into(),
            failed_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: OutputKind,
    pub output_dir: PathBuf,
    pub expected_path: Option<PathBuf>,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub status: JobStatus,
    pub error: Option<JobFailure>,
    #[serde(skip)]
    pub result: Option<JobResult>,
}

impl Job {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        elapsed_ms(self.created_at, now) > ttl.as_millis() as i64
    }

    pub fn has_timed_out(&self, now: DateTime<Utc>) -> bool {
        elapsed_ms(self.created_at, now) > self.timeout_ms as i64
    }

    /// Returns false when the job was already terminal.
    pub fn mark_done(&mut self, result: JobResult) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Done;
        self.result = Some(result);
        true
    }

    /// Returns false when the job was already terminal.
    pub fn mark_failed(&mut self, failure: JobFailure) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Error;
        self.error = Some(failure);
        true
    }

    /// Cached outcome of a terminal job.
    pub fn terminal_outcome(&self) -> Option<PollOutcome> {
        match self.status {
            JobStatus::Pending => None,
            JobStatus::Done => self.result.clone().map(PollOutcome::Done),
            JobStatus::Error => self.error.clone().map(PollOutcome::Failed),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(since).num_milliseconds()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Done(JobResult),
    Failed(JobFailure),
}

impl PollOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, PollOutcome::Pending)
    }
}

/// Submission as received from a caller, before validation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
    pub kind: OutputKind,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub ttl_secs: u64,
    pub max_timeout_ms: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            ttl_secs: DEFAULT_TTL_SECS,
            max_timeout_ms: DEFAULT_MAX_TIMEOUT_MS,
        }
    }
}

impl JobSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Where each output kind is expected to land. All paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub image_dir: PathBuf,
    pub text_dir: PathBuf,
    pub fixed_text_path: Option<PathBuf>,
    pub history_root: Option<PathBuf>,
    pub history_enabled: bool,
}

impl OutputLayout {
    /// Default layout under `root`: `images/`, `texts/` and `texts/result.json`.
    pub fn under(root: &Path) -> Self {
        let text_dir = root.join(DEFAULT_TEXT_DIR);
        Self {
            image_dir: root.join(DEFAULT_IMAGE_DIR),
            fixed_text_path: Some(text_dir.join(DEFAULT_FIXED_TEXT_FILE)),
            text_dir,
            history_root: None,
            history_enabled: false,
        }
    }

    pub fn output_dir(&self, kind: OutputKind) -> &Path {
        match kind {
            OutputKind::Image => &self.image_dir,
            OutputKind::Text => &self.text_dir,
        }
    }

    pub fn expected_path(&self, kind: OutputKind) -> Option<&Path> {
        match kind {
            OutputKind::Image => None,
            OutputKind::Text => self.fixed_text_path.as_deref(),
        }
    }

    pub fn history_root_for(&self, kind: OutputKind) -> Option<&Path> {
        if kind != OutputKind::Text || !self.history_enabled {
            return None;
        }
        self.history_root.as_deref()
    }
}
