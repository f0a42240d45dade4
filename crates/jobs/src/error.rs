use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type EngineResult<T> = Result<T, JobError>;

/// Non-terminal failures surfaced by the engine.
///
/// Terminal outcomes (timeouts, generator failures) are cached on the job
/// as a [`crate::JobFailure`] instead and never appear here.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("failed to read output {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("fixed output path {} is owned by pending job {owner}", .path.display())]
    FixedPathBusy { path: PathBuf, owner: String },

    #[error("i/o error while {action}: {source}")]
    Io {
        action: String,
        #[source]
        source: io::Error,
    },
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Config(_) => "E_CONFIG",
            JobError::Validation(_) => "E_VALIDATION",
            JobError::UnknownJob(_) => "E_UNKNOWN_JOB",
            JobError::Read { .. } => "E_READ",
            JobError::FixedPathBusy { .. } => "E_FIXED_PATH_BUSY",
            JobError::Io { .. } => "E_IO",
        }
    }

    /// Whether the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Read { .. } | JobError::FixedPathBusy { .. })
    }

    pub(crate) fn io(action: impl Into<String>, source: io::Error) -> Self {
        JobError::Io {
            action: action.into(),
            source,
        }
    }
}
