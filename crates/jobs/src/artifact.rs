//! The shared fixed-path JSON result artifact.
//!
//! Layout: top-level `jobId`/`text` describe the latest job; any other key
//! maps a job id to that job's text.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{EngineResult, JobError};
use crate::probe::{absent_on_error, modified_at, stat};
use crate::types::CandidateFile;

const JOB_ID_KEY: &str = "jobId";
const TEXT_KEY: &str = "text";

/// Whether the fixed path holds a structured, self-identifying artifact.
pub fn is_structured(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Resets the artifact for `job_id`: prior `text` is dropped, `jobId` is
/// stamped, per-job archive keys are kept.
pub async fn seed(path: &Path, job_id: &str) -> EngineResult<()> {
    let mut object = match tokio::fs::read_to_string(path).await {
        Ok(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "fixed artifact is not a JSON object, starting over");
                Map::new()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(err) => return Err(JobError::io(format!("reading {}", path.display()), err)),
    };

    object.remove(TEXT_KEY);
    object.insert(JOB_ID_KEY.to_string(), Value::String(job_id.to_string()));

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| JobError::io(format!("creating {}", parent.display()), err))?;
    }

    let rendered = serde_json::to_string_pretty(&Value::Object(object))
        .map_err(|err| JobError::io("rendering fixed artifact", err.into()))?;
    tokio::fs::write(path, rendered)
        .await
        .map_err(|err| JobError::io(format!("writing {}", path.display()), err))?;

    debug!(path = %path.display(), job_id, "seeded fixed artifact");
    Ok(())
}

/// Text the artifact carries for `job_id`, if any.
pub fn text_for_job(artifact: &Value, job_id: &str) -> Option<String> {
    let object = artifact.as_object()?;

    let current = object
        .get(JOB_ID_KEY)
        .and_then(Value::as_str)
        .filter(|id| *id == job_id)
        .and_then(|_| object.get(TEXT_KEY))
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty());

    let archived = || {
        object
            .get(job_id)
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
    };

    current.or_else(archived).map(str::to_string)
}

/// Reads the structured artifact and returns a candidate only when it holds
/// non-empty text for `job_id`.
pub async fn probe(path: &Path, job_id: &str) -> Option<CandidateFile> {
    let metadata = stat(path).await?;
    let modified = modified_at(path, &metadata)?;
    let raw = absent_on_error("read artifact", path, tokio::fs::read(path).await)?;
    let artifact = absent_on_error("parse artifact", path, serde_json::from_slice::<Value>(&raw))?;

    let text = text_for_job(&artifact, job_id)?;
    Some(CandidateFile::new(path.to_path_buf(), modified).with_payload(text.into_bytes()))
}

/// Candidate for a non-structured fixed path: any regular file newer than `since`.
pub async fn probe_raw(path: &Path, since: DateTime<Utc>) -> Option<CandidateFile> {
    let metadata = stat(path).await?;
    let modified = modified_at(path, &metadata)?;
    (modified > since).then(|| CandidateFile::new(path.to_path_buf(), modified))
}
