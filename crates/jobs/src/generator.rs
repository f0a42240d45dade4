use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strip_ansi_escapes::strip;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{EngineResult, JobError};
use crate::types::OutputKind;

const LOG_SNIPPET_LIMIT: usize = 2048;

/// Correlation payload handed to the generator on its stdin.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub job_id: String,
    pub kind: OutputKind,
    pub prompt: String,
    pub output_dir: PathBuf,
    pub expected_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("failed to launch generator: {0}")]
    Launch(String),

    #[error("generator {status}: {diagnostic}")]
    Exited { status: String, diagnostic: String },
}

/// The external content producer. Only success or failure is observable;
/// the output itself is found on disk later.
#[async_trait]
pub trait GeneratorBackend: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<(), GeneratorError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub binary: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
}

/// Runs the configured binary once per job.
///
/// Placeholders in `args` and `working_dir`: `{job_id}`, `{kind}`,
/// `{prompt}`, `{output_dir}`, `{expected_path}`, `{root}`.
#[derive(Debug, Clone)]
pub struct ProcessGenerator {
    config: GeneratorConfig,
    root: PathBuf,
}

impl ProcessGenerator {
    pub fn new(config: GeneratorConfig, root: PathBuf) -> EngineResult<Self> {
        if config.binary.trim().is_empty() {
            return Err(JobError::Config(
                "generator.binary must name the program that produces results".into(),
            ));
        }
        Ok(Self { config, root })
    }

    fn replace_placeholders(&self, template: &str, request: &GenerationRequest) -> String {
        let expected = request
            .expected_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        template
            .replace("{job_id}", &request.job_id)
            .replace("{kind}", request.kind.as_str())
            .replace("{output_dir}", &request.output_dir.display().to_string())
            .replace("{expected_path}", &expected)
            .replace("{root}", &self.root.display().to_string())
            .replace("{prompt}", &request.prompt)
    }

    fn build_command(&self, request: &GenerationRequest) -> Command {
        let mut command = Command::new(&self.config.binary);
        for arg in &self.config.args {
            command.arg(self.replace_placeholders(arg, request));
        }

        match &self.config.working_dir {
            Some(dir) => command.current_dir(self.replace_placeholders(dir, request)),
            None => command.current_dir(&self.root),
        };

        command.envs(&self.config.env);
        command.env("GENRELAY_JOB_ID", &request.job_id);
        command.env("GENRELAY_KIND", request.kind.as_str());
        command.env("GENRELAY_OUTPUT_DIR", &request.output_dir);
        if let Some(path) = &request.expected_path {
            command.env("GENRELAY_EXPECTED_PATH", path);
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl GeneratorBackend for ProcessGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<(), GeneratorError> {
        let payload = serde_json::to_vec(&request)
            .map_err(|err| GeneratorError::Launch(format!("cannot encode payload: {err}")))?;

        info!(
            job_id = %request.job_id,
            kind = %request.kind,
            binary = %self.config.binary,
            "Invoking generator subprocess"
        );

        let mut child = self
            .build_command(&request)
            .spawn()
            .map_err(|err| GeneratorError::Launch(err.to_string()))?;

        // stdin is fed while stdout and stderr drain, so a chatty generator
        // cannot fill its pipes before reading the payload
        let stdin = child.stdin.take();
        let feed = async {
            if let Some(mut stdin) = stdin {
                if let Err(err) = stdin.write_all(&payload).await {
                    warn!(job_id = %request.job_id, error = %err, "generator did not accept its payload");
                }
                // dropping stdin closes the pipe
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.map_err(|err| GeneratorError::Launch(format!("waiting for generator: {err}")))?;

        let stdout_text = decode_and_strip(&output.stdout);
        let stderr_text = decode_and_strip(&output.stderr);
        debug!(
            job_id = %request.job_id,
            stdout = %summarize_for_log(&stdout_text),
            stderr = %summarize_for_log(&stderr_text),
            "Generator process finished"
        );

        if output.status.success() {
            return Ok(());
        }

        let status = match output.status.code() {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        };
        let diagnostic = if stderr_text.trim().is_empty() {
            stdout_text.trim().to_string()
        } else {
            stderr_text.trim().to_string()
        };

        warn!(job_id = %request.job_id, %status, "Generator exited with non-zero status");
        Err(GeneratorError::Exited { status, diagnostic })
    }
}

fn decode_and_strip(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    let decode = |data: &[u8]| String::from_utf8_lossy(data).to_string();

    if !bytes.contains(&b'\x1b') {
        return decode(bytes);
    }

    match strip(bytes) {
        Ok(clean) => decode(&clean),
        Err(err) => {
            warn!(?err, "Failed to strip ANSI escapes from generator output");
            decode(bytes)
        }
    }
}

fn summarize_for_log(payload: &str) -> String {
    if payload.len() <= LOG_SNIPPET_LIMIT {
        return payload.to_string();
    }
    let mut end = LOG_SNIPPET_LIMIT;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}… (truncated {} chars)",
        &payload[..end],
        payload.len() - end
    )
}
