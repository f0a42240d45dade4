use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::artifact;
use crate::clock::Clock;
use crate::engine::EngineState;
use crate::error::{EngineResult, JobError};
use crate::generator::{GenerationRequest, GeneratorBackend};
use crate::types::{
    Job, JobFailure, JobSettings, JobStatus, OutputKind, OutputLayout, SubmitReceipt,
    SubmitRequest,
};

struct ValidatedSubmission {
    prompt: String,
    kind: OutputKind,
    timeout_ms: u64,
    poll_interval_ms: u64,
}

/// Accepts prompts, records pending jobs and fires the generator without
/// waiting for it.
pub struct Dispatcher {
    layout: OutputLayout,
    settings: JobSettings,
    generator: Arc<dyn GeneratorBackend>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        layout: OutputLayout,
        settings: JobSettings,
        generator: Arc<dyn GeneratorBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            layout,
            settings,
            generator,
            clock,
        }
    }

    fn validate(&self, request: SubmitRequest) -> EngineResult<ValidatedSubmission> {
        if request.prompt.trim().is_empty() {
            return Err(JobError::Validation("prompt must not be empty".into()));
        }

        let kind = OutputKind::parse(&request.kind).ok_or_else(|| {
            JobError::Validation(format!(
                "unsupported kind '{}': expected 'image' or 'text'",
                request.kind
            ))
        })?;

        let timeout_ms = match request.timeout_ms {
            Some(0) => return Err(JobError::Validation("timeoutMs must be positive".into())),
            Some(value) => value.min(self.settings.max_timeout_ms),
            None => self.settings.timeout_ms,
        };

        let poll_interval_ms = match request.poll_interval_ms {
            Some(0) => {
                return Err(JobError::Validation(
                    "pollIntervalMs must be positive".into(),
                ))
            }
            Some(value) => value,
            None => self.settings.poll_interval_ms,
        };

        Ok(ValidatedSubmission {
            prompt: request.prompt,
            kind,
            timeout_ms,
            poll_interval_ms,
        })
    }

    pub async fn submit(
        &self,
        state: &Arc<Mutex<EngineState>>,
        request: SubmitRequest,
    ) -> EngineResult<SubmitReceipt> {
        let submission = self.validate(request)?;
        let kind = submission.kind;

        let job = {
            let mut guard = state.lock().await;
            let now = self.clock.now();
            guard.jobs.evict_expired(now, self.settings.ttl());

            let id = guard.jobs.next_id(now);
            let expected_path = self.layout.expected_path(kind).map(Path::to_path_buf);

            if let Some(path) = &expected_path {
                if let Some(owner) = guard.jobs.pending_owner_of(path, now) {
                    return Err(JobError::FixedPathBusy {
                        path: path.clone(),
                        owner: owner.id.clone(),
                    });
                }
                if artifact::is_structured(path) {
                    artifact::seed(path, &id).await?;
                }
            }

            let job = Job {
                id,
                created_at: now,
                kind,
                output_dir: self.layout.output_dir(kind).to_path_buf(),
                expected_path,
                timeout_ms: submission.timeout_ms,
                poll_interval_ms: submission.poll_interval_ms,
                status: JobStatus::Pending,
                error: None,
                result: None,
            };
            guard.jobs.create(job.clone());
            job
        };

        info!(
            job_id = %job.id,
            kind = %kind,
            timeout_ms = job.timeout_ms,
            "job accepted"
        );

        self.launch(
            state,
            GenerationRequest {
                job_id: job.id.clone(),
                kind,
                prompt: submission.prompt,
                output_dir: job.output_dir.clone(),
                expected_path: job.expected_path.clone(),
            },
        );

        Ok(SubmitReceipt {
            job_id: job.id,
            status: JobStatus::Pending,
            kind,
            timeout_ms: job.timeout_ms,
            poll_interval_ms: job.poll_interval_ms,
        })
    }

    /// Runs the generator detached; only a failure is written back, and only
    /// while the job is still pending.
    fn launch(&self, state: &Arc<Mutex<EngineState>>, request: GenerationRequest) {
        let generator = Arc::clone(&self.generator);
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(state);

        tokio::spawn(async move {
            let job_id = request.job_id.clone();
            match generator.generate(request).await {
                Ok(()) => debug!(job_id = %job_id, "generator finished"),
                Err(err) => {
                    let failure = JobFailure::process_failed(err.to_string(), clock.now());
                    let recorded = state.lock().await.jobs.fail_if_pending(&job_id, failure);
                    if recorded {
                        warn!(job_id = %job_id, error = %err, "generator failed");
                    } else {
                        debug!(
                            job_id = %job_id,
                            error = %err,
                            "generator failed after job settled or was evicted"
                        );
                    }
                }
            }
        });
    }
}
