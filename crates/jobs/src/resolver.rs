use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::artifact;
use crate::claims::ClaimRegistry;
use crate::clock::Clock;
use crate::content;
use crate::error::{EngineResult, JobError};
use crate::history::HistoryLocator;
use crate::locator::{ExtensionFilter, FileLocator};
use crate::store::JobStore;
use crate::types::{
    CandidateFile, CandidateSource, ClaimChannel, Job, JobFailure, JobResult, OutputKind,
    OutputLayout, PollOutcome,
};

/// A surviving candidate together with the channel it must be claimed on.
/// Structured fixed-path artifacts identify their job and carry no channel.
#[derive(Debug, Clone)]
struct Discovery {
    candidate: CandidateFile,
    source: CandidateSource,
    channel: Option<ClaimChannel>,
}

/// Drives a single pending job one step forward per poll.
pub struct JobResolver {
    layout: OutputLayout,
    history: HistoryLocator,
    clock: Arc<dyn Clock>,
}

impl JobResolver {
    pub fn new(layout: OutputLayout, clock: Arc<dyn Clock>) -> Self {
        Self {
            layout,
            history: HistoryLocator::default(),
            clock,
        }
    }

    /// One poll: replay a terminal outcome, time the job out, or try to
    /// discover, claim and read its result.
    ///
    /// A read failure releases the claim and leaves the job pending.
    pub async fn resolve(
        &self,
        jobs: &mut JobStore,
        claims: &mut ClaimRegistry,
        job_id: &str,
    ) -> EngineResult<PollOutcome> {
        let job = jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::UnknownJob(job_id.to_string()))?;

        if let Some(outcome) = job.terminal_outcome() {
            return Ok(outcome);
        }

        let now = self.clock.now();
        if job.has_timed_out(now) {
            let failure = JobFailure::timeout(job.timeout_ms, now);
            if let Some(stored) = jobs.get_mut(job_id) {
                stored.mark_failed(failure.clone());
            }
            info!(job_id, timeout_ms = job.timeout_ms, "job timed out");
            return Ok(PollOutcome::Failed(failure));
        }

        let Some(discovery) = self.discover(&job, claims).await else {
            return Ok(PollOutcome::Pending);
        };

        let result = self.deliver(&job, discovery, claims).await?;
        if let Some(stored) = jobs.get_mut(job_id) {
            stored.mark_done(result.clone());
        }
        info!(
            job_id,
            name = %result.name,
            size = result.size,
            source = ?result.source,
            "job completed"
        );
        Ok(PollOutcome::Done(result))
    }

    /// First surviving candidate of: fixed path, history, output directory.
    async fn discover(&self, job: &Job, claims: &ClaimRegistry) -> Option<Discovery> {
        if let Some(found) = self.probe_fixed_path(job, claims).await {
            return Some(found);
        }
        if let Some(found) = self.probe_history(job, claims).await {
            return Some(found);
        }
        self.probe_output_dir(job, claims).await
    }

    async fn probe_fixed_path(&self, job: &Job, claims: &ClaimRegistry) -> Option<Discovery> {
        let path = job.expected_path.as_deref()?;

        if artifact::is_structured(path) {
            let candidate = artifact::probe(path, &job.id).await?;
            return Some(Discovery {
                candidate,
                source: CandidateSource::FixedPath,
                channel: None,
            });
        }

        let candidate = artifact::probe_raw(path, job.created_at).await?;
        unclaimed(
            claims,
            Discovery {
                candidate,
                source: CandidateSource::FixedPath,
                channel: Some(ClaimChannel::OutputScan),
            },
        )
    }

    async fn probe_history(&self, job: &Job, claims: &ClaimRegistry) -> Option<Discovery> {
        let root = self.layout.history_root_for(job.kind)?;
        let candidate = self.history.find_newest(job.created_at, root).await?;
        unclaimed(
            claims,
            Discovery {
                candidate,
                source: CandidateSource::History,
                channel: Some(ClaimChannel::History),
            },
        )
    }

    async fn probe_output_dir(&self, job: &Job, claims: &ClaimRegistry) -> Option<Discovery> {
        let mut locator = FileLocator::new(ExtensionFilter::for_kind(job.kind));
        if let Some(fixed) = &job.expected_path {
            locator = locator.excluding(fixed.clone());
        }
        let candidate = locator.find_newest(job.created_at, &job.output_dir).await?;
        unclaimed(
            claims,
            Discovery {
                candidate,
                source: CandidateSource::OutputScan,
                channel: Some(ClaimChannel::OutputScan),
            },
        )
    }

    /// Claims, reads and packages a candidate.
    async fn deliver(
        &self,
        job: &Job,
        discovery: Discovery,
        claims: &mut ClaimRegistry,
    ) -> EngineResult<JobResult> {
        let Discovery {
            candidate,
            source,
            channel,
        } = discovery;

        if let Some(channel) = channel {
            claims.claim(channel, &candidate.path);
        }

        let extracted = candidate.payload.is_some();
        let bytes = match candidate.payload {
            Some(payload) => payload,
            None => match tokio::fs::read(&candidate.path).await {
                Ok(bytes) => bytes,
                Err(source) => {
                    if let Some(channel) = channel {
                        claims.release(channel, &candidate.path);
                    }
                    warn!(
                        job_id = %job.id,
                        path = %candidate.path.display(),
                        error = %source,
                        "claimed output could not be read, released for retry"
                    );
                    return Err(JobError::Read {
                        path: candidate.path,
                        source,
                    });
                }
            },
        };

        let content_type = if extracted {
            content::text_content_type()
        } else {
            content::content_type_for(&candidate.path, job.kind)
        };
        let text = match job.kind {
            OutputKind::Text => Some(content::decode_text(&bytes)),
            OutputKind::Image => None,
        };

        debug!(job_id = %job.id, path = %candidate.path.display(), ?source, "assembled result");
        Ok(JobResult {
            job_id: job.id.clone(),
            name: candidate.name,
            path: candidate.path,
            content_type,
            size: bytes.len() as u64,
            data: content::encode(&bytes),
            text,
            source,
            completed_at: self.clock.now(),
        })
    }
}

fn unclaimed(claims: &ClaimRegistry, discovery: Discovery) -> Option<Discovery> {
    match discovery.channel {
        Some(channel) if claims.is_claimed(channel, &discovery.candidate.path) => {
            debug!(
                path = %discovery.candidate.path.display(),
                ?channel,
                "candidate already claimed"
            );
            None
        }
        _ => Some(discovery),
    }
}
