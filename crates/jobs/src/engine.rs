use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::claims::ClaimRegistry;
use crate::clock::{Clock, SystemClock};
use crate::dispatcher::Dispatcher;
use crate::error::{EngineResult, JobError};
use crate::generator::GeneratorBackend;
use crate::resolver::JobResolver;
use crate::store::JobStore;
use crate::types::{Job, JobSettings, OutputLayout, PollOutcome, SubmitReceipt, SubmitRequest};

/// Mutable state shared by submissions, polls and generator callbacks.
///
/// Every claim-and-resolve step runs under one lock, so two polls can never
/// attribute the same file to different jobs.
#[derive(Debug, Default)]
pub struct EngineState {
    pub jobs: JobStore,
    pub claims: ClaimRegistry,
}

pub struct JobEngine {
    state: Arc<Mutex<EngineState>>,
    dispatcher: Dispatcher,
    resolver: JobResolver,
    layout: OutputLayout,
    settings: JobSettings,
    clock: Arc<dyn Clock>,
}

impl JobEngine {
    pub fn new(
        layout: OutputLayout,
        settings: JobSettings,
        generator: Arc<dyn GeneratorBackend>,
    ) -> Self {
        Self::with_clock(layout, settings, generator, Arc::new(SystemClock))
    }

    pub fn with_clock(
        layout: OutputLayout,
        settings: JobSettings,
        generator: Arc<dyn GeneratorBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            dispatcher: Dispatcher::new(
                layout.clone(),
                settings.clone(),
                generator,
                Arc::clone(&clock),
            ),
            resolver: JobResolver::new(layout.clone(), Arc::clone(&clock)),
            layout,
            settings,
            clock,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Creates the output directories so generators and scans find them.
    pub async fn prepare_output_dirs(&self) -> EngineResult<()> {
        let mut dirs = vec![self.layout.image_dir.clone(), self.layout.text_dir.clone()];
        if let Some(parent) = self
            .layout
            .fixed_text_path
            .as_deref()
            .and_then(|path| path.parent())
        {
            dirs.push(parent.to_path_buf());
        }

        for dir in dirs {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|err| JobError::io(format!("creating {}", dir.display()), err))?;
        }
        Ok(())
    }

    pub async fn submit(&self, request: SubmitRequest) -> EngineResult<SubmitReceipt> {
        self.dispatcher.submit(&self.state, request).await
    }

    pub async fn poll(&self, job_id: &str) -> EngineResult<PollOutcome> {
        let mut guard = self.state.lock().await;
        let EngineState { jobs, claims } = &mut *guard;
        jobs.evict_expired(self.clock.now(), self.settings.ttl());
        self.resolver.resolve(jobs, claims, job_id).await
    }

    /// Polls at the job's interval until it settles, `max_wait` passes, or
    /// `cancel` fires. The last pending outcome is returned in the latter cases.
    pub async fn wait_for_result(
        &self,
        job_id: &str,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> EngineResult<PollOutcome> {
        let deadline = self.clock.now()
            + chrono::Duration::from_std(max_wait).unwrap_or_else(|_| chrono::Duration::zero());

        loop {
            let outcome = self.poll(job_id).await?;
            if !outcome.is_pending() {
                return Ok(outcome);
            }

            let now = self.clock.now();
            if now >= deadline {
                return Ok(outcome);
            }

            let interval = self
                .snapshot(job_id)
                .await
                .map(|job| job.poll_interval())
                .unwrap_or_else(|| Duration::from_millis(self.settings.poll_interval_ms));
            let remaining = (deadline - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = cancel.cancelled() => return Ok(outcome),
                _ = self.clock.sleep(interval.min(remaining)) => {}
            }
        }
    }

    /// Current record without driving resolution. Expired jobs are evicted
    /// first, so this agrees with `poll` about which ids are known.
    pub async fn snapshot(&self, job_id: &str) -> Option<Job> {
        let mut guard = self.state.lock().await;
        guard.jobs.evict_expired(self.clock.now(), self.settings.ttl());
        guard.jobs.get(job_id).cloned()
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }
}
