use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::types::{Job, JobFailure};

/// In-memory job records keyed by id. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<String, Job>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, job: Job) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drops every job older than `ttl`, terminal or not.
    pub fn evict_expired(&mut self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.is_expired(now, ttl));
        let evicted = before - self.jobs.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.jobs.len(), "evicted expired jobs");
        }
        evicted
    }

    /// Time-ordered id (creation millis) with a random suffix, unique
    /// among the jobs currently held.
    pub fn next_id(&self, now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = format!("{:013}-{:08x}", now.timestamp_millis(), rng.gen::<u32>());
            if !self.jobs.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Pending job currently relying on `path` as its fixed output.
    ///
    /// Owners past their timeout are failed here, as a poll would, so an
    /// abandoned job cannot hold the path until it is evicted.
    pub fn pending_owner_of(&mut self, path: &Path, now: DateTime<Utc>) -> Option<&Job> {
        for job in self.jobs.values_mut() {
            if job.expected_path.as_deref() == Some(path)
                && !job.status.is_terminal()
                && job.has_timed_out(now)
                && job.mark_failed(JobFailure::timeout(job.timeout_ms, now))
            {
                info!(job_id = %job.id, timeout_ms = job.timeout_ms, "job timed out");
            }
        }
        self.jobs.values().find(|job| {
            !job.status.is_terminal() && job.expected_path.as_deref() == Some(path)
        })
    }

    /// Records a generator failure unless the job already reached a terminal state.
    pub fn fail_if_pending(&mut self, id: &str, failure: JobFailure) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) => job.mark_failed(failure),
            None => false,
        }
    }
}
