use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use genrelay_jobs::{
    CandidateSource, Clock, FailureKind, GenerationRequest, GeneratorBackend, GeneratorError,
    JobEngine, JobError, JobSettings, JobStatus, ManualClock, OutputLayout, PollOutcome,
    SubmitRequest,
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const START_SECS: i64 = 1_000;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

fn write_at(path: &Path, contents: &[u8], secs: u64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, contents).expect("write");
    File::options()
        .write(true)
        .open(path)
        .expect("open")
        .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .expect("set mtime");
}

/// Records requests and optionally writes the structured text artifact or fails.
#[derive(Default)]
struct StubGenerator {
    seen: Mutex<Vec<GenerationRequest>>,
    answer: Option<String>,
    failure: Option<String>,
}

impl StubGenerator {
    fn answering(text: &str) -> Self {
        Self {
            answer: Some(text.to_string()),
            ..Self::default()
        }
    }

    fn failing(diagnostic: &str) -> Self {
        Self {
            failure: Some(diagnostic.to_string()),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.seen.lock().expect("lock").clone()
    }
}

#[async_trait]
impl GeneratorBackend for StubGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<(), GeneratorError> {
        self.seen.lock().expect("lock").push(request.clone());

        if let Some(diagnostic) = &self.failure {
            return Err(GeneratorError::Exited {
                status: "exited with code 1".into(),
                diagnostic: diagnostic.clone(),
            });
        }

        if let (Some(text), Some(path)) = (&self.answer, &request.expected_path) {
            let artifact = json!({ "jobId": request.job_id, "text": text });
            std::fs::write(path, artifact.to_string()).expect("write artifact");
        }
        Ok(())
    }
}

struct Harness {
    _root: TempDir,
    layout: OutputLayout,
    clock: Arc<ManualClock>,
    generator: Arc<StubGenerator>,
    engine: JobEngine,
}

impl Harness {
    fn new(generator: StubGenerator) -> Self {
        Self::with_settings(generator, JobSettings::default())
    }

    fn with_settings(generator: StubGenerator, settings: JobSettings) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let layout = OutputLayout::under(root.path());
        let clock = Arc::new(ManualClock::new(at(START_SECS)));
        let generator = Arc::new(generator);
        let engine = JobEngine::with_clock(
            layout.clone(),
            settings,
            generator.clone(),
            clock.clone(),
        );
        Self {
            _root: root,
            layout,
            clock,
            generator,
            engine,
        }
    }

    async fn submit(&self, prompt: &str, kind: &str) -> Result<String> {
        let receipt = self
            .engine
            .submit(SubmitRequest {
                prompt: prompt.into(),
                kind: kind.into(),
                ..SubmitRequest::default()
            })
            .await?;
        assert_eq!(receipt.status, JobStatus::Pending);
        Ok(receipt.job_id)
    }

    /// Lets the detached generator task run to completion.
    async fn settle_generator(&self, expected_calls: usize) {
        for _ in 0..1_000 {
            if self.generator.requests().len() >= expected_calls {
                break;
            }
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
}

#[tokio::test]
async fn text_job_stays_pending_until_artifact_names_it() -> Result<()> {
    let harness = Harness::new(StubGenerator::default());
    harness.engine.prepare_output_dirs().await?;
    let job_id = harness.submit("write a haiku", "text").await?;
    harness.settle_generator(1).await;

    assert_eq!(harness.engine.poll(&job_id).await?, PollOutcome::Pending);

    let fixed = harness.layout.fixed_text_path.clone().expect("fixed path");
    std::fs::write(&fixed, json!({ "jobId": job_id, "text": "old pond" }).to_string())?;

    let PollOutcome::Done(result) = harness.engine.poll(&job_id).await? else {
        panic!("expected a finished job");
    };
    assert_eq!(result.text.as_deref(), Some("old pond"));
    assert_eq!(result.source, CandidateSource::FixedPath);
    assert_eq!(result.content_type, "text/plain; charset=utf-8");

    let request = &harness.generator.requests()[0];
    assert_eq!(request.prompt, "write a haiku");
    assert_eq!(request.expected_path.as_deref(), Some(fixed.as_path()));
    Ok(())
}

#[tokio::test]
async fn wait_for_result_returns_once_generator_writes() -> Result<()> {
    let harness = Harness::new(StubGenerator::answering("frog jumps"));
    let job_id = harness.submit("write a haiku", "text").await?;

    let outcome = harness
        .engine
        .wait_for_result(&job_id, Duration::from_secs(30), &CancellationToken::new())
        .await?;

    let PollOutcome::Done(result) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(result.job_id, job_id);
    assert_eq!(result.text.as_deref(), Some("frog jumps"));
    Ok(())
}

#[tokio::test]
async fn wait_for_result_gives_up_at_deadline_or_cancellation() -> Result<()> {
    let harness = Harness::new(StubGenerator::default());
    let job_id = harness.submit("paint a fox", "image").await?;

    let started = harness.clock.now();
    let outcome = harness
        .engine
        .wait_for_result(&job_id, Duration::from_secs(5), &CancellationToken::new())
        .await?;
    assert!(outcome.is_pending());
    assert_eq!(harness.clock.now() - started, chrono::Duration::seconds(5));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = harness
        .engine
        .wait_for_result(&job_id, Duration::from_secs(5), &cancel)
        .await?;
    assert!(outcome.is_pending());
    Ok(())
}

#[tokio::test]
async fn image_output_is_attributed_to_a_single_job() -> Result<()> {
    let harness = Harness::new(StubGenerator::default());
    harness.engine.prepare_output_dirs().await?;
    let first = harness.submit("paint a fox", "image").await?;
    let second = harness.submit("paint a crow", "image").await?;

    let image = harness.layout.image_dir.join("fox.png");
    write_at(&image, b"\x89PNG fake", START_SECS as u64 + 5);

    let PollOutcome::Done(result) = harness.engine.poll(&first).await? else {
        panic!("first job should own the image");
    };
    assert_eq!(result.name, "fox.png");
    assert_eq!(result.content_type, "image/png");
    assert_eq!(result.source, CandidateSource::OutputScan);
    assert!(result.text.is_none());

    assert_eq!(harness.engine.poll(&second).await?, PollOutcome::Pending);

    write_at(
        &harness.layout.image_dir.join("crow.png"),
        b"\x89PNG crow",
        START_SECS as u64 + 9,
    );
    let PollOutcome::Done(result) = harness.engine.poll(&second).await? else {
        panic!("second job should own the newer image");
    };
    assert_eq!(result.name, "crow.png");

    // replay is stable
    let PollOutcome::Done(replayed) = harness.engine.poll(&first).await? else {
        panic!("done replays");
    };
    assert_eq!(replayed.name, "fox.png");
    Ok(())
}

#[tokio::test]
async fn files_older_than_the_job_are_ignored() -> Result<()> {
    let harness = Harness::new(StubGenerator::default());
    harness.engine.prepare_output_dirs().await?;
    write_at(
        &harness.layout.image_dir.join("stale.png"),
        b"old",
        START_SECS as u64,
    );

    let job_id = harness.submit("paint a fox", "image").await?;
    assert_eq!(harness.engine.poll(&job_id).await?, PollOutcome::Pending);
    Ok(())
}

#[tokio::test]
async fn timeout_is_final_and_replayed() -> Result<()> {
    let harness = Harness::new(StubGenerator::default());
    let job_id = harness
        .engine
        .submit(SubmitRequest {
            prompt: "paint a fox".into(),
            kind: "image".into(),
            timeout_ms: Some(2_000),
            ..SubmitRequest::default()
        })
        .await?
        .job_id;

    harness.clock.advance(Duration::from_millis(2_000));
    assert_eq!(harness.engine.poll(&job_id).await?, PollOutcome::Pending);

    harness.clock.advance(Duration::from_millis(1));
    let PollOutcome::Failed(failure) = harness.engine.poll(&job_id).await? else {
        panic!("expected timeout");
    };
    assert_eq!(failure.kind, FailureKind::Timeout);

    // output arriving late does not resurrect the job
    write_at(
        &harness.layout.image_dir.join("late.png"),
        b"late",
        START_SECS as u64 + 10,
    );
    assert_eq!(
        harness.engine.poll(&job_id).await?,
        PollOutcome::Failed(failure)
    );
    Ok(())
}

#[tokio::test]
async fn generator_failure_is_recorded_while_pending() -> Result<()> {
    let harness = Harness::new(StubGenerator::failing("model offline"));
    let job_id = harness.submit("paint a fox", "image").await?;
    harness.settle_generator(1).await;

    let PollOutcome::Failed(failure) = harness.engine.poll(&job_id).await? else {
        panic!("expected process failure");
    };
    assert_eq!(failure.kind, FailureKind::ProcessFailed);
    assert!(failure.message.contains("model offline"));

    let job = harness.engine.snapshot(&job_id).await.expect("job");
    assert_eq!(job.status, JobStatus::Error);
    Ok(())
}

#[tokio::test]
async fn fixed_text_path_has_a_single_owner() -> Result<()> {
    let harness = Harness::new(StubGenerator::default());
    let first = harness.submit("one", "text").await?;

    let err = harness
        .submit("two", "text")
        .await
        .expect_err("fixed path is owned");
    let err = err.downcast::<JobError>()?;
    assert!(err.is_retryable());
    assert_eq!(err.code(), "E_FIXED_PATH_BUSY");

    harness.clock.advance(Duration::from_secs(301));
    assert!(matches!(
        harness.engine.poll(&first).await?,
        PollOutcome::Failed(_)
    ));
    harness.submit("two", "text").await?;
    Ok(())
}

#[tokio::test]
async fn abandoned_text_job_times_out_on_next_submission() -> Result<()> {
    let harness = Harness::new(StubGenerator::default());
    let first = harness.submit("one", "text").await?;

    harness.clock.advance(Duration::from_secs(3_000));
    let second = harness.submit("two", "text").await?;
    assert_ne!(first, second);

    let stale = harness.engine.snapshot(&first).await.expect("first job");
    assert_eq!(stale.status, JobStatus::Error);
    match harness.engine.poll(&first).await? {
        PollOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Timeout),
        other => panic!("expected a cached timeout, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn expired_jobs_become_unknown() -> Result<()> {
    let harness = Harness::with_settings(
        StubGenerator::default(),
        JobSettings {
            ttl_secs: 60,
            ..JobSettings::default()
        },
    );
    let job_id = harness.submit("paint a fox", "image").await?;
    assert_eq!(harness.engine.job_count().await, 1);

    harness.clock.advance(Duration::from_secs(61));
    assert!(harness.engine.snapshot(&job_id).await.is_none());
    let err = harness
        .engine
        .poll(&job_id)
        .await
        .expect_err("evicted job is unknown");
    assert!(matches!(err, JobError::UnknownJob(ref id) if *id == job_id));
    assert_eq!(harness.engine.job_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn invalid_submissions_create_no_job() -> Result<()> {
    let harness = Harness::new(StubGenerator::default());
    let err = harness.submit("", "image").await.expect_err("empty prompt");
    assert_eq!(err.downcast::<JobError>()?.code(), "E_VALIDATION");
    assert_eq!(harness.engine.job_count().await, 0);
    assert!(harness.generator.requests().is_empty());
    Ok(())
}
