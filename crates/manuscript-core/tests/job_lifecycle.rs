//! Generation job lifecycle through the wizard.
//!
//! These tests pin down the polling discipline:
//! - Polling stops at a terminal status and on disposal.
//! - Cancellation is a request; the server decides the outcome.
//! - Retry is a fresh submission with a new identity.
//! - Only one job may be active at a time.

use manuscript_core::{
    BackendError, GenerationJob, JobError, JobStatus, ManuscriptBackend, MemoryRunStore,
    RefineMode, SectionKey, WizardError, WizardStateMachine, WizardStep,
};
use manuscript_test_utils::fixtures::{fast_config, frame, POLL};
use manuscript_test_utils::{Op, ScriptedBackend};
use std::sync::Arc;

/// Helper: a wizard with a saved frame and a planned outline.
async fn planned_wizard(backend: ScriptedBackend) -> (WizardStateMachine, Arc<ScriptedBackend>) {
    let backend = Arc::new(backend.with_bootstrap("p-1", "m-1", [SectionKey::Methods]));
    let mut wizard = WizardStateMachine::new(
        fast_config(),
        Arc::clone(&backend) as Arc<dyn ManuscriptBackend>,
        Arc::new(MemoryRunStore::new()),
    )
    .unwrap();
    wizard.update_research_frame(frame());
    wizard.save_research_frame().await.unwrap();
    wizard.plan_sections(RefineMode::Merge).await.unwrap();
    (wizard, backend)
}

fn queued(id: &str) -> Result<GenerationJob, BackendError> {
    Ok(GenerationJob::new(id, JobStatus::Queued))
}

/// Tenet: after disposal no further fetch is issued.
#[tokio::test]
async fn dispose_stops_polling() {
    let (mut wizard, backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(queued("job-1"))
            .with_poll_statuses("job-1", [JobStatus::Running]),
    )
    .await;
    wizard.start_generation("", None, None).await.unwrap();
    tokio::time::sleep(POLL * 4).await;
    assert!(backend.calls(Op::Fetch) >= 1);

    wizard.dispose();
    assert!(!wizard.is_polling());
    let polls = backend.calls(Op::Fetch);
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(backend.calls(Op::Fetch), polls);
    assert_eq!(wizard.current_job().unwrap().status, JobStatus::Running);
}

/// Tenet: dropping the wizard also stops polling.
#[tokio::test]
async fn drop_stops_polling() {
    let (mut wizard, backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(queued("job-1"))
            .with_poll_statuses("job-1", [JobStatus::Running]),
    )
    .await;
    wizard.start_generation("", None, None).await.unwrap();
    drop(wizard);

    let polls = backend.calls(Op::Fetch);
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(backend.calls(Op::Fetch), polls);
}

/// Tenet: a cancellation request does not force a terminal state; if the run
/// finishes first, the job succeeds.
#[tokio::test]
async fn cancel_races_completion() {
    let (mut wizard, backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(queued("job-1"))
            .with_cancel(Ok(GenerationJob::new("job-1", JobStatus::CancelRequested)))
            .with_poll_statuses("job-1", [JobStatus::Succeeded]),
    )
    .await;
    wizard.start_generation("", None, None).await.unwrap();

    let held = wizard.cancel_generation().await.unwrap();
    assert_eq!(held.status, JobStatus::CancelRequested);
    assert!(wizard.is_polling());

    let again = wizard.cancel_generation().await.unwrap();
    assert_eq!(again.status, JobStatus::CancelRequested);
    assert_eq!(backend.calls(Op::Cancel), 1);

    let settled = wizard.wait_for_generation().await.unwrap();
    assert_eq!(settled.status, JobStatus::Succeeded);
    assert!(wizard.step_complete(WizardStep::RunGeneration));

    wizard.cancel_generation().await.unwrap();
    assert_eq!(backend.calls(Op::Cancel), 1);
}

/// Tenet: the cancel reply wins over polls that landed while it was in flight.
#[tokio::test]
async fn cancel_reply_supersedes_polls_during_the_call() {
    let (mut wizard, backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(queued("job-1"))
            .with_poll_statuses("job-1", [JobStatus::Running])
            .with_cancel(Ok(GenerationJob::new("job-1", JobStatus::CancelRequested)))
            .with_cancel_delay(POLL * 4),
    )
    .await;
    wizard.start_generation("", None, None).await.unwrap();

    let held = wizard.cancel_generation().await.unwrap();
    assert!(backend.calls(Op::Fetch) >= 1);
    assert_eq!(held.status, JobStatus::CancelRequested);

    tokio::time::sleep(POLL * 3).await;
    assert_eq!(
        wizard.current_job().unwrap().status,
        JobStatus::CancelRequested
    );
    wizard.dispose();
}

/// Tenet: a cancelled job is only cancelled once a poll says so.
#[tokio::test]
async fn cancel_then_cancelled_by_poll() {
    let (mut wizard, _backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(queued("job-1"))
            .with_cancel(Ok(GenerationJob::new("job-1", JobStatus::CancelRequested)))
            .with_poll_statuses("job-1", [JobStatus::CancelRequested, JobStatus::Cancelled]),
    )
    .await;
    wizard.start_generation("", None, None).await.unwrap();
    wizard.cancel_generation().await.unwrap();
    assert_eq!(
        wizard.current_job().unwrap().status,
        JobStatus::CancelRequested
    );

    let settled = wizard.wait_for_generation().await.unwrap();
    assert_eq!(settled.status, JobStatus::Cancelled);
    assert!(!wizard.step_complete(WizardStep::RunGeneration));
}

/// Tenet: retry replaces a failed job with a new identity and polls it.
#[tokio::test]
async fn retry_after_failure() {
    let (mut wizard, backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(queued("job-1"))
            .with_poll_statuses("job-1", [JobStatus::Running, JobStatus::Failed])
            .with_retry(queued("job-2"))
            .with_poll_statuses("job-2", [JobStatus::Running, JobStatus::Succeeded]),
    )
    .await;
    wizard.start_generation("", None, None).await.unwrap();
    let failed = wizard.wait_for_generation().await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(!wizard.can_navigate_to_step(WizardStep::DraftReview));

    let retried = wizard.retry_generation().await.unwrap();
    assert_eq!(retried.id.as_str(), "job-2");
    let settled = wizard.wait_for_generation().await.unwrap();
    assert_eq!(settled.id.as_str(), "job-2");
    assert_eq!(settled.status, JobStatus::Succeeded);
    assert!(wizard.can_navigate_to_step(WizardStep::DraftReview));

    assert_eq!(backend.calls(Op::Retry), 1);
    assert_eq!(backend.calls(Op::Enqueue), 1);
    assert!(matches!(
        wizard.retry_generation().await,
        Err(WizardError::Job(JobError::RetryNotAllowed {
            status: JobStatus::Succeeded
        }))
    ));
}

/// Tenet: a second enqueue while a job is active is refused without a call.
#[tokio::test]
async fn enqueue_while_active_is_refused() {
    let (mut wizard, backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(queued("job-1"))
            .with_poll_statuses("job-1", [JobStatus::Running]),
    )
    .await;
    wizard.start_generation("", None, None).await.unwrap();

    let err = wizard.start_generation("", None, None).await.unwrap_err();
    assert!(matches!(
        err,
        WizardError::Job(JobError::JobAlreadyActive { .. })
    ));
    assert!(err.is_guard_refusal());
    assert_eq!(backend.calls(Op::Enqueue), 1);
    wizard.dispose();
}

/// Tenet: unparseable or negative budgets fail validation before any call.
#[tokio::test]
async fn bad_budgets_are_rejected_locally() {
    let (mut wizard, backend) = planned_wizard(ScriptedBackend::new()).await;

    for (max, daily) in [(Some("ten"), None), (None, Some("-5")), (Some("NaN"), None)] {
        let err = wizard.start_generation("", max, daily).await.unwrap_err();
        assert!(err.is_validation(), "{err}");
    }
    assert_eq!(backend.calls(Op::Enqueue), 0);
    assert!(wizard.current_job().is_none());
}

/// Tenet: poll failures and foreign snapshots never end polling or corrupt
/// the held job.
#[tokio::test]
async fn poll_errors_and_foreign_snapshots_are_survived() {
    let (mut wizard, backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(queued("job-1"))
            .with_poll(Err(BackendError::Transport("connection reset".into())))
            .with_poll(Ok(GenerationJob::new("job-9", JobStatus::Failed)))
            .with_poll(Ok(GenerationJob::new("job-1", JobStatus::Running).with_progress(40, Some(SectionKey::Methods))))
            .with_poll_statuses("job-1", [JobStatus::Succeeded]),
    )
    .await;
    wizard.start_generation("", None, None).await.unwrap();

    let settled = wizard.wait_for_generation().await.unwrap();
    assert_eq!(settled.id.as_str(), "job-1");
    assert_eq!(settled.status, JobStatus::Succeeded);
    assert_eq!(backend.calls(Op::Fetch), 4);
    assert!(wizard.last_poll_error().is_none());
}

/// Tenet: an enqueue failure leaves no job behind and is retryable.
#[tokio::test]
async fn enqueue_failure_is_reported() {
    let (mut wizard, _backend) = planned_wizard(
        ScriptedBackend::new()
            .with_enqueue(Err(BackendError::Service {
                status: 503,
                message: "overloaded".into(),
            })),
    )
    .await;

    let err = wizard.start_generation("", None, None).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(wizard.current_job().is_none());
    assert!(!wizard.is_polling());
}
