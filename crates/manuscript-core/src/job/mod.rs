//! Generation job lifecycle
//!
//! Drives one generation job from submission to a terminal state:
//! - Validated, budget-constrained submission
//! - Bounded polling on a fixed interval, stopped on terminal status or teardown
//! - Cancellation requests that never force a local terminal state
//! - Retry as a fresh submission with a new job identity
//!
//! Snapshots are applied in request order. Every fetch takes a ticket
//! (epoch + sequence number) before it is issued, and a cancel reply takes one
//! when it arrives; a snapshot whose ticket is older than the last applied
//! one, or that belongs to a replaced job, is dropped.

pub mod state;

pub use state::JobStatus;

use crate::backend::{EnqueueRequest, ManuscriptBackend};
use crate::error::JobError;
use crate::types::{Id, RunContext, SectionKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Server-reported generation job snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerationJob {
    /// Job id
    pub id: Id,
    /// Status
    pub status: JobStatus,
    /// Progress, 0..=100
    #[serde(default)]
    pub progress_percent: u8,
    /// Section being generated
    #[serde(default)]
    pub current_section: Option<SectionKey>,
    /// Monotonic server revision, when the service reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl GenerationJob {
    /// Create snapshot
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<Id>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            progress_percent: 0,
            current_section: None,
            revision: None,
        }
    }

    /// With progress
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, percent: u8, section: Option<SectionKey>) -> Self {
        self.progress_percent = percent.min(100);
        self.current_section = section;
        self
    }

    /// With server revision
    #[inline]
    #[must_use]
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// User-supplied generation parameters, budgets still as entered text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationParams {
    /// Sections to generate
    pub sections: Vec<SectionKey>,
    /// Notes passed to generation
    pub notes_context: String,
    /// Maximum estimated cost, as typed
    pub max_estimated_cost_usd: Option<String>,
    /// Daily budget, as typed
    pub daily_budget_usd: Option<String>,
}

impl GenerationParams {
    /// Create params
    #[inline]
    #[must_use]
    pub fn new(sections: Vec<SectionKey>, notes_context: impl Into<String>) -> Self {
        Self {
            sections,
            notes_context: notes_context.into(),
            ..Self::default()
        }
    }

    /// With maximum estimated cost text
    #[inline]
    #[must_use]
    pub fn with_max_cost(mut self, text: impl Into<String>) -> Self {
        self.max_estimated_cost_usd = Some(text.into());
        self
    }

    /// With daily budget text
    #[inline]
    #[must_use]
    pub fn with_daily_budget(mut self, text: impl Into<String>) -> Self {
        self.daily_budget_usd = Some(text.into());
        self
    }

    /// Validate into a submission for `run`
    ///
    /// # Errors
    /// - `JobError::NoSections` if no section is selected
    /// - `JobError::InvalidBudget` if a budget is non-empty but not a finite,
    ///   non-negative number
    pub fn into_request(self, run: &RunContext) -> Result<EnqueueRequest, JobError> {
        let mut sections = self.sections;
        sections.sort();
        sections.dedup();
        if sections.is_empty() {
            return Err(JobError::NoSections);
        }
        let max_estimated_cost_usd =
            parse_budget("maxEstimatedCostUsd", self.max_estimated_cost_usd.as_deref())?;
        let daily_budget_usd = parse_budget("dailyBudgetUsd", self.daily_budget_usd.as_deref())?;

        Ok(EnqueueRequest {
            project_id: run.project_id.clone(),
            manuscript_id: run.manuscript_id.clone(),
            sections,
            notes_context: self.notes_context,
            max_estimated_cost_usd,
            daily_budget_usd,
        })
    }
}

/// Parse an optional budget field
///
/// Absent or blank means "no limit"; anything else must parse as a finite,
/// non-negative number.
pub fn parse_budget(field: &'static str, raw: Option<&str>) -> Result<Option<f64>, JobError> {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(Some(value)),
        _ => Err(JobError::InvalidBudget {
            field,
            value: text.to_string(),
        }),
    }
}

/// Ordering token for an incoming snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    epoch: u64,
    seq: u64,
}

/// What happened to an incoming snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Adopted,
    Stale,
    Rejected,
}

#[derive(Debug, Default)]
struct JobSlot {
    job: Option<GenerationJob>,
    /// Bumped whenever the active job is replaced
    epoch: u64,
    next_seq: u64,
    applied_seq: u64,
    last_poll_error: Option<String>,
}

impl JobSlot {
    fn issue(&mut self) -> Ticket {
        self.next_seq += 1;
        Ticket {
            epoch: self.epoch,
            seq: self.next_seq,
        }
    }

    fn replace(&mut self, job: Option<GenerationJob>) {
        self.epoch += 1;
        self.applied_seq = self.next_seq;
        self.last_poll_error = None;
        self.job = job;
    }

    fn apply(&mut self, ticket: Ticket, snapshot: GenerationJob) -> Applied {
        if ticket.epoch != self.epoch || ticket.seq <= self.applied_seq {
            return Applied::Stale;
        }
        let Some(current) = self.job.as_ref() else {
            return Applied::Stale;
        };
        if current.id != snapshot.id {
            tracing::warn!("Snapshot for job {} while tracking {}", snapshot.id, current.id);
            return Applied::Rejected;
        }
        if let (Some(have), Some(got)) = (current.revision, snapshot.revision) {
            if got < have {
                return Applied::Stale;
            }
        }
        if !state::is_allowed(current.status, snapshot.status) {
            tracing::warn!(
                "Ignoring snapshot for job {}: {} -> {} is not a valid transition",
                current.id,
                current.status,
                snapshot.status
            );
            return Applied::Rejected;
        }

        if current.status != snapshot.status {
            tracing::info!("Job {}: {} -> {}", snapshot.id, current.status, snapshot.status);
        }
        let mut snapshot = snapshot;
        snapshot.progress_percent = snapshot.progress_percent.min(100);
        self.applied_seq = ticket.seq;
        self.job = Some(snapshot);
        Applied::Adopted
    }
}

/// State shared between the controller and its polling task
#[derive(Debug)]
struct JobShared {
    slot: Mutex<JobSlot>,
    updates: watch::Sender<Option<GenerationJob>>,
}

impl JobShared {
    fn new() -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            slot: Mutex::new(JobSlot::default()),
            updates,
        }
    }

    fn current(&self) -> Option<GenerationJob> {
        self.slot.lock().job.clone()
    }

    fn issue(&self) -> Ticket {
        self.slot.lock().issue()
    }

    /// Ticket for the next poll, unless the job was replaced or has settled
    fn poll_ticket(&self, epoch: u64) -> Option<Ticket> {
        let mut slot = self.slot.lock();
        let active = slot.job.as_ref().is_some_and(|j| j.status.is_active());
        (slot.epoch == epoch && active).then(|| slot.issue())
    }

    fn replace(&self, job: Option<GenerationJob>) -> u64 {
        let epoch = {
            let mut slot = self.slot.lock();
            slot.replace(job.clone());
            slot.epoch
        };
        self.updates.send_replace(job);
        epoch
    }

    fn apply(&self, ticket: Ticket, snapshot: GenerationJob) -> Applied {
        let (applied, job) = {
            let mut slot = self.slot.lock();
            let applied = slot.apply(ticket, snapshot);
            if applied == Applied::Adopted {
                slot.last_poll_error = None;
            }
            (applied, slot.job.clone())
        };
        if applied == Applied::Adopted {
            self.updates.send_replace(job);
        }
        applied
    }

    fn record_poll_error(&self, message: String) {
        self.slot.lock().last_poll_error = Some(message);
    }

    fn is_settled(&self, epoch: u64) -> bool {
        let slot = self.slot.lock();
        slot.epoch != epoch || slot.job.as_ref().map_or(true, |j| j.status.is_terminal())
    }
}

/// Handle to the single polling task of the active job
#[derive(Debug)]
struct Poller {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Poller {
    fn stop(self) {
        let _ = self.stop.send(true);
        self.handle.abort();
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Owner of the active generation job
///
/// Mutating operations take `&mut self`, so cancel and retry on the same job
/// are serialized by the borrow. The polling task only writes through the
/// shared slot, and only with a ticket.
pub struct JobController {
    backend: Arc<dyn ManuscriptBackend>,
    poll_interval: Duration,
    shared: Arc<JobShared>,
    poller: Option<Poller>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("poll_interval", &self.poll_interval)
            .field("job", &self.shared.current())
            .field("polling", &self.is_polling())
            .finish_non_exhaustive()
    }
}

impl JobController {
    /// Create controller
    #[must_use]
    pub fn new(backend: Arc<dyn ManuscriptBackend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
            shared: Arc::new(JobShared::new()),
            poller: None,
        }
    }

    /// Latest adopted snapshot of the active job
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<GenerationJob> {
        self.shared.current()
    }

    /// Most recent polling failure, cleared by the next adopted snapshot
    #[must_use]
    pub fn last_poll_error(&self) -> Option<String> {
        self.shared.slot.lock().last_poll_error.clone()
    }

    /// Watch adopted snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<GenerationJob>> {
        self.shared.updates.subscribe()
    }

    /// Whether a polling task is alive for an active job
    ///
    /// Turns false as soon as a terminal snapshot is adopted, even if the
    /// task has not yet exited; it issues no further fetch either way.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(Poller::is_running)
            && self.current().is_some_and(|job| job.status.is_active())
    }

    /// Submit a generation job and start polling it
    ///
    /// Validation happens before any collaborator call. On collaborator
    /// failure the previously active job (if any) is left untouched.
    ///
    /// # Errors
    /// - `JobError::MissingRunContext` without a run
    /// - `JobError::NoSections` / `JobError::InvalidBudget` on bad input
    /// - `JobError::JobAlreadyActive` while another job is still active
    /// - `JobError::Backend` if the service call fails
    pub async fn enqueue(
        &mut self,
        run: Option<&RunContext>,
        params: GenerationParams,
    ) -> Result<GenerationJob, JobError> {
        let run = run.ok_or(JobError::MissingRunContext)?;
        let request = params.into_request(run)?;
        if let Some(active) = self.current().filter(|j| j.status.is_active()) {
            return Err(JobError::JobAlreadyActive {
                job_id: active.id.to_string(),
                status: active.status,
            });
        }

        tracing::info!(
            "Enqueueing generation for {} section(s) of manuscript {}",
            request.sections.len(),
            run.manuscript_id
        );
        let job = self
            .backend
            .enqueue_generation(request)
            .await
            .map_err(|e| {
                tracing::error!("Enqueue failed: {}", e);
                JobError::from(e)
            })?;

        self.install(job.clone());
        Ok(job)
    }

    /// Request cancellation of the active job
    ///
    /// Returns the snapshot the controller holds after the request. The job
    /// is not cancelled until a later snapshot says so. Calling this on a
    /// job that is already cancel-requested or terminal is a no-op.
    ///
    /// # Errors
    /// - `JobError::NoActiveJob` if nothing was submitted
    /// - `JobError::Backend` if the service call fails (state unchanged)
    pub async fn cancel(&mut self) -> Result<GenerationJob, JobError> {
        let current = self.current().ok_or(JobError::NoActiveJob)?;
        if !matches!(current.status, JobStatus::Queued | JobStatus::Running) {
            tracing::debug!("Cancel on job {} ({}) is a no-op", current.id, current.status);
            return Ok(current);
        }

        tracing::info!("Requesting cancellation of job {}", current.id);
        let snapshot = self
            .backend
            .cancel_generation(current.id.clone())
            .await
            .map_err(|e| {
                tracing::error!("Cancel of job {} failed: {}", current.id, e);
                JobError::from(e)
            })?;

        // the reply is newer than any poll that landed while the call was in flight
        let ticket = self.shared.issue();
        self.shared.apply(ticket, snapshot.clone());
        let held = self.current().unwrap_or(snapshot);
        if held.status.is_terminal() {
            self.stop_polling();
        }
        Ok(held)
    }

    /// Resubmit a failed or cancelled job
    ///
    /// # Errors
    /// - `JobError::NoActiveJob` if nothing was submitted
    /// - `JobError::RetryNotAllowed` unless the job failed or was cancelled
    /// - `JobError::RetryReusedIdentity` if the service returns the old id
    /// - `JobError::Backend` if the service call fails (state unchanged)
    pub async fn retry(&mut self) -> Result<GenerationJob, JobError> {
        let current = self.current().ok_or(JobError::NoActiveJob)?;
        if !current.status.is_retryable() {
            return Err(JobError::RetryNotAllowed {
                status: current.status,
            });
        }

        tracing::info!("Retrying job {}", current.id);
        let job = self
            .backend
            .retry_generation(current.id.clone())
            .await
            .map_err(|e| {
                tracing::error!("Retry of job {} failed: {}", current.id, e);
                JobError::from(e)
            })?;
        if job.id == current.id {
            return Err(JobError::RetryReusedIdentity(job.id.to_string()));
        }

        self.install(job.clone());
        Ok(job)
    }

    /// Wait until the active job reaches a terminal status
    ///
    /// Returns `None` if no job was submitted. Returns the latest snapshot
    /// without waiting if polling has been stopped.
    pub async fn wait_until_settled(&self) -> Option<GenerationJob> {
        let mut updates = self.subscribe();
        loop {
            let latest = updates.borrow_and_update().clone();
            match latest {
                None => return None,
                Some(job) if job.status.is_terminal() => return Some(job),
                Some(_) if !self.is_polling() => return self.current(),
                Some(_) => {}
            }
            if updates.changed().await.is_err() {
                return self.current();
            }
        }
    }

    /// Stop polling and forget the active job
    pub fn clear(&mut self) {
        self.stop_polling();
        self.shared.replace(None);
    }

    /// Stop polling; no fetch is issued after this returns
    pub fn dispose(&mut self) {
        self.stop_polling();
    }

    fn install(&mut self, job: GenerationJob) {
        self.stop_polling();
        let epoch = self.shared.replace(Some(job.clone()));
        if job.status.is_active() {
            self.start_polling(job.id, epoch);
        } else {
            tracing::info!("Job {} reported {} on submission", job.id, job.status);
        }
    }

    fn start_polling(&mut self, job_id: Id, epoch: u64) {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.backend),
            Arc::clone(&self.shared),
            job_id,
            epoch,
            self.poll_interval,
            stop_rx,
        ));
        self.poller = Some(Poller { stop, handle });
    }

    fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

/// Polling task body
async fn poll_loop(
    backend: Arc<dyn ManuscriptBackend>,
    shared: Arc<JobShared>,
    job_id: Id,
    epoch: u64,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    tracing::debug!("Polling job {} every {:?}", job_id, interval);
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }
        let Some(ticket) = shared.poll_ticket(epoch) else {
            break;
        };
        match backend.fetch_generation_job(job_id.clone()).await {
            Ok(snapshot) => {
                let applied = shared.apply(ticket, snapshot);
                tracing::debug!("Poll of job {}: {:?}", job_id, applied);
            }
            Err(e) => {
                tracing::warn!("Polling job {} failed: {}", job_id, e);
                shared.record_poll_error(e.to_string());
            }
        }
        if shared.is_settled(epoch) {
            break;
        }
    }
    tracing::debug!("Stopped polling job {}", job_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockManuscriptBackend;
    use crate::error::BackendError;

    fn run() -> RunContext {
        RunContext::new("p-1", "m-1")
    }

    fn controller(mock: MockManuscriptBackend) -> JobController {
        JobController::new(Arc::new(mock), Duration::from_millis(5))
    }

    #[test]
    fn parse_budget_rules() {
        assert_eq!(parse_budget("f", None).unwrap(), None);
        assert_eq!(parse_budget("f", Some("   ")).unwrap(), None);
        assert_eq!(parse_budget("f", Some(" 2.50 ")).unwrap(), Some(2.5));
        assert!(matches!(
            parse_budget("f", Some("abc")),
            Err(JobError::InvalidBudget { field: "f", .. })
        ));
        assert!(parse_budget("f", Some("inf")).is_err());
        assert!(parse_budget("f", Some("NaN")).is_err());
        assert!(parse_budget("f", Some("-1")).is_err());
    }

    #[test]
    fn stale_and_foreign_snapshots_are_dropped() {
        let mut slot = JobSlot::default();
        slot.replace(Some(GenerationJob::new("j-1", JobStatus::Queued)));

        let early = slot.issue();
        let late = slot.issue();
        assert_eq!(
            slot.apply(late, GenerationJob::new("j-1", JobStatus::Succeeded)),
            Applied::Adopted
        );
        assert_eq!(
            slot.apply(early, GenerationJob::new("j-1", JobStatus::Running)),
            Applied::Stale
        );
        assert_eq!(slot.job.as_ref().unwrap().status, JobStatus::Succeeded);

        let after = slot.issue();
        assert_eq!(
            slot.apply(after, GenerationJob::new("j-1", JobStatus::Running)),
            Applied::Rejected
        );

        let other = slot.issue();
        assert_eq!(
            slot.apply(other, GenerationJob::new("j-9", JobStatus::Running)),
            Applied::Rejected
        );
    }

    #[test]
    fn older_revisions_are_stale() {
        let mut slot = JobSlot::default();
        slot.replace(Some(GenerationJob::new("j-1", JobStatus::Running).with_revision(4)));
        let ticket = slot.issue();
        assert_eq!(
            slot.apply(ticket, GenerationJob::new("j-1", JobStatus::Running).with_revision(3)),
            Applied::Stale
        );
    }

    #[test]
    fn replaced_job_ignores_old_tickets() {
        let mut slot = JobSlot::default();
        slot.replace(Some(GenerationJob::new("j-1", JobStatus::Failed)));
        let old = slot.issue();
        slot.replace(Some(GenerationJob::new("j-2", JobStatus::Queued)));
        assert_eq!(
            slot.apply(old, GenerationJob::new("j-2", JobStatus::Running)),
            Applied::Stale
        );
    }

    #[tokio::test]
    async fn invalid_budget_makes_no_call() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_enqueue_generation().times(0);
        let mut jobs = controller(mock);

        let params = GenerationParams::new(vec![SectionKey::Methods], "").with_max_cost("abc");
        let err = jobs.enqueue(Some(&run()), params).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidBudget { field: "maxEstimatedCostUsd", .. }));
        assert!(jobs.current().is_none());
    }

    #[tokio::test]
    async fn enqueue_requires_run_and_sections() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_enqueue_generation().times(0);
        let mut jobs = controller(mock);

        let err = jobs
            .enqueue(None, GenerationParams::new(vec![SectionKey::Methods], ""))
            .await
            .unwrap_err();
        assert_eq!(err, JobError::MissingRunContext);

        let err = jobs
            .enqueue(Some(&run()), GenerationParams::new(vec![], ""))
            .await
            .unwrap_err();
        assert_eq!(err, JobError::NoSections);
    }

    #[tokio::test]
    async fn enqueue_failure_leaves_no_job() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_enqueue_generation()
            .times(1)
            .returning(|_| Err(BackendError::Transport("offline".into())));
        mock.expect_fetch_generation_job().times(0);
        let mut jobs = controller(mock);

        let err = jobs
            .enqueue(Some(&run()), GenerationParams::new(vec![SectionKey::Methods], ""))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Backend(BackendError::Transport(_))));
        assert!(jobs.current().is_none());
        assert!(!jobs.is_polling());
    }

    #[tokio::test]
    async fn retry_on_succeeded_job_is_refused() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_enqueue_generation()
            .returning(|_| Ok(GenerationJob::new("j-1", JobStatus::Succeeded)));
        mock.expect_retry_generation().times(0);
        let mut jobs = controller(mock);

        jobs.enqueue(Some(&run()), GenerationParams::new(vec![SectionKey::Methods], ""))
            .await
            .unwrap();
        let err = jobs.retry().await.unwrap_err();
        assert_eq!(err, JobError::RetryNotAllowed { status: JobStatus::Succeeded });
    }

    #[tokio::test]
    async fn cancel_on_cancelled_job_is_noop() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_enqueue_generation()
            .returning(|_| Ok(GenerationJob::new("j-1", JobStatus::Cancelled)));
        mock.expect_cancel_generation().times(0);
        let mut jobs = controller(mock);

        jobs.enqueue(Some(&run()), GenerationParams::new(vec![SectionKey::Methods], ""))
            .await
            .unwrap();
        let first = jobs.cancel().await.unwrap();
        let second = jobs.cancel().await.unwrap();
        assert_eq!(first.status, JobStatus::Cancelled);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn retry_reusing_identity_is_rejected() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_enqueue_generation()
            .returning(|_| Ok(GenerationJob::new("j-1", JobStatus::Failed)));
        mock.expect_retry_generation()
            .returning(|id| Ok(GenerationJob::new(id, JobStatus::Queued)));
        let mut jobs = controller(mock);

        jobs.enqueue(Some(&run()), GenerationParams::new(vec![SectionKey::Methods], ""))
            .await
            .unwrap();
        let err = jobs.retry().await.unwrap_err();
        assert_eq!(err, JobError::RetryReusedIdentity("j-1".into()));
        assert_eq!(jobs.current().unwrap().status, JobStatus::Failed);
    }
}
