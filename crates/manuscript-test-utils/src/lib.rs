//! Testing utilities for the manuscript workspace
//!
//! Shared test doubles and fixtures:
//! - [`ScriptedBackend`]: a collaborator that replays scripted responses and
//!   counts every call
//! - `fixtures`: canned frames, configs, and reports

#![allow(missing_docs)]

use async_trait::async_trait;
use manuscript_core::{
    BackendError, BootstrapRequest, BootstrapResponse, ClaimLinkRequest, ClaimSuggestion,
    CostEstimate, DraftBundle, EnqueueRequest, EstimateRequest, ExportResponse, GenerationJob, Id,
    JobStatus, ManuscriptBackend, PlanItem, PlanRequest, PlanResponse, QcReport, RunContext,
    SectionDraft, SectionKey,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Collaborator operation, for call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    Bootstrap,
    Plan,
    Estimate,
    Enqueue,
    Fetch,
    Cancel,
    Retry,
    Drafts,
    Qc,
    ExportStrict,
    ExportWithWarnings,
    ClaimLinker,
}

type Scripted<T> = VecDeque<Result<T, BackendError>>;

#[derive(Debug, Default)]
struct Script {
    bootstrap: Scripted<BootstrapResponse>,
    plan: Scripted<PlanResponse>,
    enqueue: Scripted<GenerationJob>,
    polls: Scripted<GenerationJob>,
    last_polled: Option<GenerationJob>,
    cancel: Scripted<GenerationJob>,
    retry: Scripted<GenerationJob>,
    drafts: Vec<SectionDraft>,
    qc: Scripted<QcReport>,
    export: Option<ExportResponse>,
    suggestions: Vec<ClaimSuggestion>,
    fetch_delay: Option<Duration>,
    cancel_delay: Option<Duration>,
}

/// Backend that replays scripted responses
///
/// Unscripted calls fail with a 501 service error, except:
/// - `plan_sections` answers one item per requested section
/// - `fetch_generation_job` repeats the last scripted snapshot once the
///   script runs out
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
    calls: Mutex<BTreeMap<Op, usize>>,
    requests: Mutex<Vec<EnqueueRequest>>,
}

fn unscripted(op: Op) -> BackendError {
    BackendError::Service {
        status: 501,
        message: format!("{op:?} not scripted"),
    }
}

fn pop<T>(queue: &mut Scripted<T>, op: Op) -> Result<T, BackendError> {
    queue.pop_front().unwrap_or_else(|| Err(unscripted(op)))
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bootstrap answers with this identity and section recommendation
    pub fn with_bootstrap(
        self,
        project_id: &str,
        manuscript_id: &str,
        sections: impl IntoIterator<Item = SectionKey>,
    ) -> Self {
        self.script.lock().bootstrap.push_back(Ok(BootstrapResponse::new(
            project_id,
            manuscript_id,
            sections.into_iter().collect(),
        )));
        self
    }

    pub fn with_plan(self, response: Result<PlanResponse, BackendError>) -> Self {
        self.script.lock().plan.push_back(response);
        self
    }

    pub fn with_enqueue(self, response: Result<GenerationJob, BackendError>) -> Self {
        self.script.lock().enqueue.push_back(response);
        self
    }

    /// Queue one poll result
    pub fn with_poll(self, response: Result<GenerationJob, BackendError>) -> Self {
        self.script.lock().polls.push_back(response);
        self
    }

    /// Queue poll snapshots of `job_id` with these statuses
    pub fn with_poll_statuses(
        self,
        job_id: &str,
        statuses: impl IntoIterator<Item = JobStatus>,
    ) -> Self {
        {
            let mut script = self.script.lock();
            for status in statuses {
                script.polls.push_back(Ok(GenerationJob::new(job_id, status)));
            }
        }
        self
    }

    pub fn with_cancel(self, response: Result<GenerationJob, BackendError>) -> Self {
        self.script.lock().cancel.push_back(response);
        self
    }

    pub fn with_retry(self, response: Result<GenerationJob, BackendError>) -> Self {
        self.script.lock().retry.push_back(response);
        self
    }

    pub fn with_drafts<'a>(self, drafts: impl IntoIterator<Item = (SectionKey, &'a str)>) -> Self {
        self.script.lock().drafts = drafts
            .into_iter()
            .map(|(section, text)| SectionDraft {
                section,
                text: text.to_string(),
            })
            .collect();
        self
    }

    pub fn with_qc(self, response: Result<QcReport, BackendError>) -> Self {
        self.script.lock().qc.push_back(response);
        self
    }

    pub fn with_export(self, filename: &str, content: &str) -> Self {
        self.script.lock().export = Some(ExportResponse {
            filename: filename.to_string(),
            content: content.to_string(),
        });
        self
    }

    pub fn with_suggestions(self, suggestions: Vec<ClaimSuggestion>) -> Self {
        self.script.lock().suggestions = suggestions;
        self
    }

    /// Delay every fetch by `delay`
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        self.script.lock().fetch_delay = Some(delay);
        self
    }

    /// Delay every cancel by `delay`
    pub fn with_cancel_delay(self, delay: Duration) -> Self {
        self.script.lock().cancel_delay = Some(delay);
        self
    }

    /// Queue more poll results on a shared backend
    pub fn push_poll(&self, response: Result<GenerationJob, BackendError>) {
        self.script.lock().polls.push_back(response);
    }

    /// Number of calls made to `op`
    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Every enqueue request received
    pub fn enqueue_requests(&self) -> Vec<EnqueueRequest> {
        self.requests.lock().clone()
    }

    fn record(&self, op: Op) {
        *self.calls.lock().entry(op).or_insert(0) += 1;
    }
}

#[async_trait]
impl ManuscriptBackend for ScriptedBackend {
    async fn bootstrap_run_context(
        &self,
        _request: BootstrapRequest,
    ) -> Result<BootstrapResponse, BackendError> {
        self.record(Op::Bootstrap);
        pop(&mut self.script.lock().bootstrap, Op::Bootstrap)
    }

    async fn plan_sections(&self, request: PlanRequest) -> Result<PlanResponse, BackendError> {
        self.record(Op::Plan);
        let mut script = self.script.lock();
        if let Some(response) = script.plan.pop_front() {
            return response;
        }
        Ok(PlanResponse {
            items: request
                .sections
                .into_iter()
                .map(|section| PlanItem {
                    section,
                    objective: format!("Draft the {section} section"),
                    must_include: vec![format!("Key point for {section}")],
                    qc_focus: vec!["claim_support".to_string()],
                })
                .collect(),
        })
    }

    async fn estimate_generation(
        &self,
        request: EstimateRequest,
    ) -> Result<CostEstimate, BackendError> {
        self.record(Op::Estimate);
        let sections = request.sections.len() as f64;
        Ok(CostEstimate {
            estimated_cost_usd_low: 0.05 * sections,
            estimated_cost_usd_high: 0.1 * sections,
        })
    }

    async fn enqueue_generation(
        &self,
        request: EnqueueRequest,
    ) -> Result<GenerationJob, BackendError> {
        self.record(Op::Enqueue);
        self.requests.lock().push(request);
        pop(&mut self.script.lock().enqueue, Op::Enqueue)
    }

    async fn fetch_generation_job(&self, job_id: Id) -> Result<GenerationJob, BackendError> {
        self.record(Op::Fetch);
        let delay = self.script.lock().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock();
        match script.polls.pop_front() {
            Some(Ok(job)) => {
                script.last_polled = Some(job.clone());
                Ok(job)
            }
            Some(Err(e)) => Err(e),
            None => script.last_polled.clone().ok_or(BackendError::Service {
                status: 404,
                message: format!("unknown job {job_id}"),
            }),
        }
    }

    async fn cancel_generation(&self, _job_id: Id) -> Result<GenerationJob, BackendError> {
        self.record(Op::Cancel);
        let delay = self.script.lock().cancel_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        pop(&mut self.script.lock().cancel, Op::Cancel)
    }

    async fn retry_generation(&self, _job_id: Id) -> Result<GenerationJob, BackendError> {
        self.record(Op::Retry);
        pop(&mut self.script.lock().retry, Op::Retry)
    }

    async fn fetch_drafts(&self, _run: RunContext) -> Result<DraftBundle, BackendError> {
        self.record(Op::Drafts);
        Ok(DraftBundle {
            sections: self.script.lock().drafts.clone(),
        })
    }

    async fn run_qc_checks(&self, _run: RunContext) -> Result<QcReport, BackendError> {
        self.record(Op::Qc);
        pop(&mut self.script.lock().qc, Op::Qc)
    }

    async fn export_qc_gated_markdown(
        &self,
        _run: RunContext,
    ) -> Result<ExportResponse, BackendError> {
        self.record(Op::ExportStrict);
        self.script
            .lock()
            .export
            .clone()
            .ok_or_else(|| unscripted(Op::ExportStrict))
    }

    async fn export_markdown_with_warnings(
        &self,
        _run: RunContext,
    ) -> Result<ExportResponse, BackendError> {
        self.record(Op::ExportWithWarnings);
        self.script
            .lock()
            .export
            .clone()
            .ok_or_else(|| unscripted(Op::ExportWithWarnings))
    }

    async fn run_claim_linker(
        &self,
        request: ClaimLinkRequest,
    ) -> Result<Vec<ClaimSuggestion>, BackendError> {
        self.record(Op::ClaimLinker);
        Ok(self
            .script
            .lock()
            .suggestions
            .iter()
            .filter(|s| s.confidence >= request.min_confidence)
            .cloned()
            .collect())
    }
}

/// Canned inputs
pub mod fixtures {
    use manuscript_core::{
        OrchestratorConfig, QcCategory, QcIssue, QcReport, ResearchFrame, Severity,
    };
    use std::time::Duration;

    /// Polling period used by tests
    pub const POLL: Duration = Duration::from_millis(10);

    pub fn frame() -> ResearchFrame {
        ResearchFrame::new("Sleep duration and depressive symptoms", "JAMA Psychiatry")
            .with_answer("design", "prospective cohort")
            .with_answer("exposure", "self-reported sleep duration")
    }

    /// Default config with a short polling period
    pub fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::new().with_poll_interval(POLL)
    }

    /// Report with `high` high-severity and `medium` medium-severity findings
    pub fn qc_report(high: u32, medium: u32) -> QcReport {
        let mut issues = Vec::new();
        if high > 0 {
            issues.push(QcIssue {
                category: QcCategory::CausalLanguage,
                severity: Severity::High,
                count: high,
                summary: "Causal claims in observational results".to_string(),
            });
        }
        if medium > 0 {
            issues.push(QcIssue {
                category: QcCategory::Limitations,
                severity: Severity::Medium,
                count: medium,
                summary: "Limitations not discussed".to_string(),
            });
        }
        QcReport::from_issues(issues)
    }
}
