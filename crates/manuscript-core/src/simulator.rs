//! In-process simulated collaborator
//!
//! Deterministic stand-in for the manuscript service, used by the
//! `manuscript-run simulate` command and by tests:
//! - ULID-backed project, manuscript, and job ids
//! - One section drafted per poll
//! - QC findings derived from the generated draft text
//! - Strict export refused while findings remain

use crate::backend::{
    BootstrapRequest, BootstrapResponse, ClaimLinkRequest, ClaimSuggestion, CostEstimate,
    DraftBundle, EnqueueRequest, EstimateRequest, ExportResponse, ManuscriptBackend, PlanItem,
    PlanRequest, PlanResponse, SectionDraft,
};
use crate::error::BackendError;
use crate::job::{GenerationJob, JobStatus};
use crate::qc::{QcCategory, QcIssue, QcReport, Severity};
use crate::types::{Id, RunContext, SectionKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use ulid::Ulid;

/// Simulation knobs
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Fail the first submitted job halfway through
    pub fail_first_attempt: bool,
    /// Low-end cost per section, in USD
    pub cost_per_section_usd: f64,
    /// Sections recommended at bootstrap
    pub recommended_sections: Vec<SectionKey>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            fail_first_attempt: false,
            cost_per_section_usd: 0.04,
            recommended_sections: vec![
                SectionKey::Introduction,
                SectionKey::Methods,
                SectionKey::Results,
                SectionKey::Discussion,
            ],
        }
    }
}

#[derive(Debug)]
struct SimJob {
    snapshot: GenerationJob,
    request: EnqueueRequest,
    drafted: usize,
    fail_at: Option<usize>,
}

#[derive(Debug, Default)]
struct SimState {
    runs: Vec<RunContext>,
    jobs: HashMap<Id, SimJob>,
    drafts: BTreeMap<SectionKey, String>,
    submitted: usize,
}

/// Simulated manuscript service
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl SimulatedBackend {
    /// Create simulator with default knobs
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create simulator with custom knobs
    #[must_use]
    pub fn with_config(config: SimulatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Number of jobs submitted so far (retries included)
    #[must_use]
    pub fn submitted_jobs(&self) -> usize {
        self.state.lock().submitted
    }

    fn known_run(&self, run: &RunContext) -> Result<(), BackendError> {
        if self.state.lock().runs.contains(run) {
            Ok(())
        } else {
            Err(BackendError::Service {
                status: 404,
                message: format!("unknown manuscript {}", run.manuscript_id),
            })
        }
    }

    fn estimate_for(&self, sections: usize, notes: &str) -> CostEstimate {
        let base = self.config.cost_per_section_usd * sections as f64;
        let notes_factor = 1.0 + (notes.len() as f64 / 10_000.0);
        CostEstimate {
            estimated_cost_usd_low: base * notes_factor,
            estimated_cost_usd_high: base * notes_factor * 2.25,
        }
    }

    fn submit(&self, state: &mut SimState, request: EnqueueRequest) -> GenerationJob {
        let fail_at = (self.config.fail_first_attempt && state.submitted == 0)
            .then(|| request.sections.len().div_ceil(2));
        state.submitted += 1;
        let snapshot = GenerationJob::new(format!("job_{}", Ulid::new()), JobStatus::Queued)
            .with_revision(1);
        tracing::debug!("Simulator queued {}", snapshot.id);
        state.jobs.insert(
            snapshot.id.clone(),
            SimJob {
                snapshot: snapshot.clone(),
                request,
                drafted: 0,
                fail_at,
            },
        );
        snapshot
    }

    fn report(drafts: &BTreeMap<SectionKey, String>) -> QcReport {
        let mut issues = Vec::new();
        let causal = drafts
            .values()
            .map(|text| text.to_lowercase())
            .filter(|text| ["caused", "causes", "led to", "resulted in"].iter().any(|p| text.contains(*p)))
            .count();
        if causal > 0 {
            issues.push(QcIssue {
                category: QcCategory::CausalLanguage,
                severity: Severity::High,
                count: u32::try_from(causal).unwrap_or(u32::MAX),
                summary: "Causal claims in an observational design".to_string(),
            });
        }
        if drafts
            .get(&SectionKey::Discussion)
            .is_some_and(|text| !text.to_lowercase().contains("limitation"))
        {
            issues.push(QcIssue {
                category: QcCategory::Limitations,
                severity: Severity::Medium,
                count: 1,
                summary: "Discussion does not state limitations".to_string(),
            });
        }
        QcReport::from_issues(issues)
    }

    fn render(run: &RunContext, drafts: &BTreeMap<SectionKey, String>) -> ExportResponse {
        let mut content = format!(
            "<!-- manuscript {} exported {} -->\n",
            run.manuscript_id,
            chrono::Utc::now().format("%Y-%m-%d")
        );
        for (section, text) in drafts {
            content.push_str(&format!("\n# {}\n\n{}\n", section_heading(*section), text.trim()));
        }
        ExportResponse {
            filename: format!("manuscript-{}.md", run.manuscript_id),
            content,
        }
    }
}

fn section_heading(section: SectionKey) -> &'static str {
    match section {
        SectionKey::Abstract => "Abstract",
        SectionKey::Introduction => "Introduction",
        SectionKey::Methods => "Methods",
        SectionKey::Results => "Results",
        SectionKey::Discussion => "Discussion",
        SectionKey::Conclusion => "Conclusion",
    }
}

fn draft_text(section: SectionKey) -> &'static str {
    match section {
        SectionKey::Abstract => "We studied outcomes in a retrospective cohort of adults.",
        SectionKey::Introduction => "Cardiovascular events remain a leading cause of death.",
        SectionKey::Methods => "We analysed a retrospective cohort drawn from registry data.",
        SectionKey::Results => "Statin use was higher among participants without events.",
        SectionKey::Discussion => "Statin use led to fewer events, a significant benefit.",
        SectionKey::Conclusion => "Statin use was associated with fewer events.",
    }
}

fn plan_item(section: SectionKey) -> PlanItem {
    let (objective, must_include, qc_focus): (&str, &[&str], &[&str]) = match section {
        SectionKey::Abstract => ("Summarize the study", &["Design", "Main finding"], &["claim_support"]),
        SectionKey::Introduction => (
            "Motivate the question",
            &["Burden of disease", "Knowledge gap"],
            &["citation_integrity"],
        ),
        SectionKey::Methods => (
            "Describe design and analysis",
            &["Cohort definition", "Exposure and outcome", "Statistical model"],
            &["terminology"],
        ),
        SectionKey::Results => (
            "Report findings with uncertainty",
            &["Cohort characteristics", "Effect estimates with 95% CI"],
            &["results_alignment"],
        ),
        SectionKey::Discussion => (
            "Interpret findings",
            &["Comparison with prior work", "Implications"],
            &["causal_language", "limitations"],
        ),
        SectionKey::Conclusion => ("State the take-home message", &["Main finding"], &["claim_support"]),
    };
    PlanItem {
        section,
        objective: objective.to_string(),
        must_include: must_include.iter().map(|s| (*s).to_string()).collect(),
        qc_focus: qc_focus.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn not_found(job_id: &Id) -> BackendError {
    BackendError::Service {
        status: 404,
        message: format!("unknown job {job_id}"),
    }
}

#[async_trait]
impl ManuscriptBackend for SimulatedBackend {
    async fn bootstrap_run_context(
        &self,
        request: BootstrapRequest,
    ) -> Result<BootstrapResponse, BackendError> {
        if request.title.trim().is_empty() {
            return Err(BackendError::Service {
                status: 422,
                message: "title is required".to_string(),
            });
        }
        let response = BootstrapResponse::new(
            format!("proj_{}", Ulid::new()),
            format!("ms_{}", Ulid::new()),
            self.config.recommended_sections.clone(),
        );
        self.state.lock().runs.push(response.run_context());
        Ok(response)
    }

    async fn plan_sections(&self, request: PlanRequest) -> Result<PlanResponse, BackendError> {
        Ok(PlanResponse {
            items: request.sections.into_iter().map(plan_item).collect(),
        })
    }

    async fn estimate_generation(
        &self,
        request: EstimateRequest,
    ) -> Result<CostEstimate, BackendError> {
        Ok(self.estimate_for(request.sections.len(), &request.notes_context))
    }

    async fn enqueue_generation(
        &self,
        request: EnqueueRequest,
    ) -> Result<GenerationJob, BackendError> {
        self.known_run(&RunContext::new(
            request.project_id.clone(),
            request.manuscript_id.clone(),
        ))?;
        let estimate = self.estimate_for(request.sections.len(), &request.notes_context);
        if let Some(max) = request.max_estimated_cost_usd {
            if estimate.estimated_cost_usd_low > max {
                return Err(BackendError::Service {
                    status: 422,
                    message: format!(
                        "estimated cost ${:.2} exceeds limit ${:.2}",
                        estimate.estimated_cost_usd_low, max
                    ),
                });
            }
        }
        let mut state = self.state.lock();
        Ok(self.submit(&mut state, request))
    }

    async fn fetch_generation_job(&self, job_id: Id) -> Result<GenerationJob, BackendError> {
        let mut state = self.state.lock();
        let job = state.jobs.get_mut(&job_id).ok_or_else(|| not_found(&job_id))?;
        let total = job.request.sections.len();
        let snapshot = &mut job.snapshot;

        match snapshot.status {
            JobStatus::Queued => {
                snapshot.status = JobStatus::Running;
                snapshot.current_section = job.request.sections.first().copied();
            }
            JobStatus::Running => {
                job.drafted += 1;
                if job.fail_at.is_some_and(|at| job.drafted >= at) {
                    snapshot.status = JobStatus::Failed;
                } else if job.drafted >= total {
                    snapshot.status = JobStatus::Succeeded;
                    snapshot.current_section = None;
                } else {
                    snapshot.current_section = job.request.sections.get(job.drafted).copied();
                }
            }
            JobStatus::CancelRequested => snapshot.status = JobStatus::Cancelled,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => {}
        }
        let percent = (job.drafted * 100).checked_div(total).unwrap_or(100).min(100);
        snapshot.progress_percent = u8::try_from(percent).unwrap_or(100);
        snapshot.revision = Some(snapshot.revision.unwrap_or(0) + 1);

        let snapshot = snapshot.clone();
        if snapshot.status == JobStatus::Succeeded {
            let sections = job.request.sections.clone();
            state.drafts = sections
                .into_iter()
                .map(|section| (section, draft_text(section).to_string()))
                .collect();
        }
        Ok(snapshot)
    }

    async fn cancel_generation(&self, job_id: Id) -> Result<GenerationJob, BackendError> {
        let mut state = self.state.lock();
        let job = state.jobs.get_mut(&job_id).ok_or_else(|| not_found(&job_id))?;
        if job.snapshot.status.is_active() && job.snapshot.status != JobStatus::CancelRequested {
            job.snapshot.status = JobStatus::CancelRequested;
            job.snapshot.revision = Some(job.snapshot.revision.unwrap_or(0) + 1);
        }
        Ok(job.snapshot.clone())
    }

    async fn retry_generation(&self, job_id: Id) -> Result<GenerationJob, BackendError> {
        let mut state = self.state.lock();
        let job = state.jobs.get(&job_id).ok_or_else(|| not_found(&job_id))?;
        if !job.snapshot.status.is_retryable() {
            return Err(BackendError::Service {
                status: 409,
                message: format!("job {} is {}", job_id, job.snapshot.status),
            });
        }
        let request = job.request.clone();
        Ok(self.submit(&mut state, request))
    }

    async fn fetch_drafts(&self, run: RunContext) -> Result<DraftBundle, BackendError> {
        self.known_run(&run)?;
        let state = self.state.lock();
        Ok(DraftBundle {
            sections: state
                .drafts
                .iter()
                .map(|(section, text)| SectionDraft {
                    section: *section,
                    text: text.clone(),
                })
                .collect(),
        })
    }

    async fn run_qc_checks(&self, run: RunContext) -> Result<QcReport, BackendError> {
        self.known_run(&run)?;
        Ok(Self::report(&self.state.lock().drafts))
    }

    async fn export_qc_gated_markdown(
        &self,
        run: RunContext,
    ) -> Result<ExportResponse, BackendError> {
        self.known_run(&run)?;
        let state = self.state.lock();
        if Self::report(&state.drafts).total_findings > 0 {
            return Err(BackendError::Service {
                status: 409,
                message: "QC must pass before export".to_string(),
            });
        }
        Ok(Self::render(&run, &state.drafts))
    }

    async fn export_markdown_with_warnings(
        &self,
        run: RunContext,
    ) -> Result<ExportResponse, BackendError> {
        self.known_run(&run)?;
        Ok(Self::render(&run, &self.state.lock().drafts))
    }

    async fn run_claim_linker(
        &self,
        request: ClaimLinkRequest,
    ) -> Result<Vec<ClaimSuggestion>, BackendError> {
        Ok(request
            .claim_ids
            .into_iter()
            .enumerate()
            .map(|(i, claim_id)| ClaimSuggestion {
                source: format!("registry-extract-{}", i + 1),
                confidence: 0.9 - 0.15 * i as f64,
                claim_id,
            })
            .filter(|s| s.confidence >= request.min_confidence)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bootstrapped(sim: &SimulatedBackend) -> RunContext {
        sim.bootstrap_run_context(BootstrapRequest {
            title: "Statins".into(),
            target_journal: "BMJ".into(),
            answers: BTreeMap::new(),
        })
        .await
        .unwrap()
        .run_context()
    }

    fn request(run: &RunContext, sections: Vec<SectionKey>) -> EnqueueRequest {
        EnqueueRequest {
            project_id: run.project_id.clone(),
            manuscript_id: run.manuscript_id.clone(),
            sections,
            notes_context: String::new(),
            max_estimated_cost_usd: None,
            daily_budget_usd: None,
        }
    }

    #[tokio::test]
    async fn job_advances_one_section_per_poll() {
        let sim = SimulatedBackend::new();
        let run = bootstrapped(&sim).await;
        let job = sim
            .enqueue_generation(request(&run, vec![SectionKey::Methods, SectionKey::Results]))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let statuses: Vec<(JobStatus, u8)> = {
            let mut out = Vec::new();
            for _ in 0..4 {
                let snap = sim.fetch_generation_job(job.id.clone()).await.unwrap();
                out.push((snap.status, snap.progress_percent));
            }
            out
        };
        assert_eq!(
            statuses,
            vec![
                (JobStatus::Running, 0),
                (JobStatus::Running, 50),
                (JobStatus::Succeeded, 100),
                (JobStatus::Succeeded, 100),
            ]
        );

        let drafts = sim.fetch_drafts(run.clone()).await.unwrap();
        assert_eq!(drafts.sections.len(), 2);
        let report = sim.run_qc_checks(run).await.unwrap();
        assert_eq!(report.total_findings, 0);
    }

    #[tokio::test]
    async fn discussion_draft_fails_qc() {
        let sim = SimulatedBackend::new();
        let run = bootstrapped(&sim).await;
        let job = sim
            .enqueue_generation(request(&run, vec![SectionKey::Discussion]))
            .await
            .unwrap();
        for _ in 0..2 {
            sim.fetch_generation_job(job.id.clone()).await.unwrap();
        }

        let report = sim.run_qc_checks(run.clone()).await.unwrap();
        assert_eq!(report.high_severity_count, 1);
        assert_eq!(report.total_findings, 2);
        assert!(sim.export_qc_gated_markdown(run.clone()).await.is_err());
        let export = sim.export_markdown_with_warnings(run).await.unwrap();
        assert!(export.content.contains("# Discussion"));
    }

    #[tokio::test]
    async fn first_attempt_fails_and_retry_gets_new_id() {
        let sim = SimulatedBackend::with_config(SimulatorConfig {
            fail_first_attempt: true,
            ..SimulatorConfig::default()
        });
        let run = bootstrapped(&sim).await;
        let job = sim
            .enqueue_generation(request(&run, vec![SectionKey::Methods]))
            .await
            .unwrap();
        sim.fetch_generation_job(job.id.clone()).await.unwrap();
        let failed = sim.fetch_generation_job(job.id.clone()).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);

        let retried = sim.retry_generation(job.id.clone()).await.unwrap();
        assert_ne!(retried.id, job.id);
        assert_eq!(sim.submitted_jobs(), 2);
    }

    #[tokio::test]
    async fn budget_below_estimate_is_refused() {
        let sim = SimulatedBackend::new();
        let run = bootstrapped(&sim).await;
        let mut req = request(&run, vec![SectionKey::Methods, SectionKey::Results]);
        req.max_estimated_cost_usd = Some(0.01);
        assert!(matches!(
            sim.enqueue_generation(req).await,
            Err(BackendError::Service { status: 422, .. })
        ));
    }

    #[tokio::test]
    async fn claim_linker_honours_threshold() {
        let sim = SimulatedBackend::new();
        let suggestions = sim
            .run_claim_linker(ClaimLinkRequest {
                claim_ids: vec![Id::from("c1"), Id::from("c2"), Id::from("c3")],
                min_confidence: 0.7,
            })
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 2);
    }
}
