//! Wizard state machine
//!
//! Single owner of a run's mutable state:
//! - Current step and step reachability
//! - Run identity, research frame, and the last-saved frame signature
//! - Outline, section plan, drafts, and accepted sections
//! - The generation job controller and the QC gate
//!
//! Every mutation goes through a named operation on [`WizardStateMachine`].
//! Mutating operations take `&mut self`, so two of them can never interleave
//! on the same run. Collaborator failures leave prior state untouched.

use crate::backend::{
    BootstrapRequest, BootstrapResponse, ClaimLinkRequest, ClaimSuggestion, CostEstimate,
    EstimateRequest, ManuscriptBackend, PlanItem, PlanRequest,
};
use crate::config::{OrchestratorConfig, StorageKeys};
use crate::error::{QcError, StoreError, WizardError};
use crate::job::{GenerationJob, GenerationParams, JobController, JobStatus};
use crate::outline::{OutlineModel, OutlineSection, RefineMode};
use crate::qc::{label_export, CategoryCoverage, ExportArtifact, QcGate, QcReport, QcStatus};
use crate::recommend::{Recommendation, RecommendationEngine};
use crate::store::RunStore;
use crate::types::{FrameSignature, Id, ResearchFrame, RunContext, SectionKey, WizardStep};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;

/// Completion inputs for every step
///
/// Gating is a pure function of this snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepProgress {
    /// A run exists and the frame matches the last-saved signature
    pub frame_saved: bool,
    /// Some outline section has a bullet
    pub outline_ready: bool,
    /// The most recent generation job succeeded
    pub generation_succeeded: bool,
    /// Number of accepted sections
    pub accepted_sections: usize,
    /// Current QC status
    pub qc_status: QcStatus,
}

impl StepProgress {
    /// Whether `step` is complete
    #[must_use]
    pub fn is_complete(&self, step: WizardStep) -> bool {
        match step {
            WizardStep::ResearchFrame => self.frame_saved,
            WizardStep::PlanSections => self.outline_ready,
            WizardStep::RunGeneration => self.generation_succeeded,
            WizardStep::DraftReview => self.accepted_sections > 0,
            WizardStep::QcExport => self.qc_status != QcStatus::Idle,
        }
    }

    /// First incomplete step before `target`
    #[must_use]
    pub fn blocking_step(&self, target: WizardStep) -> Option<WizardStep> {
        target.predecessors().find(|step| !self.is_complete(*step))
    }

    /// Every step before `target` is complete
    #[inline]
    #[must_use]
    pub fn can_navigate_to(&self, target: WizardStep) -> bool {
        self.blocking_step(target).is_none()
    }
}

/// Result of a navigation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Now on this step
    Moved(WizardStep),
    /// Request ignored; current step unchanged
    Blocked {
        /// First incomplete prerequisite
        blocking_step: WizardStep,
        /// What the user has to do
        reason: String,
    },
}

impl NavigationOutcome {
    /// Whether the move happened
    #[inline]
    #[must_use]
    pub fn is_moved(&self) -> bool {
        matches!(self, Self::Moved(_))
    }
}

/// Run identity as read back from durable storage
#[derive(Debug, Default)]
struct StoredIdentity {
    run: Option<RunContext>,
    frame: Option<ResearchFrame>,
    signature: Option<FrameSignature>,
}

impl StoredIdentity {
    fn load(store: &dyn RunStore, keys: &StorageKeys) -> Result<Self, StoreError> {
        let run = store
            .get(&keys.run_context_key)?
            .map(|raw| serde_json::from_str::<RunContext>(&raw))
            .transpose()?;
        let frame = store
            .get(&keys.research_frame_key)?
            .map(|raw| serde_json::from_str::<ResearchFrame>(&raw))
            .transpose()?;
        let signature = store.get(&keys.frame_signature_key)?.map(FrameSignature);
        Ok(Self { run, frame, signature })
    }
}

fn put(store: &dyn RunStore, key: &str, value: Option<&str>) -> Result<(), StoreError> {
    match value {
        Some(value) => store.set(key, value),
        None => store.remove(key),
    }
}

/// Top-level run controller
pub struct WizardStateMachine {
    config: OrchestratorConfig,
    backend: Arc<dyn ManuscriptBackend>,
    store: Arc<dyn RunStore>,
    engine: RecommendationEngine,
    current_step: WizardStep,
    run: Option<RunContext>,
    frame: ResearchFrame,
    saved_signature: Option<FrameSignature>,
    outline: OutlineModel,
    plan: BTreeMap<SectionKey, PlanItem>,
    estimate: Option<CostEstimate>,
    jobs: JobController,
    drafts: BTreeMap<SectionKey, String>,
    accepted: BTreeSet<SectionKey>,
    claim_suggestions: Vec<ClaimSuggestion>,
    qc: QcGate,
    last_export: Option<ExportArtifact>,
    #[cfg(feature = "devtools")]
    navigation_override: bool,
}

impl std::fmt::Debug for WizardStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardStateMachine")
            .field("current_step", &self.current_step)
            .field("run", &self.run)
            .field("progress", &self.progress())
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl WizardStateMachine {
    /// Create a wizard, resuming any run identity found in `store`
    ///
    /// A stored run without a stored frame signature resumes with step 1
    /// dirty.
    ///
    /// # Errors
    /// - `WizardError::Config` for an invalid configuration
    /// - `WizardError::Store` if stored identity cannot be read
    pub fn new(
        config: OrchestratorConfig,
        backend: Arc<dyn ManuscriptBackend>,
        store: Arc<dyn RunStore>,
    ) -> Result<Self, WizardError> {
        config.validate()?;
        let engine = RecommendationEngine::new(&config)?;
        let stored = StoredIdentity::load(store.as_ref(), &config.storage)?;
        let jobs = JobController::new(Arc::clone(&backend), config.poll_interval());

        if let Some(run) = &stored.run {
            tracing::info!(
                "Resuming run: project {} manuscript {}",
                run.project_id,
                run.manuscript_id
            );
        }

        Ok(Self {
            outline: OutlineModel::new(config.default_sections.iter().copied()),
            config,
            backend,
            store,
            engine,
            current_step: WizardStep::ResearchFrame,
            run: stored.run,
            frame: stored.frame.unwrap_or_default(),
            saved_signature: stored.signature,
            plan: BTreeMap::new(),
            estimate: None,
            jobs,
            drafts: BTreeMap::new(),
            accepted: BTreeSet::new(),
            claim_suggestions: Vec::new(),
            qc: QcGate::new(),
            last_export: None,
            #[cfg(feature = "devtools")]
            navigation_override: false,
        })
    }

    // ---------------------------------------------------------------------
    // Navigation
    // ---------------------------------------------------------------------

    /// Completion snapshot
    #[must_use]
    pub fn progress(&self) -> StepProgress {
        StepProgress {
            frame_saved: self.is_frame_saved(),
            outline_ready: self.outline.has_content(),
            generation_succeeded: self
                .jobs
                .current()
                .is_some_and(|job| job.status == JobStatus::Succeeded),
            accepted_sections: self.accepted.len(),
            qc_status: self.qc.status(),
        }
    }

    /// Whether `step` is complete
    #[must_use]
    pub fn step_complete(&self, step: WizardStep) -> bool {
        self.progress().is_complete(step)
    }

    /// Whether every step before `step` is complete
    #[must_use]
    pub fn can_navigate_to_step(&self, step: WizardStep) -> bool {
        self.override_active() || self.progress().can_navigate_to(step)
    }

    #[cfg(feature = "devtools")]
    fn override_active(&self) -> bool {
        self.navigation_override
    }

    #[cfg(not(feature = "devtools"))]
    fn override_active(&self) -> bool {
        false
    }

    /// Move to `step` if reachable
    ///
    /// A blocked move is not an error; the outcome names the step to finish.
    pub fn set_current_step(&mut self, step: WizardStep) -> NavigationOutcome {
        if self.can_navigate_to_step(step) {
            if self.current_step != step {
                tracing::info!("Wizard moved from {} to {}", self.current_step, step);
            }
            self.current_step = step;
            return NavigationOutcome::Moved(step);
        }

        let progress = self.progress();
        let blocking_step = progress
            .blocking_step(step)
            .unwrap_or(WizardStep::ResearchFrame);
        let reason = self.blocking_reason(blocking_step);
        tracing::warn!("Navigation to {} blocked by {}: {}", step, blocking_step, reason);
        NavigationOutcome::Blocked {
            blocking_step,
            reason,
        }
    }

    fn blocking_reason(&self, step: WizardStep) -> String {
        match step {
            WizardStep::ResearchFrame if self.run.is_none() => {
                "save the research frame to create the run".to_string()
            }
            WizardStep::ResearchFrame => "the research frame has unsaved edits".to_string(),
            WizardStep::PlanSections => "add at least one outline bullet".to_string(),
            WizardStep::RunGeneration => match self.jobs.current() {
                Some(job) => format!("generation is {}", job.status),
                None => "run generation first".to_string(),
            },
            WizardStep::DraftReview => "accept at least one drafted section".to_string(),
            WizardStep::QcExport => "run QC checks".to_string(),
        }
    }

    /// Force every step reachable (development builds only)
    #[cfg(feature = "devtools")]
    pub fn enable_navigation_override(&mut self) {
        tracing::warn!("Navigation override enabled; step gating is bypassed");
        self.navigation_override = true;
    }

    /// Restore normal gating
    #[cfg(feature = "devtools")]
    pub fn disable_navigation_override(&mut self) {
        self.navigation_override = false;
    }

    // ---------------------------------------------------------------------
    // Step 1: research frame and run identity
    // ---------------------------------------------------------------------

    /// Replace the local research frame
    pub fn update_research_frame(&mut self, frame: ResearchFrame) {
        self.frame = frame;
        if self.run.is_some() && !self.is_frame_saved() {
            tracing::debug!("Research frame has unsaved edits");
        }
    }

    /// Save the research frame
    ///
    /// The first save bootstraps the run. Later saves only re-record the
    /// signature; run identity never changes.
    ///
    /// # Errors
    /// - `WizardError::InvalidInput` if title or journal is blank
    /// - `WizardError::Backend` if bootstrap fails
    /// - `WizardError::Store` if identity cannot be persisted
    pub async fn save_research_frame(&mut self) -> Result<RunContext, WizardError> {
        if self.frame.title.trim().is_empty() {
            return Err(WizardError::InvalidInput("title is required".to_string()));
        }
        if self.frame.target_journal.trim().is_empty() {
            return Err(WizardError::InvalidInput(
                "target journal is required".to_string(),
            ));
        }

        if let Some(run) = self.run.clone() {
            let signature = self.frame.signature();
            self.persist_identity(&run, &signature)?;
            self.saved_signature = Some(signature);
            tracing::info!("Research frame re-saved for manuscript {}", run.manuscript_id);
            return Ok(run);
        }

        let request = BootstrapRequest {
            title: self.frame.title.trim().to_string(),
            target_journal: self.frame.target_journal.trim().to_string(),
            answers: self.frame.answers.clone(),
        };
        tracing::info!("Bootstrapping run for \"{}\"", request.title);
        let payload = self
            .backend
            .bootstrap_run_context(request)
            .await
            .map_err(|e| {
                tracing::error!("Bootstrap failed: {}", e);
                e
            })?;
        self.apply_context_payload(payload)
    }

    /// Install a bootstrap payload for the current research frame
    ///
    /// Seeds the outline from the recommended sections, falling back to the
    /// configured defaults when none are recommended, and records the frame
    /// signature. Re-applying the identity already held is allowed.
    ///
    /// # Errors
    /// - `WizardError::RunContextAlreadyAssigned` for a different identity
    /// - `WizardError::Store` if identity cannot be persisted
    pub fn apply_context_payload(
        &mut self,
        payload: BootstrapResponse,
    ) -> Result<RunContext, WizardError> {
        let incoming = payload.run_context();
        if let Some(existing) = self.run.as_ref().filter(|r| **r != incoming) {
            tracing::warn!(
                "Refusing to replace run context of project {}",
                existing.project_id
            );
            return Err(WizardError::RunContextAlreadyAssigned {
                project_id: existing.project_id.to_string(),
            });
        }

        let signature = self.frame.signature();
        self.persist_identity(&incoming, &signature)?;

        let sections = if payload.inference.recommended_sections.is_empty() {
            self.config.default_sections.clone()
        } else {
            payload.inference.recommended_sections
        };
        self.outline.reconcile_section_order(sections);
        self.run = Some(incoming.clone());
        self.saved_signature = Some(signature);
        tracing::info!(
            "Run context installed: project {} manuscript {} ({} sections)",
            incoming.project_id,
            incoming.manuscript_id,
            self.outline.selected().len()
        );
        Ok(incoming)
    }

    fn persist_identity(
        &self,
        run: &RunContext,
        signature: &FrameSignature,
    ) -> Result<(), StoreError> {
        self.replace_identity([
            Some(serde_json::to_string(run)?),
            Some(serde_json::to_string(&self.frame)?),
            Some(signature.0.clone()),
        ])
    }

    /// Run, frame, and signature keys; the signature is written last
    fn identity_keys(&self) -> [&str; 3] {
        let keys = &self.config.storage;
        [
            &keys.run_context_key,
            &keys.research_frame_key,
            &keys.frame_signature_key,
        ]
    }

    /// Write every identity key (`None` removes it)
    ///
    /// If any write fails, keys already written get their previous values
    /// back, so storage never holds a partial identity.
    fn replace_identity(&self, values: [Option<String>; 3]) -> Result<(), StoreError> {
        let keys = self.identity_keys();
        let previous = keys
            .iter()
            .map(|key| self.store.get(key))
            .collect::<Result<Vec<_>, _>>()?;

        for (written, (key, value)) in keys.iter().zip(&values).enumerate() {
            if let Err(e) = put(self.store.as_ref(), key, value.as_deref()) {
                tracing::error!("Storing run identity failed at {}: {}", key, e);
                for (key, old) in keys.iter().zip(&previous).take(written) {
                    if let Err(restore) = put(self.store.as_ref(), key, old.as_deref()) {
                        tracing::error!("Could not restore {}: {}", key, restore);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn is_frame_saved(&self) -> bool {
        self.run.is_some()
            && self
                .saved_signature
                .as_ref()
                .is_some_and(|saved| *saved == self.frame.signature())
    }

    fn require_run(&self) -> Result<RunContext, WizardError> {
        self.run.clone().ok_or(WizardError::MissingRunContext)
    }

    // ---------------------------------------------------------------------
    // Step 2: outline
    // ---------------------------------------------------------------------

    /// Change the selected sections
    ///
    /// # Errors
    /// `WizardError::InvalidInput` for an empty selection
    pub fn select_sections(
        &mut self,
        sections: impl IntoIterator<Item = SectionKey>,
    ) -> Result<Vec<SectionKey>, WizardError> {
        let wanted: BTreeSet<SectionKey> = sections.into_iter().collect();
        if wanted.is_empty() {
            return Err(WizardError::InvalidInput(
                "select at least one section".to_string(),
            ));
        }
        self.outline.reconcile_section_order(wanted.iter().copied());
        self.plan.retain(|key, _| wanted.contains(key));
        let selected = self.outline.selected();
        tracing::info!("Selected sections: {:?}", selected);
        Ok(selected)
    }

    /// Refine one section's bullets
    ///
    /// # Errors
    /// `WizardError::Outline` if the section is not selected
    pub fn refine_section<S: AsRef<str>>(
        &mut self,
        section: SectionKey,
        bullets: &[S],
        mode: RefineMode,
    ) -> Result<&OutlineSection, WizardError> {
        Ok(self.outline.refine_section(section, bullets, mode)?)
    }

    /// Ask the service for a plan and fold it into the outline
    ///
    /// Must-include points refine each planned section with `mode`; QC focus
    /// areas become the section tags. Either every planned section is
    /// updated or none is.
    ///
    /// # Errors
    /// - `WizardError::MissingRunContext` without a run
    /// - `WizardError::InvalidInput` with no sections selected
    /// - `WizardError::Backend` if planning fails
    pub async fn plan_sections(&mut self, mode: RefineMode) -> Result<usize, WizardError> {
        self.require_run()?;
        let sections = self.outline.selected();
        if sections.is_empty() {
            return Err(WizardError::InvalidInput(
                "select at least one section".to_string(),
            ));
        }

        let request = PlanRequest {
            target_journal: self.frame.target_journal.trim().to_string(),
            answers: self.frame.answers.clone(),
            sections,
        };
        let response = self.backend.plan_sections(request).await.map_err(|e| {
            tracing::error!("Section planning failed: {}", e);
            e
        })?;

        let mut outline = self.outline.clone();
        let mut plan = BTreeMap::new();
        for item in response.items {
            if outline.section(item.section).is_none() {
                tracing::warn!("Ignoring plan for unselected section {}", item.section);
                continue;
            }
            outline.refine_section(item.section, item.must_include.as_slice(), mode)?;
            outline.set_tags(item.section, item.qc_focus.as_slice())?;
            plan.insert(item.section, item);
        }

        let planned = plan.len();
        self.outline = outline;
        self.plan = plan;
        tracing::info!("Planned {} section(s) ({:?})", planned, mode);
        Ok(planned)
    }

    // ---------------------------------------------------------------------
    // Step 3: generation
    // ---------------------------------------------------------------------

    /// Notes sent with generation: user notes followed by the rendered outline
    #[must_use]
    pub fn generation_notes(&self, notes: &str) -> String {
        let notes = notes.trim();
        let outline = self.outline.render_notes();
        match (notes.is_empty(), outline.is_empty()) {
            (true, _) => outline,
            (false, true) => notes.to_string(),
            (false, false) => format!("{notes}\n\n{outline}"),
        }
    }

    /// Estimate generation cost for the selected sections
    ///
    /// # Errors
    /// - `WizardError::InvalidInput` with no sections selected
    /// - `WizardError::Backend` if estimation fails
    pub async fn estimate_generation(&mut self, notes: &str) -> Result<CostEstimate, WizardError> {
        let sections = self.outline.selected();
        if sections.is_empty() {
            return Err(WizardError::InvalidInput(
                "select at least one section".to_string(),
            ));
        }
        let request = EstimateRequest {
            sections,
            notes_context: self.generation_notes(notes),
        };
        let estimate = self.backend.estimate_generation(request).await.map_err(|e| {
            tracing::error!("Cost estimate failed: {}", e);
            e
        })?;
        tracing::info!(
            "Estimated cost ${:.2}-${:.2}",
            estimate.estimated_cost_usd_low,
            estimate.estimated_cost_usd_high
        );
        self.estimate = Some(estimate);
        Ok(estimate)
    }

    /// Submit generation for the selected sections
    ///
    /// Budget values are free text; blank means unset.
    ///
    /// # Errors
    /// `WizardError::Job` for validation, an already-active job, or a
    /// collaborator failure
    pub async fn start_generation(
        &mut self,
        notes: &str,
        max_estimated_cost_usd: Option<&str>,
        daily_budget_usd: Option<&str>,
    ) -> Result<GenerationJob, WizardError> {
        let mut params = GenerationParams::new(self.outline.selected(), self.generation_notes(notes));
        if let Some(raw) = max_estimated_cost_usd {
            params = params.with_max_cost(raw);
        }
        if let Some(raw) = daily_budget_usd {
            params = params.with_daily_budget(raw);
        }
        Ok(self.jobs.enqueue(self.run.as_ref(), params).await?)
    }

    /// Request cancellation of the active job
    ///
    /// # Errors
    /// `WizardError::Job` if there is no job or the request fails
    pub async fn cancel_generation(&mut self) -> Result<GenerationJob, WizardError> {
        Ok(self.jobs.cancel().await?)
    }

    /// Resubmit a failed or cancelled job
    ///
    /// # Errors
    /// `WizardError::Job` unless the job failed or was cancelled, or if the
    /// request fails
    pub async fn retry_generation(&mut self) -> Result<GenerationJob, WizardError> {
        Ok(self.jobs.retry().await?)
    }

    /// Wait for the active job to settle
    pub async fn wait_for_generation(&self) -> Option<GenerationJob> {
        self.jobs.wait_until_settled().await
    }

    /// Latest job snapshot
    #[must_use]
    pub fn current_job(&self) -> Option<GenerationJob> {
        self.jobs.current()
    }

    /// Watch job snapshots
    #[must_use]
    pub fn job_updates(&self) -> watch::Receiver<Option<GenerationJob>> {
        self.jobs.subscribe()
    }

    /// Most recent polling failure
    #[must_use]
    pub fn last_poll_error(&self) -> Option<String> {
        self.jobs.last_poll_error()
    }

    /// Whether the job is being polled
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.jobs.is_polling()
    }

    // ---------------------------------------------------------------------
    // Step 4: drafts and review
    // ---------------------------------------------------------------------

    /// Fetch generated drafts, replacing local ones
    ///
    /// # Errors
    /// - `WizardError::MissingRunContext` without a run
    /// - `WizardError::StepIncomplete` until generation has succeeded
    /// - `WizardError::Backend` if the fetch fails
    pub async fn load_drafts(&mut self) -> Result<usize, WizardError> {
        let run = self.require_run()?;
        if !self.progress().generation_succeeded {
            return Err(WizardError::StepIncomplete {
                blocking: WizardStep::RunGeneration,
            });
        }
        let bundle = self.backend.fetch_drafts(run).await.map_err(|e| {
            tracing::error!("Draft fetch failed: {}", e);
            e
        })?;
        self.drafts = bundle
            .sections
            .into_iter()
            .map(|draft| (draft.section, draft.text))
            .collect();
        tracing::info!("Loaded {} draft section(s)", self.drafts.len());
        Ok(self.drafts.len())
    }

    /// Replace one draft's text
    ///
    /// # Errors
    /// `WizardError::NoDraft` if the section was never drafted
    pub fn edit_draft(&mut self, section: SectionKey, text: impl Into<String>) -> Result<(), WizardError> {
        let draft = self
            .drafts
            .get_mut(&section)
            .ok_or(WizardError::NoDraft(section))?;
        *draft = text.into();
        Ok(())
    }

    /// Commit a drafted section into the manuscript
    ///
    /// Returns the number of accepted sections.
    ///
    /// # Errors
    /// `WizardError::NoDraft` if the section has no non-blank draft
    pub fn accept_section(&mut self, section: SectionKey) -> Result<usize, WizardError> {
        if !self
            .drafts
            .get(&section)
            .is_some_and(|text| !text.trim().is_empty())
        {
            return Err(WizardError::NoDraft(section));
        }
        if self.accepted.insert(section) {
            tracing::info!("Accepted section {}", section);
        }
        Ok(self.accepted.len())
    }

    /// Surfaced recommendations for the current drafts and outline
    #[must_use]
    pub fn recommendations(&self) -> Vec<Recommendation> {
        self.engine.recommend(&self.drafts, &self.outline)
    }

    /// Apply one surfaced recommendation
    ///
    /// # Errors
    /// - `WizardError::UnknownRecommendation` if `id` is not surfaced now
    /// - `WizardError::Outline` if an outline patch targets a removed section
    pub fn apply_recommendation(&mut self, id: &str) -> Result<Recommendation, WizardError> {
        let recommendation = self
            .recommendations()
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| WizardError::UnknownRecommendation(id.to_string()))?;
        recommendation.apply(&mut self.drafts, &mut self.outline)?;
        Ok(recommendation)
    }

    /// Ask the claim linker for evidence suggestions
    ///
    /// # Errors
    /// - `WizardError::InvalidInput` for no claims, a blank id, or a
    ///   confidence outside `0..=1`
    /// - `WizardError::MissingRunContext` without a run
    /// - `WizardError::Backend` if the linker fails
    pub async fn link_claims(
        &mut self,
        claim_ids: Vec<Id>,
        min_confidence: f64,
    ) -> Result<&[ClaimSuggestion], WizardError> {
        if claim_ids.is_empty() {
            return Err(WizardError::InvalidInput(
                "at least one claim id is required".to_string(),
            ));
        }
        if claim_ids.iter().any(|id| id.as_str().trim().is_empty()) {
            return Err(WizardError::InvalidInput("claim ids must not be blank".to_string()));
        }
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(WizardError::InvalidInput(format!(
                "minimum confidence must be between 0 and 1, got {min_confidence}"
            )));
        }
        self.require_run()?;

        let request = ClaimLinkRequest {
            claim_ids,
            min_confidence,
        };
        let suggestions = self.backend.run_claim_linker(request).await.map_err(|e| {
            tracing::error!("Claim linker failed: {}", e);
            e
        })?;
        tracing::info!("Claim linker returned {} suggestion(s)", suggestions.len());
        self.claim_suggestions = suggestions;
        Ok(&self.claim_suggestions)
    }

    // ---------------------------------------------------------------------
    // Step 5: QC and export
    // ---------------------------------------------------------------------

    /// Run QC checks and record the report
    ///
    /// # Errors
    /// - `WizardError::MissingRunContext` without a run
    /// - `WizardError::Qc` for a failed or malformed check run
    pub async fn run_qc(&mut self) -> Result<QcStatus, WizardError> {
        let run = self.require_run()?;
        let report = self.backend.run_qc_checks(run).await.map_err(|e| {
            tracing::error!("QC run failed: {}", e);
            QcError::from(e)
        })?;
        let status = self.qc.record(report)?;
        tracing::info!("QC status: {:?}", status);
        Ok(status)
    }

    /// Export, only when QC passed
    ///
    /// # Errors
    /// - `WizardError::Qc(QcError::NotPassed)` unless QC passed; no request
    ///   is made
    /// - `WizardError::Qc` if the export fails
    pub async fn export_strict(&mut self) -> Result<ExportArtifact, WizardError> {
        let auth = self.qc.authorize_strict_export()?;
        let run = self.require_run()?;
        let response = self
            .backend
            .export_qc_gated_markdown(run)
            .await
            .map_err(|e| {
                tracing::error!("Strict export failed: {}", e);
                QcError::from(e)
            })?;
        let artifact = label_export(response, auth);
        tracing::info!("Exported {}", artifact.filename);
        self.last_export = Some(artifact.clone());
        Ok(artifact)
    }

    /// Export regardless of QC status; the artifact is labelled
    ///
    /// # Errors
    /// - `WizardError::Qc(QcError::MissingRunContext)` without a run
    /// - `WizardError::Qc` if the export fails
    pub async fn export_with_warnings(&mut self) -> Result<ExportArtifact, WizardError> {
        let auth = self.qc.authorize_override_export(self.run.as_ref())?;
        let run = self.require_run()?;
        let response = self
            .backend
            .export_markdown_with_warnings(run)
            .await
            .map_err(|e| {
                tracing::error!("Override export failed: {}", e);
                QcError::from(e)
            })?;
        let artifact = label_export(response, auth);
        tracing::warn!("Exported {} with unresolved QC findings", artifact.filename);
        self.last_export = Some(artifact.clone());
        Ok(artifact)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start over: stop polling, forget the run, and clear durable identity
    ///
    /// # Errors
    /// `WizardError::Store` if stored identity cannot be removed; nothing is
    /// changed in that case
    pub fn reset(&mut self) -> Result<(), WizardError> {
        self.replace_identity([None, None, None])?;
        self.jobs.clear();

        self.current_step = WizardStep::ResearchFrame;
        self.run = None;
        self.frame = ResearchFrame::default();
        self.saved_signature = None;
        self.outline = OutlineModel::new(self.config.default_sections.iter().copied());
        self.plan.clear();
        self.estimate = None;
        self.drafts.clear();
        self.accepted.clear();
        self.claim_suggestions.clear();
        self.qc.clear();
        self.last_export = None;
        tracing::info!("Wizard reset");
        Ok(())
    }

    /// Stop background polling
    pub fn dispose(&mut self) {
        self.jobs.dispose();
        tracing::debug!("Wizard disposed");
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Current step
    #[inline]
    #[must_use]
    pub fn current_step(&self) -> WizardStep {
        self.current_step
    }

    /// Run identity, once bootstrapped
    #[inline]
    #[must_use]
    pub fn run_context(&self) -> Option<&RunContext> {
        self.run.as_ref()
    }

    /// Local research frame
    #[inline]
    #[must_use]
    pub fn research_frame(&self) -> &ResearchFrame {
        &self.frame
    }

    /// Frame differs from the last save
    #[must_use]
    pub fn is_frame_dirty(&self) -> bool {
        !self.is_frame_saved()
    }

    /// Outline
    #[inline]
    #[must_use]
    pub fn outline(&self) -> &OutlineModel {
        &self.outline
    }

    /// Section plan from the last planning call
    #[inline]
    #[must_use]
    pub fn plan(&self) -> &BTreeMap<SectionKey, PlanItem> {
        &self.plan
    }

    /// Last cost estimate
    #[inline]
    #[must_use]
    pub fn estimate(&self) -> Option<CostEstimate> {
        self.estimate
    }

    /// Drafts by section
    #[inline]
    #[must_use]
    pub fn drafts(&self) -> &BTreeMap<SectionKey, String> {
        &self.drafts
    }

    /// Accepted sections
    #[inline]
    #[must_use]
    pub fn accepted_sections(&self) -> &BTreeSet<SectionKey> {
        &self.accepted
    }

    /// Claim-link suggestions from the last linker call
    #[inline]
    #[must_use]
    pub fn claim_suggestions(&self) -> &[ClaimSuggestion] {
        &self.claim_suggestions
    }

    /// QC status
    #[must_use]
    pub fn qc_status(&self) -> QcStatus {
        self.qc.status()
    }

    /// Last QC report
    #[must_use]
    pub fn qc_report(&self) -> Option<&QcReport> {
        self.qc.last_report()
    }

    /// Coverage of every required QC category
    #[must_use]
    pub fn qc_coverage(&self) -> Vec<CategoryCoverage> {
        self.qc.coverage()
    }

    /// Last exported artifact
    #[inline]
    #[must_use]
    pub fn last_export(&self) -> Option<&ExportArtifact> {
        self.last_export.as_ref()
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DraftBundle, MockManuscriptBackend, PlanResponse, SectionDraft};
    use crate::error::{BackendError, JobError};
    use crate::store::MemoryRunStore;
    use proptest::prelude::*;

    fn frame() -> ResearchFrame {
        ResearchFrame::new("Statins and outcomes", "The Lancet")
            .with_answer("design", "retrospective cohort")
    }

    fn wizard_with(mock: MockManuscriptBackend, store: Arc<MemoryRunStore>) -> WizardStateMachine {
        WizardStateMachine::new(OrchestratorConfig::new(), Arc::new(mock), store).unwrap()
    }

    fn wizard(mock: MockManuscriptBackend) -> WizardStateMachine {
        wizard_with(mock, Arc::new(MemoryRunStore::new()))
    }

    /// Store whose nth write (set or remove) from arming fails
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryRunStore,
        writes: parking_lot::Mutex<usize>,
        fail_at: parking_lot::Mutex<Option<usize>>,
    }

    impl FlakyStore {
        fn fail_write(&self, nth: usize) {
            *self.fail_at.lock() = Some(*self.writes.lock() + nth);
        }

        fn tick(&self) -> Result<(), StoreError> {
            let mut writes = self.writes.lock();
            *writes += 1;
            if *self.fail_at.lock() == Some(*writes) {
                return Err(std::io::Error::other("disk full").into());
            }
            Ok(())
        }
    }

    impl RunStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.tick()?;
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.tick()?;
            self.inner.remove(key)
        }
    }

    fn bootstrapping(sections: Vec<SectionKey>) -> MockManuscriptBackend {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_bootstrap_run_context()
            .times(1)
            .returning(move |_| Ok(BootstrapResponse::new("p-1", "m-1", sections.clone())));
        mock
    }

    fn arb_qc_status() -> impl Strategy<Value = QcStatus> {
        prop_oneof![
            Just(QcStatus::Idle),
            Just(QcStatus::Pass),
            Just(QcStatus::Warn),
            Just(QcStatus::Fail),
        ]
    }

    fn arb_progress() -> impl Strategy<Value = StepProgress> {
        (any::<bool>(), any::<bool>(), any::<bool>(), 0usize..3, arb_qc_status()).prop_map(
            |(frame_saved, outline_ready, generation_succeeded, accepted_sections, qc_status)| {
                StepProgress {
                    frame_saved,
                    outline_ready,
                    generation_succeeded,
                    accepted_sections,
                    qc_status,
                }
            },
        )
    }

    proptest! {
        #[test]
        fn step_one_always_reachable(progress in arb_progress()) {
            prop_assert!(progress.can_navigate_to(WizardStep::ResearchFrame));
        }

        #[test]
        fn reachability_is_prefix_closed(progress in arb_progress()) {
            for later in WizardStep::ALL {
                if progress.can_navigate_to(later) {
                    for earlier in later.predecessors() {
                        prop_assert!(progress.can_navigate_to(earlier));
                        prop_assert!(progress.is_complete(earlier));
                    }
                }
            }
        }
    }

    proptest! {
        #[test]
        fn forward_progress_never_revokes_reachability(
            progress in arb_progress(),
            extra in 1usize..3,
        ) {
            let advanced = [
                StepProgress { accepted_sections: progress.accepted_sections + extra, ..progress },
                StepProgress { outline_ready: true, ..progress },
                StepProgress { qc_status: QcStatus::Pass, ..progress },
            ];
            for step in WizardStep::ALL {
                if progress.can_navigate_to(step) {
                    for next in &advanced {
                        prop_assert!(next.can_navigate_to(step));
                    }
                }
            }
        }
    }

    fn reachable(wizard: &WizardStateMachine) -> Vec<WizardStep> {
        WizardStep::ALL
            .into_iter()
            .filter(|step| wizard.can_navigate_to_step(*step))
            .collect()
    }

    fn assert_still_reachable(before: &[WizardStep], wizard: &WizardStateMachine) {
        let after = reachable(wizard);
        for step in before {
            assert!(after.contains(step), "{step} became unreachable");
        }
    }

    #[tokio::test]
    async fn review_and_qc_progress_keeps_steps_reachable() {
        let mut mock = bootstrapping(vec![SectionKey::Methods, SectionKey::Results]);
        mock.expect_enqueue_generation()
            .times(1)
            .returning(|_| Ok(GenerationJob::new("job-1", JobStatus::Succeeded)));
        mock.expect_fetch_drafts().times(1).returning(|_| {
            Ok(DraftBundle {
                sections: vec![
                    SectionDraft {
                        section: SectionKey::Methods,
                        text: "We enrolled 400 adults.".to_string(),
                    },
                    SectionDraft {
                        section: SectionKey::Results,
                        text: "Mean score 12.1 (95% CI 11.0 to 13.2).".to_string(),
                    },
                ],
            })
        });
        mock.expect_run_qc_checks()
            .times(1)
            .returning(|_| Ok(QcReport::clean()));
        let mut wizard = wizard(mock);
        wizard.update_research_frame(frame());
        wizard.save_research_frame().await.unwrap();
        wizard
            .refine_section(SectionKey::Methods, &["Cohort definition"], RefineMode::Merge)
            .unwrap();
        wizard.start_generation("", None, None).await.unwrap();
        wizard.load_drafts().await.unwrap();

        let before = reachable(&wizard);
        wizard.accept_section(SectionKey::Methods).unwrap();
        assert_still_reachable(&before, &wizard);

        let before = reachable(&wizard);
        wizard
            .refine_section(SectionKey::Results, &["Primary outcome"], RefineMode::Merge)
            .unwrap();
        assert_still_reachable(&before, &wizard);

        let before = reachable(&wizard);
        wizard.accept_section(SectionKey::Results).unwrap();
        assert_still_reachable(&before, &wizard);

        let before = reachable(&wizard);
        assert_eq!(wizard.run_qc().await.unwrap(), QcStatus::Pass);
        assert_still_reachable(&before, &wizard);
        assert!(WizardStep::ALL.into_iter().all(|step| wizard.step_complete(step)));
    }

    #[test]
    fn fresh_wizard_only_reaches_step_one() {
        let mut wizard = wizard(MockManuscriptBackend::new());
        assert!(wizard.can_navigate_to_step(WizardStep::ResearchFrame));
        assert!(!wizard.can_navigate_to_step(WizardStep::PlanSections));

        let outcome = wizard.set_current_step(WizardStep::QcExport);
        assert_eq!(
            outcome,
            NavigationOutcome::Blocked {
                blocking_step: WizardStep::ResearchFrame,
                reason: "save the research frame to create the run".to_string(),
            }
        );
        assert_eq!(wizard.current_step(), WizardStep::ResearchFrame);
    }

    #[tokio::test]
    async fn blank_title_makes_no_call() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_bootstrap_run_context().times(0);
        let mut wizard = wizard(mock);
        wizard.update_research_frame(ResearchFrame::new("  ", "BMJ"));

        let err = wizard.save_research_frame().await.unwrap_err();
        assert!(err.is_validation());
        assert!(wizard.run_context().is_none());
    }

    #[tokio::test]
    async fn first_save_bootstraps_and_later_saves_do_not() {
        let store = Arc::new(MemoryRunStore::new());
        let mut wizard = wizard_with(
            bootstrapping(vec![SectionKey::Methods, SectionKey::Introduction]),
            Arc::clone(&store),
        );
        wizard.update_research_frame(frame());

        let run = wizard.save_research_frame().await.unwrap();
        assert_eq!(run, RunContext::new("p-1", "m-1"));
        assert!(wizard.step_complete(WizardStep::ResearchFrame));
        assert_eq!(
            wizard.outline().selected(),
            vec![SectionKey::Introduction, SectionKey::Methods]
        );
        assert_eq!(store.len(), 3);

        wizard.update_research_frame(frame().with_answer("population", "adults"));
        assert!(wizard.is_frame_dirty());
        assert!(!wizard.step_complete(WizardStep::ResearchFrame));

        let again = wizard.save_research_frame().await.unwrap();
        assert_eq!(again, run);
        assert!(!wizard.is_frame_dirty());
    }

    #[tokio::test]
    async fn empty_recommendation_keeps_default_sections() {
        let mut wizard = wizard(bootstrapping(Vec::new()));
        wizard.update_research_frame(frame());
        wizard.save_research_frame().await.unwrap();
        assert_eq!(
            wizard.outline().selected(),
            OrchestratorConfig::new().default_sections
        );
    }

    #[tokio::test]
    async fn bootstrap_failure_changes_nothing() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_bootstrap_run_context()
            .times(1)
            .returning(|_| Err(BackendError::Service { status: 502, message: "down".into() }));
        let store = Arc::new(MemoryRunStore::new());
        let mut wizard = wizard_with(mock, Arc::clone(&store));
        wizard.update_research_frame(frame());

        let err = wizard.save_research_frame().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.user_message().ends_with("Please try again."));
        assert!(wizard.run_context().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn second_identity_is_refused() {
        let mut wizard = wizard(bootstrapping(Vec::new()));
        wizard.update_research_frame(frame());
        wizard.save_research_frame().await.unwrap();

        let err = wizard
            .apply_context_payload(BootstrapResponse::new("p-2", "m-2", Vec::new()))
            .unwrap_err();
        assert!(matches!(err, WizardError::RunContextAlreadyAssigned { .. }));
        assert_eq!(wizard.run_context(), Some(&RunContext::new("p-1", "m-1")));
    }

    #[tokio::test]
    async fn reload_resumes_run_identity() {
        let store = Arc::new(MemoryRunStore::new());
        {
            let mut wizard = wizard_with(bootstrapping(Vec::new()), Arc::clone(&store));
            wizard.update_research_frame(frame());
            wizard.save_research_frame().await.unwrap();
        }

        let resumed = wizard_with(MockManuscriptBackend::new(), Arc::clone(&store));
        assert_eq!(resumed.run_context(), Some(&RunContext::new("p-1", "m-1")));
        assert_eq!(resumed.research_frame(), &frame());
        assert!(resumed.step_complete(WizardStep::ResearchFrame));

        store
            .remove(&OrchestratorConfig::new().storage.frame_signature_key)
            .unwrap();
        let unsigned = wizard_with(MockManuscriptBackend::new(), store);
        assert!(unsigned.run_context().is_some());
        assert!(unsigned.is_frame_dirty());
        assert!(!unsigned.can_navigate_to_step(WizardStep::PlanSections));
    }

    #[tokio::test]
    async fn plan_fills_outline_and_failure_leaves_it_alone() {
        let mut mock = bootstrapping(vec![SectionKey::Introduction, SectionKey::Methods]);
        let mut calls = 0;
        mock.expect_plan_sections().times(2).returning(move |request| {
            calls += 1;
            if calls == 2 {
                return Err(BackendError::Transport("reset".into()));
            }
            Ok(PlanResponse {
                items: request
                    .sections
                    .iter()
                    .map(|section| PlanItem {
                        section: *section,
                        objective: format!("Write {section}"),
                        must_include: vec![format!("{section} point"), format!("{section} POINT")],
                        qc_focus: vec!["claim_support".to_string()],
                    })
                    .chain(std::iter::once(PlanItem {
                        section: SectionKey::Conclusion,
                        objective: "unselected".to_string(),
                        must_include: vec!["ignored".to_string()],
                        qc_focus: Vec::new(),
                    }))
                    .collect(),
            })
        });
        let mut wizard = wizard(mock);
        wizard.update_research_frame(frame());
        wizard.save_research_frame().await.unwrap();

        assert_eq!(wizard.plan_sections(RefineMode::Merge).await.unwrap(), 2);
        let methods = wizard.outline().section(SectionKey::Methods).unwrap();
        assert_eq!(methods.bullets(), ["methods point"]);
        assert_eq!(methods.tags, vec!["claim_support".to_string()]);
        assert!(wizard.step_complete(WizardStep::PlanSections));
        assert!(wizard.set_current_step(WizardStep::RunGeneration).is_moved());

        let before = wizard.outline().clone();
        assert!(wizard.plan_sections(RefineMode::Overwrite).await.is_err());
        assert_eq!(wizard.outline(), &before);
        assert_eq!(wizard.plan().len(), 2);
    }

    #[tokio::test]
    async fn enqueue_without_run_is_refused_locally() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_enqueue_generation().times(0);
        let mut wizard = wizard(mock);

        let err = wizard.start_generation("", None, None).await.unwrap_err();
        assert!(matches!(err, WizardError::Job(JobError::MissingRunContext)));
        assert!(err.is_guard_refusal());
    }

    #[tokio::test]
    async fn drafts_require_successful_generation() {
        let mut mock = bootstrapping(Vec::new());
        mock.expect_fetch_drafts().times(0);
        let mut wizard = wizard(mock);
        wizard.update_research_frame(frame());
        wizard.save_research_frame().await.unwrap();

        let err = wizard.load_drafts().await.unwrap_err();
        assert!(matches!(
            err,
            WizardError::StepIncomplete { blocking: WizardStep::RunGeneration }
        ));
        assert!(matches!(
            wizard.accept_section(SectionKey::Methods),
            Err(WizardError::NoDraft(SectionKey::Methods))
        ));
        assert!(matches!(
            wizard.edit_draft(SectionKey::Methods, "text"),
            Err(WizardError::NoDraft(_))
        ));
    }

    #[tokio::test]
    async fn claim_linking_validates_before_calling() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_run_claim_linker().times(0);
        let mut wizard = wizard(mock);

        for (ids, confidence) in [
            (Vec::new(), 0.5),
            (vec![Id::from(" ")], 0.5),
            (vec![Id::from("c-1")], 1.5),
            (vec![Id::from("c-1")], f64::NAN),
        ] {
            let err = wizard.link_claims(ids, confidence).await.unwrap_err();
            assert!(err.is_validation(), "{err}");
        }
        assert!(matches!(
            wizard.link_claims(vec![Id::from("c-1")], 0.7).await,
            Err(WizardError::MissingRunContext)
        ));
    }

    #[tokio::test]
    async fn export_gating_before_qc() {
        let mut mock = MockManuscriptBackend::new();
        mock.expect_export_qc_gated_markdown().times(0);
        mock.expect_export_markdown_with_warnings().times(0);
        let mut wizard = wizard(mock);

        assert!(matches!(
            wizard.export_strict().await,
            Err(WizardError::Qc(QcError::NotPassed))
        ));
        assert!(matches!(
            wizard.export_with_warnings().await,
            Err(WizardError::Qc(QcError::MissingRunContext))
        ));
        assert!(wizard.last_export().is_none());
    }

    #[tokio::test]
    async fn reset_clears_identity() {
        let store = Arc::new(MemoryRunStore::new());
        let mut wizard = wizard_with(bootstrapping(Vec::new()), Arc::clone(&store));
        wizard.update_research_frame(frame());
        wizard.save_research_frame().await.unwrap();

        wizard.reset().unwrap();
        assert!(wizard.run_context().is_none());
        assert!(store.is_empty());
        assert_eq!(wizard.current_step(), WizardStep::ResearchFrame);
        assert!(!wizard.outline().has_content());
    }

    #[tokio::test]
    async fn failed_identity_write_leaves_nothing_stored() {
        let mut mock = MockManuscriptBackend::new();
        let mut calls = 0;
        mock.expect_bootstrap_run_context().times(2).returning(move |_| {
            calls += 1;
            Ok(BootstrapResponse::new(format!("p-{calls}"), format!("m-{calls}"), Vec::new()))
        });
        let store = Arc::new(FlakyStore::default());
        let mut wizard = WizardStateMachine::new(
            OrchestratorConfig::new(),
            Arc::new(mock),
            Arc::clone(&store) as Arc<dyn RunStore>,
        )
        .unwrap();
        wizard.update_research_frame(frame());

        store.fail_write(2);
        let err = wizard.save_research_frame().await.unwrap_err();
        assert!(matches!(err, WizardError::Store(StoreError::Io(_))));
        assert!(wizard.run_context().is_none());
        assert!(store.inner.is_empty());

        let run = wizard.save_research_frame().await.unwrap();
        let keys = &wizard.config().storage;
        let stored: RunContext =
            serde_json::from_str(&store.get(&keys.run_context_key).unwrap().unwrap()).unwrap();
        assert_eq!(stored, run);
        assert_eq!(run.project_id.as_str(), "p-2");
    }

    #[tokio::test]
    async fn failed_resave_keeps_previous_identity() {
        let store = Arc::new(FlakyStore::default());
        let mut wizard = WizardStateMachine::new(
            OrchestratorConfig::new(),
            Arc::new(bootstrapping(Vec::new())),
            Arc::clone(&store) as Arc<dyn RunStore>,
        )
        .unwrap();
        wizard.update_research_frame(frame());
        wizard.save_research_frame().await.unwrap();
        let keys = wizard.config().storage.clone();
        let saved_frame = store.get(&keys.research_frame_key).unwrap();
        let saved_signature = store.get(&keys.frame_signature_key).unwrap();

        wizard.update_research_frame(frame().with_answer("population", "adults"));
        store.fail_write(3);
        assert!(wizard.save_research_frame().await.is_err());
        assert!(wizard.is_frame_dirty());
        assert_eq!(store.get(&keys.research_frame_key).unwrap(), saved_frame);
        assert_eq!(store.get(&keys.frame_signature_key).unwrap(), saved_signature);
    }

    #[tokio::test]
    async fn failed_reset_changes_nothing() {
        let store = Arc::new(FlakyStore::default());
        let mut wizard = WizardStateMachine::new(
            OrchestratorConfig::new(),
            Arc::new(bootstrapping(Vec::new())),
            Arc::clone(&store) as Arc<dyn RunStore>,
        )
        .unwrap();
        wizard.update_research_frame(frame());
        wizard.save_research_frame().await.unwrap();

        store.fail_write(2);
        assert!(wizard.reset().is_err());
        assert_eq!(wizard.run_context(), Some(&RunContext::new("p-1", "m-1")));
        assert!(wizard.step_complete(WizardStep::ResearchFrame));
        assert_eq!(store.inner.len(), 3);

        let resumed = WizardStateMachine::new(
            OrchestratorConfig::new(),
            Arc::new(MockManuscriptBackend::new()),
            Arc::clone(&store) as Arc<dyn RunStore>,
        )
        .unwrap();
        assert!(!resumed.is_frame_dirty());
    }

    #[cfg(feature = "devtools")]
    #[test]
    fn override_opens_every_step() {
        let mut wizard = wizard(MockManuscriptBackend::new());
        wizard.enable_navigation_override();
        assert!(wizard.set_current_step(WizardStep::QcExport).is_moved());
        wizard.disable_navigation_override();
        assert!(!wizard.can_navigate_to_step(WizardStep::PlanSections));
    }
}
