//! Collaborator service contracts
//!
//! Every cross-boundary payload is an explicit record. Responses deny unknown
//! fields so that an unexpected shape is reported as
//! [`BackendError::MalformedResponse`] by the transport instead of being
//! coerced.

use crate::error::BackendError;
use crate::job::GenerationJob;
use crate::qc::QcReport;
use crate::types::{Id, RunContext, SectionKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Collaborator operations consumed by the orchestration core
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManuscriptBackend: Send + Sync {
    /// Create project and manuscript for a research frame
    async fn bootstrap_run_context(
        &self,
        request: BootstrapRequest,
    ) -> Result<BootstrapResponse, BackendError>;

    /// Propose objectives and must-include points per section
    async fn plan_sections(&self, request: PlanRequest) -> Result<PlanResponse, BackendError>;

    /// Estimate generation cost
    async fn estimate_generation(
        &self,
        request: EstimateRequest,
    ) -> Result<CostEstimate, BackendError>;

    /// Submit a generation job
    async fn enqueue_generation(
        &self,
        request: EnqueueRequest,
    ) -> Result<GenerationJob, BackendError>;

    /// Fetch the current job snapshot
    async fn fetch_generation_job(&self, job_id: Id) -> Result<GenerationJob, BackendError>;

    /// Request cancellation
    async fn cancel_generation(&self, job_id: Id) -> Result<GenerationJob, BackendError>;

    /// Resubmit a failed or cancelled job as a new job
    async fn retry_generation(&self, job_id: Id) -> Result<GenerationJob, BackendError>;

    /// Fetch generated section drafts
    async fn fetch_drafts(&self, run: RunContext) -> Result<DraftBundle, BackendError>;

    /// Run quality-control checks on the current drafts
    async fn run_qc_checks(&self, run: RunContext) -> Result<QcReport, BackendError>;

    /// Export markdown; the service refuses when QC does not pass
    async fn export_qc_gated_markdown(&self, run: RunContext)
        -> Result<ExportResponse, BackendError>;

    /// Export markdown regardless of outstanding findings
    async fn export_markdown_with_warnings(
        &self,
        run: RunContext,
    ) -> Result<ExportResponse, BackendError>;

    /// Suggest evidence links for claims
    async fn run_claim_linker(
        &self,
        request: ClaimLinkRequest,
    ) -> Result<Vec<ClaimSuggestion>, BackendError>;
}

/// Bootstrap request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapRequest {
    /// Working title
    pub title: String,
    /// Target journal
    pub target_journal: String,
    /// Framing answers
    pub answers: BTreeMap<String, String>,
}

/// Bootstrap response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BootstrapResponse {
    /// Created project
    pub project: EntityRef,
    /// Created manuscript
    pub manuscript: EntityRef,
    /// Inferred settings
    pub inference: Inference,
}

impl BootstrapResponse {
    /// Build a response
    #[must_use]
    pub fn new(
        project_id: impl Into<Id>,
        manuscript_id: impl Into<Id>,
        recommended_sections: Vec<SectionKey>,
    ) -> Self {
        Self {
            project: EntityRef { id: project_id.into() },
            manuscript: EntityRef { id: manuscript_id.into() },
            inference: Inference { recommended_sections },
        }
    }

    /// Run identity carried by this response
    #[must_use]
    pub fn run_context(&self) -> RunContext {
        RunContext::new(self.project.id.clone(), self.manuscript.id.clone())
    }
}

/// Reference to a created entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityRef {
    /// Entity id
    pub id: Id,
}

/// Settings inferred from the research frame
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Inference {
    /// Sections the service recommends
    #[serde(default)]
    pub recommended_sections: Vec<SectionKey>,
}

/// Section planning request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    /// Target journal
    pub target_journal: String,
    /// Framing answers
    pub answers: BTreeMap<String, String>,
    /// Sections to plan
    pub sections: Vec<SectionKey>,
}

/// Section planning response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanResponse {
    /// One entry per planned section
    pub items: Vec<PlanItem>,
}

/// Plan for one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanItem {
    /// Section
    pub section: SectionKey,
    /// What the section should achieve
    pub objective: String,
    /// Points the section must cover
    #[serde(default)]
    pub must_include: Vec<String>,
    /// QC areas to watch
    #[serde(default)]
    pub qc_focus: Vec<String>,
}

/// Cost estimate request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateRequest {
    /// Sections to generate
    pub sections: Vec<SectionKey>,
    /// Notes passed to generation
    pub notes_context: String,
}

/// Cost estimate range in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CostEstimate {
    /// Low end of the estimate
    pub estimated_cost_usd_low: f64,
    /// High end of the estimate
    pub estimated_cost_usd_high: f64,
}

/// Generation submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    /// Project
    pub project_id: Id,
    /// Manuscript
    pub manuscript_id: Id,
    /// Sections to generate
    pub sections: Vec<SectionKey>,
    /// Notes passed to generation
    pub notes_context: String,
    /// Refuse to run when the estimate exceeds this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_estimated_cost_usd: Option<f64>,
    /// Daily spend ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_budget_usd: Option<f64>,
}

/// Generated drafts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftBundle {
    /// One entry per drafted section
    pub sections: Vec<SectionDraft>,
}

/// Draft text for one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionDraft {
    /// Section
    pub section: SectionKey,
    /// Draft text
    pub text: String,
}

/// Exported document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportResponse {
    /// Suggested file name
    pub filename: String,
    /// Markdown content
    pub content: String,
}

/// Claim linker request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimLinkRequest {
    /// Claims to link
    pub claim_ids: Vec<Id>,
    /// Discard suggestions below this confidence
    pub min_confidence: f64,
}

/// Suggested evidence link for a claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClaimSuggestion {
    /// Claim
    pub claim_id: Id,
    /// Suggested supporting source
    pub source: String,
    /// Linker confidence, 0..=1
    pub confidence: f64,
}
