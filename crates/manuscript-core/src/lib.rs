//! Manuscript Core - run orchestration for the guided manuscript wizard
//!
//! The layer that:
//! - Tracks wizard progress and decides which steps are reachable
//! - Drives a generation job through enqueue, polling, cancel, and retry
//! - Derives QC status from findings and gates export on it
//! - Maintains the editable section outline with dedupe-on-merge refinement
//! - Proposes one-click, explainable corrections to drafts and outline
//!
//! # Example
//!
//! ```rust,ignore
//! use manuscript_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(SimulatedBackend::new());
//! let store = Arc::new(MemoryRunStore::new());
//! let mut wizard = WizardStateMachine::new(OrchestratorConfig::new(), backend, store)?;
//!
//! wizard.update_research_frame(ResearchFrame::new("Statins and outcomes", "BMJ"));
//! wizard.save_research_frame().await?;
//! wizard.plan_sections(RefineMode::Merge).await?;
//! wizard.start_generation("", Some("5.00"), None).await?;
//! let job = wizard.wait_for_generation().await;
//! println!("Generation finished: {:?}", job.map(|j| j.status));
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod backend;
pub mod config;
pub mod error;
pub mod job;
pub mod outline;
pub mod qc;
pub mod recommend;
pub mod simulator;
pub mod store;
pub mod types;
pub mod wizard;

// Re-exports for convenience
pub use backend::{
    BootstrapRequest, BootstrapResponse, ClaimLinkRequest, ClaimSuggestion, CostEstimate,
    DraftBundle, EnqueueRequest, EstimateRequest, ExportResponse, ManuscriptBackend, PlanItem,
    PlanRequest, PlanResponse, SectionDraft,
};
pub use config::{OrchestratorConfig, StorageKeys};
pub use error::{BackendError, ConfigError, JobError, OutlineError, QcError, StoreError, WizardError};
pub use job::{GenerationJob, GenerationParams, JobController, JobStatus};
pub use outline::{dedupe, OutlineModel, OutlineSection, RefineMode};
pub use qc::{
    category_coverage, derive_status, CategoryCoverage, ExportArtifact, ExportKind, QcCategory,
    QcGate, QcIssue, QcReport, QcStatus, Severity,
};
pub use recommend::{Patch, Recommendation, RecommendationEngine, RecommendationKind};
pub use simulator::{SimulatedBackend, SimulatorConfig};
pub use store::{JsonFileRunStore, MemoryRunStore, RunStore};
pub use types::{FrameSignature, Id, ResearchFrame, RunContext, SectionKey, WizardStep};
pub use wizard::{NavigationOutcome, StepProgress, WizardStateMachine};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a wizard run
    pub use crate::{
        ManuscriptBackend, MemoryRunStore, OrchestratorConfig, RefineMode, ResearchFrame,
        SectionKey, SimulatedBackend, WizardError, WizardStateMachine, WizardStep,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
