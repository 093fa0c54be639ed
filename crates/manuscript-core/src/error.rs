//! Error types for the orchestration core
//!
//! Three families of failure are distinguished:
//! - Validation errors: rejected before any collaborator call
//! - Guard refusals: expected, recoverable, name the blocking condition
//! - Collaborator failures: surfaced with a message, prior state kept

use crate::job::JobStatus;
use crate::types::{SectionKey, WizardStep};

/// Failure reported by a collaborator service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Transport or network failure
    #[error("request failed: {0}")]
    Transport(String),

    /// Service answered with an error
    #[error("service error ({status}): {message}")]
    Service {
        /// Service status code
        status: u16,
        /// Service-provided message
        message: String,
    },

    /// Response did not match the expected record shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl BackendError {
    /// Check if retrying the same call could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Service { status, .. } => *status >= 500 || *status == 429,
            Self::MalformedResponse(_) => false,
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedResponse(value.to_string())
    }
}

/// Outline editing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutlineError {
    /// Section is not part of the active outline
    #[error("section {0} is not selected")]
    SectionNotSelected(SectionKey),
}

/// Generation job lifecycle errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    /// No run context has been established yet
    #[error("save the research frame before starting generation")]
    MissingRunContext,

    /// No sections were selected for generation
    #[error("select at least one section to generate")]
    NoSections,

    /// A budget field was non-empty but not a finite, non-negative number
    #[error("{field} must be a number (got {value:?})")]
    InvalidBudget {
        /// Field name
        field: &'static str,
        /// Raw text supplied
        value: String,
    },

    /// A job is still active
    #[error("generation job {job_id} is still {status}")]
    JobAlreadyActive {
        /// Active job
        job_id: String,
        /// Its status
        status: JobStatus,
    },

    /// No job has been submitted
    #[error("no generation job has been started")]
    NoActiveJob,

    /// Retry requested for a job that did not fail or get cancelled
    #[error("only failed or cancelled jobs can be retried (job is {status})")]
    RetryNotAllowed {
        /// Current status
        status: JobStatus,
    },

    /// Retry answered with the identity of the old job
    #[error("retry returned the same job id {0}")]
    RetryReusedIdentity(String),

    /// Collaborator failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl JobError {
    /// Check if this is a local validation failure
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingRunContext | Self::NoSections | Self::InvalidBudget { .. }
        )
    }
}

/// QC gate refusals and failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QcError {
    /// Strict export attempted without a passing report
    #[error("QC must pass before export")]
    NotPassed,

    /// Override export attempted without a run
    #[error("save the research frame before exporting")]
    MissingRunContext,

    /// Report counts are inconsistent
    #[error("malformed QC report: {0}")]
    MalformedReport(String),

    /// Collaborator failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Durable storage failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Stored value could not be decoded
    #[error("stored value is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read config file
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML did not parse
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Main wizard error type
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    /// Required input missing or malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A prerequisite step is not complete
    #[error("complete {blocking} first")]
    StepIncomplete {
        /// First incomplete prerequisite
        blocking: WizardStep,
    },

    /// No run context yet
    #[error("save the research frame first")]
    MissingRunContext,

    /// Run identity is already assigned
    #[error("run context is already assigned (project {project_id})")]
    RunContextAlreadyAssigned {
        /// Existing project id
        project_id: String,
    },

    /// Section has no generated draft
    #[error("no draft available for section {0}")]
    NoDraft(SectionKey),

    /// Unknown recommendation id
    #[error("recommendation {0} is no longer available")]
    UnknownRecommendation(String),

    /// Outline editing failure
    #[error(transparent)]
    Outline(#[from] OutlineError),

    /// Generation job failure
    #[error(transparent)]
    Job(#[from] JobError),

    /// QC gate failure
    #[error(transparent)]
    Qc(#[from] QcError),

    /// Collaborator failure
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Durable storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl WizardError {
    /// Check if this is a local validation failure (no collaborator call made)
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::InvalidInput(_)
            | Self::NoDraft(_)
            | Self::UnknownRecommendation(_)
            | Self::Outline(_) => true,
            Self::Job(e) => e.is_validation(),
            _ => false,
        }
    }

    /// Check if this is an expected guard refusal
    #[must_use]
    pub fn is_guard_refusal(&self) -> bool {
        matches!(
            self,
            Self::StepIncomplete { .. }
                | Self::MissingRunContext
                | Self::RunContextAlreadyAssigned { .. }
                | Self::Qc(QcError::NotPassed | QcError::MissingRunContext)
                | Self::Job(
                    JobError::MissingRunContext
                        | JobError::JobAlreadyActive { .. }
                        | JobError::NoActiveJob
                        | JobError::RetryNotAllowed { .. }
                )
        )
    }

    /// Check if retrying the same action could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) | Self::Job(JobError::Backend(e)) | Self::Qc(QcError::Backend(e)) => {
                e.is_retryable()
            }
            _ => false,
        }
    }

    /// Message suitable for showing to the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend(e) | Self::Job(JobError::Backend(e)) | Self::Qc(QcError::Backend(e)) => {
                format!("The service could not complete the request ({e}). Please try again.")
            }
            other => {
                let mut msg = other.to_string();
                if let Some(first) = msg.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                msg
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_retryable() {
        assert!(BackendError::Transport("reset".into()).is_retryable());
        assert!(BackendError::Service { status: 503, message: "busy".into() }.is_retryable());
        assert!(!BackendError::Service { status: 400, message: "bad".into() }.is_retryable());
        assert!(!BackendError::MalformedResponse("x".into()).is_retryable());
    }

    #[test]
    fn wizard_error_classification() {
        let err = WizardError::from(JobError::InvalidBudget {
            field: "maxEstimatedCostUsd",
            value: "abc".into(),
        });
        assert!(err.is_validation());
        assert!(!err.is_guard_refusal());

        let refusal = WizardError::from(QcError::NotPassed);
        assert!(refusal.is_guard_refusal());
        assert_eq!(refusal.user_message(), "QC must pass before export");

        let blocked = WizardError::StepIncomplete { blocking: WizardStep::PlanSections };
        assert!(blocked.user_message().contains("step 2"));
    }

    #[test]
    fn backend_failures_get_friendly_message() {
        let err = WizardError::from(BackendError::Transport("connection reset".into()));
        assert!(err.is_retryable());
        assert!(err.user_message().contains("connection reset"));
        assert!(err.user_message().contains("try again"));
    }
}
