//! Quality-control gate
//!
//! Turns a findings report into an export authorization. The status is
//! always derived from the stored report and never stored on its own.

use crate::backend::ExportResponse;
use crate::error::QcError;
use crate::types::RunContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finding category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcCategory {
    /// Citations resolve and match claims
    CitationIntegrity,
    /// Claims are backed by evidence
    ClaimSupport,
    /// Causal wording on associative evidence
    CausalLanguage,
    /// Discussion strength matches Results uncertainty
    ResultsAlignment,
    /// Limitations are acknowledged
    Limitations,
    /// Terminology is consistent
    Terminology,
}

impl QcCategory {
    /// Categories reported on every run
    pub const REQUIRED: [QcCategory; 6] = [
        QcCategory::CitationIntegrity,
        QcCategory::ClaimSupport,
        QcCategory::CausalLanguage,
        QcCategory::ResultsAlignment,
        QcCategory::Limitations,
        QcCategory::Terminology,
    ];
}

impl fmt::Display for QcCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CitationIntegrity => "citation integrity",
            Self::ClaimSupport => "claim support",
            Self::CausalLanguage => "causal language",
            Self::ResultsAlignment => "results alignment",
            Self::Limitations => "limitations",
            Self::Terminology => "terminology",
        };
        f.write_str(s)
    }
}

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Low,
    /// Should be fixed
    Medium,
    /// Blocks strict export
    High,
}

/// Grouped findings of one category and severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QcIssue {
    /// Category
    pub category: QcCategory,
    /// Severity
    pub severity: Severity,
    /// Number of findings
    pub count: u32,
    /// Short description
    pub summary: String,
}

/// Findings report from a QC run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QcReport {
    /// All findings
    pub total_findings: u32,
    /// High-severity findings
    pub high_severity_count: u32,
    /// Grouped findings
    #[serde(default)]
    pub issues: Vec<QcIssue>,
}

impl QcReport {
    /// Report with no findings
    #[inline]
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }

    /// Build a report from grouped issues, deriving the totals
    #[must_use]
    pub fn from_issues(issues: Vec<QcIssue>) -> Self {
        let total_findings = issues.iter().map(|i| i.count).sum();
        let high_severity_count = issues
            .iter()
            .filter(|i| i.severity == Severity::High)
            .map(|i| i.count)
            .sum();
        Self {
            total_findings,
            high_severity_count,
            issues,
        }
    }

    /// Reject internally inconsistent counts
    pub fn validate(&self) -> Result<(), QcError> {
        if self.high_severity_count > self.total_findings {
            return Err(QcError::MalformedReport(format!(
                "{} high-severity findings exceed {} total",
                self.high_severity_count, self.total_findings
            )));
        }
        Ok(())
    }
}

/// Derived QC status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcStatus {
    /// No QC run yet
    Idle,
    /// No findings
    Pass,
    /// Findings, none high-severity
    Warn,
    /// High-severity findings
    Fail,
}

/// Derive status from a report
#[must_use]
pub fn derive_status(report: Option<&QcReport>) -> QcStatus {
    match report {
        None => QcStatus::Idle,
        Some(r) if r.high_severity_count > 0 => QcStatus::Fail,
        Some(r) if r.total_findings > 0 => QcStatus::Warn,
        Some(_) => QcStatus::Pass,
    }
}

/// Coverage row for one required category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCoverage {
    /// Category
    pub category: QcCategory,
    /// Findings in this category
    pub count: u32,
    /// Highest severity seen, if any
    pub worst: Option<Severity>,
    /// Summaries of grouped findings
    pub summaries: Vec<String>,
}

impl CategoryCoverage {
    /// No findings in this category
    #[inline]
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.count == 0
    }
}

/// One row per required category, zero-finding categories included
#[must_use]
pub fn category_coverage(report: &QcReport) -> Vec<CategoryCoverage> {
    QcCategory::REQUIRED
        .into_iter()
        .map(|category| {
            let issues: Vec<&QcIssue> = report
                .issues
                .iter()
                .filter(|i| i.category == category && i.count > 0)
                .collect();
            CategoryCoverage {
                category,
                count: issues.iter().map(|i| i.count).sum(),
                worst: issues.iter().map(|i| i.severity).max(),
                summaries: issues.iter().map(|i| i.summary.clone()).collect(),
            }
        })
        .collect()
}

/// Which export path was authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    /// QC passed
    Strict,
    /// Exported despite findings
    Override,
}

/// Permission to export, carrying the status it was granted under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportAuthorization {
    /// Export path
    pub kind: ExportKind,
    /// Status at authorization time
    pub status: QcStatus,
}

/// Exported manuscript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    /// File name
    pub filename: String,
    /// Markdown content
    pub content: String,
    /// Export path
    pub kind: ExportKind,
    /// Content contains unresolved QC warnings
    pub with_warnings: bool,
}

/// Marker at the top of override exports
pub const WARNING_BANNER: &str = "> **QC WARNING:** this export contains unresolved quality-control findings.";

/// QC gate holding the last report
#[derive(Debug, Clone, Default)]
pub struct QcGate {
    last_report: Option<QcReport>,
}

impl QcGate {
    /// Create gate with no report
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last report
    #[inline]
    #[must_use]
    pub fn last_report(&self) -> Option<&QcReport> {
        self.last_report.as_ref()
    }

    /// Current status, derived from the last report
    #[inline]
    #[must_use]
    pub fn status(&self) -> QcStatus {
        derive_status(self.last_report.as_ref())
    }

    /// Install a new report after validating it
    pub fn record(&mut self, report: QcReport) -> Result<QcStatus, QcError> {
        report.validate()?;
        self.last_report = Some(report);
        let status = self.status();
        tracing::info!("QC status: {:?}", status);
        Ok(status)
    }

    /// Forget the last report
    pub fn clear(&mut self) {
        self.last_report = None;
    }

    /// Coverage of the last report (empty before any run)
    #[must_use]
    pub fn coverage(&self) -> Vec<CategoryCoverage> {
        self.last_report.as_ref().map(category_coverage).unwrap_or_default()
    }

    /// Permit strict export only on a passing report
    ///
    /// # Errors
    /// `QcError::NotPassed` for any status other than `Pass`
    pub fn authorize_strict_export(&self) -> Result<ExportAuthorization, QcError> {
        match self.status() {
            QcStatus::Pass => Ok(ExportAuthorization {
                kind: ExportKind::Strict,
                status: QcStatus::Pass,
            }),
            other => {
                tracing::warn!("Strict export refused: QC status {:?}", other);
                Err(QcError::NotPassed)
            }
        }
    }

    /// Permit override export whenever a run exists
    ///
    /// # Errors
    /// `QcError::MissingRunContext` without a run
    pub fn authorize_override_export(
        &self,
        run: Option<&RunContext>,
    ) -> Result<ExportAuthorization, QcError> {
        run.ok_or(QcError::MissingRunContext)?;
        let status = self.status();
        tracing::warn!("Override export authorized with QC status {:?}", status);
        Ok(ExportAuthorization {
            kind: ExportKind::Override,
            status,
        })
    }
}

/// Turn a service export into an artifact for the given authorization
///
/// Override exports are always labelled: the banner is prepended unless the
/// service already added it, and the file name gains a `-with-warnings` suffix.
#[must_use]
pub fn label_export(response: ExportResponse, auth: ExportAuthorization) -> ExportArtifact {
    match auth.kind {
        ExportKind::Strict => ExportArtifact {
            filename: response.filename,
            content: response.content,
            kind: ExportKind::Strict,
            with_warnings: false,
        },
        ExportKind::Override => {
            let content = if response.content.starts_with(WARNING_BANNER) {
                response.content
            } else {
                format!("{WARNING_BANNER}\n\n{}", response.content)
            };
            ExportArtifact {
                filename: warnings_filename(&response.filename),
                content,
                kind: ExportKind::Override,
                with_warnings: true,
            }
        }
    }
}

fn warnings_filename(filename: &str) -> String {
    if filename.contains("-with-warnings") {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-with-warnings.{ext}"),
        _ => format!("{filename}-with-warnings"),
    }
}
