//! Core types for the manuscript run
//!
//! Defines the fundamental types shared by every component:
//! - Identifiers assigned by the collaborator services
//! - Canonical section keys
//! - Run identity and the research frame it was bootstrapped from
//! - Wizard steps

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier assigned by a collaborator service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    /// Wrap a raw identifier
    #[inline]
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw identifier text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Manuscript section, declared in canonical order
///
/// The derived `Ord` is the canonical section ordering; outline and draft
/// collections keyed by `SectionKey` iterate in that order regardless of the
/// order the services answered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    /// Structured abstract
    Abstract,
    /// Introduction / background
    Introduction,
    /// Methods
    Methods,
    /// Results
    Results,
    /// Discussion
    Discussion,
    /// Conclusion
    Conclusion,
}

impl SectionKey {
    /// Every section in canonical order
    pub const CANONICAL: [SectionKey; 6] = [
        SectionKey::Abstract,
        SectionKey::Introduction,
        SectionKey::Methods,
        SectionKey::Results,
        SectionKey::Discussion,
        SectionKey::Conclusion,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SectionKey::Abstract => "abstract",
            SectionKey::Introduction => "introduction",
            SectionKey::Methods => "methods",
            SectionKey::Results => "results",
            SectionKey::Discussion => "discussion",
            SectionKey::Conclusion => "conclusion",
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one manuscript-generation run
///
/// Assigned once by the bootstrap collaborator and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunContext {
    /// Project identifier
    pub project_id: Id,
    /// Manuscript identifier
    pub manuscript_id: Id,
}

impl RunContext {
    /// Create run context
    #[inline]
    #[must_use]
    pub fn new(project_id: impl Into<Id>, manuscript_id: impl Into<Id>) -> Self {
        Self {
            project_id: project_id.into(),
            manuscript_id: manuscript_id.into(),
        }
    }
}

/// Research-frame fields entered on step 1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchFrame {
    /// Working title
    pub title: String,
    /// Journal the manuscript targets
    pub target_journal: String,
    /// Framing answers keyed by question id
    pub answers: BTreeMap<String, String>,
}

impl ResearchFrame {
    /// Create frame with title and journal
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>, target_journal: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            target_journal: target_journal.into(),
            answers: BTreeMap::new(),
        }
    }

    /// With framing answer
    #[inline]
    #[must_use]
    pub fn with_answer(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.answers.insert(key.into(), value.into());
        self
    }

    /// Stable signature of the frame contents
    ///
    /// SHA-256 of the canonical JSON form: values trimmed, object keys in
    /// sorted order. Surrounding whitespace is ignored; any other edit
    /// changes the signature.
    #[must_use]
    pub fn signature(&self) -> FrameSignature {
        let answers: serde_json::Map<String, serde_json::Value> = self
            .answers
            .iter()
            .map(|(key, value)| (key.clone(), value.trim().into()))
            .collect();
        let canonical = serde_json::json!({
            "answers": answers,
            "targetJournal": self.target_journal.trim(),
            "title": self.title.trim(),
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        FrameSignature(hex::encode(digest))
    }
}

/// Hex-encoded SHA-256 of a research frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameSignature(pub String);

impl fmt::Display for FrameSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wizard step, 1..=5
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WizardStep {
    /// Step 1: research framing
    ResearchFrame = 1,
    /// Step 2: section planning
    PlanSections = 2,
    /// Step 3: generation run
    RunGeneration = 3,
    /// Step 4: draft review
    DraftReview = 4,
    /// Step 5: QC and export
    QcExport = 5,
}

impl WizardStep {
    /// Every step in order
    pub const ALL: [WizardStep; 5] = [
        WizardStep::ResearchFrame,
        WizardStep::PlanSections,
        WizardStep::RunGeneration,
        WizardStep::DraftReview,
        WizardStep::QcExport,
    ];

    /// Step from its 1-based number
    #[must_use]
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(WizardStep::ResearchFrame),
            2 => Some(WizardStep::PlanSections),
            3 => Some(WizardStep::RunGeneration),
            4 => Some(WizardStep::DraftReview),
            5 => Some(WizardStep::QcExport),
            _ => None,
        }
    }

    /// 1-based step number
    #[inline]
    #[must_use]
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Human-readable step title
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            WizardStep::ResearchFrame => "Research frame",
            WizardStep::PlanSections => "Plan sections",
            WizardStep::RunGeneration => "Run generation",
            WizardStep::DraftReview => "Draft review",
            WizardStep::QcExport => "QC & export",
        }
    }

    /// Steps strictly before this one
    pub fn predecessors(self) -> impl Iterator<Item = WizardStep> {
        WizardStep::ALL.into_iter().take_while(move |s| *s < self)
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.number(), self.title())
    }
}
