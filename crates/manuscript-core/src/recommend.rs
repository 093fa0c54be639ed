//! Recommendation engine
//!
//! Inspects drafts and the outline and proposes low-risk, explainable patches.
//! Nothing is applied until the user picks a recommendation.
//!
//! Detection order is fixed (causal language, results/discussion alignment,
//! missing limitations, terminology, outline limitations; sections in
//! canonical order within each check) and the surfaced list is the first
//! `max_recommendations` detections.

use crate::config::OrchestratorConfig;
use crate::error::{ConfigError, OutlineError};
use crate::outline::{OutlineModel, RefineMode};
use crate::types::SectionKey;
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const CAUSAL_PATTERN: &str = r"\b(causes|caused|led to|resulted in|causal)\b";
const STRENGTH_MARKERS: [&str; 3] = ["significant", "strong effect", "proved"];
const UNCERTAINTY_MARKERS: [&str; 4] = ["confidence interval", "95% ci", "p-value", "estimate"];

const ALIGNMENT_SENTENCE: &str = "These findings should be interpreted in light of the uncertainty \
reported in the Results, including the confidence intervals around each estimate.";
const LIMITATIONS_PARAGRAPH: &str = "This study has limitations. The observational design \
does not support conclusions about cause and effect, residual confounding cannot be excluded, and the findings may not \
generalize beyond the study population.";
const LIMITATIONS_BULLET: &str = "Acknowledge study limitations and their likely impact on the findings";

/// Kind of correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationKind {
    /// Causal wording replaced with associative wording
    CausalLanguage,
    /// Discussion strength not backed by Results uncertainty
    ResultsAlignment,
    /// Discussion never mentions limitations
    MissingLimitations,
    /// Non-preferred term used
    Terminology,
    /// Outline lacks a limitations point
    OutlineLimitations,
}

impl fmt::Display for RecommendationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CausalLanguage => "causal-language",
            Self::ResultsAlignment => "results-alignment",
            Self::MissingLimitations => "missing-limitations",
            Self::Terminology => "terminology",
            Self::OutlineLimitations => "outline-limitations",
        };
        f.write_str(s)
    }
}

/// Proposed change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Patch {
    /// Replace the section draft; shown as a before/after diff
    Replace {
        /// Current text
        before: String,
        /// Proposed text
        after: String,
    },
    /// Append text to the section draft
    Append {
        /// Text to append
        text: String,
    },
    /// Merge bullets into the section outline
    OutlineMerge {
        /// Bullets to merge
        bullets: Vec<String>,
    },
}

/// One-click correction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Stable id (`kind:section`)
    pub id: String,
    /// Kind
    pub kind: RecommendationKind,
    /// Target section
    pub section: SectionKey,
    /// Short title
    pub title: String,
    /// Why it was flagged
    pub rationale: String,
    /// Proposed change
    pub patch: Patch,
}

impl Recommendation {
    fn new(
        kind: RecommendationKind,
        section: SectionKey,
        title: impl Into<String>,
        rationale: impl Into<String>,
        patch: Patch,
    ) -> Self {
        Self {
            id: format!("{kind}:{section}"),
            kind,
            section,
            title: title.into(),
            rationale: rationale.into(),
            patch,
        }
    }

    /// Apply the patch to drafts or outline
    pub fn apply(
        &self,
        drafts: &mut BTreeMap<SectionKey, String>,
        outline: &mut OutlineModel,
    ) -> Result<(), OutlineError> {
        match &self.patch {
            Patch::Replace { after, .. } => {
                drafts.insert(self.section, after.clone());
            }
            Patch::Append { text } => {
                let draft = drafts.entry(self.section).or_default();
                let trimmed_len = draft.trim_end().len();
                draft.truncate(trimmed_len);
                if !draft.is_empty() {
                    draft.push_str("\n\n");
                }
                draft.push_str(text);
            }
            Patch::OutlineMerge { bullets } => {
                outline.refine_section(self.section, bullets.as_slice(), RefineMode::Merge)?;
            }
        }
        tracing::info!("Applied recommendation {}", self.id);
        Ok(())
    }
}

/// Recommendation engine
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    max_recommendations: usize,
    causal: Regex,
    terms: Vec<(Regex, String)>,
}

impl RecommendationEngine {
    /// Build engine from configuration
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` if a preferred-term pattern cannot compile
    pub fn new(config: &OrchestratorConfig) -> Result<Self, ConfigError> {
        let causal = case_insensitive(CAUSAL_PATTERN)?;
        let terms = config
            .preferred_terms
            .iter()
            .filter(|(variant, _)| !variant.trim().is_empty())
            .map(|(variant, preferred)| {
                let pattern = format!(r"\b{}\b", regex::escape(variant.trim()));
                Ok((case_insensitive(&pattern)?, preferred.clone()))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            max_recommendations: config.max_recommendations,
            causal,
            terms,
        })
    }

    /// Surfaced recommendations, at most `max_recommendations`
    #[must_use]
    pub fn recommend(
        &self,
        drafts: &BTreeMap<SectionKey, String>,
        outline: &OutlineModel,
    ) -> Vec<Recommendation> {
        let mut found = self.detect_all(drafts, outline);
        found.truncate(self.max_recommendations);
        found
    }

    /// Every detection, in detection order
    #[must_use]
    pub fn detect_all(
        &self,
        drafts: &BTreeMap<SectionKey, String>,
        outline: &OutlineModel,
    ) -> Vec<Recommendation> {
        let mut found = Vec::new();
        for (section, text) in drafts {
            found.extend(self.causal_correction(*section, text));
        }
        let discussion = drafts
            .get(&SectionKey::Discussion)
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty());
        if let Some(discussion) = discussion {
            let results = drafts.get(&SectionKey::Results).map_or("", String::as_str);
            found.extend(alignment_check(results, discussion));
            found.extend(limitations_check(discussion));
        }
        for (section, text) in drafts {
            found.extend(self.terminology_fix(*section, text));
        }
        found.extend(outline_limitations(outline));
        found
    }

    fn causal_correction(&self, section: SectionKey, text: &str) -> Option<Recommendation> {
        let phrases: Vec<String> = self
            .causal
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        if phrases.is_empty() {
            return None;
        }
        let after = self
            .causal
            .replace_all(text, |caps: &Captures<'_>| {
                let original = &caps[0];
                match_case(original, associative_phrase(original))
            })
            .into_owned();
        Some(Recommendation::new(
            RecommendationKind::CausalLanguage,
            section,
            "Use associative language",
            format!(
                "Causal wording ({}) overstates observational evidence",
                phrases.join(", ")
            ),
            Patch::Replace {
                before: text.to_string(),
                after,
            },
        ))
    }

    fn terminology_fix(&self, section: SectionKey, text: &str) -> Option<Recommendation> {
        let mut after = text.to_string();
        let mut replaced = Vec::new();
        for (pattern, preferred) in &self.terms {
            if pattern.is_match(&after) {
                replaced.push(preferred.clone());
                after = pattern
                    .replace_all(&after, |caps: &Captures<'_>| match_case(&caps[0], preferred))
                    .into_owned();
            }
        }
        if replaced.is_empty() || after == text {
            return None;
        }
        Some(Recommendation::new(
            RecommendationKind::Terminology,
            section,
            "Use preferred terminology",
            format!("Preferred terms: {}", replaced.join(", ")),
            Patch::Replace {
                before: text.to_string(),
                after,
            },
        ))
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConfigError::InvalidValue {
            field: "preferred_terms",
            reason: e.to_string(),
        })
}

fn associative_phrase(causal: &str) -> &'static str {
    match causal.to_lowercase().as_str() {
        "causes" => "is associated with",
        "causal" => "associative",
        _ => "was associated with",
    }
}

/// Carry the capitalization of the first letter over to the replacement
fn match_case(original: &str, replacement: &str) -> String {
    let capitalized = original.chars().next().is_some_and(char::is_uppercase);
    if !capitalized {
        return replacement.to_string();
    }
    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    markers.iter().any(|m| lowered.contains(m))
}

fn alignment_check(results: &str, discussion: &str) -> Option<Recommendation> {
    if !contains_any(discussion, &STRENGTH_MARKERS)
        || contains_any(results, &UNCERTAINTY_MARKERS)
        || discussion.contains(ALIGNMENT_SENTENCE)
    {
        return None;
    }
    Some(Recommendation::new(
        RecommendationKind::ResultsAlignment,
        SectionKey::Discussion,
        "Align Discussion with Results uncertainty",
        "Discussion uses strength language but Results report no interval or estimate",
        Patch::Append {
            text: ALIGNMENT_SENTENCE.to_string(),
        },
    ))
}

fn limitations_check(discussion: &str) -> Option<Recommendation> {
    if discussion.to_lowercase().contains("limitation") {
        return None;
    }
    Some(Recommendation::new(
        RecommendationKind::MissingLimitations,
        SectionKey::Discussion,
        "Add a limitations paragraph",
        "Discussion does not mention limitations",
        Patch::Append {
            text: LIMITATIONS_PARAGRAPH.to_string(),
        },
    ))
}

fn outline_limitations(outline: &OutlineModel) -> Option<Recommendation> {
    let section = outline.section(SectionKey::Discussion)?;
    let bullets = section.bullets();
    if bullets.is_empty() || bullets.iter().any(|b| b.to_lowercase().contains("limitation")) {
        return None;
    }
    Some(Recommendation::new(
        RecommendationKind::OutlineLimitations,
        SectionKey::Discussion,
        "Plan a limitations point",
        "Discussion outline has no limitations bullet",
        Patch::OutlineMerge {
            bullets: vec![LIMITATIONS_BULLET.to_string()],
        },
    ))
}
