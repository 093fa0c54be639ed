//! Section outline
//!
//! Holds the canonical section -> bullet-list mapping used both for human
//! editing and as generation input. Bullet lists never contain two entries
//! that are equal after trimming and case-folding.

use crate::error::OutlineError;
use crate::types::SectionKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// How incoming bullets combine with the existing list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineMode {
    /// Replace the list with the deduplicated incoming bullets
    Overwrite,
    /// Append incoming bullets; existing entries win ties
    Merge,
}

/// Trim, drop empties, and remove case-insensitive duplicates
///
/// The first occurrence wins and relative order of first occurrences is kept.
pub fn dedupe<I, S>(bullets: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for bullet in bullets {
        let trimmed = bullet.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// One section of the outline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    /// Section key
    pub name: SectionKey,
    bullets: Vec<String>,
    /// Focus tags (e.g. QC focus areas from planning)
    pub tags: Vec<String>,
}

impl OutlineSection {
    /// Create empty section
    #[inline]
    #[must_use]
    pub fn new(name: SectionKey) -> Self {
        Self {
            name,
            bullets: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Deduplicated bullets
    #[inline]
    #[must_use]
    pub fn bullets(&self) -> &[String] {
        &self.bullets
    }

    fn refine<S: AsRef<str>>(&mut self, incoming: &[S], mode: RefineMode) {
        self.bullets = match mode {
            RefineMode::Overwrite => dedupe(incoming),
            RefineMode::Merge => dedupe(
                self.bullets
                    .iter()
                    .map(String::as_str)
                    .chain(incoming.iter().map(|b| AsRef::<str>::as_ref(b))),
            ),
        };
    }
}

/// Outline of the selected sections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineModel {
    sections: BTreeMap<SectionKey, OutlineSection>,
    /// Sections removed from the selection, kept so re-selecting restores them
    parked: BTreeMap<SectionKey, OutlineSection>,
}

impl OutlineModel {
    /// Create outline with empty sections
    #[must_use]
    pub fn new(sections: impl IntoIterator<Item = SectionKey>) -> Self {
        let sections = sections
            .into_iter()
            .map(|key| (key, OutlineSection::new(key)))
            .collect();
        Self {
            sections,
            parked: BTreeMap::new(),
        }
    }

    /// Selected sections in canonical order
    pub fn sections(&self) -> impl Iterator<Item = &OutlineSection> {
        self.sections.values()
    }

    /// Selected section keys in canonical order
    #[must_use]
    pub fn selected(&self) -> Vec<SectionKey> {
        self.sections.keys().copied().collect()
    }

    /// Look up a selected section
    #[must_use]
    pub fn section(&self, key: SectionKey) -> Option<&OutlineSection> {
        self.sections.get(&key)
    }

    /// At least one section has at least one bullet
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.sections.values().any(|s| !s.bullets.is_empty())
    }

    /// Total bullet count across selected sections
    #[must_use]
    pub fn bullet_count(&self) -> usize {
        self.sections.values().map(|s| s.bullets.len()).sum()
    }

    /// Refine one section's bullets
    pub fn refine_section<S: AsRef<str>>(
        &mut self,
        key: SectionKey,
        incoming: &[S],
        mode: RefineMode,
    ) -> Result<&OutlineSection, OutlineError> {
        let section = self
            .sections
            .get_mut(&key)
            .ok_or(OutlineError::SectionNotSelected(key))?;
        section.refine(incoming, mode);
        tracing::debug!("Refined {} ({:?}): {} bullets", key, mode, section.bullets.len());
        Ok(section)
    }

    /// Replace a section's tags (deduplicated like bullets)
    pub fn set_tags<S: AsRef<str>>(&mut self, key: SectionKey, tags: &[S]) -> Result<(), OutlineError> {
        let section = self
            .sections
            .get_mut(&key)
            .ok_or(OutlineError::SectionNotSelected(key))?;
        section.tags = dedupe(tags);
        Ok(())
    }

    /// Rebuild the outline for a new section selection
    ///
    /// Sections kept in the selection keep their bullets, newly selected ones
    /// start empty (or come back from the parked set), and deselected ones are
    /// parked rather than discarded.
    pub fn reconcile_section_order(&mut self, selected: impl IntoIterator<Item = SectionKey>) {
        let wanted: BTreeMap<SectionKey, ()> = selected.into_iter().map(|k| (k, ())).collect();
        let mut previous = std::mem::take(&mut self.sections);

        for key in wanted.keys() {
            let section = previous
                .remove(key)
                .or_else(|| self.parked.remove(key))
                .unwrap_or_else(|| OutlineSection::new(*key));
            self.sections.insert(*key, section);
        }

        for (key, section) in previous {
            if section.bullets.is_empty() && section.tags.is_empty() {
                continue;
            }
            tracing::debug!("Parking deselected section {}", key);
            self.parked.insert(key, section);
        }
    }

    /// Render the outline as markdown notes for the generation request
    #[must_use]
    pub fn render_notes(&self) -> String {
        let mut out = String::new();
        for section in self.sections.values().filter(|s| !s.bullets.is_empty()) {
            out.push_str("## ");
            out.push_str(section.name.as_str());
            out.push('\n');
            for bullet in &section.bullets {
                out.push_str("- ");
                out.push_str(bullet);
                out.push('\n');
            }
        }
        out
    }
}
