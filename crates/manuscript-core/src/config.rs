//! Orchestrator configuration
//!
//! Defaults match the reference workflow; every value can be overridden from a
//! TOML file.

use crate::error::ConfigError;
use crate::types::SectionKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Polling period for active generation jobs, in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum number of corrections surfaced at once
    pub max_recommendations: usize,
    /// Outline seed used when bootstrap recommends no sections
    pub default_sections: Vec<SectionKey>,
    /// Durable storage keys
    pub storage: StorageKeys,
    /// Terminology fixes: variant -> preferred term
    pub preferred_terms: BTreeMap<String, String>,
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_recommendations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_recommendations",
                reason: "must be greater than zero".to_string(),
            });
        }
        let keys = self.storage.all();
        if keys.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "storage",
                reason: "storage keys must not be empty".to_string(),
            });
        }
        if keys[0] == keys[1] || keys[0] == keys[2] || keys[1] == keys[2] {
            return Err(ConfigError::InvalidValue {
                field: "storage",
                reason: "storage keys must be distinct".to_string(),
            });
        }
        Ok(())
    }

    /// Polling period
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// With polling period
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// With recommendation cap
    #[inline]
    #[must_use]
    pub fn with_max_recommendations(mut self, max: usize) -> Self {
        self.max_recommendations = max;
        self
    }

    /// With preferred term
    #[inline]
    #[must_use]
    pub fn with_preferred_term(mut self, variant: impl Into<String>, preferred: impl Into<String>) -> Self {
        self.preferred_terms.insert(variant.into(), preferred.into());
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1500,
            max_recommendations: 3,
            default_sections: vec![
                SectionKey::Introduction,
                SectionKey::Methods,
                SectionKey::Results,
                SectionKey::Discussion,
            ],
            storage: StorageKeys::default(),
            preferred_terms: BTreeMap::new(),
        }
    }
}

/// Keys under which run state is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageKeys {
    /// Key holding the serialized run context
    pub run_context_key: String,
    /// Key holding the last-saved research-frame signature
    pub frame_signature_key: String,
    /// Key holding the last-saved research frame itself
    pub research_frame_key: String,
}

impl StorageKeys {
    fn all(&self) -> [&str; 3] {
        [
            &self.run_context_key,
            &self.frame_signature_key,
            &self.research_frame_key,
        ]
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            run_context_key: "manuscript.run_context".to_string(),
            frame_signature_key: "manuscript.frame_signature".to_string(),
            research_frame_key: "manuscript.research_frame".to_string(),
        }
    }
}
