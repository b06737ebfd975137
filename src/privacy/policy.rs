//! Per-topic budget policy.
//!
//! ```toml
//! version = 1
//!
//! [budgets."*"]
//! epsilon = 1.0
//! delta = 1e-5
//! clip_norm = 10.0
//!
//! [budgets."telemetry/lab"]
//! epsilon = 0.5
//! epsilon_per_sample = 0.05
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::mechanism::{Mechanism, check_clip, check_delta, check_epsilon};
use super::{PrivacyError, PrivacyResult};
use crate::core::{
    DEFAULT_CLIP_NORM, DEFAULT_DELTA_TOTAL, DEFAULT_EPSILON_PER_SAMPLE, DEFAULT_EPSILON_TOTAL,
    WILDCARD_TOPIC,
};

/// Budget parameters for one topic prefix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSpec {
    /// Epsilon cap per session.
    pub epsilon: f64,
    /// Delta cap per session.
    pub delta: f64,
    /// Sensitivity bound.
    pub clip_norm: f64,
    /// Epsilon charged per telemetry datagram.
    pub epsilon_per_sample: f64,
}

impl Default for BudgetSpec {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON_TOTAL,
            delta: DEFAULT_DELTA_TOTAL,
            clip_norm: DEFAULT_CLIP_NORM,
            epsilon_per_sample: DEFAULT_EPSILON_PER_SAMPLE,
        }
    }
}

impl BudgetSpec {
    fn validate(&self, topic: &str) -> PrivacyResult<()> {
        let invalid = |e: PrivacyError| PrivacyError::InvalidPolicy(format!("{topic}: {e}"));
        check_epsilon(self.epsilon).map_err(invalid)?;
        check_epsilon(self.epsilon_per_sample).map_err(invalid)?;
        check_clip(self.clip_norm).map_err(invalid)?;
        if !(self.delta >= 0.0 && self.delta < 1.0) {
            return Err(invalid(PrivacyError::InvalidDelta(self.delta)));
        }
        Ok(())
    }
}

/// Topic-prefix keyed budgets.
///
/// Lookup picks the longest key that prefixes the topic, then `"*"`, then
/// the built-in default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Policy format version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Budgets keyed by topic prefix.
    #[serde(default)]
    pub budgets: BTreeMap<String, BudgetSpec>,
}

fn default_version() -> u32 {
    1
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        let mut budgets = BTreeMap::new();
        budgets.insert(WILDCARD_TOPIC.to_string(), BudgetSpec::default());
        Self {
            version: default_version(),
            budgets,
        }
    }
}

impl BudgetPolicy {
    /// Parse and validate a TOML policy.
    pub fn from_toml_str(s: &str) -> PrivacyResult<Self> {
        let policy: Self =
            toml::from_str(s).map_err(|e| PrivacyError::InvalidPolicy(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a TOML policy file.
    pub fn load(path: impl AsRef<Path>) -> PrivacyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PrivacyError::InvalidPolicy(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check every entry.
    pub fn validate(&self) -> PrivacyResult<()> {
        for (topic, spec) in &self.budgets {
            spec.validate(topic)?;
        }
        Ok(())
    }

    /// Check that every entry can be calibrated for `mechanism`.
    ///
    /// Gaussian noise needs `0 < delta < 1`; Laplace ignores delta.
    pub fn check_mechanism(&self, mechanism: Mechanism) -> PrivacyResult<()> {
        if mechanism == Mechanism::Gaussian {
            for (topic, spec) in &self.budgets {
                check_delta(spec.delta)
                    .map_err(|e| PrivacyError::InvalidPolicy(format!("{topic}: {e} (gaussian)")))?;
            }
        }
        Ok(())
    }

    /// Budget for `topic`.
    pub fn lookup(&self, topic: &str) -> BudgetSpec {
        self.budgets
            .iter()
            .filter(|(prefix, _)| prefix.as_str() != WILDCARD_TOPIC && topic.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .or_else(|| self.budgets.get_key_value(WILDCARD_TOPIC))
            .map(|(_, spec)| *spec)
            .unwrap_or_default()
    }

    /// Set or replace the budget for a prefix.
    pub fn set(&mut self, prefix: impl Into<String>, spec: BudgetSpec) {
        self.budgets.insert(prefix.into(), spec);
    }

    /// Mutable wildcard entry, created from the default if missing.
    pub fn wildcard_mut(&mut self) -> &mut BudgetSpec {
        self.budgets.entry(WILDCARD_TOPIC.to_string()).or_default()
    }
}
