//! Per-session privacy ledger.

use super::mechanism::{check_clip, check_delta, check_epsilon};
use super::{BudgetSpec, Calibration, Mechanism, PrivacyError, PrivacyResult};

/// Per-session differential-privacy ledger.
///
/// `epsilon_spent` never decreases and never exceeds `epsilon_total`.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivacyBudget {
    epsilon_total: f64,
    delta_total: f64,
    epsilon_spent: f64,
    clip: f64,
    mechanism: Mechanism,
}

impl PrivacyBudget {
    /// Open an empty ledger.
    ///
    /// `delta_total` is only checked for the Gaussian mechanism.
    pub fn new(
        epsilon_total: f64,
        delta_total: f64,
        clip: f64,
        mechanism: Mechanism,
    ) -> PrivacyResult<Self> {
        check_epsilon(epsilon_total)?;
        check_clip(clip)?;
        if mechanism == Mechanism::Gaussian {
            check_delta(delta_total)?;
        }
        Ok(Self {
            epsilon_total,
            delta_total,
            epsilon_spent: 0.0,
            clip,
            mechanism,
        })
    }

    /// Open a ledger from a policy entry.
    pub fn from_spec(spec: &BudgetSpec, mechanism: Mechanism) -> PrivacyResult<Self> {
        Self::new(spec.epsilon, spec.delta, spec.clip_norm, mechanism)
    }

    /// Spend `epsilon` and return the noise calibration for it.
    ///
    /// On error the ledger is left unchanged.
    pub fn charge(&mut self, epsilon: f64) -> PrivacyResult<Calibration> {
        check_epsilon(epsilon)?;

        if self.epsilon_spent + epsilon > self.epsilon_total {
            return Err(PrivacyError::BudgetExceeded {
                requested: epsilon,
                remaining: self.remaining(),
            });
        }

        let calibration = self
            .mechanism
            .calibrate(epsilon, self.delta_total, self.clip)?;
        self.epsilon_spent += epsilon;
        Ok(calibration)
    }

    /// Epsilon still available.
    pub fn remaining(&self) -> f64 {
        (self.epsilon_total - self.epsilon_spent).max(0.0)
    }

    /// Whether no further charge of `epsilon` can succeed.
    pub fn is_exhausted(&self, epsilon: f64) -> bool {
        self.epsilon_spent + epsilon > self.epsilon_total
    }

    /// Epsilon spent so far.
    pub fn epsilon_spent(&self) -> f64 {
        self.epsilon_spent
    }

    /// Epsilon cap.
    pub fn epsilon_total(&self) -> f64 {
        self.epsilon_total
    }

    /// Delta cap.
    pub fn delta_total(&self) -> f64 {
        self.delta_total
    }

    /// Sensitivity bound.
    pub fn clip(&self) -> f64 {
        self.clip
    }

    /// Noise mechanism.
    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }
}
