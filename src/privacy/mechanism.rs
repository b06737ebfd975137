//! Noise mechanisms and their calibration.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{PrivacyError, PrivacyResult};

/// Laplace scale `b = clip / epsilon`.
pub fn laplace_scale(epsilon: f64, clip: f64) -> PrivacyResult<f64> {
    check_epsilon(epsilon)?;
    check_clip(clip)?;
    Ok(clip / epsilon)
}

/// Gaussian sigma `sqrt(2 ln(1.25 / delta)) * clip / epsilon`.
pub fn gaussian_sigma(epsilon: f64, delta: f64, clip: f64) -> PrivacyResult<f64> {
    check_epsilon(epsilon)?;
    check_delta(delta)?;
    check_clip(clip)?;
    Ok((2.0 * (1.25 / delta).ln()).sqrt() * clip / epsilon)
}

pub(crate) fn check_epsilon(epsilon: f64) -> PrivacyResult<()> {
    if epsilon.is_finite() && epsilon > 0.0 {
        Ok(())
    } else {
        Err(PrivacyError::InvalidEpsilon(epsilon))
    }
}

pub(crate) fn check_delta(delta: f64) -> PrivacyResult<()> {
    if delta > 0.0 && delta < 1.0 {
        Ok(())
    } else {
        Err(PrivacyError::InvalidDelta(delta))
    }
}

pub(crate) fn check_clip(clip: f64) -> PrivacyResult<()> {
    if clip.is_finite() && clip > 0.0 {
        Ok(())
    } else {
        Err(PrivacyError::InvalidClip(clip))
    }
}

/// Randomisation mechanism used for telemetry noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    /// Laplace(0, clip / epsilon). Pure epsilon-DP.
    #[default]
    Laplace,
    /// Gaussian(0, sigma). (epsilon, delta)-DP.
    Gaussian,
}

impl Mechanism {
    /// Calibrate this mechanism for one charge.
    pub fn calibrate(self, epsilon: f64, delta: f64, clip: f64) -> PrivacyResult<Calibration> {
        let scale = match self {
            Mechanism::Laplace => laplace_scale(epsilon, clip)?,
            Mechanism::Gaussian => gaussian_sigma(epsilon, delta, clip)?,
        };
        Ok(Calibration {
            mechanism: self,
            scale,
            clip,
        })
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mechanism::Laplace => f.write_str("laplace"),
            Mechanism::Gaussian => f.write_str("gaussian"),
        }
    }
}

impl FromStr for Mechanism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "laplace" => Ok(Mechanism::Laplace),
            "gaussian" => Ok(Mechanism::Gaussian),
            other => Err(format!("unknown mechanism '{other}' (expected laplace or gaussian)")),
        }
    }
}

/// Noise parameters returned by a successful budget charge.
///
/// `scale` is the Laplace `b` or the Gaussian `sigma`, both derived from
/// `clip`. Inputs must be clipped to `clip` before noise is added or the
/// scale no longer covers their sensitivity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Mechanism the scale belongs to.
    pub mechanism: Mechanism,
    /// Laplace scale or Gaussian standard deviation.
    pub scale: f64,
    /// L1 bound the scale was calibrated for.
    pub clip: f64,
}

impl Calibration {
    /// Draw one fresh noise sample.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self.mechanism {
            Mechanism::Laplace => sample_laplace(self.scale, rng),
            Mechanism::Gaussian => sample_gaussian(self.scale, rng),
        }
    }

    /// Add one fresh noise sample to `value`.
    pub fn perturb<R: Rng + ?Sized>(&self, value: f64, rng: &mut R) -> f64 {
        value + self.sample(rng)
    }
}

// Inverse CDF on u in (-0.5, 0.5).
fn sample_laplace<R: Rng + ?Sized>(scale: f64, rng: &mut R) -> f64 {
    let u: f64 = rng.gen_range(-0.5..0.5);
    let tail = (1.0 - 2.0 * u.abs()).max(f64::MIN_POSITIVE);
    -scale * u.signum() * tail.ln()
}

// Box-Muller.
fn sample_gaussian<R: Rng + ?Sized>(sigma: f64, rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
