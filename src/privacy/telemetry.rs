//! Noise injection for telemetry samples.

use rand::Rng;

use super::Calibration;
use crate::envelope::{TelemetryDatagram, TelemetryPayload};

/// Upper bound for `cpu_percent`.
pub const CPU_PERCENT_MAX: f64 = 100.0;

/// Clip the numeric fields of `datagram` to `calibration.clip` and add
/// independent noise to each.
///
/// The fields of one payload form a vector. When its L1 norm exceeds the
/// clip bound the whole vector is scaled down onto the bound, so a single
/// sample never moves the output by more than the calibrated sensitivity.
/// Results are rounded and clamped to the field's domain. Datagrams
/// without a payload are left untouched.
pub fn privatize_telemetry<R: Rng + ?Sized>(
    datagram: &mut TelemetryDatagram,
    calibration: &Calibration,
    rng: &mut R,
) {
    let Some(payload) = datagram.payload.as_mut() else {
        return;
    };

    match payload {
        TelemetryPayload::System(stats) => {
            let [cpu, mem, temp] = clip_l1(
                [
                    stats.cpu_percent as f64,
                    stats.mem_bytes as f64,
                    stats.temperature_c as f64,
                ],
                calibration.clip,
            );
            stats.cpu_percent = noisy(cpu, CPU_PERCENT_MAX, calibration, rng) as u32;
            stats.mem_bytes = noisy(mem, u64::MAX as f64, calibration, rng) as u64;
            stats.temperature_c = noisy_u32(temp, calibration, rng);
        }
        TelemetryPayload::Tokens(usage) => {
            let [prompt, completion] = clip_l1(
                [usage.prompt_tokens as f64, usage.completion_tokens as f64],
                calibration.clip,
            );
            usage.prompt_tokens = noisy_u32(prompt, calibration, rng);
            usage.completion_tokens = noisy_u32(completion, calibration, rng);
        }
        TelemetryPayload::Latency(latency) => {
            let [request, response] = clip_l1(
                [
                    latency.request_latency_ms as f64,
                    latency.response_latency_ms as f64,
                ],
                calibration.clip,
            );
            latency.request_latency_ms = noisy_u32(request, calibration, rng);
            latency.response_latency_ms = noisy_u32(response, calibration, rng);
        }
    }
}

/// Scale `values` so their L1 norm is at most `clip`.
pub fn clip_l1<const N: usize>(mut values: [f64; N], clip: f64) -> [f64; N] {
    let norm: f64 = values.iter().map(|v| v.abs()).sum();
    if norm > clip && norm > 0.0 {
        let factor = clip / norm;
        for v in &mut values {
            *v *= factor;
        }
    }
    values
}

fn noisy_u32<R: Rng + ?Sized>(value: f64, calibration: &Calibration, rng: &mut R) -> u32 {
    noisy(value, u32::MAX as f64, calibration, rng) as u32
}

fn noisy<R: Rng + ?Sized>(value: f64, max: f64, calibration: &Calibration, rng: &mut R) -> f64 {
    calibration.perturb(value, rng).round().clamp(0.0, max)
}
