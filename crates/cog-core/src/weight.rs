//! Weight model: forgetting and reinforcement of coglets.
//!
//! The recall path uses a discrete-time recurrence evaluated whenever a
//! coglet is touched:
//!
//! ```text
//! w ← e^(−b·Δt) · (β·w + γ·Δt)        Δt in hours since the last update
//! ```
//!
//! `β` carries part of the previous weight forward, `γ·Δt` rewards spaced
//! re-activation, and `e^(−b·Δt)` lets everything fade. A never-seen coglet
//! (no previous weight or timestamp) starts at the configured initial weight.
//!
//! The legacy blend is a weighted average of five normalized signals with a
//! coarse recency factor. It has no recurrence and is kept for callers that
//! still weigh coglets by connection/access/importance/emotion.
//!
//! Both are exposed through [`WeightingStrategy`]. Every result is clamped to
//! `[floor, 1.0]`.

use serde::{Deserialize, Serialize};

use crate::constants::{
    BETA, DECAY_RATE, GAMMA, INITIAL_WEIGHT, LEGACY_ACCESS_HALF, LEGACY_CONNECTION_HALF,
    LEGACY_SHARES, SECS_PER_HOUR, TIME_ORDER_TOLERANCE_SECS, WEIGHT_CEILING, WEIGHT_FLOOR,
};
use crate::error::{CoreError, Result};

/// Coefficients of the decay recurrence plus the weight domain floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayParams {
    pub beta: f64,
    pub gamma: f64,
    pub b: f64,
    pub initial_weight: f64,
    pub floor: f64,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            beta: BETA,
            gamma: GAMMA,
            b: DECAY_RATE,
            initial_weight: INITIAL_WEIGHT,
            floor: WEIGHT_FLOOR,
        }
    }
}

/// Clamp a weight into `[floor, 1.0]`. NaN collapses to the floor.
pub fn clamp_weight(weight: f64, floor: f64) -> f64 {
    let floor = if floor.is_finite() {
        floor.clamp(0.0, WEIGHT_CEILING)
    } else {
        WEIGHT_FLOOR
    };
    if weight.is_nan() {
        return floor;
    }
    weight.clamp(floor, WEIGHT_CEILING)
}

/// Hours elapsed between two Unix-second timestamps.
///
/// Backwards steps within [`TIME_ORDER_TOLERANCE_SECS`] count as zero; larger
/// ones (or non-finite inputs) fail with [`CoreError::InvalidTimeOrder`].
pub fn elapsed_hours(last_time: f64, current_time: f64) -> Result<f64> {
    let delta = current_time - last_time;
    if !(delta >= -TIME_ORDER_TOLERANCE_SECS) || !delta.is_finite() {
        return Err(CoreError::InvalidTimeOrder {
            last: last_time,
            current: current_time,
        });
    }
    Ok(delta.max(0.0) / SECS_PER_HOUR)
}

/// Apply one step of the decay recurrence.
///
/// Returns `params.initial_weight` (clamped) when either the previous weight
/// or the previous timestamp is absent.
pub fn compute_weight(
    last_weight: Option<f64>,
    last_time: Option<f64>,
    current_time: f64,
    params: &DecayParams,
) -> Result<f64> {
    let (Some(weight), Some(last)) = (last_weight, last_time) else {
        return Ok(clamp_weight(params.initial_weight, params.floor));
    };

    let dt = elapsed_hours(last, current_time)?;
    let raw = (-params.b * dt).exp() * (params.beta * weight + params.gamma * dt);
    Ok(clamp_weight(raw, params.floor))
}

/// Inputs to the legacy blend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LegacySignals {
    pub connections: u32,
    pub access_count: u32,
    /// Caller-assigned importance in `[0, 1]`.
    pub importance: f64,
    /// Caller-assigned emotional salience in `[0, 1]`.
    pub emotion: f64,
}

/// Legacy weighted-average weight.
///
/// Shares: connections 30%, accesses 20%, importance 15%, emotion 15%,
/// recency 20%. Counts saturate as `n / (n + half)`.
pub fn coglet_weight(signals: &LegacySignals, hours_since_access: f64, b: f64) -> f64 {
    let [w_conn, w_access, w_importance, w_emotion, w_recency] = LEGACY_SHARES;

    let connections = saturate(signals.connections, LEGACY_CONNECTION_HALF);
    let accesses = saturate(signals.access_count, LEGACY_ACCESS_HALF);
    let importance = unit(signals.importance);
    let emotion = unit(signals.emotion);
    let recency = unit((-b * hours_since_access.max(0.0)).exp());

    let blended = w_conn * connections
        + w_access * accesses
        + w_importance * importance
        + w_emotion * emotion
        + w_recency * recency;
    clamp_weight(blended, WEIGHT_FLOOR)
}

fn saturate(count: u32, half: f64) -> f64 {
    let n = f64::from(count);
    n / (n + half)
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Suggested spacing between re-activations, `1/b` hours. `None` when `b <= 0`.
pub fn optimal_interval(b: f64) -> Option<f64> {
    (b > 0.0).then(|| 1.0 / b)
}

/// Everything a strategy may look at when weighing a coglet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightState {
    pub weight: Option<f64>,
    pub last_time: Option<f64>,
    pub signals: LegacySignals,
}

/// Which weight model the engine runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingStrategy {
    /// Exponential-decay recurrence. The recall-path model.
    #[default]
    Recurrence,
    /// Weighted-average blend over legacy signals.
    Legacy,
}

impl WeightingStrategy {
    pub fn weigh(&self, state: &WeightState, now: f64, params: &DecayParams) -> Result<f64> {
        match self {
            Self::Recurrence => compute_weight(state.weight, state.last_time, now, params),
            Self::Legacy => {
                let Some(last) = state.last_time else {
                    return Ok(clamp_weight(params.initial_weight, params.floor));
                };
                let hours = elapsed_hours(last, now)?;
                Ok(clamp_weight(
                    coglet_weight(&state.signals, hours, params.b),
                    params.floor,
                ))
            }
        }
    }
}
