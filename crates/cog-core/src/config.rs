use serde::{Deserialize, Serialize};

use crate::constants::{
    BETA, DECAY_RATE, GAMMA, GOLDEN_RATIO, INITIAL_WEIGHT, RECALL_TOP_K, REFRESH_CONCURRENCY,
    WEIGHT_FLOOR,
};
use crate::error::{CoreError, Result};
use crate::identity::IdPolicy;
use crate::weight::{DecayParams, WeightingStrategy};

/// Engine coefficients. Fixed at construction; nothing mutates them later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reinstatement factor.
    pub beta: f64,
    /// Reinforcement gain.
    pub gamma: f64,
    /// Decay rate per hour.
    pub b: f64,
    pub initial_weight: f64,
    /// Fraction of ranked candidates that get activated.
    pub golden_ratio: f64,
    /// Minimum candidate count fetched per recall.
    pub recall_top_k: usize,
    /// Lower bound of the weight domain.
    pub weight_floor: f64,
    pub strategy: WeightingStrategy,
    pub id_policy: IdPolicy,
    /// Max in-flight per-id writes during a bulk refresh.
    pub refresh_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            beta: BETA,
            gamma: GAMMA,
            b: DECAY_RATE,
            initial_weight: INITIAL_WEIGHT,
            golden_ratio: GOLDEN_RATIO,
            recall_top_k: RECALL_TOP_K,
            weight_floor: WEIGHT_FLOOR,
            strategy: WeightingStrategy::default(),
            id_policy: IdPolicy::default(),
            refresh_concurrency: REFRESH_CONCURRENCY,
        }
    }
}

impl EngineConfig {
    pub fn decay_params(&self) -> DecayParams {
        DecayParams {
            beta: self.beta,
            gamma: self.gamma,
            b: self.b,
            initial_weight: self.initial_weight,
            floor: self.weight_floor,
        }
    }

    /// Reject structurally unusable settings. Out-of-range coefficients are
    /// allowed; weights are clamped downstream.
    pub fn validate(&self) -> Result<()> {
        let coefficients = [
            ("beta", self.beta),
            ("gamma", self.gamma),
            ("b", self.b),
            ("initial_weight", self.initial_weight),
        ];
        for (name, value) in coefficients {
            if !value.is_finite() {
                return Err(CoreError::InvalidConfig(format!("{name} must be finite")));
            }
        }
        if !(self.golden_ratio > 0.0 && self.golden_ratio <= 1.0) {
            return Err(CoreError::InvalidConfig(format!(
                "golden_ratio must be in (0, 1], got {}",
                self.golden_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.weight_floor) {
            return Err(CoreError::InvalidConfig(format!(
                "weight_floor must be in [0, 1], got {}",
                self.weight_floor
            )));
        }
        if self.recall_top_k == 0 {
            return Err(CoreError::InvalidConfig("recall_top_k must be > 0".into()));
        }
        if self.refresh_concurrency == 0 {
            return Err(CoreError::InvalidConfig(
                "refresh_concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }
}
