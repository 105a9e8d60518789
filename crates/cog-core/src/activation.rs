//! Recall planning: read-time reweighing, ranking and the golden-ratio cutoff.
//!
//! Pure over a snapshot of candidates. Nothing here persists; the caller
//! writes back only the activated prefix.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::coglet::Coglet;
use crate::config::EngineConfig;

/// A similarity hit joined with its stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub coglet: Coglet,
    /// Similarity reported by the vector index.
    pub score: f32,
}

/// A candidate with its read-time weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCoglet {
    pub coglet: Coglet,
    pub score: f32,
    /// Weight as of the recall instant. Not persisted unless activated.
    pub weight: f64,
}

/// `max(1, ⌊n·ratio⌋)` for non-empty input, 0 otherwise. Never exceeds `n`.
pub fn activation_cutoff(n: usize, golden_ratio: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let k = (n as f64 * golden_ratio).floor();
    let k = if k.is_finite() && k > 0.0 { k as usize } else { 0 };
    k.clamp(1, n)
}

fn rank_order(a: &RankedCoglet, b: &RankedCoglet) -> Ordering {
    b.weight
        .total_cmp(&a.weight)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.coglet.id.cmp(&b.coglet.id))
}

/// Ranked candidates plus the activation boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallPlan {
    /// Weight-descending; ties by score descending, then id ascending.
    pub all_results: Vec<RankedCoglet>,
    pub activated_len: usize,
    /// Ids whose stored timestamp lies in the future. They were ranked by
    /// their stored weight.
    pub skewed: Vec<String>,
}

impl RecallPlan {
    pub fn activated(&self) -> &[RankedCoglet] {
        &self.all_results[..self.activated_len]
    }

    pub fn activated_ids(&self) -> Vec<String> {
        self.activated()
            .iter()
            .map(|r| r.coglet.id.clone())
            .collect()
    }

    pub fn into_result(self) -> RecallResult {
        let activated = self.all_results[..self.activated_len].to_vec();
        RecallResult {
            all_results: self.all_results,
            activated,
        }
    }
}

/// What `recall` hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallResult {
    pub all_results: Vec<RankedCoglet>,
    pub activated: Vec<RankedCoglet>,
}

/// Reweigh every candidate at `now` and sort. Also returns the ids whose
/// stored timestamp lies in the future; those keep their stored weight.
pub fn rank_candidates(
    candidates: Vec<Candidate>,
    config: &EngineConfig,
    now: f64,
) -> (Vec<RankedCoglet>, Vec<String>) {
    let params = config.decay_params();
    let mut skewed = Vec::new();

    let mut ranked: Vec<RankedCoglet> = candidates
        .into_iter()
        .map(|c| {
            let state = c.coglet.metadata.weight_state();
            let weight = match config.strategy.weigh(&state, now, &params) {
                Ok(w) => w,
                Err(_) => {
                    skewed.push(c.coglet.id.clone());
                    c.coglet.metadata.weight
                }
            };
            RankedCoglet {
                coglet: c.coglet,
                score: c.score,
                weight,
            }
        })
        .collect();

    ranked.sort_by(rank_order);
    (ranked, skewed)
}

/// Rank, then cut at the golden ratio.
pub fn plan_recall(candidates: Vec<Candidate>, config: &EngineConfig, now: f64) -> RecallPlan {
    let (all_results, skewed) = rank_candidates(candidates, config, now);
    let activated_len = activation_cutoff(all_results.len(), config.golden_ratio);

    RecallPlan {
        all_results,
        activated_len,
        skewed,
    }
}
