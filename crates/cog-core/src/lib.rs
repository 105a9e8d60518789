//! Coglet activation engine core.
//!
//! Time-decaying weights over stored memory units, content-derived ids, and
//! golden-ratio activation over similarity-ranked candidates.
//!
//! Zero I/O: persistence and vector search live in `cog-store`.

pub mod activation;
pub mod coglet;
pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod time;
pub mod tokenizer;
pub mod weight;

pub use activation::{
    Candidate, RankedCoglet, RecallPlan, RecallResult, activation_cutoff, plan_recall,
    rank_candidates,
};
pub use coglet::{Coglet, CogletMetadata, MemorySet, MetadataPatch};
pub use config::EngineConfig;
pub use constants::{BETA, DECAY_RATE, GAMMA, GOLDEN_RATIO, INITIAL_WEIGHT};
pub use error::{CoreError, Result};
pub use identity::{IdPolicy, deterministic_id, random_id, unique_content_id, validate_set_id};
pub use time::now_unix;
pub use tokenizer::{term_counts, tokenize};
pub use weight::{
    DecayParams, LegacySignals, WeightState, WeightingStrategy, clamp_weight, coglet_weight,
    compute_weight, elapsed_hours, optimal_interval,
};
