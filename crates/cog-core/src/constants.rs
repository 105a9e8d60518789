/// Default activation cutoff, 1/φ rounded to three places.
pub const GOLDEN_RATIO: f64 = 0.618;

/// Reinstatement factor: share of the previous weight carried into the next step.
pub const BETA: f64 = 0.85;

/// Reinforcement gain per elapsed hour.
pub const GAMMA: f64 = 0.3;

/// Exponential decay rate per hour.
pub const DECAY_RATE: f64 = 0.05;

/// Weight assigned to a freshly added coglet.
pub const INITIAL_WEIGHT: f64 = 0.5;

/// Upper bound of the weight domain.
pub const WEIGHT_CEILING: f64 = 1.0;

/// Default lower bound of the weight domain.
pub const WEIGHT_FLOOR: f64 = 0.0;

/// Minimum number of candidates fetched per recall.
pub const RECALL_TOP_K: usize = 10;

/// Concurrency cap for bulk refresh fan-out.
pub const REFRESH_CONCURRENCY: usize = 8;

/// Clock skew tolerated before a backwards timestamp is rejected.
pub const TIME_ORDER_TOLERANCE_SECS: f64 = 1.0;

pub const SECS_PER_HOUR: f64 = 3600.0;

/// Hex length of content-addressed coglet ids.
pub const ID_HEX_LEN: usize = 32;

/// Maximum length of a memory set id.
pub const MAX_SET_ID_LEN: usize = 128;

/// Legacy blend shares: connections, accesses, importance, emotion, recency.
pub const LEGACY_SHARES: [f64; 5] = [0.30, 0.20, 0.15, 0.15, 0.20];

/// Half-saturation point for connection counts in the legacy blend.
pub const LEGACY_CONNECTION_HALF: f64 = 5.0;

/// Half-saturation point for access counts in the legacy blend.
pub const LEGACY_ACCESS_HALF: f64 = 10.0;
