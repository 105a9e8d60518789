//! Typed coglet records.
//!
//! Metadata has a fixed core (weight, timestamps, access count) plus an open
//! extension map for caller fields. The core never leaks into the extension
//! map, and the extension map can never overwrite the core.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::TIME_ORDER_TOLERANCE_SECS;
use crate::error::{CoreError, Result};
use crate::weight::{LegacySignals, WeightState, clamp_weight};

pub const KEY_WEIGHT: &str = "weight";
pub const KEY_LAST_UPDATE_TIME: &str = "last_update_time";
pub const KEY_ACCESS_COUNT: &str = "access_count";
pub const KEY_CREATED_AT: &str = "created_at";
pub const KEY_SET_ID: &str = "set_id";

/// Keys owned by the engine; stripped from caller-supplied extension maps.
pub const RESERVED_KEYS: [&str; 5] = [
    KEY_WEIGHT,
    KEY_LAST_UPDATE_TIME,
    KEY_ACCESS_COUNT,
    KEY_CREATED_AT,
    KEY_SET_ID,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CogletMetadata {
    pub weight: f64,
    /// Unix seconds of the last weight write. Never moves backwards.
    pub last_update_time: f64,
    pub access_count: u32,
    pub created_at: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CogletMetadata {
    /// Metadata for a coglet created at `now` with the given initial weight.
    pub fn fresh(initial_weight: f64, floor: f64, now: f64, extra: Map<String, Value>) -> Self {
        Self {
            weight: clamp_weight(initial_weight, floor),
            last_update_time: now,
            access_count: 0,
            created_at: now,
            extra: strip_reserved(extra),
        }
    }

    /// Inputs for a weighting strategy. Legacy signals come from the
    /// extension fields `connections`, `importance` and `emotion`.
    pub fn weight_state(&self) -> WeightState {
        let number = |key: &str| self.extra.get(key).and_then(Value::as_f64);
        WeightState {
            weight: Some(self.weight),
            last_time: Some(self.last_update_time),
            signals: LegacySignals {
                connections: number("connections")
                    .map(|n| n.clamp(0.0, f64::from(u32::MAX)) as u32)
                    .unwrap_or(0),
                access_count: self.access_count,
                importance: number("importance").unwrap_or(0.0),
                emotion: number("emotion").unwrap_or(0.0),
            },
        }
    }

    /// Merge caller fields into the extension map. `null` removes a key.
    pub fn merge_extra(&mut self, extra: Map<String, Value>) {
        for (key, value) in strip_reserved(extra) {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }

    /// Apply a patch. Weight is clamped into `[floor, 1]`; a timestamp that
    /// moves backwards beyond tolerance is rejected and nothing is changed.
    pub fn apply(&mut self, patch: MetadataPatch, floor: f64) -> Result<()> {
        if let Some(ts) = patch.last_update_time
            && !(ts >= self.last_update_time - TIME_ORDER_TOLERANCE_SECS)
        {
            return Err(CoreError::InvalidTimeOrder {
                last: self.last_update_time,
                current: ts,
            });
        }

        if let Some(weight) = patch.weight {
            self.weight = clamp_weight(weight, floor);
        }
        if let Some(ts) = patch.last_update_time {
            self.last_update_time = ts.max(self.last_update_time);
        }
        self.merge_extra(patch.extra);
        Ok(())
    }

    /// Flat JSON object shipped to the vector index alongside the content.
    pub fn to_payload(&self, set_id: &str) -> Map<String, Value> {
        let mut payload = self.extra.clone();
        payload.insert(KEY_SET_ID.into(), Value::from(set_id));
        payload.insert(KEY_WEIGHT.into(), Value::from(self.weight));
        payload.insert(KEY_LAST_UPDATE_TIME.into(), Value::from(self.last_update_time));
        payload.insert(KEY_ACCESS_COUNT.into(), Value::from(self.access_count));
        payload.insert(KEY_CREATED_AT.into(), Value::from(self.created_at));
        payload
    }
}

/// Remove engine-owned keys from a caller map.
pub fn strip_reserved(mut extra: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        extra.remove(key);
    }
    extra
}

/// Partial metadata update. Core fields change only when explicitly present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub weight: Option<f64>,
    pub last_update_time: Option<f64>,
    pub extra: Map<String, Value>,
}

impl MetadataPatch {
    /// Parse a JSON object. `weight` and `last_update_time` must be numbers;
    /// other reserved keys are rejected.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(CoreError::InvalidMetadata(
                "patch must be a JSON object".into(),
            ));
        };

        let weight = take_number(&mut map, KEY_WEIGHT)?;
        let last_update_time = take_number(&mut map, KEY_LAST_UPDATE_TIME)?;

        for key in [KEY_ACCESS_COUNT, KEY_CREATED_AT, KEY_SET_ID] {
            if map.contains_key(key) {
                return Err(CoreError::InvalidMetadata(format!(
                    "'{key}' is managed by the engine"
                )));
            }
        }

        Ok(Self {
            weight,
            last_update_time,
            extra: map,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.weight.is_none() && self.last_update_time.is_none() && self.extra.is_empty()
    }
}

fn take_number(map: &mut Map<String, Value>, key: &str) -> Result<Option<f64>> {
    match map.remove(key) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| CoreError::InvalidMetadata(format!("'{key}' must be a finite number"))),
    }
}

/// A stored semantic unit. The embedding lives in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coglet {
    pub id: String,
    pub set_id: String,
    pub content: String,
    pub metadata: CogletMetadata,
}

impl Coglet {
    pub fn weight(&self) -> f64 {
        self.metadata.weight
    }

    pub fn last_update_time(&self) -> f64 {
        self.metadata.last_update_time
    }
}

/// Namespace grouping coglets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySet {
    pub set_id: String,
    pub description: String,
    pub created_at: f64,
    pub count: usize,
}
