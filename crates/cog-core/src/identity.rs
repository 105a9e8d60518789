//! Coglet id derivation.
//!
//! Three flavors: content-addressed (dedup key), content-traceable but unique,
//! and plain random UUIDs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{ID_HEX_LEN, MAX_SET_ID_LEN};
use crate::error::{CoreError, Result};

/// How `add` mints ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdPolicy {
    /// Same `(set, content)` always maps to the same id.
    #[default]
    Deterministic,
    /// Content digest salted with a fresh UUID on every call.
    UniqueContent,
    /// UUID v4, unrelated to content.
    Random,
}

impl IdPolicy {
    pub fn assign(&self, set_id: &str, content: &str) -> String {
        match self {
            Self::Deterministic => deterministic_id(set_id, content),
            Self::UniqueContent => unique_content_id(set_id, content),
            Self::Random => random_id(),
        }
    }
}

/// SHA-256 of `"{set_id}:{content}"`, first 32 lowercase hex chars.
pub fn deterministic_id(set_id: &str, content: &str) -> String {
    digest_hex(&[set_id, content])
}

/// Like [`deterministic_id`] but salted with a UUID, so repeated calls differ.
pub fn unique_content_id(set_id: &str, content: &str) -> String {
    let nonce = Uuid::new_v4().to_string();
    digest_hex(&[set_id, content, &nonce])
}

pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

fn digest_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex.truncate(ID_HEX_LEN);
    hex
}

/// Set ids end up inside index filter expressions, so keep them boring.
pub fn validate_set_id(set_id: &str) -> Result<()> {
    let valid = !set_id.is_empty()
        && set_id.len() <= MAX_SET_ID_LEN
        && set_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidSetId(set_id.to_string()))
    }
}
