//! REST client for an Upstash-Vector-compatible hosted index.
//!
//! The service embeds `data` server-side. Memory sets map onto a metadata
//! filter (`set_id = '<set>'`), so every payload carries its `set_id`.
//! Transient failures (transport, 429, 5xx) are retried here with
//! exponential backoff; callers see only the final outcome.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use cog_core::coglet::KEY_SET_ID;

use crate::error::IndexError;
use crate::index::{IndexHit, IndexQuery, IndexRecord, VectorIndex};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct UpstashConfig {
    pub url: String,
    pub token: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl UpstashConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

pub struct UpstashIndex {
    client: Client,
    base_url: String,
    token: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct UpsertItem<'a> {
    id: &'a str,
    data: &'a str,
    metadata: &'a Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    data: &'a str,
    top_k: usize,
    include_metadata: bool,
    include_data: bool,
    filter: String,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    id: &'a str,
    metadata: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireHit {
    id: String,
    score: f32,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct DeleteResult {
    deleted: usize,
}

impl UpstashIndex {
    pub fn new(config: UpstashConfig) -> Result<Self, IndexError> {
        if config.url.trim().is_empty() || config.token.trim().is_empty() {
            return Err(IndexError::Backend(
                "upstash index needs both a url and a token".into(),
            ));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token,
            max_retries: config.max_retries,
        })
    }

    async fn call<B, R>(&self, method: Method, path: &str, body: &B) -> Result<R, IndexError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), &url, body).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = backoff_delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "upstash {path} failed ({e}), retry {attempt}/{} in {}ms",
                        self.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<B, R>(&self, method: Method, url: &str, body: &B) -> Result<R, IndexError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .request(method, url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<R> = response
            .json()
            .await
            .map_err(|e| IndexError::Decode(e.to_string()))?;
        match (envelope.result, envelope.error) {
            (_, Some(error)) => Err(IndexError::Backend(error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(IndexError::Decode("response has no result".into())),
        }
    }
}

/// 200 ms doubled per attempt, capped at 5 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

/// Metadata filter scoping a query to one memory set.
pub fn set_filter(set_id: &str) -> String {
    format!("{KEY_SET_ID} = '{}'", set_id.replace('\'', "\\'"))
}

#[async_trait]
impl VectorIndex for UpstashIndex {
    fn name(&self) -> &'static str {
        "upstash"
    }

    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        let payloads: Vec<Map<String, Value>> = records
            .iter()
            .map(|r| {
                let mut metadata = r.metadata.clone();
                metadata.insert(KEY_SET_ID.into(), Value::from(r.namespace.as_str()));
                metadata
            })
            .collect();
        let items: Vec<UpsertItem<'_>> = records
            .iter()
            .zip(&payloads)
            .map(|(r, metadata)| UpsertItem {
                id: &r.id,
                data: &r.content,
                metadata,
            })
            .collect();

        let _: Value = self.call(Method::POST, "upsert-data", &items).await?;
        tracing::debug!("upserted {} records into upstash", records.len());
        Ok(())
    }

    async fn query(&self, query: IndexQuery) -> Result<Vec<IndexHit>, IndexError> {
        let body = QueryBody {
            data: &query.text,
            top_k: query.top_k,
            include_metadata: true,
            include_data: true,
            filter: set_filter(&query.namespace),
        };
        let hits: Vec<WireHit> = self.call(Method::POST, "query-data", &body).await?;
        Ok(hits
            .into_iter()
            .map(|h| IndexHit {
                id: h.id,
                score: h.score,
                content: h.data,
                metadata: h.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn update_metadata(
        &self,
        id: &str,
        metadata: Map<String, Value>,
    ) -> Result<(), IndexError> {
        let body = UpdateBody {
            id,
            metadata: &metadata,
        };
        let _: Value = self.call(Method::POST, "update", &body).await?;
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result: DeleteResult = self.call(Method::DELETE, "delete", ids).await?;
        Ok(result.deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(200));
        assert_eq!(backoff_delay(1), Duration::from_millis(400));
        assert_eq!(backoff_delay(2), Duration::from_millis(800));
        assert_eq!(backoff_delay(10), Duration::from_millis(5_000));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn test_set_filter() {
        assert_eq!(set_filter("demo"), "set_id = 'demo'");
    }

    #[test]
    fn test_requires_credentials() {
        assert!(UpstashIndex::new(UpstashConfig::new("", "token")).is_err());
        assert!(UpstashIndex::new(UpstashConfig::new("http://localhost", " ")).is_err());
        assert!(UpstashIndex::new(UpstashConfig::new("http://localhost/", "t")).is_ok());
    }

    #[test]
    fn test_transient_classification() {
        let throttled = IndexError::Status {
            status: 429,
            body: String::new(),
        };
        let unavailable = IndexError::Status {
            status: 503,
            body: String::new(),
        };
        let unauthorized = IndexError::Status {
            status: 401,
            body: String::new(),
        };
        assert!(throttled.is_transient());
        assert!(unavailable.is_transient());
        assert!(!unauthorized.is_transient());
        assert!(!IndexError::Decode("x".into()).is_transient());
    }
}
