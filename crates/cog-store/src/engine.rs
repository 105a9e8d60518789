//! Recall and refresh orchestration.
//!
//! Holds no state of its own beyond a handle to the store. A recall reads
//! candidates, ranks them in memory, and persists only the activated prefix.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};

use cog_core::{Coglet, EngineConfig, RecallResult, now_unix, plan_recall};

use crate::coglets::CogletStore;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of a bulk refresh. `succeeded` follows input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<RefreshFailure>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.id.clone()).collect()
    }

    /// Strict view: any failed id turns the report into `PartialRefreshFailure`.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failed.is_empty() {
            return Ok(self.succeeded);
        }
        let failed = self.failed_ids();
        Err(StoreError::PartialRefreshFailure {
            succeeded: self.succeeded,
            failed,
        })
    }
}

pub struct ActivationEngine {
    store: Arc<CogletStore>,
}

impl ActivationEngine {
    pub fn new(store: Arc<CogletStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CogletStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        self.store.config()
    }

    pub async fn recall(
        &self,
        set_id: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<RecallResult> {
        self.recall_at(set_id, query, top_k, now_unix()).await
    }

    /// Recall as of `now`. Ranking and the activation write-back use the
    /// same instant, so an activated coglet's persisted weight equals the
    /// weight it was ranked by.
    pub async fn recall_at(
        &self,
        set_id: &str,
        query: &str,
        top_k: Option<usize>,
        now: f64,
    ) -> Result<RecallResult> {
        let config = self.store.config();
        let fetch = top_k.unwrap_or(config.recall_top_k).max(config.recall_top_k);

        let candidates = self.store.similarity_search(set_id, query, fetch).await?;
        let plan = plan_recall(candidates, config, now);
        for id in &plan.skewed {
            tracing::warn!("coglet {id} has a last update in the future; ranked by stored weight");
        }

        let activated = plan.activated_ids();
        tracing::debug!(
            "recall '{query}' in '{set_id}': {} candidates, {} activated",
            plan.all_results.len(),
            activated.len()
        );

        let mut refreshed: HashMap<String, Coglet> = HashMap::new();
        for (id, outcome) in self.reweigh_all(activated, now).await {
            match outcome {
                Ok(coglet) => {
                    refreshed.insert(id, coglet);
                }
                Err(e) => tracing::warn!("activation write-back failed for {id}: {e}"),
            }
        }

        let mut result = plan.into_result();
        for ranked in result
            .all_results
            .iter_mut()
            .chain(result.activated.iter_mut())
        {
            if let Some(coglet) = refreshed.get(&ranked.coglet.id) {
                ranked.coglet = coglet.clone();
            }
        }
        Ok(result)
    }

    pub async fn refresh(&self, ids: &[String]) -> RefreshReport {
        self.refresh_at(ids, now_unix()).await
    }

    /// Reweigh every id to `now` and persist it. Unknown or failing ids are
    /// reported in `failed` and left out of `succeeded`; the batch never
    /// aborts early.
    pub async fn refresh_at(&self, ids: &[String], now: f64) -> RefreshReport {
        let mut report = RefreshReport::default();
        for (id, outcome) in self.reweigh_all(dedupe(ids), now).await {
            match outcome {
                Ok(_) => report.succeeded.push(id),
                Err(e) => report.failed.push(RefreshFailure {
                    id,
                    reason: e.to_string(),
                }),
            }
        }

        if !report.is_complete() {
            tracing::warn!(
                "refresh: {} of {} ids failed",
                report.failed.len(),
                report.failed.len() + report.succeeded.len()
            );
        }
        report
    }

    async fn reweigh_all(&self, ids: Vec<String>, now: f64) -> Vec<(String, Result<Coglet>)> {
        let limit = self.store.config().refresh_concurrency.max(1);
        stream::iter(ids.into_iter().map(|id| async move {
            let outcome = self.store.reweigh(&id, now).await;
            (id, outcome)
        }))
        .buffered(limit)
        .collect()
        .await
    }
}

/// First occurrence wins; order is preserved.
fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
