//! Coglet CRUD over local metadata plus a vector index.
//!
//! SQLite is authoritative for weights and timestamps; the index holds
//! embeddings and a mirror of the metadata payload. The metadata mutex guards
//! short synchronous sections only and is always released before awaiting
//! the index.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use cog_core::{
    Candidate, Coglet, CogletMetadata, EngineConfig, MemorySet, MetadataPatch, now_unix,
    validate_set_id,
};

use crate::error::{Result, StoreError};
use crate::index::{IndexQuery, IndexRecord, VectorIndex};
use crate::store::MetadataStore;

/// Compare-and-set attempts before a reweigh gives up with `Conflict`.
pub const CAS_ATTEMPTS: usize = 3;

/// Input to [`CogletStore::add_batch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCoglet {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewCoglet {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Map::new(),
        }
    }
}

pub struct CogletStore {
    meta: Mutex<MetadataStore>,
    index: Arc<dyn VectorIndex>,
    config: EngineConfig,
}

impl CogletStore {
    pub fn new(
        meta: MetadataStore,
        index: Arc<dyn VectorIndex>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            meta: Mutex::new(meta),
            index,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    fn meta(&self) -> MutexGuard<'_, MetadataStore> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_set(meta: &MetadataStore, set_id: &str) -> Result<()> {
        if meta.set_exists(set_id)? {
            Ok(())
        } else {
            Err(StoreError::UnknownSet(set_id.to_string()))
        }
    }

    // --- Sets ---

    /// Create an empty namespace. Re-creating an existing set is an error.
    pub fn create_set(&self, set_id: &str, description: Option<&str>) -> Result<bool> {
        validate_set_id(set_id)?;
        self.meta()
            .insert_set(set_id, description.unwrap_or_default(), now_unix())?;
        tracing::info!("created memory set '{set_id}'");
        Ok(true)
    }

    pub fn get_set_info(&self, set_id: &str) -> Result<MemorySet> {
        self.meta()
            .get_set(set_id)?
            .ok_or_else(|| StoreError::UnknownSet(set_id.to_string()))
    }

    pub fn list_sets(&self) -> Result<Vec<MemorySet>> {
        self.meta().list_sets()
    }

    /// Delete a set and every coglet in it, index first. Returns how many
    /// coglets went with it.
    pub async fn delete_set(&self, set_id: &str) -> Result<usize> {
        let ids = {
            let meta = self.meta();
            Self::require_set(&meta, set_id)?;
            meta.member_ids(set_id)?
        };

        if !ids.is_empty() {
            self.index.delete(&ids).await?;
        }
        let removed = self
            .meta()
            .delete_set(set_id)?
            .ok_or_else(|| StoreError::UnknownSet(set_id.to_string()))?;
        self.delete_stragglers(set_id, &ids, &removed).await;
        tracing::info!("deleted memory set '{set_id}' with {} coglets", removed.len());
        Ok(removed.len())
    }

    /// Remove every coglet from a set but keep the set itself.
    pub async fn clear_set(&self, set_id: &str) -> Result<usize> {
        let ids = {
            let meta = self.meta();
            Self::require_set(&meta, set_id)?;
            meta.member_ids(set_id)?
        };
        if ids.is_empty() {
            return Ok(0);
        }

        self.index.delete(&ids).await?;
        let removed = self.meta().clear_set(set_id)?;
        self.delete_stragglers(set_id, &ids, &removed).await;
        tracing::info!("cleared {} coglets from memory set '{set_id}'", removed.len());
        Ok(removed.len())
    }

    /// Members added while the index delete was in flight were removed
    /// locally but still have vectors.
    async fn delete_stragglers(&self, set_id: &str, deleted: &[String], removed: &[String]) {
        let known: HashSet<&str> = deleted.iter().map(String::as_str).collect();
        let stragglers: Vec<String> = removed
            .iter()
            .filter(|id| !known.contains(id.as_str()))
            .cloned()
            .collect();
        if stragglers.is_empty() {
            return;
        }
        tracing::debug!(
            "removing {} vectors added to '{set_id}' during its deletion",
            stragglers.len()
        );
        if let Err(e) = self.index.delete(&stragglers).await {
            tracing::warn!("index delete of late members of '{set_id}' failed: {e}");
        }
    }

    // --- Coglets ---

    /// Add one coglet. An id that already exists keeps its weight and
    /// timestamp; the caller's metadata is merged in.
    pub async fn add(
        &self,
        set_id: &str,
        content: &str,
        metadata: Map<String, Value>,
    ) -> Result<String> {
        let mut ids = self
            .add_batch(
                set_id,
                vec![NewCoglet {
                    content: content.to_string(),
                    metadata,
                }],
            )
            .await?;
        ids.pop()
            .ok_or_else(|| StoreError::InvalidData("add produced no id".into()))
    }

    /// Add many coglets with one index round-trip. Returns ids in input order.
    pub async fn add_batch(&self, set_id: &str, items: Vec<NewCoglet>) -> Result<Vec<String>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let now = now_unix();

        let (ids, staged, fresh, previous) = {
            let meta = self.meta();
            Self::require_set(&meta, set_id)?;

            let mut ids = Vec::with_capacity(items.len());
            let mut staged: Vec<Coglet> = Vec::new();
            let mut fresh: HashSet<String> = HashSet::new();
            let mut previous: Vec<(String, CogletMetadata)> = Vec::new();

            for item in items {
                let id = self.config.id_policy.assign(set_id, &item.content);
                ids.push(id.clone());

                if let Some(pending) = staged.iter_mut().find(|c| c.id == id) {
                    pending.metadata.merge_extra(item.metadata);
                    continue;
                }
                let coglet = match meta.get_coglet(&id)? {
                    Some(mut existing) => {
                        tracing::debug!("coglet {id} already exists, merging metadata");
                        previous.push((id, existing.metadata.clone()));
                        existing.metadata.merge_extra(item.metadata);
                        existing
                    }
                    None => {
                        fresh.insert(id.clone());
                        Coglet {
                            id,
                            set_id: set_id.to_string(),
                            content: item.content,
                            metadata: CogletMetadata::fresh(
                                self.config.initial_weight,
                                self.config.weight_floor,
                                now,
                                item.metadata,
                            ),
                        }
                    }
                };
                staged.push(coglet);
            }

            let tx = meta.conn().unchecked_transaction()?;
            for coglet in &staged {
                if fresh.contains(&coglet.id) {
                    meta.insert_coglet(coglet)?;
                } else {
                    meta.write_metadata(&coglet.id, &coglet.metadata)?;
                }
            }
            tx.commit()?;
            (ids, staged, fresh, previous)
        };

        let records = staged.iter().map(index_record).collect();
        if let Err(e) = self.index.upsert(records).await {
            tracing::warn!(
                "index upsert failed for set '{set_id}', rolling back {} new and {} merged coglets: {e}",
                fresh.len(),
                previous.len()
            );
            self.roll_back_add(fresh, previous)?;
            return Err(e.into());
        }

        tracing::info!(
            "added {} coglets to '{set_id}' ({} new)",
            ids.len(),
            fresh.len()
        );
        Ok(ids)
    }

    /// Undo the local half of a failed `add_batch`: drop inserted rows and
    /// restore the metadata that merges overwrote.
    fn roll_back_add(
        &self,
        fresh: HashSet<String>,
        previous: Vec<(String, CogletMetadata)>,
    ) -> Result<()> {
        let meta = self.meta();
        let tx = meta.conn().unchecked_transaction()?;
        for id in &fresh {
            meta.delete_coglet(id)?;
        }
        for (id, metadata) in &previous {
            meta.write_metadata(id, metadata)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Coglet> {
        self.meta()
            .get_coglet(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Merge a patch into stored metadata. Weight and timestamp change only
    /// when the patch names them.
    pub async fn update(&self, id: &str, patch: MetadataPatch) -> Result<bool> {
        let coglet = {
            let meta = self.meta();
            let mut coglet = meta
                .get_coglet(id)?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if patch.is_empty() {
                return Ok(true);
            }
            coglet.metadata.apply(patch, self.config.weight_floor)?;
            meta.write_metadata(id, &coglet.metadata)?;
            coglet
        };

        self.sync_index(&coglet).await;
        tracing::debug!("updated coglet {id}");
        Ok(true)
    }

    /// Returns false when the id is unknown.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if self.meta().get_coglet(id)?.is_none() {
            return Ok(false);
        }
        self.index.delete(&[id.to_string()]).await?;
        let removed = self.meta().delete_coglet(id)?;
        tracing::info!("deleted coglet {id}");
        Ok(removed)
    }

    /// Returns how many of `ids` existed locally.
    pub async fn delete_batch(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.index.delete(ids).await?;
        let removed = self.meta().delete_coglets(ids)?;
        tracing::info!("deleted {removed} of {} coglets", ids.len());
        Ok(removed)
    }

    /// Nearest neighbors of `query` inside `set_id`, joined with stored
    /// metadata. Index failures surface as `RetrievalUnavailable`.
    pub async fn similarity_search(
        &self,
        set_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Candidate>> {
        Self::require_set(&self.meta(), set_id)?;

        let hits = self
            .index
            .query(IndexQuery {
                text: query.to_string(),
                namespace: set_id.to_string(),
                top_k,
            })
            .await
            .map_err(StoreError::RetrievalUnavailable)?;

        let meta = self.meta();
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            match meta.get_coglet(&hit.id)? {
                Some(coglet) if coglet.set_id == set_id => candidates.push(Candidate {
                    coglet,
                    score: hit.score,
                }),
                _ => tracing::warn!("index hit {} has no coglet in '{set_id}', skipping", hit.id),
            }
        }
        Ok(candidates)
    }

    /// Advance one coglet's weight to `now` and persist it.
    ///
    /// Optimistic: the write only lands if `last_update` is unchanged since
    /// the read, retried up to [`CAS_ATTEMPTS`] times. The index mirror is
    /// updated afterwards; a failure there is logged and does not undo the
    /// local write.
    pub async fn reweigh(&self, id: &str, now: f64) -> Result<Coglet> {
        let coglet = self.reweigh_local(id, now)?;
        self.sync_index(&coglet).await;
        Ok(coglet)
    }

    fn reweigh_local(&self, id: &str, now: f64) -> Result<Coglet> {
        let params = self.config.decay_params();
        for attempt in 1..=CAS_ATTEMPTS {
            let meta = self.meta();
            let tx = meta.conn().unchecked_transaction()?;
            let mut coglet = meta
                .get_coglet(id)?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            let expected = coglet.metadata.last_update_time;
            let weight = self
                .config
                .strategy
                .weigh(&coglet.metadata.weight_state(), now, &params)?;
            coglet.metadata.weight = weight;
            coglet.metadata.last_update_time = now.max(expected);
            coglet.metadata.access_count = coglet.metadata.access_count.saturating_add(1);

            if meta.compare_and_set_metadata(id, &coglet.metadata, expected)? {
                tx.commit()?;
                tracing::debug!("reweighed {id}: weight={weight:.4}");
                return Ok(coglet);
            }
            tracing::debug!("reweigh of {id} lost a race (attempt {attempt}/{CAS_ATTEMPTS})");
        }
        Err(StoreError::Conflict(id.to_string()))
    }

    async fn sync_index(&self, coglet: &Coglet) {
        let payload = coglet.metadata.to_payload(&coglet.set_id);
        if let Err(e) = self.index.update_metadata(&coglet.id, payload).await {
            tracing::warn!("index metadata sync failed for {}: {e}", coglet.id);
        }
    }
}

fn index_record(coglet: &Coglet) -> IndexRecord {
    IndexRecord {
        id: coglet.id.clone(),
        namespace: coglet.set_id.clone(),
        content: coglet.content.clone(),
        metadata: coglet.metadata.to_payload(&coglet.set_id),
    }
}
