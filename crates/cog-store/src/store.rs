use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Map, Value};

use cog_core::{Coglet, CogletMetadata, MemorySet};

use crate::error::{Result, StoreError};
use crate::schema;

const COGLET_COLUMNS: &str =
    "id, set_id, content, weight, last_update, access_count, created_at, extra";

/// Local bookkeeping for sets and coglet metadata. Synchronous; callers
/// serialize access.
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        schema::initialize(&conn)?;
        schema::check_version(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Sets ---

    pub fn insert_set(&self, set_id: &str, description: &str, created_at: f64) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO memory_sets (set_id, description, created_at) VALUES (?1, ?2, ?3)",
            params![set_id, description, created_at],
        )?;
        if inserted == 0 {
            return Err(StoreError::DuplicateSet(set_id.to_string()));
        }
        Ok(())
    }

    pub fn set_exists(&self, set_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM memory_sets WHERE set_id = ?1",
                [set_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_set(&self, set_id: &str) -> Result<Option<MemorySet>> {
        let set = self
            .conn
            .query_row(
                "SELECT s.set_id, s.description, s.created_at,
                        (SELECT COUNT(*) FROM coglets c WHERE c.set_id = s.set_id)
                 FROM memory_sets s WHERE s.set_id = ?1",
                [set_id],
                set_from_row,
            )
            .optional()?;
        Ok(set)
    }

    pub fn list_sets(&self) -> Result<Vec<MemorySet>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.set_id, s.description, s.created_at,
                    (SELECT COUNT(*) FROM coglets c WHERE c.set_id = s.set_id)
             FROM memory_sets s ORDER BY s.set_id",
        )?;
        let sets = stmt
            .query_map([], set_from_row)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(sets)
    }

    /// Member ids in insertion order.
    pub fn member_ids(&self, set_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM coglets WHERE set_id = ?1 ORDER BY rowid")?;
        let ids = stmt
            .query_map([set_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(ids)
    }

    /// Drop the set row; member coglets go with it via the foreign key.
    /// Returns the member ids removed, or `None` if the set did not exist.
    pub fn delete_set(&self, set_id: &str) -> Result<Option<Vec<String>>> {
        let tx = self.conn.unchecked_transaction()?;
        let members = self.member_ids(set_id)?;
        let deleted = tx.execute("DELETE FROM memory_sets WHERE set_id = ?1", [set_id])?;
        tx.commit()?;
        Ok((deleted > 0).then_some(members))
    }

    /// Drop every member coglet but keep the set. Returns the removed ids.
    pub fn clear_set(&self, set_id: &str) -> Result<Vec<String>> {
        let tx = self.conn.unchecked_transaction()?;
        let members = self.member_ids(set_id)?;
        tx.execute("DELETE FROM coglets WHERE set_id = ?1", [set_id])?;
        tx.commit()?;
        Ok(members)
    }

    // --- Coglets ---

    pub fn insert_coglet(&self, coglet: &Coglet) -> Result<()> {
        let m = &coglet.metadata;
        self.conn.execute(
            "INSERT INTO coglets (id, set_id, content, weight, last_update, access_count, created_at, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                coglet.id,
                coglet.set_id,
                coglet.content,
                m.weight,
                m.last_update_time,
                m.access_count,
                m.created_at,
                extra_to_json(&m.extra)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_coglet(&self, id: &str) -> Result<Option<Coglet>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COGLET_COLUMNS} FROM coglets WHERE id = ?1"),
                [id],
                CogletRow::from_row,
            )
            .optional()?;
        row.map(CogletRow::into_coglet).transpose()
    }

    /// Unconditional metadata overwrite. Returns false if the id is unknown.
    pub fn write_metadata(&self, id: &str, metadata: &CogletMetadata) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE coglets SET weight = ?2, last_update = ?3, access_count = ?4, extra = ?5
             WHERE id = ?1",
            params![
                id,
                metadata.weight,
                metadata.last_update_time,
                metadata.access_count,
                extra_to_json(&metadata.extra)?,
            ],
        )?;
        Ok(updated > 0)
    }

    /// Overwrite metadata only if `last_update` still equals `expected`.
    /// Returns false when another writer got there first.
    pub fn compare_and_set_metadata(
        &self,
        id: &str,
        metadata: &CogletMetadata,
        expected_last_update: f64,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE coglets SET weight = ?2, last_update = ?3, access_count = ?4, extra = ?5
             WHERE id = ?1 AND last_update = ?6",
            params![
                id,
                metadata.weight,
                metadata.last_update_time,
                metadata.access_count,
                extra_to_json(&metadata.extra)?,
                expected_last_update,
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_coglet(&self, id: &str) -> Result<bool> {
        let deleted = self.conn.execute("DELETE FROM coglets WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn delete_coglets(&self, ids: &[String]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM coglets WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }
}

fn set_from_row(row: &Row<'_>) -> rusqlite::Result<MemorySet> {
    let count: i64 = row.get(3)?;
    Ok(MemorySet {
        set_id: row.get(0)?,
        description: row.get(1)?,
        created_at: row.get(2)?,
        count: usize::try_from(count).unwrap_or(0),
    })
}

struct CogletRow {
    id: String,
    set_id: String,
    content: String,
    weight: f64,
    last_update: f64,
    access_count: i64,
    created_at: f64,
    extra: String,
}

impl CogletRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            set_id: row.get(1)?,
            content: row.get(2)?,
            weight: row.get(3)?,
            last_update: row.get(4)?,
            access_count: row.get(5)?,
            created_at: row.get(6)?,
            extra: row.get(7)?,
        })
    }

    fn into_coglet(self) -> Result<Coglet> {
        let extra: Map<String, Value> = serde_json::from_str(&self.extra).map_err(|e| {
            StoreError::InvalidData(format!("bad metadata for coglet {}: {e}", self.id))
        })?;
        Ok(Coglet {
            id: self.id,
            set_id: self.set_id,
            content: self.content,
            metadata: CogletMetadata {
                weight: self.weight,
                last_update_time: self.last_update,
                access_count: u32::try_from(self.access_count.max(0)).unwrap_or(u32::MAX),
                created_at: self.created_at,
                extra,
            },
        })
    }
}

fn extra_to_json(extra: &Map<String, Value>) -> Result<String> {
    serde_json::to_string(extra).map_err(|e| StoreError::InvalidData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_set() -> MetadataStore {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_set("demo", "test set", 100.0).unwrap();
        store
    }

    fn coglet(id: &str, set_id: &str) -> Coglet {
        let extra = json!({"source": "unit"}).as_object().cloned().unwrap();
        Coglet {
            id: id.into(),
            set_id: set_id.into(),
            content: format!("content of {id}"),
            metadata: CogletMetadata::fresh(0.5, 0.0, 1000.0, extra),
        }
    }

    #[test]
    fn test_open_rejects_newer_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("coglets.db");
        drop(MetadataStore::open(&path).unwrap());

        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE metadata SET value = '2' WHERE key = 'schema_version'",
            [],
        )
        .unwrap();
        drop(conn);

        assert!(matches!(
            MetadataStore::open(&path),
            Err(StoreError::InvalidData(_))
        ));
    }

    #[test]
    fn test_duplicate_set_rejected() {
        let store = store_with_set();
        let err = store.insert_set("demo", "again", 200.0).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSet(ref s) if s == "demo"));
    }

    #[test]
    fn test_set_info_counts_members() {
        let store = store_with_set();
        store.insert_coglet(&coglet("a", "demo")).unwrap();
        store.insert_coglet(&coglet("b", "demo")).unwrap();

        let info = store.get_set("demo").unwrap().unwrap();
        assert_eq!(info.count, 2);
        assert_eq!(info.description, "test set");
        assert_eq!(info.created_at, 100.0);
        assert!(store.get_set("nope").unwrap().is_none());
        assert_eq!(store.member_ids("demo").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_list_sets_sorted() {
        let store = store_with_set();
        store.insert_set("alpha", "", 1.0).unwrap();
        let ids: Vec<String> = store
            .list_sets()
            .unwrap()
            .into_iter()
            .map(|s| s.set_id)
            .collect();
        assert_eq!(ids, vec!["alpha", "demo"]);
    }

    #[test]
    fn test_coglet_roundtrip() {
        let store = store_with_set();
        let c = coglet("a", "demo");
        store.insert_coglet(&c).unwrap();
        assert_eq!(store.get_coglet("a").unwrap(), Some(c));
        assert_eq!(store.get_coglet("zzz").unwrap(), None);
    }

    #[test]
    fn test_compare_and_set() {
        let store = store_with_set();
        let mut c = coglet("a", "demo");
        store.insert_coglet(&c).unwrap();

        c.metadata.weight = 0.9;
        c.metadata.last_update_time = 2000.0;
        assert!(!store.compare_and_set_metadata("a", &c.metadata, 999.0).unwrap());
        assert!(store.compare_and_set_metadata("a", &c.metadata, 1000.0).unwrap());

        let stored = store.get_coglet("a").unwrap().unwrap();
        assert_eq!(stored.metadata.weight, 0.9);
        assert_eq!(stored.metadata.last_update_time, 2000.0);
    }

    #[test]
    fn test_delete_set_cascades_and_clear_keeps_set() {
        let store = store_with_set();
        store.insert_coglet(&coglet("a", "demo")).unwrap();
        store.insert_set("other", "", 1.0).unwrap();
        store.insert_coglet(&coglet("b", "other")).unwrap();

        assert_eq!(store.clear_set("other").unwrap(), vec!["b"]);
        assert!(store.set_exists("other").unwrap());

        assert_eq!(store.delete_set("demo").unwrap(), Some(vec!["a".to_string()]));
        assert_eq!(store.delete_set("demo").unwrap(), None);
        assert_eq!(store.get_coglet("a").unwrap(), None);
    }

    #[test]
    fn test_delete_coglets() {
        let store = store_with_set();
        store.insert_coglet(&coglet("a", "demo")).unwrap();
        store.insert_coglet(&coglet("b", "demo")).unwrap();
        assert!(store.delete_coglet("a").unwrap());
        assert!(!store.delete_coglet("a").unwrap());
        assert_eq!(
            store
                .delete_coglets(&["b".to_string(), "missing".to_string()])
                .unwrap(),
            1
        );
    }
}
