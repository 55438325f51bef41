//! The live data store as seen by the engine.
//!
//! The engine never queries the live store beyond [`LiveStore`]. The
//! version-id to live-id indirection is a lookup with an explicit
//! "not found" result.

use crate::error::{Error, Result};
use crate::models::{EntityKind, Fields, LiveId, VersionId};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

pub trait LiveStore: Send + Sync {
    fn get_record(&self, kind: EntityKind, live_id: LiveId) -> Result<Option<Fields>>;

    fn upsert_record(&self, kind: EntityKind, live_id: LiveId, fields: &Fields) -> Result<()>;

    /// Creates a record and registers its identity mapping.
    fn insert_record(&self, kind: EntityKind, vp_id: &VersionId, fields: &Fields) -> Result<LiveId>;

    /// Removes a record together with its identity mapping.
    fn delete_record(&self, kind: EntityKind, live_id: LiveId) -> Result<()>;

    fn map_version_id_to_live_id(&self, kind: EntityKind, vp_id: &VersionId)
        -> Result<Option<LiveId>>;
}

/// Comparable copy of a [`MemoryLiveStore`]'s contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveDump {
    pub records: BTreeMap<(EntityKind, LiveId), Fields>,
    pub mapping: BTreeMap<(EntityKind, VersionId), LiveId>,
}

#[derive(Default)]
struct MemoryState {
    dump: LiveDump,
    next_id: u64,
}

#[derive(Default)]
pub struct MemoryLiveStore {
    state: Mutex<MemoryState>,
    fail_writes: Mutex<bool>,
}

impl MemoryLiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dump(&self) -> LiveDump {
        self.lock().dump.clone()
    }

    /// Makes every subsequent write fail; used to exercise resync failures.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.lock() {
            *flag = fail;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self) -> Result<()> {
        let failing = self.fail_writes.lock().map(|f| *f).unwrap_or(false);
        if failing {
            return Err(Error::InvalidOperation("live store is read-only".to_string()));
        }
        Ok(())
    }
}

impl LiveStore for MemoryLiveStore {
    fn get_record(&self, kind: EntityKind, live_id: LiveId) -> Result<Option<Fields>> {
        Ok(self.lock().dump.records.get(&(kind, live_id)).cloned())
    }

    fn upsert_record(&self, kind: EntityKind, live_id: LiveId, fields: &Fields) -> Result<()> {
        self.check_writable()?;
        self.lock()
            .dump
            .records
            .insert((kind, live_id), fields.clone());
        Ok(())
    }

    fn insert_record(
        &self,
        kind: EntityKind,
        vp_id: &VersionId,
        fields: &Fields,
    ) -> Result<LiveId> {
        self.check_writable()?;
        let mut state = self.lock();
        state.next_id += 1;
        let live_id = LiveId(state.next_id);
        state.dump.records.insert((kind, live_id), fields.clone());
        state.dump.mapping.insert((kind, vp_id.clone()), live_id);
        Ok(live_id)
    }

    fn delete_record(&self, kind: EntityKind, live_id: LiveId) -> Result<()> {
        self.check_writable()?;
        let mut state = self.lock();
        state.dump.records.remove(&(kind, live_id));
        state
            .dump
            .mapping
            .retain(|(k, _), mapped| !(*k == kind && *mapped == live_id));
        Ok(())
    }

    fn map_version_id_to_live_id(
        &self,
        kind: EntityKind,
        vp_id: &VersionId,
    ) -> Result<Option<LiveId>> {
        Ok(self.lock().dump.mapping.get(&(kind, vp_id.clone())).copied())
    }
}

/// Generic mirror of the live store in SQLite: one `records` table keyed by
/// kind and live id, plus the `vp_id` indirection table.
pub struct SqliteLiveStore {
    conn: Mutex<Connection>,
}

impl SqliteLiveStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::initialize(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                live_id INTEGER NOT NULL,
                fields TEXT NOT NULL,
                PRIMARY KEY (kind, live_id)
            );

            CREATE TABLE IF NOT EXISTS vp_id (
                kind TEXT NOT NULL,
                vp_id TEXT NOT NULL,
                live_id INTEGER NOT NULL,
                PRIMARY KEY (kind, vp_id)
            );

            CREATE INDEX IF NOT EXISTS idx_vp_id_live ON vp_id(kind, live_id);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fields_from_json(kind: EntityKind, live_id: LiveId, json: &str) -> Result<Fields> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
        let mut fields = Fields::new();
        for (name, value) in raw {
            if let Some(v) = crate::models::Value::from_json(&name, value).map_err(|e| {
                Error::CorruptData {
                    location: format!("live {}/{}", kind, live_id),
                    reason: e.to_string(),
                }
            })? {
                fields.insert(name, v);
            }
        }
        Ok(fields)
    }
}

impl LiveStore for SqliteLiveStore {
    fn get_record(&self, kind: EntityKind, live_id: LiveId) -> Result<Option<Fields>> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT fields FROM records WHERE kind = ?1 AND live_id = ?2",
                params![kind.as_str(), live_id.0 as i64],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| Self::fields_from_json(kind, live_id, &j))
            .transpose()
    }

    fn upsert_record(&self, kind: EntityKind, live_id: LiveId, fields: &Fields) -> Result<()> {
        let json = serde_json::to_string(fields)?;
        self.conn().execute(
            "INSERT INTO records (kind, live_id, fields) VALUES (?1, ?2, ?3)
             ON CONFLICT(kind, live_id) DO UPDATE SET fields = excluded.fields",
            params![kind.as_str(), live_id.0 as i64, json],
        )?;
        Ok(())
    }

    fn insert_record(
        &self,
        kind: EntityKind,
        vp_id: &VersionId,
        fields: &Fields,
    ) -> Result<LiveId> {
        let json = serde_json::to_string(fields)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(live_id), 0) + 1 FROM records WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO records (kind, live_id, fields) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), next, json],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO vp_id (kind, vp_id, live_id) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), vp_id.as_str(), next],
        )?;
        tx.commit()?;

        Ok(LiveId(next as u64))
    }

    fn delete_record(&self, kind: EntityKind, live_id: LiveId) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM records WHERE kind = ?1 AND live_id = ?2",
            params![kind.as_str(), live_id.0 as i64],
        )?;
        tx.execute(
            "DELETE FROM vp_id WHERE kind = ?1 AND live_id = ?2",
            params![kind.as_str(), live_id.0 as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn map_version_id_to_live_id(
        &self,
        kind: EntityKind,
        vp_id: &VersionId,
    ) -> Result<Option<LiveId>> {
        let id: Option<i64> = self
            .conn()
            .query_row(
                "SELECT live_id FROM vp_id WHERE kind = ?1 AND vp_id = ?2",
                params![kind.as_str(), vp_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(id.map(|i| LiveId(i as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    fn fields(title: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("post_title".to_string(), Value::from(title));
        fields
    }

    #[test]
    fn test_memory_insert_and_delete_restore_dump() {
        let live = MemoryLiveStore::new();
        let before = live.dump();
        let id = VersionId::generate();

        let live_id = live.insert_record(EntityKind::Post, &id, &fields("A")).unwrap();
        assert_eq!(
            live.map_version_id_to_live_id(EntityKind::Post, &id).unwrap(),
            Some(live_id)
        );

        live.delete_record(EntityKind::Post, live_id).unwrap();
        assert_eq!(live.dump(), before);
    }

    #[test]
    fn test_memory_write_failure() {
        let live = MemoryLiveStore::new();
        live.set_fail_writes(true);
        assert!(live
            .upsert_record(EntityKind::Post, LiveId(1), &fields("A"))
            .is_err());
    }

    #[test]
    fn test_sqlite_round_trip() {
        let live = SqliteLiveStore::in_memory().unwrap();
        let id = VersionId::generate();

        let live_id = live.insert_record(EntityKind::Post, &id, &fields("A")).unwrap();
        live.upsert_record(EntityKind::Post, live_id, &fields("B"))
            .unwrap();

        assert_eq!(
            live.get_record(EntityKind::Post, live_id).unwrap(),
            Some(fields("B"))
        );
        assert_eq!(
            live.map_version_id_to_live_id(EntityKind::Post, &id).unwrap(),
            Some(live_id)
        );

        live.delete_record(EntityKind::Post, live_id).unwrap();
        assert_eq!(live.get_record(EntityKind::Post, live_id).unwrap(), None);
        assert_eq!(
            live.map_version_id_to_live_id(EntityKind::Post, &id).unwrap(),
            None
        );
    }

    #[test]
    fn test_sqlite_unknown_mapping() {
        let live = SqliteLiveStore::in_memory().unwrap();
        assert_eq!(
            live.map_version_id_to_live_id(EntityKind::Comment, &VersionId::generate())
                .unwrap(),
            None
        );
    }
}
