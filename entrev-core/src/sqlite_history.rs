use crate::change::CommitMessage;
use crate::error::{Error, Result};
use crate::history::{
    net_inverse, slice_range, Commit, CommitFilter, CommitHash, FileChange, HistoryBackend,
};
use crate::models::{EntityKind, EntityRef, VersionId};
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA_VERSION: i32 = 1;

/// Durable commit log in SQLite. Every call runs on the blocking pool so
/// the engine's timeout stays effective.
#[derive(Clone)]
pub struct SqliteHistory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistory {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::initialize(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS commits (
                hash TEXT PRIMARY KEY,
                position INTEGER NOT NULL UNIQUE,
                parent TEXT,
                timestamp TEXT NOT NULL,
                message TEXT NOT NULL,
                FOREIGN KEY (parent) REFERENCES commits(hash)
            );

            CREATE TABLE IF NOT EXISTS file_changes (
                commit_hash TEXT NOT NULL,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                vp_id TEXT NOT NULL,
                content_before BLOB,
                content_after BLOB,
                PRIMARY KEY (commit_hash, seq),
                FOREIGN KEY (commit_hash) REFERENCES commits(hash)
            );

            CREATE INDEX IF NOT EXISTS idx_file_changes_entity ON file_changes(kind, vp_id);
            "#,
        )?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        if version.is_none() {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::BackendUnavailable("history connection poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::BackendUnavailable(e.to_string()))?
    }

    fn insert_commit(
        conn: &mut Connection,
        changes: Vec<FileChange>,
        message: CommitMessage,
    ) -> Result<CommitHash> {
        let tx = conn.transaction()?;

        let head: Option<(String, i64)> = tx
            .query_row(
                "SELECT hash, position FROM commits ORDER BY position DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (parent, position) = match head {
            Some((hash, position)) => (Some(hash), position as u64 + 1),
            None => (None, 0),
        };

        let commit = Commit::build(parent, position, message, changes)?;

        tx.execute(
            "INSERT INTO commits (hash, position, parent, timestamp, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                commit.hash,
                commit.position as i64,
                commit.parent,
                commit.timestamp.to_rfc3339(),
                serde_json::to_string(&commit.message)?,
            ],
        )?;

        for (seq, change) in commit.changes.iter().enumerate() {
            tx.execute(
                "INSERT INTO file_changes
                     (commit_hash, seq, kind, vp_id, content_before, content_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    commit.hash,
                    seq as i64,
                    change.entity.kind.as_str(),
                    change.entity.id.as_str(),
                    change.before.as_ref(),
                    change.after.as_ref(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(commit.hash)
    }

    fn load_commits(conn: &Connection) -> Result<Vec<Commit>> {
        let mut stmt = conn.prepare(
            "SELECT hash, position, parent, timestamp, message FROM commits ORDER BY position ASC",
        )?;
        let headers = stmt
            .query_map([], commit_header_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut commits = Vec::with_capacity(headers.len());
        for header in headers {
            commits.push(Self::hydrate(conn, header)?);
        }
        Ok(commits)
    }

    fn hydrate(conn: &Connection, header: CommitHeader) -> Result<Commit> {
        let corrupt = |reason: String| Error::CorruptData {
            location: format!("commit {}", header.hash),
            reason,
        };

        let timestamp = DateTime::parse_from_rfc3339(&header.timestamp)
            .map_err(|e| corrupt(e.to_string()))?
            .into();
        let message: CommitMessage = serde_json::from_str(&header.message)?;

        let mut stmt = conn.prepare(
            "SELECT kind, vp_id, content_before, content_after
             FROM file_changes WHERE commit_hash = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![header.hash], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut changes = Vec::with_capacity(rows.len());
        for (kind, vp_id, before, after) in rows {
            let kind = EntityKind::parse(&kind)
                .ok_or_else(|| corrupt(format!("unknown kind {}", kind)))?;
            let id = VersionId::parse(&vp_id).map_err(|e| corrupt(e.to_string()))?;
            changes.push(FileChange::new(EntityRef::new(kind, id), before, after));
        }

        Ok(Commit {
            hash: header.hash,
            parent: header.parent,
            position: header.position as u64,
            timestamp,
            message,
            changes,
        })
    }
}

struct CommitHeader {
    hash: String,
    position: i64,
    parent: Option<String>,
    timestamp: String,
    message: String,
}

fn commit_header_from_row(row: &Row) -> rusqlite::Result<CommitHeader> {
    Ok(CommitHeader {
        hash: row.get(0)?,
        position: row.get(1)?,
        parent: row.get(2)?,
        timestamp: row.get(3)?,
        message: row.get(4)?,
    })
}

impl HistoryBackend for SqliteHistory {
    async fn commit(&self, changes: Vec<FileChange>, message: CommitMessage) -> Result<CommitHash> {
        self.blocking(move |conn| Self::insert_commit(conn, changes, message))
            .await
    }

    async fn list_commits(&self, filter: &CommitFilter) -> Result<Vec<Commit>> {
        let filter = filter.clone();
        self.blocking(move |conn| {
            Ok(Self::load_commits(conn)?
                .into_iter()
                .filter(|c| filter.matches(c))
                .collect())
        })
        .await
    }

    async fn revert_commit(&self, hash: &str) -> Result<Vec<FileChange>> {
        let hash = hash.to_string();
        self.blocking(move |conn| {
            let header = conn
                .query_row(
                    "SELECT hash, position, parent, timestamp, message
                     FROM commits WHERE hash = ?1",
                    params![hash],
                    commit_header_from_row,
                )
                .optional()?
                .ok_or_else(|| Error::CommitNotFound(hash.clone()))?;

            let commit = Self::hydrate(conn, header)?;
            Ok(commit.changes.iter().map(FileChange::inverted).collect())
        })
        .await
    }

    async fn revert_range(
        &self,
        from_exclusive: &str,
        to_inclusive: &str,
    ) -> Result<Vec<FileChange>> {
        let from = from_exclusive.to_string();
        let to = to_inclusive.to_string();
        self.blocking(move |conn| {
            let commits = Self::load_commits(conn)?;
            let range = slice_range(&commits, &from, &to)?;
            Ok(net_inverse(range))
        })
        .await
    }

    async fn head(&self) -> Result<Option<CommitHash>> {
        self.blocking(|conn| {
            Ok(conn
                .query_row(
                    "SELECT hash FROM commits ORDER BY position DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Action, ChangeDescription};
    use tempfile::TempDir;

    fn change(before: Option<&[u8]>, after: Option<&[u8]>) -> FileChange {
        FileChange::new(
            EntityRef::new(EntityKind::Post, VersionId::parse("ABC123").unwrap()),
            before.map(<[u8]>::to_vec),
            after.map(<[u8]>::to_vec),
        )
    }

    fn message() -> CommitMessage {
        CommitMessage::Entity(
            ChangeDescription::new(
                EntityKind::Post,
                Action::Create,
                VersionId::parse("ABC123").unwrap(),
            )
            .with_meta("title", "Hello"),
        )
    }

    #[tokio::test]
    async fn test_storage_initialization() {
        let history = SqliteHistory::in_memory().unwrap();
        assert_eq!(history.head().await.unwrap(), None);
        assert!(history
            .list_commits(&CommitFilter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_commit_round_trip() {
        let history = SqliteHistory::in_memory().unwrap();
        let first = history
            .commit(vec![change(None, Some(b"one"))], message())
            .await
            .unwrap();
        let second = history
            .commit(vec![change(Some(b"one"), Some(b"two"))], message())
            .await
            .unwrap();

        let commits = history.list_commits(&CommitFilter::all()).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, first);
        assert_eq!(commits[1].parent.as_deref(), Some(first.as_str()));
        assert_eq!(commits[1].changes, vec![change(Some(b"one"), Some(b"two"))]);
        assert_eq!(commits[0].message, message());
        assert_eq!(history.head().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_reverts() {
        let history = SqliteHistory::in_memory().unwrap();
        let base = history
            .commit(vec![change(None, Some(b"one"))], message())
            .await
            .unwrap();
        let head = history
            .commit(vec![change(Some(b"one"), Some(b"two"))], message())
            .await
            .unwrap();

        assert_eq!(
            history.revert_commit(&head).await.unwrap(),
            vec![change(Some(b"two"), Some(b"one"))]
        );
        assert_eq!(
            history.revert_range(&base, &head).await.unwrap(),
            vec![change(Some(b"two"), Some(b"one"))]
        );
        assert!(matches!(
            history.revert_commit("nope").await,
            Err(Error::CommitNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.db");

        let hash = {
            let history = SqliteHistory::new(&path).unwrap();
            history
                .commit(vec![change(None, Some(b"one"))], message())
                .await
                .unwrap()
        };

        let reopened = SqliteHistory::new(&path).unwrap();
        assert_eq!(reopened.head().await.unwrap(), Some(hash));
    }
}
