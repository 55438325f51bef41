//! Append-only commit log.
//!
//! The engine consumes history through [`HistoryBackend`]. Reverting never
//! rewrites the log: `revert_commit` and `revert_range` only compute the
//! inverse file changes, and the caller records the result as a new commit.

use crate::change::CommitMessage;
use crate::error::{Error, Result};
use crate::models::{EntityKind, EntityRef, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;

pub type CommitHash = String;

/// One snapshot file's content before and after a commit. `None` means the
/// file does not exist on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub entity: EntityRef,
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

impl FileChange {
    pub fn new(entity: EntityRef, before: Option<Vec<u8>>, after: Option<Vec<u8>>) -> Self {
        Self {
            entity,
            before,
            after,
        }
    }

    pub fn inverted(&self) -> FileChange {
        FileChange {
            entity: self.entity.clone(),
            before: self.after.clone(),
            after: self.before.clone(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: CommitHash,
    pub parent: Option<CommitHash>,
    pub position: u64,
    pub timestamp: DateTime<Utc>,
    pub message: CommitMessage,
    pub changes: Vec<FileChange>,
}

impl Commit {
    pub fn build(
        parent: Option<CommitHash>,
        position: u64,
        message: CommitMessage,
        changes: Vec<FileChange>,
    ) -> Result<Self> {
        let timestamp = Utc::now();

        let mut hasher = Sha256::new();
        hasher.update(parent.as_deref().unwrap_or("").as_bytes());
        hasher.update(position.to_be_bytes());
        hasher.update(timestamp.to_rfc3339().as_bytes());
        hasher.update(serde_json::to_vec(&message)?);
        for change in &changes {
            hasher.update(change.entity.to_string().as_bytes());
            for side in [&change.before, &change.after] {
                match side {
                    Some(bytes) => {
                        hasher.update([1u8]);
                        hasher.update((bytes.len() as u64).to_be_bytes());
                        hasher.update(bytes);
                    }
                    None => hasher.update([0u8]),
                }
            }
        }

        Ok(Self {
            hash: hex::encode(hasher.finalize()),
            parent,
            position,
            timestamp,
            message,
            changes,
        })
    }

    pub fn touches(&self, entity: &EntityRef) -> bool {
        self.changes.iter().any(|c| &c.entity == entity)
    }

    pub fn change_for(&self, entity: &EntityRef) -> Option<&FileChange> {
        self.changes.iter().rev().find(|c| &c.entity == entity)
    }

    pub fn entities(&self) -> Vec<EntityRef> {
        self.changes.iter().map(|c| c.entity.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitFilter {
    pub kind: Option<EntityKind>,
    pub id: Option<VersionId>,
}

impl CommitFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entity(entity: &EntityRef) -> Self {
        Self {
            kind: Some(entity.kind),
            id: Some(entity.id.clone()),
        }
    }

    pub fn matches(&self, commit: &Commit) -> bool {
        if self.kind.is_none() && self.id.is_none() {
            return true;
        }
        commit.changes.iter().any(|c| {
            self.kind.map_or(true, |k| c.entity.kind == k)
                && self.id.as_ref().map_or(true, |id| &c.entity.id == id)
        })
    }
}

pub trait HistoryBackend: Send + Sync {
    /// Appends a commit and returns its hash.
    fn commit(
        &self,
        changes: Vec<FileChange>,
        message: CommitMessage,
    ) -> impl Future<Output = Result<CommitHash>> + Send;

    /// Commits matching `filter`, oldest first.
    fn list_commits(&self, filter: &CommitFilter)
        -> impl Future<Output = Result<Vec<Commit>>> + Send;

    /// Inverse of one commit's file changes.
    fn revert_commit(&self, hash: &str) -> impl Future<Output = Result<Vec<FileChange>>> + Send;

    /// Net inverse of every commit after `from_exclusive` up to and
    /// including `to_inclusive`, one change per touched snapshot.
    fn revert_range(
        &self,
        from_exclusive: &str,
        to_inclusive: &str,
    ) -> impl Future<Output = Result<Vec<FileChange>>> + Send;

    fn head(&self) -> impl Future<Output = Result<Option<CommitHash>>> + Send;
}

/// Collapses a chronological run of commits into one inverse change per
/// snapshot: from the latest `after` back to the earliest `before`.
pub fn net_inverse(commits: &[Commit]) -> Vec<FileChange> {
    let mut spans: BTreeMap<EntityRef, (Option<Vec<u8>>, Option<Vec<u8>>)> = BTreeMap::new();

    for commit in commits {
        for change in &commit.changes {
            spans
                .entry(change.entity.clone())
                .and_modify(|span| span.1 = change.after.clone())
                .or_insert_with(|| (change.before.clone(), change.after.clone()));
        }
    }

    spans
        .into_iter()
        .map(|(entity, (earliest, latest))| FileChange::new(entity, latest, earliest))
        .filter(|c| !c.is_noop())
        .collect()
}

/// Commits strictly after `from` and up to `to`, validating both ends.
pub fn slice_range<'a>(commits: &'a [Commit], from: &str, to: &str) -> Result<&'a [Commit]> {
    let position = |hash: &str| {
        commits
            .iter()
            .position(|c| c.hash == hash)
            .ok_or_else(|| Error::CommitNotFound(hash.to_string()))
    };

    let start = position(from)?;
    let end = position(to)?;
    if end < start {
        return Err(Error::InvalidOperation(format!(
            "{} is older than {}",
            to, from
        )));
    }

    Ok(&commits[start + 1..=end])
}

#[derive(Default)]
struct Log {
    commits: Vec<Commit>,
    index: HashMap<CommitHash, usize>,
}

/// In-process history: an ordered list of commits plus the head cursor.
#[derive(Default)]
pub struct MemoryHistory {
    log: Mutex<Log>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryBackend for MemoryHistory {
    async fn commit(&self, changes: Vec<FileChange>, message: CommitMessage) -> Result<CommitHash> {
        let mut log = self.lock();
        let parent = log.commits.last().map(|c| c.hash.clone());
        let commit = Commit::build(parent, log.commits.len() as u64, message, changes)?;
        let hash = commit.hash.clone();

        let position = log.commits.len();
        log.index.insert(hash.clone(), position);
        log.commits.push(commit);
        Ok(hash)
    }

    async fn list_commits(&self, filter: &CommitFilter) -> Result<Vec<Commit>> {
        Ok(self
            .lock()
            .commits
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn revert_commit(&self, hash: &str) -> Result<Vec<FileChange>> {
        let log = self.lock();
        let position = *log
            .index
            .get(hash)
            .ok_or_else(|| Error::CommitNotFound(hash.to_string()))?;
        Ok(log.commits[position]
            .changes
            .iter()
            .map(FileChange::inverted)
            .collect())
    }

    async fn revert_range(
        &self,
        from_exclusive: &str,
        to_inclusive: &str,
    ) -> Result<Vec<FileChange>> {
        let log = self.lock();
        let range = slice_range(&log.commits, from_exclusive, to_inclusive)?;
        Ok(net_inverse(range))
    }

    async fn head(&self) -> Result<Option<CommitHash>> {
        Ok(self.lock().commits.last().map(|c| c.hash.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Action, ChangeDescription};

    fn entity_ref(name: &str) -> EntityRef {
        EntityRef::new(EntityKind::Option, VersionId::parse(name).unwrap())
    }

    fn message(name: &str) -> CommitMessage {
        CommitMessage::Entity(ChangeDescription::new(
            EntityKind::Option,
            Action::Edit,
            VersionId::parse(name).unwrap(),
        ))
    }

    fn change(name: &str, before: Option<&str>, after: Option<&str>) -> FileChange {
        FileChange::new(
            entity_ref(name),
            before.map(|b| b.as_bytes().to_vec()),
            after.map(|a| a.as_bytes().to_vec()),
        )
    }

    #[tokio::test]
    async fn test_commits_are_chained() {
        let history = MemoryHistory::new();
        let first = history
            .commit(vec![change("a", None, Some("1"))], message("a"))
            .await
            .unwrap();
        let second = history
            .commit(vec![change("a", Some("1"), Some("2"))], message("a"))
            .await
            .unwrap();

        let commits = history.list_commits(&CommitFilter::all()).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].parent.as_deref(), Some(first.as_str()));
        assert_eq!(commits[1].position, 1);
        assert_eq!(history.head().await.unwrap(), Some(second));
        assert_ne!(commits[0].hash, commits[1].hash);
    }

    #[tokio::test]
    async fn test_list_filter_by_entity() {
        let history = MemoryHistory::new();
        history
            .commit(vec![change("a", None, Some("1"))], message("a"))
            .await
            .unwrap();
        history
            .commit(vec![change("b", None, Some("1"))], message("b"))
            .await
            .unwrap();

        let only_b = history
            .list_commits(&CommitFilter::entity(&entity_ref("b")))
            .await
            .unwrap();
        assert_eq!(only_b.len(), 1);
        assert!(only_b[0].touches(&entity_ref("b")));
    }

    #[tokio::test]
    async fn test_revert_commit_swaps_sides() {
        let history = MemoryHistory::new();
        let hash = history
            .commit(vec![change("a", Some("1"), Some("2"))], message("a"))
            .await
            .unwrap();

        let inverse = history.revert_commit(&hash).await.unwrap();
        assert_eq!(inverse, vec![change("a", Some("2"), Some("1"))]);
        assert!(matches!(
            history.revert_commit("missing").await,
            Err(Error::CommitNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revert_range_is_net() {
        let history = MemoryHistory::new();
        let base = history
            .commit(vec![change("a", None, Some("1"))], message("a"))
            .await
            .unwrap();
        history
            .commit(vec![change("a", Some("1"), Some("2"))], message("a"))
            .await
            .unwrap();
        history
            .commit(vec![change("b", None, Some("x"))], message("b"))
            .await
            .unwrap();
        let head = history
            .commit(vec![change("a", Some("2"), Some("3"))], message("a"))
            .await
            .unwrap();

        let inverse = history.revert_range(&base, &head).await.unwrap();
        assert_eq!(
            inverse,
            vec![change("a", Some("3"), Some("1")), change("b", Some("x"), None)]
        );

        assert!(history.revert_range(&head, &head).await.unwrap().is_empty());
        assert!(history.revert_range(&head, &base).await.is_err());
    }

    #[test]
    fn test_net_inverse_drops_round_trips() {
        let forward = vec![change("a", Some("1"), Some("2"))];
        let back = vec![change("a", Some("2"), Some("1"))];
        let a = Commit::build(None, 0, message("a"), forward).unwrap();
        let b = Commit::build(None, 1, message("a"), back).unwrap();
        assert!(net_inverse(&[a, b]).is_empty());
    }
}
