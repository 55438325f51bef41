//! Undo and rollback over the commit log, followed by resynchronization of
//! the live store from storage.
//!
//! Both operations compute the target snapshot states first, record them as
//! one synthetic commit and only then touch the live store. Once that commit
//! exists it stands; a failing resync is reported as [`Error::Resync`] and
//! can be retried with [`Engine::resync`].

use crate::change::{short_hash, CommitMessage};
use crate::codec;
use crate::config::Config;
use crate::diff::{Diff, Transition};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::history::{Commit, CommitHash, FileChange, HistoryBackend};
use crate::live::LiveStore;
use crate::models::{Entity, EntityRef};
use crate::storage::DirectoryStorage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};

/// Result of a successful undo or rollback. `commit` is `None` when the
/// request turned out to change nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevertOutcome {
    pub commit: Option<CommitHash>,
    pub reverted: Vec<CommitHash>,
    pub resynced: Vec<EntityRef>,
}

/// Presentation view of one commit. Rebuilt from the log on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRow {
    pub hash: CommitHash,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub message: CommitMessage,
    pub entities: Vec<EntityRef>,
    pub is_enabled: bool,
    pub can_undo: bool,
    pub can_rollback: bool,
}

/// Commits with their decoded per-entity diffs, oldest first.
struct Timeline {
    commits: Vec<Commit>,
    diffs: Vec<Vec<Diff>>,
    activation: Option<usize>,
}

impl Timeline {
    fn build(storage: &DirectoryStorage, config: &Config, commits: Vec<Commit>) -> Result<Self> {
        let mut diffs = Vec::with_capacity(commits.len());
        for commit in &commits {
            let mut per_commit = Vec::with_capacity(commit.changes.len());
            for change in &commit.changes {
                if let Some(diff) = change_diff(storage, config, change)? {
                    per_commit.push(diff);
                }
            }
            diffs.push(per_commit);
        }

        let activation = commits
            .iter()
            .rposition(|c| matches!(c.message, CommitMessage::Activate { .. }));

        Ok(Self {
            commits,
            diffs,
            activation,
        })
    }

    fn position(&self, hash: &str) -> Result<usize> {
        self.commits
            .iter()
            .position(|c| c.hash == hash)
            .ok_or_else(|| Error::CommitNotFound(hash.to_string()))
    }

    /// Commits older than the latest activation predate tracking.
    fn is_enabled(&self, index: usize) -> bool {
        self.activation.map_or(true, |a| index >= a)
    }

    fn is_undoable(&self, index: usize) -> bool {
        self.is_enabled(index)
            && !matches!(self.commits[index].message, CommitMessage::Activate { .. })
            && !self.diffs[index].is_empty()
    }

    /// First pair (undone commit, later commit outside the set) whose
    /// changes overlap on the same entity.
    fn conflict(&self, undo: &BTreeSet<usize>) -> Option<(usize, usize)> {
        for &i in undo {
            for diff in &self.diffs[i] {
                for j in (i + 1)..self.commits.len() {
                    if undo.contains(&j) {
                        continue;
                    }
                    let overlaps = self.diffs[j]
                        .iter()
                        .filter(|later| later.kind == diff.kind && later.vp_id == diff.vp_id)
                        .any(|later| overlaps(diff, later));
                    if overlaps {
                        return Some((i, j));
                    }
                }
            }
        }
        None
    }

    fn selectable(&self) -> HashSet<usize> {
        (0..self.commits.len())
            .filter(|&i| self.is_undoable(i))
            .filter(|&i| self.conflict(&BTreeSet::from([i])).is_none())
            .collect()
    }
}

/// Entity-level transitions conflict with anything later on the same entity;
/// updates conflict only on shared fields.
fn overlaps(earlier: &Diff, later: &Diff) -> bool {
    if earlier.transition != Transition::Update || later.transition != Transition::Update {
        return true;
    }
    earlier.fields.keys().any(|f| later.touches(f))
}

fn change_diff(
    storage: &DirectoryStorage,
    config: &Config,
    change: &FileChange,
) -> Result<Option<Diff>> {
    let decode = |side: &Option<Vec<u8>>| {
        side.as_deref()
            .map(|bytes| storage.decode(&change.entity, bytes))
            .transpose()
    };
    let before = decode(&change.before)?;
    let after = decode(&change.after)?;
    Ok(Diff::between_ignoring(
        before.as_ref(),
        after.as_ref(),
        config.ignored(change.entity.kind),
    ))
}

impl<H: HistoryBackend, L: LiveStore> Engine<H, L> {
    async fn timeline(&self) -> Result<Timeline> {
        let commits = self.commits().await?;
        Timeline::build(&self.storage, &self.config, commits)
    }

    /// Reverts each named commit individually, leaving other commits'
    /// changes in place, and records the result as one undo commit. The
    /// whole batch is refused if any commit conflicts with a later commit
    /// outside the batch.
    pub async fn undo(&self, hashes: &[CommitHash]) -> Result<RevertOutcome> {
        if hashes.is_empty() {
            return Ok(RevertOutcome::default());
        }

        let commits = self.commits().await?;
        let mut entities = BTreeSet::new();
        for hash in hashes {
            let commit = commits
                .iter()
                .find(|c| &c.hash == hash)
                .ok_or_else(|| Error::CommitNotFound(hash.clone()))?;
            entities.extend(commit.entities());
        }
        let _guard = self.locks.acquire(entities.iter().cloned()).await;

        // Re-read under the locks so no commit on these entities is missed.
        let timeline = self.timeline().await?;
        self.reconcile(&timeline.commits, &entities)?;
        let mut wanted = BTreeSet::new();
        for hash in hashes {
            let index = timeline.position(hash)?;
            if !timeline.is_undoable(index) {
                return Err(Error::InvalidOperation(format!(
                    "commit {} cannot be undone",
                    short_hash(hash)
                )));
            }
            wanted.insert(index);
        }

        if let Some((undone, later)) = timeline.conflict(&wanted) {
            let hash = timeline.commits[undone].hash.clone();
            let conflicting = timeline.commits[later].hash.clone();
            warn!(
                "Refusing undo of {}: conflicts with {}",
                short_hash(&hash),
                short_hash(&conflicting)
            );
            return Err(Error::Conflict { hash, conflicting });
        }

        let mut next: BTreeMap<EntityRef, Option<Entity>> = BTreeMap::new();
        for &index in wanted.iter().rev() {
            let hash = &timeline.commits[index].hash;
            let inverse = self.backend(self.history.revert_commit(hash)).await?;
            for change in inverse {
                let current = match next.get(&change.entity) {
                    Some(state) => state.clone(),
                    None => self.storage.read(&change.entity)?,
                };
                let reverted = match change_diff(&self.storage, &self.config, &change)? {
                    Some(diff) => diff.apply(current.as_ref())?,
                    None => current,
                };
                next.insert(change.entity, reverted);
            }
        }

        let reverted: Vec<CommitHash> = wanted
            .iter()
            .map(|&i| timeline.commits[i].hash.clone())
            .collect();
        let message = CommitMessage::Undo {
            reverted: reverted.clone(),
        };
        self.finish(next, message, reverted).await
    }

    /// Reverts every commit after `target`, newest first, as one rollback
    /// commit. Rolling back to the current head is a no-op.
    pub async fn rollback(&self, target: &str) -> Result<RevertOutcome> {
        let _guard = self.locks.exclusive().await;

        let timeline = self.timeline().await?;
        let index = timeline.position(target)?;
        if !timeline.is_enabled(index) {
            return Err(Error::InvalidOperation(format!(
                "commit {} predates tracking",
                short_hash(target)
            )));
        }

        let head = &timeline.commits[timeline.commits.len() - 1].hash;
        if head == target {
            return Ok(RevertOutcome::default());
        }

        let later: BTreeSet<EntityRef> = timeline.commits[index + 1..]
            .iter()
            .flat_map(Commit::entities)
            .collect();
        self.reconcile(&timeline.commits, &later)?;

        let inverse = self
            .backend(self.history.revert_range(target, head))
            .await?;
        let mut next = BTreeMap::new();
        for change in inverse {
            let state = change
                .after
                .as_deref()
                .map(|bytes| self.storage.decode(&change.entity, bytes))
                .transpose()?;
            next.insert(change.entity, state);
        }

        let reverted: Vec<CommitHash> = timeline.commits[index + 1..]
            .iter()
            .rev()
            .map(|c| c.hash.clone())
            .collect();
        let message = CommitMessage::Rollback {
            target: target.to_string(),
        };
        self.finish(next, message, reverted).await
    }

    async fn finish(
        &self,
        next: BTreeMap<EntityRef, Option<Entity>>,
        message: CommitMessage,
        reverted: Vec<CommitHash>,
    ) -> Result<RevertOutcome> {
        let Some((commit, touched)) = self.record(next, message).await? else {
            return Ok(RevertOutcome {
                commit: None,
                reverted,
                resynced: Vec::new(),
            });
        };

        info!(
            "Reverted {} commit(s) as {}, resynchronizing {} entities",
            reverted.len(),
            short_hash(&commit),
            touched.len()
        );

        if let Err(e) = self.resync(&touched) {
            warn!("Resync after {} failed: {}", short_hash(&commit), e);
            return Err(Error::Resync {
                commit,
                reason: e.to_string(),
            });
        }

        Ok(RevertOutcome {
            commit: Some(commit),
            reverted,
            resynced: touched,
        })
    }

    /// Writes the target states as one commit. Entities already in their
    /// target state are left out; if none remain nothing is committed.
    async fn record(
        &self,
        next: BTreeMap<EntityRef, Option<Entity>>,
        message: CommitMessage,
    ) -> Result<Option<(CommitHash, Vec<EntityRef>)>> {
        let mut changes = Vec::new();
        let mut pending = Vec::new();
        for (entity, state) in next {
            let before = self.storage.read_raw(&entity)?;
            let after = state.as_ref().map(codec::encode).transpose()?;
            if before == after {
                continue;
            }
            pending.push(self.storage.stage(&entity, after.as_deref())?);
            changes.push(FileChange::new(entity, before, after));
        }

        if changes.is_empty() {
            return Ok(None);
        }

        let touched: Vec<EntityRef> = changes.iter().map(|c| c.entity.clone()).collect();
        let hash = self.commit_and_promote(changes, message, pending).await?;
        Ok(Some((hash, touched)))
    }

    /// Overwrites the live store with the stored snapshots of `entities`.
    /// Storage is authoritative: records without a snapshot are deleted.
    pub fn resync(&self, entities: &[EntityRef]) -> Result<()> {
        for entity in entities {
            if let Err(e) = self.resync_one(entity) {
                warn!("Could not resync {}: {}", entity, e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn resync_one(&self, entity: &EntityRef) -> Result<()> {
        let state = self.storage.read(entity)?;
        let live_id = self
            .live
            .map_version_id_to_live_id(entity.kind, &entity.id)?;

        match (state, live_id) {
            (Some(snapshot), Some(id)) => {
                self.live.upsert_record(entity.kind, id, &snapshot.fields)
            }
            (Some(snapshot), None) => self
                .live
                .insert_record(entity.kind, &entity.id, &snapshot.fields)
                .map(|_| ()),
            (None, Some(id)) => self.live.delete_record(entity.kind, id),
            (None, None) => Ok(()),
        }
    }

    /// One page of commit rows, newest first. Pages are zero-based.
    pub async fn list_commit_rows(&self, page: usize, page_size: usize) -> Result<Vec<CommitRow>> {
        if page_size == 0 {
            return Err(Error::InvalidOperation("page size must be positive".to_string()));
        }

        let timeline = self.timeline().await?;
        let selectable = timeline.selectable();
        let head = timeline.commits.len().checked_sub(1);

        Ok((0..timeline.commits.len())
            .rev()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .map(|i| {
                let commit = &timeline.commits[i];
                CommitRow {
                    hash: commit.hash.clone(),
                    timestamp: commit.timestamp,
                    summary: commit.message.summary(),
                    message: commit.message.clone(),
                    entities: commit.entities(),
                    is_enabled: timeline.is_enabled(i),
                    can_undo: selectable.contains(&i),
                    can_rollback: timeline.is_enabled(i) && Some(i) != head,
                }
            })
            .collect())
    }

    /// Hashes of commits that can currently be undone on their own, newest
    /// first.
    pub async fn selectable_commits(&self) -> Result<Vec<CommitHash>> {
        let timeline = self.timeline().await?;
        let selectable = timeline.selectable();
        Ok((0..timeline.commits.len())
            .rev()
            .filter(|i| selectable.contains(i))
            .map(|i| timeline.commits[i].hash.clone())
            .collect())
    }

    /// A commit together with the field-level diff of each entity it touched.
    pub async fn commit_diffs(&self, hash: &str) -> Result<(Commit, Vec<Diff>)> {
        let commit = self.commit(hash).await?;
        let mut diffs = Vec::with_capacity(commit.changes.len());
        for change in &commit.changes {
            if let Some(diff) = change_diff(&self.storage, &self.config, change)? {
                diffs.push(diff);
            }
        }
        Ok((commit, diffs))
    }
}
