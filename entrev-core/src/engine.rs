use crate::change::{short_hash, Action, CommitMessage};
use crate::codec;
use crate::config::Config;
use crate::diff::Diff;
use crate::error::{Error, Result};
use crate::history::{Commit, CommitFilter, CommitHash, FileChange, HistoryBackend};
use crate::live::{LiveStore, SqliteLiveStore};
use crate::locks::IdentityLocks;
use crate::models::{Entity, EntityKind, EntityRef};
use crate::sqlite_history::SqliteHistory;
use crate::storage::{DirectoryStorage, PendingWrite};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Entity change-tracking engine.
///
/// Mutations of the live store are mirrored through [`Engine::save`] and
/// [`Engine::delete`]; each real transition becomes exactly one commit.
/// Undo and rollback live in the coordinator half of this type.
pub struct Engine<H, L> {
    pub(crate) storage: DirectoryStorage,
    pub(crate) history: H,
    pub(crate) live: L,
    pub(crate) locks: IdentityLocks,
    pub(crate) config: Config,
}

impl Engine<SqliteHistory, SqliteLiveStore> {
    /// Opens the on-disk stack described by `config`.
    pub fn open(config: Config) -> Result<Self> {
        for path in [&config.history_db, &config.live_db] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let history = SqliteHistory::new(&config.history_db)?;
        let live = SqliteLiveStore::new(&config.live_db)?;
        Self::new(config, history, live)
    }
}

impl<H: HistoryBackend, L: LiveStore> Engine<H, L> {
    pub fn new(config: Config, history: H, live: L) -> Result<Self> {
        Ok(Self {
            storage: DirectoryStorage::open(&config.storage_dir)?,
            history,
            live,
            locks: IdentityLocks::new(),
            config,
        })
    }

    pub fn storage(&self) -> &DirectoryStorage {
        &self.storage
    }

    pub fn live(&self) -> &L {
        &self.live
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bounds a history call by the configured timeout. Backend failures of
    /// any kind surface as `BackendUnavailable`; lookups that simply miss
    /// keep their own error.
    pub(crate) async fn backend<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout: Duration = self.config.backend_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::Database(e))) => Err(Error::BackendUnavailable(e.to_string())),
            Ok(Err(Error::Io(e))) => Err(Error::BackendUnavailable(e.to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::BackendUnavailable(format!(
                "no response within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    pub(crate) async fn commits(&self) -> Result<Vec<Commit>> {
        self.backend(self.history.list_commits(&CommitFilter::all()))
            .await
    }

    pub async fn commit(&self, hash: &str) -> Result<Commit> {
        self.commits()
            .await?
            .into_iter()
            .find(|c| c.hash == hash)
            .ok_or_else(|| Error::CommitNotFound(hash.to_string()))
    }

    /// Commits newer than `hash`, newest first.
    pub async fn commits_after(&self, hash: &str) -> Result<Vec<Commit>> {
        let commits = self.commits().await?;
        let start = commits
            .iter()
            .position(|c| c.hash == hash)
            .ok_or_else(|| Error::CommitNotFound(hash.to_string()))?;
        Ok(commits.into_iter().skip(start + 1).rev().collect())
    }

    /// Records an entity's new state. Returns `None` when nothing changed.
    pub async fn save(&self, entity: Entity) -> Result<Option<CommitHash>> {
        let target = entity.entity_ref();
        let _guard = self.locks.acquire([target.clone()]).await;
        self.transition(&target, Some(entity), None).await
    }

    /// Records an entity's removal. Deleting an absent entity fails with
    /// `EntityNotFound`.
    pub async fn delete(&self, target: &EntityRef) -> Result<CommitHash> {
        let _guard = self.locks.acquire([target.clone()]).await;
        self.transition(target, None, None)
            .await?
            .ok_or_else(|| Error::EntityNotFound(target.to_string()))
    }

    /// Like [`Engine::save`] with a caller-supplied action hint, for hosts
    /// that know more than create/edit.
    pub async fn save_as(&self, entity: Entity, hint: Action) -> Result<Option<CommitHash>> {
        if !entity.kind.supports(hint) {
            return Err(Error::InvalidOperation(format!(
                "{} is not an action for {}",
                hint, entity.kind
            )));
        }
        let target = entity.entity_ref();
        let _guard = self.locks.acquire([target.clone()]).await;
        self.transition(&target, Some(entity), Some(hint)).await
    }

    async fn transition(
        &self,
        target: &EntityRef,
        new: Option<Entity>,
        hint: Option<Action>,
    ) -> Result<Option<CommitHash>> {
        let history = self
            .backend(self.history.list_commits(&CommitFilter::entity(target)))
            .await?;
        self.reconcile(&history, [target])?;

        let before = self.storage.read_raw(target)?;
        let old = before
            .as_deref()
            .map(|bytes| self.storage.decode(target, bytes))
            .transpose()?;

        let Some(diff) =
            Diff::between_ignoring(old.as_ref(), new.as_ref(), self.config.ignored(target.kind))
        else {
            return Ok(None);
        };
        if diff.is_empty() {
            debug!("No changes to {}", target);
            return Ok(None);
        }

        let hint = hint.unwrap_or(match (&old, &new) {
            (None, _) => Action::Create,
            (Some(_), Some(_)) => Action::Edit,
            (Some(_), None) => Action::Delete,
        });
        let description = target
            .kind
            .classifier()
            .classify(old.as_ref(), new.as_ref(), hint, &self.live)
            .ok_or_else(|| Error::InvalidOperation(format!("nothing to classify for {}", target)))?;

        let after = new.as_ref().map(codec::encode).transpose()?;
        let pending = self.storage.stage(target, after.as_deref())?;
        let change = FileChange::new(target.clone(), before, after);

        let summary = description.summary();
        let message = CommitMessage::Entity(description);
        let hash = self
            .commit_and_promote(vec![change], message, vec![pending])
            .await?;

        info!("Committed {}: {}", short_hash(&hash), summary);
        Ok(Some(hash))
    }

    /// Appends one commit, then makes its staged snapshot writes visible.
    ///
    /// A commit can land even when the call fails: the backend may append
    /// and then answer after the timeout, or a promote may fail afterwards.
    /// Either way the touched snapshots are reconciled with history before
    /// the error is returned, and again before the next write to them.
    pub(crate) async fn commit_and_promote(
        &self,
        changes: Vec<FileChange>,
        message: CommitMessage,
        pending: Vec<PendingWrite>,
    ) -> Result<CommitHash> {
        let touched: Vec<EntityRef> = changes.iter().map(|c| c.entity.clone()).collect();

        let hash = match self.backend(self.history.commit(changes, message)).await {
            Ok(hash) => hash,
            Err(e) => {
                drop(pending);
                self.settle(&touched).await;
                return Err(e);
            }
        };

        for write in pending {
            if let Err(e) = write.promote() {
                self.settle(&touched).await;
                return Err(e);
            }
        }
        Ok(hash)
    }

    async fn settle(&self, touched: &[EntityRef]) {
        let result = match self.commits().await {
            Ok(commits) => self.reconcile(&commits, touched),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(
                "Snapshots of {} entities may lag history until the next write: {}",
                touched.len(),
                e
            );
        }
    }

    /// Brings the snapshots of `entities` in line with the latest commit that
    /// touched each of them. History is authoritative: a snapshot still
    /// holding that commit's `before` side is rewritten to its `after` side.
    /// A snapshot matching neither side blocks writes as corrupt.
    pub(crate) fn reconcile<'a, I>(&self, commits: &[Commit], entities: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a EntityRef>,
    {
        for entity in entities {
            let Some(commit) = commits.iter().rev().find(|c| c.touches(entity)) else {
                continue;
            };
            let Some(change) = commit.change_for(entity) else {
                continue;
            };

            let current = self.storage.read_raw(entity)?;
            if current == change.after {
                continue;
            }
            if current != change.before {
                return Err(Error::CorruptData {
                    location: self.storage.path_for(entity).display().to_string(),
                    reason: format!(
                        "snapshot does not match commit {}",
                        short_hash(&commit.hash)
                    ),
                });
            }

            warn!(
                "Restoring {} from commit {}",
                entity,
                short_hash(&commit.hash)
            );
            self.storage.write(entity, change.after.as_deref())?;

            if matches!(
                commit.message,
                CommitMessage::Undo { .. } | CommitMessage::Rollback { .. }
            ) {
                if let Err(e) = self.resync(std::slice::from_ref(entity)) {
                    warn!("Live store still differs for {}: {}", entity, e);
                }
            }
        }
        Ok(())
    }

    pub fn read(&self, target: &EntityRef) -> Result<Entity> {
        self.storage
            .read(target)?
            .ok_or_else(|| Error::EntityNotFound(target.to_string()))
    }

    pub fn read_all(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.storage.read_all(kind)
    }

    /// Starts tracking: snapshots every given entity in one commit. Entities
    /// already stored with identical content are skipped; if that leaves
    /// nothing to record, no commit is made.
    pub async fn activate(&self, entities: Vec<Entity>) -> Result<CommitHash> {
        let _guard = self.locks.exclusive().await;

        let mut seen = HashSet::new();
        if let Some(duplicate) = entities.iter().find(|e| !seen.insert(e.entity_ref())) {
            return Err(Error::InvalidOperation(format!(
                "{} appears more than once",
                duplicate.entity_ref()
            )));
        }

        let commits = self.commits().await?;
        self.reconcile(&commits, seen.iter())?;

        let mut changes = Vec::new();
        let mut pending: Vec<PendingWrite> = Vec::new();
        for entity in &entities {
            let target = entity.entity_ref();
            let before = self.storage.read_raw(&target)?;
            let after = codec::encode(entity)?;
            if before.as_deref() == Some(after.as_slice()) {
                continue;
            }
            pending.push(self.storage.stage(&target, Some(&after))?);
            changes.push(FileChange::new(target, before, Some(after)));
        }
        if changes.is_empty() {
            return Err(Error::InvalidOperation(
                "every entity is already tracked".to_string(),
            ));
        }

        let message = CommitMessage::Activate {
            entities: entities.len(),
        };
        let hash = self.commit_and_promote(changes, message, pending).await?;

        info!("Tracking started at {} with {} entities", hash, entities.len());
        Ok(hash)
    }
}
