use crate::codec;
use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind, EntityRef, VersionId};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SNAPSHOT_EXTENSION: &str = "json";

/// One snapshot file per entity, under a directory per kind:
/// `<root>/<kind dir>/<vp_id>.json`.
pub struct DirectoryStorage {
    root: PathBuf,
}

/// A snapshot write that has been prepared but not yet made visible.
/// Dropping it without [`PendingWrite::promote`] discards the staged file.
#[must_use]
pub struct PendingWrite {
    target: PathBuf,
    staged: Option<NamedTempFile>,
}

impl PendingWrite {
    pub fn promote(self) -> Result<()> {
        match self.staged {
            Some(file) => {
                file.persist(&self.target).map_err(|e| Error::Io(e.error))?;
            }
            None => match fs::remove_file(&self.target) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

impl DirectoryStorage {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in EntityKind::ALL {
            fs::create_dir_all(root.join(kind.directory()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, entity: &EntityRef) -> PathBuf {
        self.root
            .join(entity.kind.directory())
            .join(format!("{}.{}", entity.id, SNAPSHOT_EXTENSION))
    }

    fn location(entity: &EntityRef) -> String {
        format!("{}/{}.{}", entity.kind.directory(), entity.id, SNAPSHOT_EXTENSION)
    }

    pub fn read_raw(&self, entity: &EntityRef) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(entity)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read(&self, entity: &EntityRef) -> Result<Option<Entity>> {
        self.read_raw(entity)?
            .map(|bytes| self.decode(entity, &bytes))
            .transpose()
    }

    /// Decodes bytes that belong at `entity`'s location, rejecting snapshots
    /// whose envelope names a different entity.
    pub fn decode(&self, entity: &EntityRef, bytes: &[u8]) -> Result<Entity> {
        let location = Self::location(entity);
        let decoded = codec::decode_at(bytes, &location)?;
        if decoded.kind != entity.kind || decoded.vp_id != entity.id {
            return Err(Error::CorruptData {
                location,
                reason: format!("snapshot belongs to {}", decoded.entity_ref()),
            });
        }
        Ok(decoded)
    }

    pub fn read_all(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();
        for id in self.list_ids(kind)? {
            let entity = EntityRef::new(kind, id);
            if let Some(e) = self.read(&entity)? {
                entities.push(e);
            }
        }
        Ok(entities)
    }

    /// Identities with a snapshot on disk, sorted.
    pub fn list_ids(&self, kind: EntityKind) -> Result<Vec<VersionId>> {
        let mut ids = Vec::new();
        for dir_entry in fs::read_dir(self.root.join(kind.directory()))? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(id) = VersionId::parse(stem) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Stages new content for `entity`; `None` stages a removal.
    pub fn stage(&self, entity: &EntityRef, content: Option<&[u8]>) -> Result<PendingWrite> {
        let target = self.path_for(entity);
        let staged = match content {
            Some(bytes) => {
                let dir = self.root.join(entity.kind.directory());
                let mut file = NamedTempFile::new_in(dir)?;
                file.write_all(bytes)?;
                file.as_file().sync_all()?;
                Some(file)
            }
            None => None,
        };
        Ok(PendingWrite { target, staged })
    }

    pub fn write(&self, entity: &EntityRef, content: Option<&[u8]>) -> Result<()> {
        self.stage(entity, content)?.promote()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn post(title: &str) -> Entity {
        Entity::new(EntityKind::Post, VersionId::generate()).with_field("post_title", title)
    }

    #[test]
    fn test_layout_is_derived_from_identity() {
        let dir = TempDir::new().unwrap();
        let storage = DirectoryStorage::open(dir.path()).unwrap();
        let id = VersionId::parse("ABC").unwrap();

        let path = storage.path_for(&EntityRef::new(EntityKind::Comment, id));
        assert_eq!(path, dir.path().join("comments").join("ABC.json"));
    }

    #[test]
    fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let storage = DirectoryStorage::open(dir.path()).unwrap();
        let entity = post("Hello");
        let r = entity.entity_ref();

        storage
            .write(&r, Some(&codec::encode(&entity).unwrap()))
            .unwrap();
        assert_eq!(storage.read(&r).unwrap(), Some(entity.clone()));

        storage.write(&r, None).unwrap();
        assert_eq!(storage.read(&r).unwrap(), None);
        storage.write(&r, None).unwrap();
    }

    #[test]
    fn test_staged_write_is_invisible_until_promoted() {
        let dir = TempDir::new().unwrap();
        let storage = DirectoryStorage::open(dir.path()).unwrap();
        let entity = post("Hello");
        let r = entity.entity_ref();

        let pending = storage
            .stage(&r, Some(&codec::encode(&entity).unwrap()))
            .unwrap();
        assert_eq!(storage.read(&r).unwrap(), None);
        assert!(storage.read_all(EntityKind::Post).unwrap().is_empty());

        pending.promote().unwrap();
        assert_eq!(storage.read_all(EntityKind::Post).unwrap(), vec![entity]);
    }

    #[test]
    fn test_dropped_stage_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        let storage = DirectoryStorage::open(dir.path()).unwrap();
        let entity = post("Hello");

        drop(
            storage
                .stage(&entity.entity_ref(), Some(b"{}"))
                .unwrap(),
        );
        assert_eq!(fs::read_dir(dir.path().join("posts")).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_snapshot_surfaces() {
        let dir = TempDir::new().unwrap();
        let storage = DirectoryStorage::open(dir.path()).unwrap();
        let r = EntityRef::new(EntityKind::Post, VersionId::parse("BAD").unwrap());
        fs::write(storage.path_for(&r), b"{ broken").unwrap();

        assert!(matches!(storage.read(&r), Err(Error::CorruptData { .. })));
        assert!(storage.read_all(EntityKind::Post).is_err());
    }

    #[test]
    fn test_misplaced_snapshot_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let storage = DirectoryStorage::open(dir.path()).unwrap();
        let entity = post("Hello");
        let other = EntityRef::new(EntityKind::Post, VersionId::parse("OTHER").unwrap());
        fs::write(storage.path_for(&other), codec::encode(&entity).unwrap()).unwrap();

        assert!(matches!(storage.read(&other), Err(Error::CorruptData { .. })));
    }
}
