use crate::error::Result;
use crate::models::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage_dir: PathBuf,
    pub history_db: PathBuf,
    pub live_db: PathBuf,
    pub backend_timeout_ms: u64,
    /// Fields that never count as a change on their own, per kind.
    pub ignored_fields: BTreeMap<EntityKind, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let mut ignored_fields = BTreeMap::new();
        ignored_fields.insert(EntityKind::Post, vec!["comment_count".to_string()]);
        ignored_fields.insert(EntityKind::Term, vec!["count".to_string()]);

        Self {
            storage_dir: PathBuf::from(".entrev/snapshots"),
            history_db: PathBuf::from(".entrev/history.db"),
            live_db: PathBuf::from(".entrev/live.db"),
            backend_timeout_ms: 10_000,
            ignored_fields,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Resolves relative paths against `root`.
    pub fn rooted_at<P: AsRef<Path>>(mut self, root: P) -> Self {
        let root = root.as_ref();
        for path in [&mut self.storage_dir, &mut self.history_db, &mut self.live_db] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
        self
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn ignored(&self, kind: EntityKind) -> &[String] {
        self.ignored_fields
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
