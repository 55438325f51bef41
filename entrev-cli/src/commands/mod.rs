pub mod log;
pub mod rollback;
pub mod serve;
pub mod show;
pub mod status;
pub mod undo;

use anyhow::{Context, Result};
use colored::Colorize;
use entrev_core::{Config, Error, RevertOutcome};
use entrev_server::api::SiteEngine;
use std::path::PathBuf;

const CONFIG_FILE: &str = ".entrev/config.toml";

pub fn load_config(path: Option<PathBuf>, root: Option<PathBuf>) -> Result<Config> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };

    let path = path.or_else(|| {
        let default = root.join(CONFIG_FILE);
        default.exists().then_some(default)
    });

    let config = match path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    Ok(config.rooted_at(root))
}

/// Opens an existing history; commands other than `serve` never create one.
pub fn open_engine(config: Config) -> Result<SiteEngine> {
    if !config.history_db.exists() {
        anyhow::bail!("No entrev history found. Run 'entrev serve' first.");
    }
    Ok(SiteEngine::open(config)?)
}

pub fn print_outcome(outcome: &RevertOutcome) {
    match &outcome.commit {
        Some(commit) => {
            println!("{}", "✓ Done".green().bold());
            println!("  {}: {}", "Commit".bold(), commit);
            println!("  {}: {}", "Reverted".bold(), outcome.reverted.len());
            println!("  {}: {}", "Entities resynced".bold(), outcome.resynced.len());
        }
        None => println!("{}", "Nothing to change".yellow()),
    }
}

/// Resync failures leave a durable commit behind; report them as warnings.
pub fn report(result: entrev_core::Result<RevertOutcome>) -> Result<()> {
    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(())
        }
        Err(Error::Resync { commit, reason }) => {
            println!("{}", "⚠ Reverted, but the live store is out of sync".yellow().bold());
            println!("  {}: {}", "Commit".bold(), commit);
            println!("  {}: {}", "Reason".bold(), reason);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_defaults_to_root() {
        let dir = TempDir::new().unwrap();
        let config = load_config(None, Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.storage_dir, dir.path().join(".entrev/snapshots"));
    }

    #[test]
    fn test_load_config_reads_default_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".entrev")).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "backend_timeout_ms = 99\n").unwrap();

        let config = load_config(None, Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.backend_timeout(), Duration::from_millis(99));
    }

    #[test]
    fn test_open_engine_requires_history() {
        let dir = TempDir::new().unwrap();
        let config = load_config(None, Some(dir.path().to_path_buf())).unwrap();
        assert!(open_engine(config).is_err());
    }
}
