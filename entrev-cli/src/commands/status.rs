use anyhow::Result;
use colored::Colorize;
use entrev_core::{Config, EntityKind};

pub async fn run(config: Config) -> Result<()> {
    if !config.history_db.exists() {
        println!("{}", "No entrev history found".red());
        println!("Run {} to start tracking", "entrev serve".cyan());
        return Ok(());
    }

    let engine = super::open_engine(config)?;

    println!("{}", "Tracking Status".bold().cyan());
    println!(
        "  {}: {}",
        "Snapshots".bold(),
        engine.storage().root().display()
    );

    let latest = engine.list_commit_rows(0, 1).await?;
    match latest.first() {
        Some(row) => println!(
            "  {}: {} {}",
            "Latest".bold(),
            entrev_core::change::short_hash(&row.hash).yellow(),
            row.summary
        ),
        None => println!("  {}: {}", "Latest".bold(), "no commits yet".dimmed()),
    }
    println!();

    println!("{}", "Tracked entities:".bold());
    for kind in EntityKind::ALL {
        let count = engine.storage().list_ids(kind)?.len();
        println!("  {:<10} {}", kind.directory(), count.to_string().cyan());
    }
    println!();

    let selectable = engine.selectable_commits().await?;
    if selectable.is_empty() {
        println!("{}", "No commits can be undone".yellow());
    } else {
        println!(
            "{} {}",
            "Undoable commits:".bold(),
            format!("({})", selectable.len()).green()
        );
        println!(
            "Run {} to undo one",
            "entrev undo <hash>".cyan()
        );
    }

    Ok(())
}
