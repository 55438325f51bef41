use anyhow::Result;
use colored::Colorize;
use entrev_core::change::short_hash;
use entrev_core::Config;

pub async fn run(config: Config, hash: String, execute: bool) -> Result<()> {
    let engine = super::open_engine(config)?;
    let target = engine.commit(&hash).await?;

    println!("{}", "Rollback Preview".bold().cyan());
    println!("  {}: {}", "Target Commit".bold(), target.hash);
    println!("  {}: {}", "Message".bold(), target.message.summary());
    println!(
        "  {}: {}",
        "Date".bold(),
        target.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    println!();

    let later = engine.commits_after(&target.hash).await?;

    if later.is_empty() {
        println!("{}", "Target is already the latest commit".yellow());
        return Ok(());
    }

    println!("{}", "Commits to be reverted:".bold());
    for commit in &later {
        println!(
            "  {} {}",
            short_hash(&commit.hash).yellow(),
            commit.message.summary()
        );
    }
    println!();

    if !execute {
        println!("{}", "This is a preview only.".yellow());
        println!(
            "Run with {} to actually perform the rollback",
            "--execute".cyan()
        );
        return Ok(());
    }

    println!("{}", "Performing rollback...".bold());
    super::report(engine.rollback(&hash).await)
}
