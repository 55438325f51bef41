use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use entrev_core::change::short_hash;
use entrev_core::Config;

pub async fn run(config: Config, hashes: Vec<String>, yes: bool) -> Result<()> {
    let engine = super::open_engine(config)?;

    println!("{}", "Undo Preview".bold().cyan());
    for hash in &hashes {
        let commit = engine.commit(hash).await?;
        println!(
            "  {} {}",
            short_hash(&commit.hash).yellow(),
            commit.message.summary()
        );
        for entity in commit.entities() {
            println!("      • {}", entity.to_string().dimmed());
        }
    }
    println!();

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Undo {} commit(s)?", hashes.len()))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted".yellow());
            return Ok(());
        }
    }

    println!("{}", "Undoing...".bold());
    super::report(engine.undo(&hashes).await)
}
