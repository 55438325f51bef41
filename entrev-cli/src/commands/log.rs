use anyhow::Result;
use colored::Colorize;
use entrev_core::Config;

pub async fn run(config: Config, page: usize, limit: usize) -> Result<()> {
    let engine = super::open_engine(config)?;
    let rows = engine.list_commit_rows(page, limit).await?;

    if rows.is_empty() {
        println!("{}", "No commits on this page".yellow());
        return Ok(());
    }

    println!("{}", "Commit History".bold().cyan());
    println!();

    let mut shown_activation_note = false;
    for row in &rows {
        if !row.is_enabled && !shown_activation_note {
            println!(
                "{}",
                "Changes below were made before tracking started and cannot be undone."
                    .dimmed()
            );
            println!();
            shown_activation_note = true;
        }

        let hash = if row.is_enabled {
            row.hash.yellow()
        } else {
            row.hash.dimmed()
        };
        println!("{} {}", "commit".yellow().bold(), hash);
        println!(
            "{}: {}",
            "Date".bold(),
            row.timestamp.format("%Y-%m-%d %H:%M:%S")
        );

        let mut flags = Vec::new();
        if row.can_undo {
            flags.push("undo".green().to_string());
        }
        if row.can_rollback {
            flags.push("rollback".cyan().to_string());
        }
        if !flags.is_empty() {
            println!("{}: {}", "Available".bold(), flags.join(", "));
        }
        println!();
        println!("    {}", row.summary);
        println!();

        for entity in row.entities.iter().take(5) {
            println!("      • {}", entity.to_string().dimmed());
        }
        if row.entities.len() > 5 {
            println!(
                "      {} and {} more...",
                "...".dimmed(),
                (row.entities.len() - 5).to_string().dimmed()
            );
        }

        println!();
    }

    if rows.len() == limit {
        println!("Use {} to see older commits", format!("--page {}", page + 1).cyan());
    }

    Ok(())
}
