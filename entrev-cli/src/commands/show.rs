use anyhow::Result;
use colored::Colorize;
use entrev_core::diff::DiffLineType;
use entrev_core::{Config, Diff, FieldChange, Transition};

pub async fn run(config: Config, hash: String) -> Result<()> {
    let engine = super::open_engine(config)?;
    let (commit, diffs) = engine.commit_diffs(&hash).await?;

    println!("{}", format!("Commit {}", commit.hash).bold().cyan());
    println!(
        "{}: {}",
        "Date".bold(),
        commit.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    println!();
    for line in commit.message.to_string().lines() {
        println!("    {}", line);
    }
    println!();

    if diffs.is_empty() {
        println!("{}", "No entity changes in this commit".yellow());
        return Ok(());
    }

    for diff in &diffs {
        print_diff(diff);
    }

    Ok(())
}

fn print_diff(diff: &Diff) {
    println!("{}", "━".repeat(80).bright_black());

    let status = match diff.transition {
        Transition::Insert => "NEW".green(),
        Transition::Update => "MOD".yellow(),
        Transition::Delete => "DEL".red(),
    };
    println!(
        "{} {}/{}",
        status,
        diff.kind,
        diff.vp_id.to_string().white().bold()
    );
    println!();

    for (name, change) in &diff.fields {
        println!("  {}", name.bold());
        print_field(change);
    }
    println!();
}

fn print_field(change: &FieldChange) {
    match change.text_lines() {
        Some(lines) => {
            for line in &lines {
                let (prefix, color): (&str, fn(&str) -> colored::ColoredString) =
                    match line.line_type {
                        DiffLineType::Addition => ("+", |s| s.green()),
                        DiffLineType::Deletion => ("-", |s| s.red()),
                        DiffLineType::Context => (" ", |s| s.normal()),
                    };
                let text = line.content.trim_end_matches('\n');
                println!("    {}", color(&format!("{}{}", prefix, text)));
            }
        }
        None => {
            let show = |v: &Option<entrev_core::Value>| {
                v.as_ref()
                    .map(|v| v.display())
                    .unwrap_or_else(|| "(absent)".to_string())
            };
            println!("    {}", format!("-{}", show(&change.old)).red());
            println!("    {}", format!("+{}", show(&change.new)).green());
        }
    }
}
