use anyhow::Result;
use colored::Colorize;
use entrev_core::Config;
use entrev_server::EntrevServer;

pub async fn run(config: Config, port: u16) -> Result<()> {
    println!("{}", "Starting entrev server...".bold().cyan());
    println!("   {}: {:?}", "Snapshots".bold(), config.storage_dir);
    println!("   {}: {:?}", "History".bold(), config.history_db);
    println!("   {}: {:?}", "Live store".bold(), config.live_db);

    let server = EntrevServer::new(config)?;

    println!(
        "   {}: {}",
        "API Server".bold(),
        format!("http://localhost:{}", port).green()
    );
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    let addr = format!("0.0.0.0:{}", port).parse()?;
    server.serve(addr).await?;

    Ok(())
}
