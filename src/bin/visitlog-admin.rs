use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use visitlog::config::Config;
use visitlog::storage::{self, DayWindow};

#[derive(Parser)]
#[command(name = "visitlog-admin")]
#[command(about = "Visit tracker admin management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables if they do not exist
    Init,
    /// Print visit totals
    Stats {
        /// Include the visit count for this IP address
        #[arg(long)]
        ip: Option<String>,
    },
    /// Write a full export of both tables as JSON
    Export {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete all visits and IP statistics
    Purge {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = storage::connect(&config.database).await?;
    storage.ping().await.context("database health check failed")?;

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::Init => {
            println!("✓ Database tables are ready");
        }
        Commands::Stats { ip } => {
            let today = DayWindow::containing(Utc::now(), config.stats.offset()?);
            let caller = ip.as_deref().unwrap_or_default();
            let summary = storage.summary(caller, today).await?;

            println!("{:<16} {}", "Total visits", summary.total_visits);
            println!("{:<16} {}", "Unique IPs", summary.unique_ips);
            println!("{:<16} {}", "Today", summary.today_visits);
            if let Some(ip) = ip {
                println!("{:<16} {}", format!("Visits by {ip}"), summary.your_visits);
            }
        }
        Commands::Export { output } => {
            let bundle = storage.export().await?;
            let json = serde_json::to_string_pretty(&bundle)?;

            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!(
                        "✓ Exported {} visits and {} IP statistics to {}",
                        bundle.total_records,
                        bundle.ip_stats.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }
        Commands::Purge { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete all visit data without --yes");
            }
            storage.purge().await?;
            println!("✓ All visits and IP statistics deleted");
        }
    }

    storage.close().await;

    Ok(())
}
