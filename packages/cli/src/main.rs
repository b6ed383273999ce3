#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the Maya notification scraper.
//!
//! Uses `indicatif-log-bridge` (via [`maya_cli_utils::init_logger`]) to
//! route `log` output through `indicatif::MultiProgress` so that log lines
//! and the record spinner never fight for the terminal.

mod pipeline;
mod sink;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use maya_database::{NotificationStore, notification_db};
use maya_notification_models::SOURCE;
use maya_scraper::period::split_period;

use crate::pipeline::ScrapeArgs;

#[derive(Parser)]
#[command(
    name = "maya_notifications",
    about = "Incremental scraper for Maya disclosure notifications"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape notifications newer than the stored watermark
    Scrape(ScrapeArgs),
    /// Print the window and periods the next scrape would cover
    Watermark {
        /// Database file (defaults to `$MAYA_DB_PATH` or `data/maya_notifications.duckdb`)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the stored record count and last sync time
    Stats {
        /// Database file (defaults to `$MAYA_DB_PATH` or `data/maya_notifications.duckdb`)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = maya_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape(args) => pipeline::run(args, &multi).await?,
        Commands::Watermark { db } => {
            let path = pipeline::db_path(db);
            let today = chrono::Local::now().date_naive();
            let window = pipeline::watermark_window(&path, SOURCE, today);

            println!("Window: {window}");
            for period in split_period(window) {
                println!("  {period}");
            }
        }
        Commands::Stats { db } => {
            let path = pipeline::db_path(db);
            let store = NotificationStore::connect(&path)?;
            let state = notification_db::sync_state(store.connection())?;

            println!("Database:       {}", path.display());
            println!("Records:        {}", state.record_count);
            println!(
                "Last synced at: {}",
                state.last_synced_at.as_deref().unwrap_or("never")
            );
            if let Some(status) = &state.last_run_status {
                println!(
                    "Last run:       {status} at {}",
                    state.last_run_at.as_deref().unwrap_or("?")
                );
            }
            if let Some(error) = &state.last_run_error {
                println!("Last error:     {error}");
            }
        }
    }

    Ok(())
}
