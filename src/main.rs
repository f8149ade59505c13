mod auth;
mod config;
mod gcal;
mod lesson;
mod reconcile;
mod sync;
mod timetable;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "unisync")]
#[command(about = "Mirror a university timetable into a Google Calendar")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with Google Calendar and store tokens
    Auth,
    /// Keep the calendar in sync, one reconciliation pass per interval
    Run {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Auth => auth::cmd_auth().await,
        Commands::Run { once } => {
            let cfg = config::Config::from_env()?;
            if once {
                sync::update_schedule(&cfg).await
            } else {
                run_loop(cfg).await
            }
        }
    }
}

/// The perpetual supervisor: one pass per interval, forever. A failed pass
/// is logged and the loop simply waits for the next tick — nothing short of
/// process termination stops it. Passes never overlap because the next one
/// only starts after the previous one returned.
async fn run_loop(cfg: config::Config) -> Result<()> {
    loop {
        println!("🔄 Updating the schedule...");
        match sync::update_schedule(&cfg).await {
            Ok(()) => println!("✅ Schedule update finished."),
            Err(e) => eprintln!("⚠️ Schedule update failed: {e:#}"),
        }
        println!(
            "⏳ Next update in {} seconds.",
            cfg.update_interval.as_secs()
        );
        tokio::time::sleep(cfg.update_interval).await;
    }
}
