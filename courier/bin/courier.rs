//! Sends a personalised message to everyone on a CSV list through an SMTP
//! relay, in paced batches, picking up where the last run stopped.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use courier::{Courier, Overrides};
use courier_common::logging;

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Resumable, rate-paced bulk mailer", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: $COURIER_CONFIG, ./courier.config.ron,
    /// /etc/courier/courier.config.ron)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sends per batch before a cooldown
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Seconds to pause between batches
    #[arg(long, global = true)]
    cooldown_secs: Option<u64>,

    /// Ledger file recording every attempt
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send to every recipient not yet delivered to
    Send {
        /// Recipient list (.csv with an `email` column)
        recipients: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Check that the relay accepts the configured credentials
    Verify,
    /// Show delivered and pending counts without sending
    Status {
        /// Recipient list (.csv with an `email` column)
        recipients: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let mut courier = load_config(cli.config.as_deref())?;
    courier.apply(Overrides {
        batch_size: cli.batch_size,
        cooldown_secs: cli.cooldown_secs,
        ledger: cli.ledger,
    });

    match cli.command {
        Command::Send { recipients, yes } => {
            courier.send(&recipients, yes).await?;
        }
        Command::Verify => courier.verify().await?,
        Command::Status { recipients } => {
            println!("{}", courier.status(&recipients).await?);
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<Courier> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file()?,
    };

    let Some(path) = path else {
        tracing::info!("No configuration file found, using defaults");
        return Ok(Courier::default());
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read config from {}: {e}", path.display()))?;

    Courier::from_ron(&content)
        .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// No file at all is fine; the defaults are used.
fn find_config_file() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(env_path) = std::env::var("COURIER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "COURIER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./courier.config.ron"),
        PathBuf::from("/etc/courier/courier.config.ron"),
    ];

    Ok(default_paths.into_iter().find(|path| path.exists()))
}
