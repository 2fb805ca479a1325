//! forge-cron - periodic operations runner
//!
//! Invoked by an external scheduler (cron, systemd timer) to run the
//! operations SocialForge does not tie to a user session: the due-publication
//! sweep, the all-account metrics sync, and snapshot retention. Each
//! invocation authenticates against the configured cron secret and prints a
//! JSON summary to stdout.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use libforge::config::Config;
use libforge::db::Database;
use libforge::platforms::Publisher;
use libforge::service::{self, MetricsService, PublishingService};
use libforge::vault::CredentialVault;

#[derive(Parser, Debug)]
#[command(name = "forge-cron")]
#[command(version)]
#[command(about = "Run SocialForge periodic operations")]
#[command(long_about = "\
forge-cron - Run SocialForge periodic operations

DESCRIPTION:
    forge-cron executes the maintenance operations of a SocialForge
    deployment. It is meant to be invoked by cron or a systemd timer.

COMMANDS:
    sweep            Dispatch due scheduled publications (batch of 10)
    sync-metrics     Refresh metrics for every active account
    purge-snapshots  Delete daily snapshots older than one year

USAGE EXAMPLES:
    # Every minute: dispatch due publications
    forge-cron sweep --secret \"$CRON_SECRET\"

    # Daily: refresh metrics and monetization tracking
    forge-cron sync-metrics --secret \"$CRON_SECRET\"

    # Weekly: enforce snapshot retention
    forge-cron purge-snapshots --secret \"$CRON_SECRET\"

CONFIGURATION:
    Configuration file: ~/.config/socialforge/config.toml
    Override with SOCIALFORGE_CONFIG.

    The secret must match [security].cron_secret in the configuration.

EXIT CODES:
    0 - Success
    1 - Operation failed
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Shared secret matching the configured cron_secret
    #[arg(long, env = "FORGE_CRON_SECRET", global = true)]
    secret: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch due scheduled publications
    Sweep,
    /// Refresh metrics for every active account
    SyncMetrics,
    /// Delete daily snapshots older than one year
    PurgeSnapshots,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    libforge::logging::init_default();

    let config = Config::load()?;
    service::verify_cron_secret(&config.security, cli.secret.as_deref())?;

    let db = Database::new(&config.database.path).await?;
    let vault = CredentialVault::new(&config.security.encryption_key)?;
    let publisher = Arc::new(Publisher::from_config(&config));

    match cli.command {
        Commands::Sweep => {
            let publishing = PublishingService::new(db, vault, publisher, &config);
            let report = publishing.sweep_due().await?;
            println!("{}", serde_json::to_string(&report)?);
        }
        Commands::SyncMetrics => {
            let metrics = MetricsService::new(db, vault, publisher);
            let report = metrics.sync_all().await?;
            println!("{}", serde_json::to_string(&report)?);
        }
        Commands::PurgeSnapshots => {
            let cutoff = (chrono::Utc::now() - chrono::Duration::days(365))
                .format("%Y-%m-%d")
                .to_string();
            let purged = db.purge_expired_snapshots(&cutoff).await?;
            info!(cutoff = %cutoff, purged, "snapshot retention enforced");
            println!("{}", serde_json::json!({ "purged": purged, "cutoff": cutoff }));
        }
    }

    Ok(())
}
