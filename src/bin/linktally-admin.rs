use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use linktally::config::{Config, DatabaseBackend};
use linktally::migrate::{MigrationStore, Migrator};
use linktally::stats::{AggregationEngine, Granularity, SeriesQuery};
use linktally::store::{unix_now, LinkStore, PgStore, SqliteStore};

#[derive(Parser)]
#[command(name = "linktally-admin")]
#[command(about = "linktally maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or run schema migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Blank raw source addresses on visits older than the cutoff
    ScrubSources {
        /// Age threshold in days
        #[arg(long, default_value_t = 90)]
        older_than_days: i64,
    },
    /// Print a link's aggregate summary as JSON
    Stats {
        link_id: String,
        /// Restrict to one alias
        #[arg(long)]
        alias: Option<String>,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Show registered migrations and whether each is applied
    Status,
    /// Apply one named migration (idempotent)
    Apply { name: String },
    /// Revert one named migration (idempotent)
    Revert { name: String },
    /// Apply every pending migration in registry order
    Up,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match config.database.backend {
        DatabaseBackend::Sqlite => {
            let store =
                SqliteStore::new(&config.database.url, config.database.max_connections).await?;
            run(cli, Arc::new(store), &config).await
        }
        DatabaseBackend::Postgres => {
            let store =
                PgStore::new(&config.database.url, config.database.max_connections).await?;
            run(cli, Arc::new(store), &config).await
        }
    }
}

async fn run<S>(cli: Cli, store: Arc<S>, config: &Config) -> Result<()>
where
    S: LinkStore + MigrationStore + 'static,
{
    match cli.command {
        Commands::Migrate { action } => {
            // Migrations manage the schema themselves; only make sure the
            // base tables and the registry exist.
            store.ensure_base_schema().await?;
            let migrator = Migrator::registered(config.migration_batch_size);

            match action {
                MigrateAction::Status => {
                    for status in migrator.status(store.as_ref()).await? {
                        let mark = if status.applied { "applied" } else { "pending" };
                        println!("{:<20} {:<8} {}", status.name, mark, status.summary);
                    }
                }
                MigrateAction::Apply { name } => {
                    let report = migrator.apply(store.as_ref(), &name).await?;
                    println!(
                        "applied '{name}': {} transformed, {} skipped",
                        report.transformed, report.skipped
                    );
                }
                MigrateAction::Revert { name } => {
                    let report = migrator.revert(store.as_ref(), &name).await?;
                    println!(
                        "reverted '{name}': {} transformed, {} skipped",
                        report.transformed, report.skipped
                    );
                }
                MigrateAction::Up => {
                    let reports = migrator.up(store.as_ref()).await?;
                    if reports.is_empty() {
                        println!("no pending migrations");
                    }
                    for (name, report) in reports {
                        println!(
                            "applied '{name}': {} transformed, {} skipped",
                            report.transformed, report.skipped
                        );
                    }
                }
            }
        }
        Commands::ScrubSources { older_than_days } => {
            let cutoff = unix_now()? - older_than_days * 86_400;
            let scrubbed = store.scrub_sources(cutoff).await?;
            println!("scrubbed source addresses from {scrubbed} visits");
        }
        Commands::Stats { link_id, alias } => {
            let store: Arc<dyn LinkStore> = store;
            let engine =
                AggregationEngine::new(Arc::clone(&store), config.stats_cache.map(Into::into));

            let daily = engine
                .series(&SeriesQuery {
                    link_id: link_id.clone(),
                    alias: alias.clone(),
                    granularity: Granularity::Day,
                    range: None,
                })
                .await?;
            let breakdown = engine.breakdown(&link_id, alias.as_deref()).await?;

            let summary = serde_json::json!({
                "link_id": link_id,
                "alias": alias,
                "daily": daily,
                "breakdown": breakdown,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
