use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use siteindex_core::SiteId;
use siteindex_repo::GitRepositoryProvider;
use siteindex_storage::{PgIndexStore, RetryingIndexStore, SiteRegistry};
use siteindex_sync::{
    is_eligible, ClockScheduler, RecurringTask, RepositorySyncTask, SyncConfig, SyncOutcome,
    SYNC_TASK_NAME,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "siteindex")]
#[command(about = "Keeps the site index in step with each site's repository")]
struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted.
    Run,
    /// Sync one site from its watermark.
    Sync {
        #[arg(long)]
        site: String,
    },
    /// Replay a never-synced site from its first commit.
    Bootstrap {
        #[arg(long)]
        site: String,
    },
    /// Apply database migrations.
    Migrate,
    /// Show which ticks a task with the given cadence would run on.
    Schedule {
        #[arg(long)]
        interval: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 12)]
        ticks: u64,
    },
}

type SyncTask = RepositorySyncTask<GitRepositoryProvider, PgIndexStore>;

#[derive(Debug, Serialize)]
struct SiteSummary<'a> {
    site: &'a str,
    #[serde(flatten)]
    outcome: &'a SyncOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(load_config()?).await?,
        Commands::Sync { site } => {
            let task = connect(&load_config()?).await?;
            let outcome = task.sync_site(&SiteId::new(&site)).await?;
            print_outcome(cli.json, &site, &outcome)?;
        }
        Commands::Bootstrap { site } => {
            let task = connect(&load_config()?).await?;
            let outcome = task.bootstrap_site(&SiteId::new(&site)).await?;
            print_outcome(cli.json, &site, &outcome)?;
        }
        Commands::Migrate => {
            let config = load_config()?;
            let store = PgIndexStore::connect(&config.database_url, config.db_max_connections)
                .await
                .context("connecting to the index database")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Schedule {
            interval,
            offset,
            ticks,
        } => {
            anyhow::ensure!(interval > 0, "--interval must be at least 1");
            let due: Vec<u64> = (0..ticks)
                .filter(|tick| is_eligible(*tick, interval, offset))
                .collect();
            if cli.json {
                println!("{}", serde_json::to_string(&due)?);
            } else {
                let due: Vec<String> = due.iter().map(u64::to_string).collect();
                println!(
                    "interval={interval} offset={offset}: runs on ticks {}",
                    due.join(", ")
                );
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,siteindex=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config() -> Result<SyncConfig> {
    SyncConfig::from_env()
        .validate()
        .context("loading configuration from the environment")
}

async fn connect(config: &SyncConfig) -> Result<SyncTask> {
    let pg = PgIndexStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("connecting to the index database")?;
    let store = Arc::new(RetryingIndexStore::new(pg, config.retry_policy()));
    let repo = Arc::new(GitRepositoryProvider::new(config.repository_layout()));
    Ok(RepositorySyncTask::new(repo, store).with_cluster_node(config.cluster_node_id))
}

async fn run(config: SyncConfig) -> Result<()> {
    if !config.scheduler_enabled {
        info!("scheduler disabled; nothing to run");
        return Ok(());
    }

    let task = connect(&config).await?;
    let sites = Arc::new(SiteRegistry::new(Arc::clone(task.registry().store())));
    let mut scheduler = ClockScheduler::new(sites, config.site_run_timeout);
    scheduler.register(RecurringTask::new(
        SYNC_TASK_NAME,
        config.sync_every_n_cycles,
        config.sync_offset,
        Arc::new(task),
    )?);

    let mut ticker = Arc::new(scheduler)
        .start(config.tick_interval)
        .await
        .context("starting the sync scheduler")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down scheduler");
    ticker.shutdown().await.context("stopping the scheduler")?;
    Ok(())
}

fn print_outcome(json: bool, site: &str, outcome: &SyncOutcome) -> Result<()> {
    if json {
        let summary = SiteSummary { site, outcome };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    match outcome {
        SyncOutcome::Synced { applied, watermark } => {
            println!("{site}: applied {applied} commits, watermark={watermark}")
        }
        SyncOutcome::Conflict { applied } => {
            println!("{site}: watermark moved by another writer after {applied} commits")
        }
        other => println!("{site}: {other:?}"),
    }
    Ok(())
}
