use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use auel_core::RawEvent;
use auel_sink::{MySqlSink, PostgresSink, SinkWriter};
use auel_sync::{
    Dispatcher, HaEventStore, HistoricalEvent, MigrationTally, Migrator, ProgressHook, RelayConfig,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "auel-cli")]
#[command(about = "App usage event relay and backfill tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Normalize one event and write it to every configured sink.
    Store {
        /// Raw event as a JSON object; read from stdin when omitted.
        #[arg(long)]
        json: Option<String>,
    },
    /// Copy historical events from the Home Assistant store into the
    /// cloud replica, skipping already-migrated rows.
    Migrate {
        /// Source SQLite database; defaults to $HA_DB_PATH.
        #[arg(long)]
        source: Option<PathBuf>,
        /// Target connection string; defaults to $NEON_DATABASE_URL.
        #[arg(long)]
        target_url: Option<String>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Skip the interactive confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Serve the dashboard read API.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8093")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = RelayConfig::from_env();

    match cli.command {
        Commands::Store { json } => store(&config, json).await,
        Commands::Migrate {
            source,
            target_url,
            batch_size,
            yes,
        } => migrate(&config, source, target_url, batch_size, yes).await,
        Commands::Serve { bind } => {
            let state = auel_web::AppState::connect_lazy(&config.cloud_database_url)?;
            auel_web::serve(&bind, state).await
        }
    }
}

async fn store(config: &RelayConfig, json: Option<String>) -> Result<()> {
    let text = match json {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading event from stdin")?;
            buffer
        }
    };
    let raw: RawEvent = serde_json::from_str(&text).context("event must be a JSON object")?;

    let sink_config = config.sink_config();
    let local = MySqlSink::new("local", &config.local_database_url, &sink_config)?;
    let cloud = PostgresSink::new("cloud", &config.cloud_database_url, &sink_config)?;
    let dispatcher = Dispatcher::new(vec![Box::new(local), Box::new(cloud)]);

    // Fire-and-forget semantics: per-sink failures show up in the outcome
    // map and the logs, not in the exit code.
    let outcomes = dispatcher.dispatch(&raw).await;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}

async fn migrate(
    config: &RelayConfig,
    source: Option<PathBuf>,
    target_url: Option<String>,
    batch_size: Option<usize>,
    assume_yes: bool,
) -> Result<()> {
    let source_path = source.unwrap_or_else(|| config.ha_db_path.clone());
    let target_url = target_url.unwrap_or_else(|| config.cloud_database_url.clone());
    let batch_size = batch_size.unwrap_or(config.batch_size);

    let source = HaEventStore::open(&source_path)
        .with_context(|| format!("opening source database {}", source_path.display()))?;
    let target = PostgresSink::new("cloud", &target_url, &config.sink_config())?;
    target.ping().await.context("target database unreachable")?;
    target
        .ensure_schema()
        .await
        .context("preparing target schema")?;

    let events = source.fetch_events(&config.event_type).await?;
    if events.is_empty() {
        println!("No events found. Nothing to migrate.");
        return Ok(());
    }

    println!(
        "Found {} events in {}",
        events.len(),
        source_path.display()
    );
    if let Some(sample) = events.first() {
        println!(
            "Sample: event_id={} app={} event={} fired={}",
            sample.source_id,
            field_or_unknown(sample, "app_name"),
            field_or_unknown(sample, "event_name"),
            sample.occurred_at
        );
    }
    println!("Events by app:");
    for (app, count) in events_by_app(&events) {
        println!("  {app}: {count}");
    }

    if !assume_yes {
        let prompt = format!(
            "Ready to migrate {} events to the target. Continue? (yes/no): ",
            events.len()
        );
        if !confirm(&prompt)? {
            println!("Migration cancelled.");
            return Ok(());
        }
    }

    let mut progress = PrintingProgress {
        total: events.len(),
    };
    let summary = Migrator::new(batch_size)
        .migrate(&events, &target, &mut progress)
        .await;

    println!(
        "Migration complete: {} inserted, {} skipped, {} errored ({} total, run {})",
        summary.tally.inserted,
        summary.tally.skipped,
        summary.tally.errored,
        summary.total,
        summary.run_id
    );
    Ok(())
}

struct PrintingProgress {
    total: usize,
}

impl ProgressHook for PrintingProgress {
    fn checkpoint(&mut self, processed: usize, tally: &MigrationTally) {
        println!(
            "  progress: {processed}/{} ({} inserted, {} skipped, {} errored)",
            self.total, tally.inserted, tally.skipped, tally.errored
        );
    }
}

fn field_or_unknown<'a>(event: &'a HistoricalEvent, key: &str) -> &'a str {
    event
        .raw
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

fn events_by_app(events: &[HistoricalEvent]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts
            .entry(field_or_unknown(event, "app_name").to_string())
            .or_default() += 1;
    }
    counts
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
