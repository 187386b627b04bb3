//! gavel CLI: run the pipeline, poll once, inspect and reset the queue,
//! dump health, manage cities.

use std::str::FromStr;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use gavel::conductor::Conductor;
use gavel::config::Config;
use gavel::db::{
    City, CityStatus, JobPayload, MeetingJob, QueueStatus, SharedStore, Store,
};
use gavel::extract::PdfTextExtractor;
use gavel::fetch::HttpFetcher;
use gavel::processor::Processor;
use gavel::provider_limit::ProviderLimiter;
use gavel::rate_limit::RateLimiter;
use gavel::summarize::AnthropicProvider;
use gavel::types::{is_valid_banana, items_url, Vendor};
use gavel::vendors::AdapterContext;

#[derive(Parser)]
#[command(name = "gavel", version, about = "Civic agenda ingestion and summarization")]
struct Cli {
    /// Path to config.json (defaults to ~/.gavel/config.json)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the conductor loop until interrupted
    Run,
    /// Run a single poll + dispatch cycle, then exit
    Poll {
        /// Restrict the poll to one city
        #[arg(long, value_parser = parse_banana)]
        banana: Option<String>,
    },
    /// Queue maintenance
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    /// Dump the health report as JSON
    Health,
    /// Add or update a city
    AddCity(AddCityArgs),
    /// Stop polling a city (history is kept)
    Deactivate {
        #[arg(value_parser = parse_banana)]
        banana: String,
    },
    /// Re-enqueue a meeting for processing
    Reprocess {
        /// Meeting id (meeting:{banana}:{vendor_meeting_id})
        meeting_id: String,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Show status counts and the per-city breakdown
    Stats,
    /// Delete queue entries by status
    Reset {
        /// pending | claimed | completed | failed | all
        #[arg(long)]
        status: String,
        /// Required: reset is destructive
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Args)]
struct AddCityArgs {
    #[arg(long, value_parser = parse_banana)]
    banana: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    state: String,
    #[arg(long)]
    vendor: String,
    #[arg(long)]
    slug: String,
}

fn parse_banana(raw: &str) -> Result<String, String> {
    if is_valid_banana(raw) {
        Ok(raw.to_string())
    } else {
        Err(format!(
            "'{raw}' is not a valid city key (expected lowercase city + STATE, e.g. paloaltoCA)"
        ))
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let config = Arc::new(config);

    let store = Store::open_at(config.resolved_db_path())
        .map_err(|e| e.to_string())?
        .into_shared();

    match cli.command {
        Command::Run => {
            let conductor = build_conductor(store, config)?;
            let shutdown = conductor.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.notify_one();
                }
            });
            conductor.run().await;
            Ok(())
        }

        Command::Poll { banana } => {
            let conductor = build_conductor(store, config)?;
            match banana {
                Some(banana) => conductor.tick_city(&banana).await?,
                None => conductor.tick().await,
            }
            Ok(())
        }

        Command::Queue { command } => queue_command(&store, &config, command),

        Command::Health => {
            let guard = store.lock();
            let report = guard.health_report().map_err(|e| e.to_string())?;
            let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
            println!("{json}");
            Ok(())
        }

        Command::AddCity(args) => {
            let vendor = Vendor::from_str(&args.vendor)?;
            let city = City {
                banana: args.banana,
                name: args.name,
                state: args.state.to_uppercase(),
                vendor,
                slug: args.slug,
                status: CityStatus::Active,
            };
            let guard = store.lock();
            guard.upsert_city(&city).map_err(|e| e.to_string())?;
            println!("ok: {} ({} / {})", city.banana, vendor, city.slug);
            Ok(())
        }

        Command::Deactivate { banana } => {
            let guard = store.lock();
            if guard.deactivate_city(&banana).map_err(|e| e.to_string())? {
                println!("deactivated {banana}");
                Ok(())
            } else {
                Err(format!("unknown city: {banana}"))
            }
        }

        Command::Reprocess { meeting_id } => {
            let guard = store.lock();
            let meeting = guard
                .get_meeting(&meeting_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("unknown meeting: {meeting_id}"))?;

            // Meetings with persisted items re-run from the store; the rest
            // re-run from their source URL.
            let has_items = !guard
                .get_items_with_attachments(&meeting.id)
                .map_err(|e| e.to_string())?
                .is_empty();
            let source_url = if has_items {
                items_url(&meeting.id)
            } else {
                meeting
                    .source_url()
                    .ok_or("meeting has no source URL")?
                    .to_string()
            };

            match guard
                .enqueue(&JobPayload::Meeting(MeetingJob {
                    meeting_id: meeting.id.clone(),
                    source_url,
                }))
                .map_err(|e| e.to_string())?
            {
                Some(id) => println!("enqueued {id}"),
                None => println!("already queued"),
            }
            Ok(())
        }
    }
}

fn queue_command(
    store: &SharedStore,
    _config: &Arc<Config>,
    command: QueueCommand,
) -> Result<(), String> {
    let guard = store.lock();
    match command {
        QueueCommand::Stats => {
            let stats = guard.queue_stats().map_err(|e| e.to_string())?;
            println!("{:<12} {:>6}", "pending", stats.pending);
            println!("{:<12} {:>6}", "claimed", stats.claimed);
            println!("{:<12} {:>6}", "completed", stats.completed);
            println!("{:<12} {:>6}", "failed", stats.failed);
            println!("{:<12} {:>6}", "TOTAL", stats.total());

            let breakdown = guard.queue_stats_by_city().map_err(|e| e.to_string())?;
            if !breakdown.is_empty() {
                println!();
                println!(
                    "{:<20} {:>8} {:>8} {:>10} {:>8}",
                    "city", "pending", "claimed", "completed", "failed"
                );
                let mut cities: Vec<_> = breakdown.into_iter().collect();
                cities.sort_by(|a, b| a.0.cmp(&b.0));
                for (banana, stats) in cities {
                    println!(
                        "{:<20} {:>8} {:>8} {:>10} {:>8}",
                        banana, stats.pending, stats.claimed, stats.completed, stats.failed
                    );
                }
            }
            Ok(())
        }

        QueueCommand::Reset { status, confirm } => {
            if !confirm {
                return Err("--reset requires --confirm".to_string());
            }
            let filter = match status.as_str() {
                "all" => None,
                other => Some(QueueStatus::from_str(other)?),
            };
            let deleted = guard.reset_queue(filter).map_err(|e| e.to_string())?;
            println!("deleted {deleted} queue entries");
            Ok(())
        }
    }
}

fn build_conductor(store: SharedStore, config: Arc<Config>) -> Result<Conductor, String> {
    let fetcher = Arc::new(HttpFetcher::new().map_err(|e| e.to_string())?);
    let adapter_ctx = AdapterContext {
        fetcher: fetcher.clone(),
        limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
    };
    let provider_limiter = Arc::new(ProviderLimiter::new(&config.provider));
    let provider = Arc::new(
        AnthropicProvider::new(&config.provider, provider_limiter).map_err(|e| e.to_string())?,
    );

    // Free tier: the fast text path only. An OCR-grade fallback would be
    // wired here behind the same TextExtractor trait.
    let fallback = None;

    let processor = Arc::new(Processor::new(
        store.clone(),
        fetcher,
        adapter_ctx.clone(),
        provider,
        Arc::new(PdfTextExtractor),
        fallback,
        config.clone(),
    ));

    Ok(Conductor::new(store, processor, adapter_ctx, config))
}
