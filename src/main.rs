use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info, warn};

#[cfg(feature = "browser")]
use farewatch::chrome_renderer::ChromeRenderer;
use farewatch::config::LoadFromEnv;
use farewatch::http_renderer::HttpRenderer;
use farewatch::search_unit::{date_range, load_units};
use farewatch::{
    BackendKind, CollectionReport, HistoryRecord, ObservationStore, PgStore, PricePoint, Progress,
    Renderer, RunnerKind, ScrapingConfig, ScrapingContext, SearchUnit, StoreConfig, TaskRunner,
    ThreadRunner, export_history_to_path, export_to_path, scrape_history, upsert,
};

/// Exit status of a run that finished without a single valid observation.
const NO_DATA_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "farewatch")]
#[command(about = "Collects the cheapest one-way fare per route and date")]
#[command(version)]
struct Cli {
    /// Searches in flight at once (overrides CONCURRENCY)
    #[arg(short, long, global = true)]
    concurrency: Option<usize>,

    /// Worker model (overrides RUNNER)
    #[arg(long, value_enum, global = true)]
    runner: Option<RunnerKind>,

    /// Page renderer (overrides BACKEND)
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the searches listed in a JSON parameters file
    Collect {
        /// JSON array of {origin, destination, date}
        #[arg(short, long)]
        params: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Search one route for every day of a date range
    Range {
        #[arg(long)]
        origin: String,
        #[arg(long)]
        destination: String,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        start: NaiveDate,
        /// Last day (inclusive), YYYY-MM-DD
        #[arg(long)]
        end: NaiveDate,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Read the price chart shown for one route and date
    History {
        #[arg(long)]
        origin: String,
        #[arg(long)]
        destination: String,
        /// Flight day, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Dump every stored observation to CSV
    Export {
        #[arg(short, long)]
        output: PathBuf,
        /// Dump stored price chart points instead
        #[arg(long)]
        history: bool,
    },

    /// Create the observation and price chart tables if they do not exist
    InitDb,
}

#[derive(Args)]
struct OutputArgs {
    /// Skip writing to the database
    #[arg(long)]
    no_persist: bool,

    /// Also write this run's observations to a CSV file
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::InitDb => {
            let store = connect_store().await?;
            store.init_schema().await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export { output, history } => {
            let store = connect_store().await?;
            if *history {
                export_history_to_path(output, &store.history().await?)?;
            } else {
                export_to_path(output, &store.all().await?)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::History {
            origin,
            destination,
            date,
            output,
        } => {
            let unit = SearchUnit::new(origin, destination, *date);
            history(&cli, unit, output).await
        }
        Commands::Collect { params, output } => {
            let units = load_units(params)?;
            collect(&cli, units, output).await
        }
        Commands::Range {
            origin,
            destination,
            start,
            end,
            output,
        } => {
            let units = date_range(origin, destination, *start, *end);
            collect(&cli, units, output).await
        }
    }
}

async fn connect_store() -> anyhow::Result<PgStore> {
    let config = StoreConfig::load_from_env().context("DATABASE_URL must be set")?;
    let store = PgStore::connect(&config)
        .await
        .context("failed to connect to the database")?;
    Ok(store)
}

fn load_config(cli: &Cli) -> anyhow::Result<ScrapingConfig> {
    let mut config = ScrapingConfig::new()?;
    if let Some(concurrency) = cli.concurrency {
        anyhow::ensure!(concurrency > 0, "--concurrency must be at least 1");
        config.concurrency = concurrency;
    }
    if let Some(runner) = cli.runner {
        config.runner = runner;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    Ok(config)
}

async fn collect(cli: &Cli, units: Vec<SearchUnit>, output: &OutputArgs) -> anyhow::Result<ExitCode> {
    let context = ScrapingContext::from_config(load_config(cli)?)?;
    // Fail on a missing database before spending time on searches.
    let store = if output.no_persist {
        None
    } else {
        Some(connect_store().await?)
    };

    if units.is_empty() {
        warn!("No searches to run");
        return Ok(ExitCode::from(NO_DATA_EXIT));
    }

    let report = match context.scraping_config.backend {
        BackendKind::Http => {
            let renderer = Arc::new(HttpRenderer::new(context.request_client()?));
            run_searches(&context, renderer, units).await?
        }
        #[cfg(feature = "browser")]
        BackendKind::Chrome => {
            let renderer = Arc::new(ChromeRenderer::launch(context.chrome_options()).await?);
            let report = run_searches(&context, Arc::clone(&renderer), units).await?;
            if let Ok(renderer) = Arc::try_unwrap(renderer) {
                renderer.close().await;
            }
            report
        }
        #[cfg(not(feature = "browser"))]
        BackendKind::Chrome => {
            anyhow::bail!("built without the `browser` feature; set BACKEND=http")
        }
    };

    if report.is_empty() {
        warn!(
            "No data collected: {} searches gave no usable flight",
            report.units()
        );
        return Ok(ExitCode::from(NO_DATA_EXIT));
    }

    if let Some(path) = &output.csv {
        export_to_path(path, &report.observations)?;
    }

    if let Some(store) = store {
        match upsert(&store, &report.observations).await {
            Ok(summary) => info!("Persisted {} observations", summary.inserted),
            Err(e) => {
                error!("Persistence stopped after {} rows", e.persisted);
                return Err(e.into());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn history(cli: &Cli, unit: SearchUnit, output: &OutputArgs) -> anyhow::Result<ExitCode> {
    let context = ScrapingContext::from_config(load_config(cli)?)?;
    let store = if output.no_persist {
        None
    } else {
        Some(connect_store().await?)
    };

    let points = match context.scraping_config.backend {
        BackendKind::Http => {
            let renderer = HttpRenderer::new(context.request_client()?);
            read_chart(&context, &renderer, &unit).await?
        }
        #[cfg(feature = "browser")]
        BackendKind::Chrome => {
            let renderer = ChromeRenderer::launch(context.chrome_options()).await?;
            let points = read_chart(&context, &renderer, &unit).await;
            renderer.close().await;
            points?
        }
        #[cfg(not(feature = "browser"))]
        BackendKind::Chrome => {
            anyhow::bail!("built without the `browser` feature; set BACKEND=http")
        }
    };

    if points.is_empty() {
        warn!("No price chart found for {unit}");
        return Ok(ExitCode::from(NO_DATA_EXIT));
    }

    let records = HistoryRecord::for_search(&unit, context.clock().now(), points);
    if let Some(path) = &output.csv {
        export_history_to_path(path, &records)?;
    }
    if let Some(store) = store {
        store.save_history(&records).await?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn read_chart<R: Renderer>(
    context: &ScrapingContext,
    renderer: &R,
    unit: &SearchUnit,
) -> anyhow::Result<Vec<PricePoint>> {
    let extractor = context.history_extractor();
    let points = scrape_history(renderer, &extractor, unit, context.scraping_config.page_timeout)
        .await
        .with_context(|| format!("failed to read the price chart for {unit}"))?;
    Ok(points)
}

async fn run_searches<R: Renderer>(
    context: &ScrapingContext,
    renderer: Arc<R>,
    units: Vec<SearchUnit>,
) -> anyhow::Result<CollectionReport> {
    let config = &context.scraping_config;
    let collector = context.collector(renderer);
    let progress = Arc::new(Progress::new(units.len()));
    let report = match config.runner {
        RunnerKind::Tasks => {
            let runner = TaskRunner::new(config.concurrency);
            collector.run(&runner, units, progress).await
        }
        RunnerKind::Threads => {
            let runner = ThreadRunner::new(config.concurrency)
                .context("failed to start the search worker threads")?;
            collector.run(&runner, units, progress).await
        }
    };
    Ok(report)
}
