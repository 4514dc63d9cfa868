mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use rfp_scout::{
    export, fetchers::DEFAULT_USER_AGENT, BidFilter, BidStore, EntityFilter, EntityKind,
    EntityRegistry, HttpFetcher, OpenAiOracle, OracleCredentials, Pipeline, RateLimitedFetcher,
    RobotsCache, RunSummary, SqliteStore, ValidatedFetcher,
};

#[derive(Parser)]
#[command(name = "rfp-scout", about = "Find construction RFPs on government procurement sites")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register entities (the 50 states + DC, and/or a JSON seed file)
    Seed {
        #[arg(long)]
        states: bool,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List registered entities
    Entities(Scope),
    /// Resolve procurement sites for matching entities
    Resolve(Scope),
    /// Scan stored verified sites for bids
    Scan(ScanArgs),
    /// Resolve then scan
    Run(ScanArgs),
    /// Export stored bids
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct Scope {
    /// State name; matches the state and everything under it
    #[arg(long)]
    state: Option<String>,
    /// Entity kind (state, county, city, town, agency, university)
    #[arg(long)]
    kind: Option<EntityKind>,
}

impl Scope {
    fn entity_filter(&self) -> EntityFilter {
        let mut filter = EntityFilter::new();
        if let Some(state) = &self.state {
            filter = filter.with_state(state.as_str());
        }
        if let Some(kind) = self.kind {
            filter = filter.with_kind(kind);
        }
        filter
    }

    fn bid_filter(&self) -> BidFilter {
        let mut filter = BidFilter::new();
        if let Some(state) = &self.state {
            filter = filter.with_state(state.as_str());
        }
        if let Some(kind) = self.kind {
            filter = filter.with_kind(kind);
        }
        filter
    }
}

#[derive(Args)]
struct ScanArgs {
    #[command(flatten)]
    scope: Scope,
    /// Only crawl listing pages
    #[arg(long)]
    no_deep: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

type LiveFetcher = RateLimitedFetcher<ValidatedFetcher<HttpFetcher>>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rfp_scout=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = Arc::new(
        SqliteStore::new(&config.database_url)
            .await
            .context("Failed to open database")?,
    );

    match cli.command {
        Command::Seed { states, file } => seed(&store, states, file).await,
        Command::Entities(scope) => list_entities(&store, &scope).await,
        Command::Resolve(scope) => {
            let pipeline = build_pipeline(&config, store, true)?;
            let summary = pipeline.resolve_entities(&scope.entity_filter()).await?;
            print_summary(&summary)
        }
        Command::Scan(args) => {
            let pipeline = build_pipeline(&config, store, !args.no_deep)?;
            let summary = pipeline.scan_entities(&args.scope.entity_filter()).await?;
            print_summary(&summary)
        }
        Command::Run(args) => {
            let pipeline = build_pipeline(&config, store, !args.no_deep)?;
            let summary = pipeline.run(&args.scope.entity_filter()).await?;
            print_summary(&summary)
        }
        Command::Export { format, scope, out } => export_bids(&store, format, &scope, out).await,
    }
}

async fn seed(store: &SqliteStore, states: bool, file: Option<PathBuf>) -> Result<()> {
    let registry = EntityRegistry::new(store);
    if !states && file.is_none() {
        warn!("Nothing to seed; pass --states and/or --file");
        return Ok(());
    }
    if states {
        let counts = registry.seed_us_states().await?;
        println!("states: {} inserted, {} updated", counts.inserted, counts.updated);
    }
    if let Some(path) = file {
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let counts = registry.seed_from_json(&json).await?;
        println!("{}: {} inserted, {} updated", path.display(), counts.inserted, counts.updated);
    }
    Ok(())
}

async fn list_entities(store: &SqliteStore, scope: &Scope) -> Result<()> {
    let entities = EntityRegistry::new(store)
        .list_entities(&scope.entity_filter())
        .await?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entity in &entities {
        writeln!(out, "{}\t{}\t{}", entity.kind, entity.status, entity.name)?;
    }
    Ok(())
}

fn build_pipeline(
    config: &Config,
    store: Arc<SqliteStore>,
    deep_scan: bool,
) -> Result<Pipeline<SqliteStore, LiveFetcher, OpenAiOracle>> {
    let pipeline_config = config.pipeline.clone().with_deep_scan(deep_scan);
    let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);

    let http = HttpFetcher::with_user_agent(pipeline_config.fetch_timeout, user_agent)?;
    let fetcher = RateLimitedFetcher::new(ValidatedFetcher::new(http), pipeline_config.requests_per_second);

    let mut credentials = OracleCredentials::new(config.require_api_key()?.expose(), config.oracle_model.as_str());
    if let Some(base_url) = &config.oracle_base_url {
        credentials = credentials.with_base_url(base_url.as_str());
    }
    let oracle = OpenAiOracle::new(credentials, pipeline_config.oracle_timeout)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight entities");
            on_signal.cancel();
        }
    });

    info!(
        model = %config.oracle_model,
        concurrency = pipeline_config.concurrency,
        deep_scan,
        "Pipeline ready"
    );

    Ok(Pipeline::new(store, fetcher, oracle)
        .with_config(pipeline_config)
        .with_robots(Arc::new(RobotsCache::new(user_agent)))
        .with_cancellation(cancel))
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

async fn export_bids(
    store: &SqliteStore,
    format: ExportFormat,
    scope: &Scope,
    out: Option<PathBuf>,
) -> Result<()> {
    let bids = store.list_bids(&scope.bid_filter()).await?;
    let writer: Box<dyn Write> = match &out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    match format {
        ExportFormat::Csv => export::write_csv(writer, &bids)?,
        ExportFormat::Json => export::write_json(writer, &bids)?,
    }
    info!(count = bids.len(), "Exported bids");
    Ok(())
}
