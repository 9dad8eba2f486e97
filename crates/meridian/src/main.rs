//! CLI entry point.
//!
//! `serve` brings up the full stack described in [`meridian::server`];
//! `init` just runs migrations; `sync` runs one configured source
//! on-demand (the same path the scheduler takes on its cron tick);
//! `gc` sweeps tombstoned catalog entries past their retention window.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use meridian::catalog::ContentStore;
use meridian::collectors::{Collector, GitCollector, LinkScraperCollector, TicketCollector};
use meridian::config::{self, Config};
use meridian::embedding_provider::{build_embedder, Embedder};
use meridian::index::SqliteChunkStore;
use meridian::llm::{LlmProvider, OpenAiChatProvider};
use meridian::safety::{KeywordSafetyChecker, NullSafetyChecker, SafetyChecker};
use meridian::schedule::Scheduler;
use meridian::server::{self, AppState, Inner};
use meridian::tools::{RetrievalTool, Tool};
use meridian::{chat_store, db, migrate};
use meridian_core::search::SearchParams;
use meridian_core::store::ChunkStore;

#[derive(Parser)]
#[command(name = "meridian", about = "A retrieval-augmented conversational platform", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/meridian.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the chunk/vector index and chat/trace store schema
    Init,

    /// Ingest data from a configured source once, outside its cron schedule
    Sync {
        /// Source name as it appears in `sources.{web,git,tickets}`
        name: String,

        /// Ignore the existing catalog subtree and re-ingest everything
        #[arg(long)]
        full: bool,
    },

    /// Sweep tombstoned catalog entries past the retention window
    Gc,

    /// Start the HTTP/SSE server
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run(&pool).await?;
            println!("database initialized successfully.");
        }
        Commands::Sync { name, full } => {
            run_sync(&config, &name, full).await?;
        }
        Commands::Gc => {
            let catalog = ContentStore::open(&config.global.data_root)?;
            let removed = catalog.gc(config.utils.tombstone_retention_days)?;
            println!("removed {removed} tombstoned resource(s)");
        }
        Commands::Serve => {
            let state = build_state(config.clone()).await?;
            server::run(config, state).await?;
        }
    }

    Ok(())
}

async fn run_sync(config: &Config, name: &str, full: bool) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run(&pool).await?;
    let catalog = Arc::new(ContentStore::open(&config.global.data_root)?);
    let embedder = build_configured_embedder(config)?;
    let embedder_ref = embedder.as_deref();

    if let Some(web) = config.sources.web.iter().find(|w| w.name == name) {
        let collector = LinkScraperCollector::new(web.clone());
        run_named(&collector, web.reset_data || full, &catalog, &pool, config, embedder_ref).await?;
    } else if let Some(git) = config.sources.git.iter().find(|g| g.name == name) {
        let collector = GitCollector::new(git.clone(), config.global.data_root.clone());
        run_named(&collector, git.reset_data || full, &catalog, &pool, config, embedder_ref).await?;
    } else if let Some(ticket) = config.sources.tickets.iter().find(|t| t.name == name) {
        let collector = TicketCollector::new(ticket.clone());
        run_named(&collector, ticket.reset_data || full, &catalog, &pool, config, embedder_ref).await?;
    } else {
        anyhow::bail!("no configured source named {name:?}");
    }

    Ok(())
}

async fn run_named(
    collector: &dyn Collector,
    reset_data: bool,
    catalog: &Arc<ContentStore>,
    pool: &sqlx::SqlitePool,
    config: &Config,
    embedder: Option<&dyn Embedder>,
) -> anyhow::Result<()> {
    let report = meridian::ingest::run_collector(collector, reset_data, catalog, pool, config, embedder).await?;
    println!(
        "{}: seen {}, synced {}, {} error(s)",
        report.source,
        report.items_seen,
        report.items_synced,
        report.errors.len()
    );
    for err in &report.errors {
        eprintln!("  {err}");
    }
    Ok(())
}

fn build_configured_embedder(config: &Config) -> anyhow::Result<Option<Box<dyn Embedder>>> {
    if config.data_manager.embedding_provider == "disabled" {
        return Ok(None);
    }
    Ok(Some(build_embedder(&config.data_manager.embedding_provider, &config.data_manager.embedding_model, config.data_manager.embedding_dim)?))
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    let pool = db::connect(&config).await?;
    migrate::run(&pool).await?;

    let catalog = Arc::new(ContentStore::open(&config.global.data_root)?);
    let chunk_store = Arc::new(SqliteChunkStore::new(pool.clone()));
    let chat_store = Arc::new(chat_store::ChatStore::new(pool.clone()));

    let embedder = Arc::new(build_configured_embedder(&config)?);

    let mut providers: std::collections::HashMap<String, Arc<dyn LlmProvider>> = std::collections::HashMap::new();
    for (key, model) in &config.a2rchi.models {
        let provider: Arc<dyn LlmProvider> = match model.provider.as_str() {
            "openai" => Arc::new(OpenAiChatProvider::new(model.model_name.clone())),
            other => anyhow::bail!("unknown chat provider {other:?} for model {key:?}"),
        };
        providers.insert(key.clone(), provider);
    }
    if !providers.contains_key("default") {
        providers.insert("default".to_string(), Arc::new(OpenAiChatProvider::new("gpt-4o-mini".to_string())));
    }

    let search_params = SearchParams {
        bm25_k1: config.data_manager.bm25_k1,
        bm25_b: config.data_manager.bm25_b,
        distance_metric: config.data_manager.distance_metric,
        ..SearchParams::default()
    };

    let tools: Vec<Box<dyn Tool>> =
        vec![Box::new(RetrievalTool::new(chunk_store.clone() as Arc<dyn ChunkStore>, search_params.clone(), None, config.a2rchi.runtime.retrieval_k))];

    let safety: Arc<dyn SafetyChecker> = if config.a2rchi.safety_enabled {
        Arc::new(KeywordSafetyChecker::new(vec![]))
    } else {
        Arc::new(NullSafetyChecker)
    };

    let scheduler = Arc::new(Scheduler::new(pool.clone(), catalog.clone(), config.clone(), embedder.clone()));
    scheduler.reload();

    let runtime = tokio::sync::RwLock::new(config.a2rchi.runtime.clone());

    Ok(AppState(Arc::new(Inner {
        config,
        catalog,
        chunk_store,
        chat_store,
        pool,
        providers,
        embedder,
        tools: Arc::new(tools),
        safety,
        scheduler,
        active_traces: Arc::new(dashmap::DashMap::new()),
        search_params,
        runtime,
    })))
}
