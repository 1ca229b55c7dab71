mod config;
mod http;
mod scheduler;

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use umg_core::{
    Archivist, ContextAssembler, DigestGenerator, EmbeddingService, EventInbox, FastEmbedService,
    FeedbackProcessor, HnswIndex, OpenAiLlmClient, RedbStorage, RelationshipEngine, RunMode, Storage,
    VectorIndex,
};

use config::ServerConfig;

#[derive(Parser)]
#[command(name = "umg-server")]
#[command(about = "Universal Memory Graph server")]
struct Cli {
    #[command(flatten)]
    config: ServerConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP listener plus the Archivist poll loop and nightly timer.
    Serve,
    /// Drain pending events once and exit.
    Process,
    /// Print the same counters as `GET /status`.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.config.ensure_data_dir()?;
    let engine_config = cli.config.engine_config();
    engine_config.validate()?;

    let storage = Arc::new(RedbStorage::open(cli.config.db_path())?);
    let embeddings = Arc::new(FastEmbedService::new()?);
    let llm = Arc::new(OpenAiLlmClient::new(cli.config.llm_config())?);

    info!("Rebuilding vector index from existing embeddings...");
    let vector_index: Arc<RwLock<dyn VectorIndex>> =
        Arc::new(RwLock::new(build_vector_index(&storage, &embeddings)?));

    let inbox = Arc::new(EventInbox::with_max_retries(storage.clone(), engine_config.max_event_retries));
    let archivist = Arc::new(
        Archivist::new(storage.clone(), llm.clone(), embeddings.clone(), engine_config.clone())
            .with_vector_index(vector_index.clone()),
    );
    let relationship_engine = Arc::new(
        RelationshipEngine::new(storage.clone(), llm.clone(), embeddings.clone(), engine_config.clone())
            .with_vector_index(vector_index.clone()),
    );

    match cli.command {
        Command::Serve => {
            let state = http::AppState {
                storage: storage.clone(),
                inbox,
                archivist: archivist.clone(),
                relationship_engine: relationship_engine.clone(),
                context_assembler: Arc::new(ContextAssembler::new(storage.clone())),
                digest_generator: Arc::new(DigestGenerator::new(storage.clone(), llm.clone())),
                feedback: Arc::new(FeedbackProcessor::new(storage.clone())),
                llm: llm.clone(),
                llm_model: cli.config.llm_model.clone(),
                config: engine_config.clone(),
                start_time: Instant::now(),
            };

            scheduler::spawn_archivist_loop(
                archivist,
                relationship_engine.clone(),
                Duration::from_secs(engine_config.archivist_poll_interval_sec),
            );
            scheduler::spawn_nightly_loop(relationship_engine, engine_config.nightly_hour_local);

            let app = http::create_router(state);
            let listener = tokio::net::TcpListener::bind(cli.config.http_addr).await?;
            info!("umg-server listening on {}", cli.config.http_addr);
            axum::serve(listener, app).await?;
        }
        Command::Process => {
            let results = archivist.drain_pending(1000).await?;
            info!("processed {} events", results.len());
            for result in &results {
                if !result.trigger_entity_ids.is_empty() {
                    relationship_engine.run(RunMode::Incremental, &result.trigger_entity_ids).await?;
                }
            }
        }
        Command::Status => {
            let stats = storage.stats()?;
            println!(
                "pending={} processed={} failed={} entities={} edges={}",
                stats.pending_events, stats.processed_events, stats.failed_events, stats.entity_count, stats.edge_count
            );
        }
    }

    Ok(())
}

/// Scans every persisted embedding under the active model and reinserts it,
/// looking up each chunk's owning entity's type for filtered search.
fn build_vector_index(
    storage: &Arc<RedbStorage>,
    embeddings: &Arc<FastEmbedService>,
) -> anyhow::Result<HnswIndex> {
    let mut index = HnswIndex::new(embeddings.dimension());
    let records = storage.all_embeddings(embeddings.model_id())?;
    let mut indexed = 0;
    for record in &records {
        let Some(chunk) = storage.get_chunk(record.chunk_id)? else {
            continue;
        };
        let Some(entity) = storage.get_entity(chunk.entity_id)? else {
            continue;
        };
        if index.insert(record.chunk_id, &record.vector, entity.entity_type).is_ok() {
            indexed += 1;
        }
    }
    if indexed > 0 {
        index.rebuild()?;
    }
    info!("vector index ready: {indexed} chunk embeddings indexed");
    Ok(index)
}
