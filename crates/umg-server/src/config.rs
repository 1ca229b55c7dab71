use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use umg_core::EngineConfig;

/// Server-level configuration, loaded from CLI flags with environment
/// fallbacks — one field per engine tunable, plus the process-topology
/// knobs (`http_addr`, `data_dir`) the engine config itself has no opinion on.
#[derive(Parser, Debug, Clone)]
#[command(name = "umg-server")]
#[command(about = "Universal Memory Graph server")]
pub struct ServerConfig {
    /// HTTP listen address.
    #[arg(long, env = "UMG_HTTP_ADDR", default_value = "0.0.0.0:8787")]
    pub http_addr: SocketAddr,

    /// Directory holding the redb database file.
    #[arg(long, env = "UMG_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// LLM provider API key (required to run `serve`; optional for `status`).
    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    pub llm_api_key: String,

    /// LLM provider chat-completions endpoint.
    #[arg(long, env = "LLM_API_URL", default_value = "https://api.openai.com/v1/chat/completions")]
    pub llm_api_url: String,

    /// LLM model id.
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,

    #[arg(long, env = "MIN_CONFIDENCE", default_value = "0.3")]
    pub min_confidence: f32,

    #[arg(long, env = "DECAY_FACTOR", default_value = "0.99")]
    pub decay_factor: f32,

    #[arg(long, env = "PRUNE_THRESHOLD", default_value = "0.1")]
    pub prune_threshold: f32,

    #[arg(long, env = "EMBEDDING_SIMILARITY_THRESHOLD", default_value = "0.75")]
    pub embedding_similarity_threshold: f32,

    #[arg(long, env = "CHUNK_SIZE", default_value = "1000")]
    pub chunk_size: usize,

    #[arg(long, env = "CHUNK_OVERLAP", default_value = "100")]
    pub chunk_overlap: usize,

    #[arg(long, env = "ARCHIVIST_POLL_INTERVAL_SEC", default_value = "60")]
    pub archivist_poll_interval_sec: u64,

    #[arg(long, env = "NIGHTLY_HOUR_LOCAL", default_value = "3")]
    pub nightly_hour_local: u8,

    /// Rollout/shadow mode: edge commits are logged, never written.
    #[arg(long, env = "UMG_SHADOW_MODE", default_value = "false")]
    pub shadow_mode: bool,
}

impl ServerConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("umg.redb")
    }

    pub fn ensure_data_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            min_confidence: self.min_confidence,
            decay_factor: self.decay_factor,
            prune_threshold: self.prune_threshold,
            embedding_similarity_threshold: self.embedding_similarity_threshold,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            archivist_poll_interval_sec: self.archivist_poll_interval_sec,
            nightly_hour_local: self.nightly_hour_local,
            shadow_mode: self.shadow_mode,
            ..EngineConfig::default()
        }
    }

    pub fn llm_config(&self) -> umg_core::LlmConfig {
        umg_core::LlmConfig {
            api_url: self.llm_api_url.clone(),
            api_key: self.llm_api_key.clone(),
            model: self.llm_model.clone(),
            timeout: std::time::Duration::from_secs(30),
        }
    }
}
