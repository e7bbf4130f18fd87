use answerpipe::coordinator::FanOutCoordinator;
use answerpipe::orchestrator::Orchestrator;
use answerpipe::registry::{ArxivSearchTool, ToolRegistry, WebSearchTool};
use answerpipe::server::{router, AppState};
use answerpipe_web::arxiv::ArxivClient;
use answerpipe_web::model::{ModelClient, ModelConfig};
use answerpipe_web::search::{SearchConfig, SerperClient};
use answerpipe_web::{FetchConfig, FetchEngine};
use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "answerpipe")]
#[command(about = "Streaming question answering with web/paper tool fan-out", long_about = None)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "ANSWERPIPE_LISTEN", default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Base URL of an OpenAI-compatible chat-completions service.
    #[arg(long, env = "ANSWERPIPE_MODEL_BASE_URL")]
    model_base_url: String,

    /// API key for the model service.
    #[arg(long, env = "ANSWERPIPE_MODEL_API_KEY")]
    model_api_key: Option<String>,

    /// Model used for answers and summarization.
    #[arg(long, env = "ANSWERPIPE_MODEL")]
    model: String,

    /// Model used for the tool-necessity check (default: same as --model).
    #[arg(long, env = "ANSWERPIPE_TOOL_MODEL")]
    tool_model: Option<String>,

    /// Serper API key. Web search is disabled when unset.
    #[arg(long, env = "ANSWERPIPE_SERPER_API_KEY")]
    serper_api_key: Option<String>,

    /// Serper-compatible search endpoint.
    #[arg(long, env = "ANSWERPIPE_SERPER_URL")]
    serper_url: Option<String>,

    /// Search interface-language hint (hl).
    #[arg(long, env = "ANSWERPIPE_SEARCH_LOCALE", default_value = "en")]
    search_locale: String,

    /// Search region hint (gl).
    #[arg(long, env = "ANSWERPIPE_SEARCH_REGION", default_value = "us")]
    search_region: String,

    /// Upper bound on simultaneously in-flight page fetches.
    #[arg(long, env = "ANSWERPIPE_MAX_CONCURRENT_FETCHES", default_value_t = 5)]
    max_concurrent_fetches: usize,

    /// Total attempts per fetched URL.
    #[arg(long, env = "ANSWERPIPE_FETCH_RETRIES", default_value_t = 3)]
    fetch_retries: u32,

    /// Minimum spacing between requests to one host, in milliseconds.
    #[arg(long, env = "ANSWERPIPE_RATE_LIMIT_MS", default_value_t = 1000)]
    rate_limit_ms: u64,

    /// Extracted page content longer than this is summarized or truncated.
    #[arg(long, env = "ANSWERPIPE_MAX_CONTENT_LENGTH", default_value_t = 2000)]
    max_content_length: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let client = FetchEngine::default_client();

    let mut model_config = ModelConfig::new(
        cli.model_base_url.clone(),
        cli.model_api_key.clone(),
        cli.model.clone(),
    );
    if let Some(tool_model) = cli.tool_model.clone() {
        model_config.tool_model = tool_model;
    }
    let model = ModelClient::new(client.clone(), model_config);

    let mut registry = ToolRegistry::new();
    match cli.serper_api_key.clone() {
        Some(api_key) => {
            let mut search_config = SearchConfig::new(api_key);
            if let Some(url) = cli.serper_url.clone() {
                search_config.endpoint = url;
            }
            search_config.locale = cli.search_locale.clone();
            search_config.region = cli.search_region.clone();
            registry.register(Box::new(WebSearchTool::new(SerperClient::new(
                client.clone(),
                search_config,
            ))));
        }
        None => tracing::warn!("no Serper API key configured, web search disabled"),
    }
    registry.register(Box::new(ArxivSearchTool::new(ArxivClient::new(
        client.clone(),
    ))));
    let registry = Arc::new(registry);

    let engine = Arc::new(FetchEngine::new(
        client,
        FetchConfig {
            retry_count: cli.fetch_retries,
            rate_limit_interval: Duration::from_millis(cli.rate_limit_ms),
            max_content_length: cli.max_content_length,
            ..FetchConfig::default()
        },
        Some(model.clone()),
    ));
    let coordinator = FanOutCoordinator::new(engine, cli.max_concurrent_fetches);
    let orchestrator = Arc::new(Orchestrator::new(model, registry.clone(), coordinator));

    let app = router(AppState {
        orchestrator,
        registry,
    });
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    tracing::info!(listen = %cli.listen, "answerpipe listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
