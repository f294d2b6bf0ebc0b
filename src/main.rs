use tracing_subscriber::EnvFilter;

use search_chat::api;
use search_chat::config::Config;
use search_chat::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);
    tracing::info!(
        "Search provider: {} ({}), depth {:?}, max {} results",
        config.search.provider,
        config.search.base_url,
        config.search.search_depth,
        config.search.max_results
    );
    tracing::info!("Answer start policy: {:?}", config.chat_start);
    if config.search.provider == "tavily" && config.search.api_key.is_none() {
        tracing::warn!("TAVILY_API_KEY is not set; searches will fail and answers run without sources");
    }

    let state = AppState::new(config.clone())?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
