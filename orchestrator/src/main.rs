use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use warp::Filter;

mod agents;
mod api;
mod config;
mod error;
mod metrics;
mod middleware;
mod models;
mod pipeline;
#[cfg(test)]
mod testing;

use agents::{OpenAiCompletionStreamer, OpenAiEmbedder, PineconeRetriever};
use pipeline::ChatPipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Credentials are checked before anything else starts
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!("Starting Rate My Professor chat orchestrator");
    info!(?config, "Configuration loaded");

    // One pooled client shared by every upstream handle
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(32)
        .build()?;

    let embedder = OpenAiEmbedder::new(
        http.clone(),
        config.openai_base_url.clone(),
        config.openai_api_key.clone(),
        config.embedding_model.clone(),
    );

    let retriever = match &config.pinecone_index_host {
        Some(host) => PineconeRetriever::new(
            http.clone(),
            host.clone(),
            config.pinecone_namespace.clone(),
            config.pinecone_api_key.clone(),
        ),
        None => {
            PineconeRetriever::connect(
                http.clone(),
                &config.pinecone_controller_url,
                &config.pinecone_index,
                config.pinecone_namespace.clone(),
                config.pinecone_api_key.clone(),
            )
            .await?
        }
    };
    info!(index = %config.pinecone_index, namespace = %config.pinecone_namespace, "Vector index ready");

    let completer = OpenAiCompletionStreamer::new(
        http,
        config.openai_base_url.clone(),
        config.openai_api_key.clone(),
        config.chat_model.clone(),
    );

    let pipeline = Arc::new(ChatPipeline::new(
        Arc::new(embedder),
        Arc::new(retriever),
        Arc::new(completer),
        config.system_prompt.clone(),
        config.top_k,
    ));

    // Build API routes
    let api_routes = api::routes(pipeline)
        .recover(error::handle_rejection)
        .with(warp::log("api"))
        .with(middleware::cors());

    // Health check route
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({"status": "healthy"})));

    // Metrics route
    let metrics_route = warp::path("metrics").and(warp::get()).map(|| {
        let (buffer, content_type) = metrics::render();
        warp::reply::with_header(buffer, "Content-Type", content_type)
    });

    let routes = health.or(metrics_route).or(api_routes);

    let addr = ([0, 0, 0, 0], config.port);
    let (bound, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
    });
    info!("Server listening on {}", bound);

    server.await;

    Ok(())
}
