mod config;
mod errors;
mod fetch;
mod llm_client;
mod pipeline;
mod routes;
mod state;
mod storage;

use anyhow::{Context, Result};
use aws_config::meta::region::RegionProviderChain;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ArtifactBackend, Config, S3Settings};
use crate::fetch::HttpFetcher;
use crate::llm_client::LlmClient;
use crate::pipeline::Pipeline;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{ArtifactStore, LocalArtifactStore, S3ArtifactStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting harvester v{}", env!("CARGO_PKG_VERSION"));

    // Artifact store: injected work dir locally, bucket prefix on S3
    let store: Arc<dyn ArtifactStore> = match &config.backend {
        ArtifactBackend::Local => {
            info!("Writing artifacts under {}", config.work_dir.display());
            Arc::new(LocalArtifactStore::new(config.work_dir.clone()))
        }
        ArtifactBackend::S3(settings) => {
            let client = build_s3_client(settings).await;
            info!(
                "Writing artifacts to s3://{}/{}",
                settings.bucket, settings.prefix
            );
            Arc::new(S3ArtifactStore::new(
                client,
                settings.bucket.clone(),
                &settings.prefix,
            ))
        }
    };

    let fetcher = HttpFetcher::new().context("Failed to build page fetcher")?;

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())
        .context("Failed to build LLM client")?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    info!(
        "Pipeline: max unit {} bytes, {} concurrent calls, {:?} stagger, {} attempts, fail_fast={}",
        config.pipeline.max_unit_size,
        config.pipeline.scheduler.max_concurrent,
        config.pipeline.scheduler.stagger_delay,
        config.pipeline.scheduler.max_retries,
        config.pipeline.scheduler.fail_fast
    );

    let pipeline = Pipeline::new(
        Arc::new(fetcher),
        Arc::new(llm),
        store,
        config.pipeline.clone(),
    );

    // Build app state
    let state = AppState {
        pipeline: Arc::new(pipeline),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client from the default credential chain, pointed at a
/// custom endpoint (MinIO, LocalStack) when one is configured.
async fn build_s3_client(settings: &S3Settings) -> aws_sdk_s3::Client {
    let region = RegionProviderChain::default_provider().or_else("us-east-1");
    let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region)
        .load()
        .await;

    let mut builder = aws_sdk_s3::config::Builder::from(&shared);
    if let Some(endpoint) = &settings.endpoint {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(builder.build())
}
