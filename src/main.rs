//! tissue-recon - tissue classification and surface reconstruction server.
//!
//! This binary starts the HTTP server or runs a single analysis offline.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tissue_recon::{
    config::{AnalyzeConfig, Cli, Command, ServeConfig},
    job::{JobHandle, JobStatus},
    pipeline::Pipeline,
    server::{create_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Analyze(config) => run_analyze(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    let pipeline_config = match config
        .validate()
        .and_then(|_| config.pipeline.pipeline_config())
    {
        Ok(pipeline_config) => pipeline_config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("tissue-recon v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Volumes: {}", config.pipeline.volumes_dir.display());
    match &pipeline_config.artifacts_dir {
        Some(dir) => info!("  Artifacts: {}", dir.display()),
        None => warn!("  Artifacts: in memory only, results are lost on restart"),
    }
    info!(
        "  Workers: {} analysis, {} model",
        pipeline_config.analysis_workers, pipeline_config.model_workers
    );
    info!(
        "  Classifier: {} mm cavity margin, closing radius {}, fat formula {}",
        pipeline_config.classifier.cavity_margin_mm,
        pipeline_config.classifier.closing_radius,
        pipeline_config.formula
    );
    info!(
        "  Export cache: {}MB",
        pipeline_config.export_cache_bytes / (1024 * 1024)
    );

    let source = config.pipeline.volume_source();
    let pipeline = Pipeline::new(source, pipeline_config);

    let persisted = pipeline.store().persisted_series().await;
    if !persisted.is_empty() {
        info!("  Found {} persisted series", persisted.len());
    }

    let router = create_router(pipeline, build_router_config(&config));
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl -N http://{}/analysis/<series_id>/stream", addr);
    info!("    curl -X POST http://{}/models/<series_id>", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tissue_recon=debug,tower_http=debug"
    } else {
        "tissue_recon=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_tracing(!config.no_tracing);
    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }
    router_config
}

// =============================================================================
// Analyze Command
// =============================================================================

async fn run_analyze(config: AnalyzeConfig) -> ExitCode {
    init_logging(config.verbose);

    let pipeline_config = match config
        .validate()
        .and_then(|_| config.pipeline.pipeline_config())
    {
        Ok(pipeline_config) => pipeline_config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let pipeline = Pipeline::new(config.pipeline.volume_source(), pipeline_config);
    let series_id = config.series_id.as_str();

    let job = pipeline.analysis().start(series_id).await;
    if !wait_for(&job).await {
        return ExitCode::FAILURE;
    }

    let Some(result) = pipeline.analysis().result(series_id).await else {
        error!("Analysis finished without a result");
        return ExitCode::FAILURE;
    };
    match serde_json::to_string_pretty(result.as_ref()) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to serialize result: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let Some(output) = &config.output else {
        return ExitCode::SUCCESS;
    };

    let job = match pipeline
        .models()
        .start(series_id, config.include.clone())
        .await
    {
        Ok(job) => job,
        Err(e) => {
            error!("Model generation failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if !wait_for(&job).await {
        return ExitCode::FAILURE;
    }

    let bytes = match pipeline.models().download(series_id, config.format).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            error!("Model generation finished without a model");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Failed to encode model: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::fs::write(output, &bytes).await {
        error!("Failed to write {}: {}", output.display(), e);
        return ExitCode::FAILURE;
    }
    info!(
        path = %output.display(),
        bytes = bytes.len(),
        format = config.format.as_str(),
        "Model written"
    );

    ExitCode::SUCCESS
}

/// Follow a job to its end, logging progress. Returns whether it completed.
async fn wait_for(job: &JobHandle) -> bool {
    let mut events = job.subscribe();
    while let Some(event) = events.next().await {
        info!(
            progress = event.progress,
            image = event.current_image,
            total = event.total_images,
            "{}",
            event.message
        );
    }

    let snapshot = job.snapshot();
    match snapshot.status {
        JobStatus::Complete => true,
        status => {
            error!(
                status = ?status,
                "Job did not complete: {}",
                snapshot.error.unwrap_or(snapshot.message)
            );
            false
        }
    }
}
