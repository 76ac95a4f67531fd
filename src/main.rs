//! Edge Vision - safety event pipeline
//!
//! Main entry point for the edge service.

use edge_vision::{
    capture::FfmpegCapture,
    event_reporter::EventReporter,
    frame_registry::FrameRegistry,
    media_signaling::{MediaSignalingServer, WebRtcTransport},
    mosaic::MosaicComposer,
    policy_store::{self, PolicyStore},
    pose::HttpPoseEngine,
    state::{AppConfig, AppState, DEFAULT_LOG_FILTER},
    stream_coordinator::StreamCoordinator,
    stream_worker::WorkerContext,
    web_api,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SIGNALING_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Shutting down due to ctrl-c");
        }
        _ = cancel.cancelled() => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Edge Vision v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        edge_id = %config.edge_id,
        pose_engine = %config.pose.base_url,
        listen = %config.listen_addr(),
        poll_interval_secs = config.poll_interval.as_secs_f64(),
        max_fps = config.worker.max_fps,
        remote_events = config.reporter.remote_enabled,
        "Configuration loaded"
    );

    // Create database pool; connections open on first use
    let pool = policy_store::connect_lazy(&config.database_url, config.db_connect_timeout)?;
    tracing::info!("Database pool ready");

    // Initialize components
    let policy_store = Arc::new(PolicyStore::new(pool.clone()));

    let capture = FfmpegCapture::new(
        config.ffmpeg_path.clone(),
        config.worker.max_fps,
        config.worker.connect_timeout,
    );
    match capture.check_ffmpeg().await {
        Ok(version) => tracing::info!(version = %version, "ffmpeg available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg check failed, streams will keep retrying"),
    }

    let pose = HttpPoseEngine::new(config.pose.clone())?;
    if pose.health_check().await.unwrap_or(false) {
        tracing::info!(url = %config.pose.base_url, "Pose engine reachable");
    } else {
        tracing::warn!(url = %config.pose.base_url, "Pose engine not reachable yet");
    }

    let reporter = Arc::new(EventReporter::new(config.reporter.clone(), policy_store.clone())?);
    let registry = Arc::new(FrameRegistry::new());

    let mosaic = Arc::new(MosaicComposer::new(registry.clone(), config.mosaic.clone()));
    mosaic.start();

    let transport = Arc::new(WebRtcTransport::new(&config.signaling)?);
    let signaling = Arc::new(MediaSignalingServer::new(
        mosaic.clone(),
        transport,
        config.signaling.clone(),
    ));
    signaling.start();

    let coordinator = Arc::new(StreamCoordinator::new(WorkerContext {
        settings: config.worker.clone(),
        capture: Arc::new(capture),
        pose: Arc::new(pose),
        policies: policy_store.clone(),
        reporter: reporter.clone(),
        registry: registry.clone(),
    }));

    let cancel = CancellationToken::new();
    let reconcile = tokio::spawn(coordinator.clone().run_reconcile_loop(
        policy_store.clone(),
        config.poll_interval,
        cancel.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        registry,
        mosaic: mosaic.clone(),
        coordinator: coordinator.clone(),
        signaling: signaling.clone(),
        reporter: reporter.clone(),
    };

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = config.listen_addr();
    tracing::info!("Signaling server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // Teardown: workers, sessions, mosaic, then pending events
    cancel.cancel();
    if let Err(e) = reconcile.await {
        tracing::warn!(error = %e, "Reconcile loop ended abnormally");
    }
    coordinator.shutdown().await;
    signaling.shutdown(SIGNALING_DRAIN_TIMEOUT).await;
    mosaic.stop().await;
    reporter.shutdown(EVENT_DRAIN_TIMEOUT).await;
    pool.close().await;

    tracing::info!("Shutdown complete");
    served?;
    Ok(())
}
