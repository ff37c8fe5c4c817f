use std::future::Future;
use std::sync::Arc;

use magnetar_api::{ApiServer, ApiState};
use magnetar_config::{AppConfig, EngineKind};
use magnetar_core::{
    CleanupScheduler, ProcessTranscoder, ReleaseOptions, RemoteSource, SessionManager,
    SessionRegistry, StreamPipeline, SwarmEngine, SystemClock,
};
use magnetar_engine::SimulatedEngine;
use magnetar_rqbit::{RqbitConfig, RqbitEngine};
use magnetar_telemetry::{DEFAULT_LOG_LEVEL, GlobalContextGuard, LoggingConfig, Metrics};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Build identifier baked in at compile time, when provided.
const BUILD_SHA: Option<&str> = option_env!("MAGNETAR_BUILD_SHA");

/// Long-lived services shared by the HTTP surface and the cleanup timer.
pub(crate) struct Services {
    sessions: Arc<SessionManager>,
    scheduler: Arc<CleanupScheduler>,
    state: Arc<ApiState>,
}

impl Services {
    /// Construct every service around `engine`.
    pub(crate) async fn build(config: &AppConfig, engine: Arc<dyn SwarmEngine>) -> AppResult<Self> {
        let transcoder = ProcessTranscoder::ffmpeg(config.transcoder_path.clone());
        transcoder.probe().await;

        let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let registry = Arc::new(SessionRegistry::new(Arc::new(SystemClock)));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&registry),
            engine,
            config.download_dir.clone(),
            metrics.clone(),
        ));
        let pipeline = Arc::new(StreamPipeline::new(
            Arc::clone(&registry),
            Arc::new(transcoder),
            RemoteSource::default(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(CleanupScheduler::new(
            registry,
            config.eviction_threshold,
            config.sweep_interval,
            ReleaseOptions {
                delete_files: config.evict_delete_files,
            },
            metrics.clone(),
        ));
        let state = Arc::new(ApiState::new(Arc::clone(&sessions), pipeline, metrics));
        Ok(Self {
            sessions,
            scheduler,
            state,
        })
    }

    /// Serve on the configured address until `shutdown` resolves.
    ///
    /// On shutdown the cleanup timer stops and every session is released before
    /// the listener drains, so open streams end with their engines.
    pub(crate) async fn run<F>(self, config: &AppConfig, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let scheduler = Arc::clone(&self.scheduler).start();
        let sessions = Arc::clone(&self.sessions);
        let drain = async move {
            shutdown.await;
            scheduler.stop().await;
            sessions.shutdown().await;
        };

        let addr = config.listen_addr();
        info!(addr = %addr, "launching api listener");
        let served = ApiServer::new(self.state).serve(addr, drain).await;
        self.sessions.shutdown().await;
        served.map_err(|err| AppError::api_server("api_server.serve", err))?;
        info!("magnetar shutdown complete");
        Ok(())
    }
}

/// Entry point for the Magnetar boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, filesystem preparation or the
/// HTTP listener fail.
pub async fn run_app() -> AppResult<()> {
    let config = AppConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
    config
        .validate()
        .map_err(|err| AppError::config("config.validate", err))?;

    let logging = LoggingConfig {
        level: DEFAULT_LOG_LEVEL,
        format: config.log_format,
        build_sha: BUILD_SHA.unwrap_or("dev"),
    };
    magnetar_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("magnetar");

    info!(
        download_dir = %config.download_dir.display(),
        eviction_threshold_secs = config.eviction_threshold.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        log_format = config.log_format.as_str(),
        "magnetar bootstrap starting"
    );

    prepare_download_dir(config.download_dir.as_path()).await?;
    let engine = build_engine(&config).await?;
    let services = Services::build(&config, engine).await?;
    services.run(&config, shutdown_signal()).await
}

async fn prepare_download_dir(dir: &std::path::Path) -> AppResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| AppError::io("download_dir.create", dir, err))
}

/// Engine selected by `MAGNETAR_ENGINE`.
async fn build_engine(config: &AppConfig) -> AppResult<Arc<dyn SwarmEngine>> {
    match config.engine {
        EngineKind::Rqbit => {
            let engine = RqbitEngine::new(&config.download_dir, RqbitConfig::default())
                .await
                .map_err(|err| AppError::engine("engine.rqbit.start", err))?;
            Ok(Arc::new(engine))
        }
        EngineKind::Simulated => {
            warn!("simulated engine selected; every locator resolves to generated content");
            Ok(Arc::new(SimulatedEngine::default().with_generated_content()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
