//! Fixtures shared by handler tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use magnetar_core::{
    ProcessTranscoder, RemoteSource, SessionManager, SessionRegistry, SessionSnapshot,
    SessionStatus, StreamPipeline, SystemClock,
};
use magnetar_engine::{SimulatedEngine, SimulatedFile, SimulatedTorrent, SimulationConfig};
use magnetar_telemetry::Metrics;

use crate::state::ApiState;

pub(crate) const HASH: &str = "0123456789abcdef0123456789abcdef01234567";
pub(crate) const CLIP_HASH: &str = "89abcdef0123456789abcdef0123456789abcdef";

pub(crate) fn magnet() -> String {
    format!("magnet:?xt=urn:btih:{HASH}&dn=Sintel")
}

pub(crate) fn clip_magnet() -> String {
    format!("magnet:?xt=urn:btih:{CLIP_HASH}&dn=Clip")
}

pub(crate) fn test_state(download_dir: &Path) -> Arc<ApiState> {
    test_state_with(download_dir, SimulationConfig::quick())
}

pub(crate) fn test_state_with(download_dir: &Path, config: SimulationConfig) -> Arc<ApiState> {
    let metrics = Metrics::new().expect("metrics registry");
    let registry = Arc::new(SessionRegistry::new(Arc::new(SystemClock)));
    let engine = SimulatedEngine::new(config)
        .with_generated_content()
        .with_torrent(
            HASH,
            SimulatedTorrent::new(
                "Sintel",
                vec![
                    SimulatedFile::new("Sintel/sintel.nfo", 300),
                    SimulatedFile::new("Sintel/sintel.mp4", 5000),
                ],
            ),
        )
        .with_torrent(
            CLIP_HASH,
            SimulatedTorrent::new("Clip", vec![SimulatedFile::new("Clip/clip.mkv", 3000)]),
        );
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&registry),
        Arc::new(engine),
        download_dir.to_path_buf(),
        metrics.clone(),
    ));
    let pipeline = Arc::new(StreamPipeline::new(
        registry,
        Arc::new(ProcessTranscoder::new("cat", Vec::<String>::new())),
        RemoteSource::default(),
        metrics.clone(),
    ));
    Arc::new(ApiState::new(sessions, pipeline, metrics))
}

pub(crate) async fn wait_for(
    state: &ApiState,
    id: &str,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if state.sessions.get(id).as_ref().is_some_and(&predicate) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session reached the expected state");
}

pub(crate) async fn wait_for_status(state: &ApiState, status: SessionStatus) {
    wait_for(state, HASH, |snapshot| snapshot.status == status).await;
}
