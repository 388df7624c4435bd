use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::broadcast;

use crate::config::{FacadeConfig, SessionConfig};
use crate::convert::descriptor::{GarmentDescriptor, ObstacleDescriptor, SceneDescriptor};
use crate::engine::dispatcher::{self, Command};
use crate::engine::registry::{SessionEvent, SessionRegistry};
use crate::engine::session::{SessionHandle, SessionState, SessionStatus};
use crate::engine::stats::StatsSnapshot;
use crate::error::{FacadeError, FacadeResult};
use crate::kernel::traits::{EngineVersion, SimulationKernel};

/// Async entry point over one simulation kernel. Cheap to clone; clones share
/// the same registry.
#[derive(Clone)]
pub struct ArcsimFacade {
    registry: Arc<SessionRegistry>,
    config: FacadeConfig,
}

impl ArcsimFacade {
    pub fn new(kernel: Arc<dyn SimulationKernel>) -> Self {
        Self::with_config(kernel, FacadeConfig::default())
    }

    pub fn with_config(kernel: Arc<dyn SimulationKernel>, config: FacadeConfig) -> Self {
        let registry = SessionRegistry::with_event_capacity(kernel, config.event_capacity);
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Kernel version as `major.minor.patch`. Needs no session.
    pub async fn version(&self) -> String {
        let v = self.registry.kernel().version();
        format!("{}.{}.{}", v.major, v.minor, v.patch)
    }

    pub async fn engine_version(&self) -> EngineVersion {
        self.registry.kernel().version()
    }

    pub async fn create_session(&self, config: SessionConfig) -> FacadeResult<SessionHandle> {
        self.registry.create_session(config).await
    }

    pub async fn destroy_session(&self, handle: SessionHandle) -> FacadeResult<()> {
        self.registry.destroy_session(handle).await
    }

    pub async fn add_garment(
        &self,
        handle: SessionHandle,
        garment: GarmentDescriptor,
    ) -> FacadeResult<SessionState> {
        let command = Command::AddGarment(Arc::new(garment));
        dispatcher::dispatch(&self.registry, handle, command).await
    }

    pub async fn add_obstacle(
        &self,
        handle: SessionHandle,
        obstacle: ObstacleDescriptor,
    ) -> FacadeResult<SessionState> {
        let command = Command::AddObstacle(Arc::new(obstacle));
        dispatcher::dispatch(&self.registry, handle, command).await
    }

    pub async fn start_sim(&self, handle: SessionHandle) -> FacadeResult<SessionState> {
        dispatcher::dispatch(&self.registry, handle, Command::Start).await
    }

    pub async fn pause_sim(&self, handle: SessionHandle) -> FacadeResult<SessionState> {
        dispatcher::dispatch(&self.registry, handle, Command::Pause).await
    }

    pub async fn session_status(&self, handle: SessionHandle) -> FacadeResult<SessionStatus> {
        dispatcher::status(&self.registry, handle).await
    }

    pub fn live_sessions(&self) -> Vec<SessionHandle> {
        self.registry.live_sessions()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.registry.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.registry.subscribe()
    }

    /// Destroy every session and refuse new ones.
    pub async fn shutdown(&self) -> usize {
        self.registry.shutdown().await
    }

    pub async fn convert_legacy_garment(
        &self,
        binary_path: impl Into<PathBuf>,
        json_path: impl Into<PathBuf>,
    ) -> FacadeResult<GarmentDescriptor> {
        let (bin, json) = (binary_path.into(), json_path.into());
        blocking(move || crate::convert::convert_legacy_garment(&bin, &json)).await
    }

    pub async fn convert_legacy_obstacle(
        &self,
        binary_path: impl Into<PathBuf>,
        json_path: impl Into<PathBuf>,
    ) -> FacadeResult<ObstacleDescriptor> {
        let (bin, json) = (binary_path.into(), json_path.into());
        blocking(move || crate::convert::convert_legacy_obstacle(&bin, &json)).await
    }

    pub async fn convert_legacy_arcsim_scene(
        &self,
        garment_bin: impl Into<PathBuf>,
        garment_json: impl Into<PathBuf>,
        obstacle_bin: impl Into<PathBuf>,
        obstacle_json: impl Into<PathBuf>,
    ) -> FacadeResult<SceneDescriptor> {
        let paths = (
            garment_bin.into(),
            garment_json.into(),
            obstacle_bin.into(),
            obstacle_json.into(),
        );
        blocking(move || {
            crate::convert::convert_legacy_arcsim_scene(&paths.0, &paths.1, &paths.2, &paths.3)
        })
        .await
    }
}

/// File decoding runs on the blocking pool.
async fn blocking<T, F>(f: F) -> FacadeResult<T>
where
    F: FnOnce() -> FacadeResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FacadeError::Engine(anyhow!("conversion task failed: {}", e)))?
}
