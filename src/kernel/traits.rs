use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::convert::descriptor::{GarmentDescriptor, Geometry, ObstacleDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub api_major: u32,
    pub api_minor: u32,
    pub build: String,
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{} (api {}.{}, build {})",
            self.major, self.minor, self.patch, self.api_major, self.api_minor, self.build
        )
    }
}

/// One unit of work handed to a session's engine context.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Send session parameters; issued once, before the first `Start`.
    Prepare(Arc<SessionConfig>),
    AddGarment(Arc<GarmentDescriptor>),
    AddObstacle(Arc<ObstacleDescriptor>),
    Start,
    Pause,
    /// Free all kernel state held for the session.
    Release,
}

impl EngineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            EngineCommand::Prepare(_) => "prepare",
            EngineCommand::AddGarment(_) => "add_garment",
            EngineCommand::AddObstacle(_) => "add_obstacle",
            EngineCommand::Start => "start",
            EngineCommand::Pause => "pause",
            EngineCommand::Release => "release",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Frame,
    Finished,
    Error,
}

/// A progress report from a running context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub kind: ProgressKind,
    pub frame: u64,
    /// Solver steps taken so far.
    pub steps: u64,
    /// Simulated time in seconds.
    pub time: f64,
    /// Garment mesh at this frame, when the kernel supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub garment: Option<Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Progress {
    pub fn frame(frame: u64, steps: u64, time: f64) -> Self {
        Self {
            kind: ProgressKind::Frame,
            frame,
            steps,
            time,
            garment: None,
            error: None,
        }
    }

    pub fn error(frame: u64, steps: u64, time: f64, message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Error,
            error: Some(message.into()),
            ..Self::frame(frame, steps, time)
        }
    }
}

/// Where a context reports progress. Never blocks; reports sent after the
/// session is gone are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<Progress>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, progress: Progress) {
        let _ = self.tx.send(progress);
    }
}

/// Factory for per-session kernel state.
#[async_trait]
pub trait SimulationKernel: Send + Sync {
    fn version(&self) -> EngineVersion;

    /// `progress` stays with the context for its whole life.
    async fn create_context(
        &self,
        config: &SessionConfig,
        progress: ProgressSink,
    ) -> Result<Box<dyn EngineContext>>;
}

/// Non-reentrant kernel state owned by exactly one session.
#[async_trait]
pub trait EngineContext: Send {
    async fn apply(&mut self, command: EngineCommand) -> Result<()>;
}
