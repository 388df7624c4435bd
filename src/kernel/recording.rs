// In-process kernel that records every command it receives.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::traits::{
    EngineCommand, EngineContext, EngineVersion, Progress, ProgressSink, SimulationKernel,
};
use crate::config::SessionConfig;
use crate::convert::descriptor::Geometry;

pub const RECORDING_KERNEL_BUILD: &str = "recording";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Context id, in creation order starting at 1.
    pub context: u64,
    pub command: &'static str,
    /// Descriptor name for add commands.
    pub detail: Option<String>,
}

#[derive(Default)]
struct Shared {
    log: Mutex<Vec<RecordedCommand>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail_create: AtomicBool,
    fail_command: Mutex<Option<&'static str>>,
}

/// Kernel double with optional per-command latency and failure injection.
#[derive(Clone)]
pub struct RecordingKernel {
    shared: Arc<Shared>,
    next_context: Arc<AtomicU64>,
    latency: Duration,
}

impl RecordingKernel {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every command sleeps for `latency` before it completes.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            next_context: Arc::new(AtomicU64::new(1)),
            latency,
        }
    }

    pub fn log(&self) -> Vec<RecordedCommand> {
        self.shared.log.lock().clone()
    }

    /// Commands recorded for one context, as command names.
    pub fn commands_for(&self, context: u64) -> Vec<&'static str> {
        self.shared
            .log
            .lock()
            .iter()
            .filter(|c| c.context == context)
            .map(|c| c.command)
            .collect()
    }

    /// Highest number of commands seen executing at once, across all contexts.
    pub fn max_concurrent(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> u64 {
        self.next_context.load(Ordering::SeqCst) - 1
    }

    pub fn fail_context_creation(&self, fail: bool) {
        self.shared.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make every command with this name fail until cleared with `None`.
    pub fn fail_command(&self, command: Option<&'static str>) {
        *self.shared.fail_command.lock() = command;
    }
}

impl Default for RecordingKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimulationKernel for RecordingKernel {
    fn version(&self) -> EngineVersion {
        EngineVersion {
            major: 0,
            minor: 2,
            patch: 0,
            api_major: 1,
            api_minor: 0,
            build: RECORDING_KERNEL_BUILD.to_string(),
        }
    }

    async fn create_context(
        &self,
        config: &SessionConfig,
        progress: ProgressSink,
    ) -> Result<Box<dyn EngineContext>> {
        if self.shared.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("kernel refused to allocate a context"));
        }
        let id = self.next_context.fetch_add(1, Ordering::SeqCst);
        debug!("recording context {} created (time_step={})", id, config.time_step);
        Ok(Box::new(RecordingContext {
            id,
            shared: self.shared.clone(),
            latency: self.latency,
            released: false,
            progress,
            time_step: config.time_step,
            frames: 0,
            garment: None,
        }))
    }
}

/// Reports one frame per successful `Start`, carrying the first garment's mesh.
struct RecordingContext {
    id: u64,
    shared: Arc<Shared>,
    latency: Duration,
    released: bool,
    progress: ProgressSink,
    time_step: f64,
    frames: u64,
    garment: Option<Geometry>,
}

impl RecordingContext {
    fn sim_time(&self) -> f64 {
        self.frames as f64 * self.time_step
    }
}

#[async_trait]
impl EngineContext for RecordingContext {
    async fn apply(&mut self, command: EngineCommand) -> Result<()> {
        if self.released {
            return Err(anyhow!("context {} already released", self.id));
        }

        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let name = command.name();
        let failing = *self.shared.fail_command.lock() == Some(name);
        let result = if failing {
            let err = anyhow!("injected failure in {}", name);
            if matches!(command, EngineCommand::Start) {
                self.progress.report(Progress::error(
                    self.frames,
                    self.frames,
                    self.sim_time(),
                    err.to_string(),
                ));
            }
            Err(err)
        } else {
            let detail = match &command {
                EngineCommand::AddGarment(g) => Some(g.name.clone()),
                EngineCommand::AddObstacle(o) => Some(o.name.clone()),
                _ => None,
            };
            self.shared.log.lock().push(RecordedCommand {
                context: self.id,
                command: name,
                detail,
            });
            match &command {
                EngineCommand::AddGarment(g) if self.garment.is_none() => {
                    self.garment = Some(g.initial_geometry.clone());
                }
                EngineCommand::Start => {
                    self.frames += 1;
                    self.progress.report(Progress {
                        garment: self.garment.clone(),
                        ..Progress::frame(self.frames, self.frames, self.sim_time())
                    });
                }
                EngineCommand::Release => self.released = true,
                _ => {}
            }
            Ok(())
        };

        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::kernel::traits::ProgressKind;

    #[tokio::test]
    async fn test_records_in_order() {
        let kernel = RecordingKernel::new();
        let (sink, _reports) = ProgressSink::channel();
        let mut ctx = kernel
            .create_context(&SessionConfig::default(), sink)
            .await
            .unwrap();
        ctx.apply(EngineCommand::Start).await.unwrap();
        ctx.apply(EngineCommand::Pause).await.unwrap();
        ctx.apply(EngineCommand::Release).await.unwrap();
        assert_eq!(kernel.commands_for(1), vec!["start", "pause", "release"]);
        assert!(ctx.apply(EngineCommand::Start).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_recorded() {
        let kernel = RecordingKernel::new();
        kernel.fail_command(Some("start"));
        let (sink, mut reports) = ProgressSink::channel();
        let mut ctx = kernel
            .create_context(&SessionConfig::default(), sink)
            .await
            .unwrap();
        let err = ctx.apply(EngineCommand::Start).await.unwrap_err();
        assert!(err.to_string().contains("injected"));
        assert!(kernel.log().is_empty());

        let report = reports.try_recv().unwrap();
        assert_eq!(report.kind, ProgressKind::Error);
        assert_eq!(report.error.as_deref(), Some("injected failure in start"));
    }

    #[tokio::test]
    async fn test_each_start_reports_a_frame() {
        let kernel = RecordingKernel::new();
        let (sink, mut reports) = ProgressSink::channel();
        let mut ctx = kernel
            .create_context(&SessionConfig::new(0.5, 10), sink)
            .await
            .unwrap();
        ctx.apply(EngineCommand::Start).await.unwrap();
        ctx.apply(EngineCommand::Pause).await.unwrap();
        ctx.apply(EngineCommand::Start).await.unwrap();

        let first = reports.try_recv().unwrap();
        let second = reports.try_recv().unwrap();
        assert_eq!((first.kind, first.frame), (ProgressKind::Frame, 1));
        assert_eq!(second.frame, 2);
        assert!((second.time - 1.0).abs() < 1e-9);
        assert!(second.garment.is_none());
        assert!(reports.try_recv().is_err());
    }
}
