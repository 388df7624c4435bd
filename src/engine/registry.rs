// Session registry - issues handles and owns every live session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::{self, Command};
use super::session::{Session, SessionHandle, SessionState};
use super::stats::{StatsCollector, StatsSnapshot};
use crate::config::{SessionConfig, EVENT_CHANNEL_CAPACITY, FIRST_SESSION_HANDLE};
use crate::error::{FacadeError, FacadeResult};
use crate::kernel::traits::{EngineCommand, Progress, ProgressSink, SimulationKernel};

/// Lifecycle notifications broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Created {
        handle: SessionHandle,
    },
    StateChanged {
        handle: SessionHandle,
        from: SessionState,
        to: SessionState,
    },
    GarmentAdded {
        handle: SessionHandle,
        garments: usize,
    },
    ObstacleAdded {
        handle: SessionHandle,
        obstacles: usize,
    },
    Destroyed {
        handle: SessionHandle,
    },
    /// Relayed from the session's kernel context.
    Progress {
        handle: SessionHandle,
        progress: Progress,
    },
}

/// A registered session behind its FIFO command slot.
pub struct SessionSlot {
    pub handle: SessionHandle,
    /// Set once destruction begins; later commands are refused.
    closing: AtomicBool,
    pub(crate) session: Mutex<Session>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            handle: session.handle,
            closing: AtomicBool::new(false),
            session: Mutex::new(session),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Returns false if another destroy already claimed the slot.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn abort_close(&self) {
        self.closing.store(false, Ordering::SeqCst);
    }
}

pub type SessionMap = Arc<RwLock<HashMap<SessionHandle, Arc<SessionSlot>>>>;

pub struct SessionRegistry {
    sessions: SessionMap,
    next_handle: AtomicU64,
    kernel: Arc<dyn SimulationKernel>,
    shutdown: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
    pub(crate) stats: StatsCollector,
}

impl SessionRegistry {
    pub fn new(kernel: Arc<dyn SimulationKernel>) -> Self {
        Self::with_event_capacity(kernel, EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_event_capacity(kernel: Arc<dyn SimulationKernel>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_handle: AtomicU64::new(FIRST_SESSION_HANDLE),
            kernel,
            shutdown: CancellationToken::new(),
            events,
            stats: StatsCollector::new(),
        }
    }

    pub fn kernel(&self) -> &Arc<dyn SimulationKernel> {
        &self.kernel
    }

    /// Validate `config`, allocate a kernel context and register a session.
    /// A handle is consumed only when every step succeeds.
    pub async fn create_session(
        self: &Arc<Self>,
        config: SessionConfig,
    ) -> FacadeResult<SessionHandle> {
        if self.shutdown.is_cancelled() {
            return Err(FacadeError::Unavailable("registry is shutting down"));
        }
        config.validate()?;

        // A caller that stops waiting must not strand a kernel context.
        let task = tokio::spawn(self.clone().register(config));
        match task.await {
            Ok(result) => result,
            Err(e) => Err(FacadeError::Engine(anyhow!("session creation task failed: {}", e))),
        }
    }

    async fn register(self: Arc<Self>, config: SessionConfig) -> FacadeResult<SessionHandle> {
        let (progress, reports) = ProgressSink::channel();
        let mut context = self
            .kernel
            .create_context(&config, progress)
            .await
            .map_err(FacadeError::Engine)?;

        if self.shutdown.is_cancelled() {
            if let Err(e) = context.apply(EngineCommand::Release).await {
                warn!("releasing context after refused create failed: {:#}", e);
            }
            return Err(FacadeError::Unavailable("registry is shutting down"));
        }

        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let session = Session::new(handle, Arc::new(config), context);
        self.sessions
            .write()
            .insert(handle, Arc::new(SessionSlot::new(session)));

        self.stats.session_created();
        self.emit(SessionEvent::Created { handle });
        self.relay_progress(handle, reports);
        info!("session {} created", handle);
        Ok(handle)
    }

    /// Forward a context's reports as events until the context is dropped.
    fn relay_progress(
        &self,
        handle: SessionHandle,
        mut reports: mpsc::UnboundedReceiver<Progress>,
    ) {
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(progress) = reports.recv().await {
                if let Some(error) = &progress.error {
                    warn!(
                        "session {} kernel error at frame {}: {}",
                        handle, progress.frame, error
                    );
                }
                let _ = events.send(SessionEvent::Progress { handle, progress });
            }
            debug!("session {} progress stream closed", handle);
        });
    }

    /// Look up a live session. Sessions being destroyed no longer resolve.
    pub fn resolve(&self, handle: SessionHandle) -> FacadeResult<Arc<SessionSlot>> {
        let slot = self
            .sessions
            .read()
            .get(&handle)
            .cloned()
            .ok_or(FacadeError::InvalidHandle(handle))?;
        if slot.is_closing() {
            return Err(FacadeError::InvalidHandle(handle));
        }
        Ok(slot)
    }

    pub async fn destroy_session(self: &Arc<Self>, handle: SessionHandle) -> FacadeResult<()> {
        dispatcher::dispatch(self, handle, Command::Destroy).await?;
        Ok(())
    }

    pub(crate) fn remove(&self, handle: SessionHandle) {
        if self.sessions.write().remove(&handle).is_some() {
            self.stats.session_destroyed();
            self.emit(SessionEvent::Destroyed { handle });
            info!("session {} destroyed", handle);
        }
    }

    /// Handles of every registered session not yet being destroyed, ascending.
    pub fn live_sessions(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<SessionHandle> = self
            .sessions
            .read()
            .values()
            .filter(|slot| !slot.is_closing())
            .map(|slot| slot.handle)
            .collect();
        handles.sort();
        handles
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.sessions.read().len())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Refuse new sessions, then destroy every live one after its queued
    /// commands drain. Returns how many sessions were destroyed.
    pub async fn shutdown(self: &Arc<Self>) -> usize {
        self.shutdown.cancel();
        let handles = self.live_sessions();
        info!("registry shutting down, {} live sessions", handles.len());

        let mut destroyed = 0;
        for handle in handles {
            match self.destroy_session(handle).await {
                Ok(()) => destroyed += 1,
                Err(FacadeError::InvalidHandle(_)) => {}
                Err(e) => warn!("session {} not released during shutdown: {}", handle, e),
            }
        }
        destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::kernel::recording::RecordingKernel;

    fn registry() -> (Arc<SessionRegistry>, RecordingKernel) {
        let kernel = RecordingKernel::new();
        (Arc::new(SessionRegistry::new(Arc::new(kernel.clone()))), kernel)
    }

    #[tokio::test]
    async fn test_handles_are_sequential_and_unique() {
        let (registry, _) = registry();
        let a = registry.create_session(SessionConfig::default()).await.unwrap();
        let b = registry.create_session(SessionConfig::default()).await.unwrap();
        assert_eq!(a, SessionHandle(1));
        assert_eq!(b, SessionHandle(2));
        assert_eq!(registry.live_sessions(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_invalid_config_consumes_no_handle() {
        let (registry, kernel) = registry();
        let err = registry
            .create_session(SessionConfig::new(-1.0, 10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert_eq!(kernel.contexts_created(), 0);
        let handle = registry.create_session(SessionConfig::default()).await.unwrap();
        assert_eq!(handle, SessionHandle(1));
    }

    #[tokio::test]
    async fn test_kernel_refusal_is_engine_error() {
        let (registry, kernel) = registry();
        kernel.fail_context_creation(true);
        let err = registry
            .create_session(SessionConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert!(registry.live_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_destroys_all_and_refuses_new() {
        let (registry, kernel) = registry();
        for _ in 0..3 {
            registry.create_session(SessionConfig::default()).await.unwrap();
        }
        assert_eq!(registry.shutdown().await, 3);
        assert!(registry.live_sessions().is_empty());
        for ctx in 1..=3 {
            assert_eq!(kernel.commands_for(ctx), vec!["release"]);
        }
        let err = registry
            .create_session(SessionConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[tokio::test]
    async fn test_kernel_progress_is_relayed_as_events() {
        let (registry, _) = registry();
        let mut events = registry.subscribe();
        let handle = registry.create_session(SessionConfig::default()).await.unwrap();

        let slot = registry.resolve(handle).unwrap();
        slot.session
            .lock()
            .await
            .context
            .apply(EngineCommand::Start)
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap(), SessionEvent::Created { handle });
        match events.recv().await.unwrap() {
            SessionEvent::Progress { handle: from, progress } => {
                assert_eq!(from, handle);
                assert_eq!(progress.frame, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
