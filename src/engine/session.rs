// Simulation session state machine - lifecycle, accumulated scene, owned engine context.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::SessionConfig;
use crate::convert::descriptor::{GarmentDescriptor, ObstacleDescriptor};
use crate::kernel::traits::EngineContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Configured,
    Running,
    Paused,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Configured => "configured",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Caller-visible operations gated by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    AddGarment,
    AddObstacle,
    Start,
    Pause,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::AddGarment => "add_garment",
            Operation::AddObstacle => "add_obstacle",
            Operation::Start => "start_sim",
            Operation::Pause => "pause_sim",
            Operation::Destroy => "destroy_session",
        };
        f.write_str(name)
    }
}

/// Legal edges of the lifecycle. Returns the state after `op` succeeds,
/// or the reason it is rejected.
pub fn transition(
    state: SessionState,
    op: Operation,
    garment_count: usize,
) -> Result<SessionState, &'static str> {
    use Operation::*;
    use SessionState::*;

    match (state, op) {
        (Destroyed, _) => Err("session is destroyed"),
        (_, Destroy) => Ok(Destroyed),

        (Created | Configured, AddGarment | AddObstacle) => Ok(Configured),
        (Paused, AddGarment | AddObstacle) => Ok(Paused),
        (Running, AddGarment | AddObstacle) => Err("scene is frozen while running"),

        (Running, Start) => Err("already running"),
        (Configured | Paused, Start) if garment_count > 0 => Ok(Running),
        (_, Start) => Err("no garments added"),

        (Running, Pause) => Ok(Paused),
        (_, Pause) => Err("not running"),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub handle: SessionHandle,
    pub state: SessionState,
    pub garments: usize,
    pub obstacles: usize,
    /// Whether session parameters have reached the kernel.
    pub prepared: bool,
    pub commands_applied: u64,
    pub uptime_ms: u64,
    pub config: SessionConfig,
}

pub struct Session {
    pub handle: SessionHandle,
    pub config: Arc<SessionConfig>,
    state: SessionState,
    garments: Vec<Arc<GarmentDescriptor>>,
    obstacles: Vec<Arc<ObstacleDescriptor>>,
    pub(crate) context: Box<dyn EngineContext>,
    prepared: bool,
    commands_applied: u64,
    created_at: Instant,
}

impl Session {
    pub fn new(
        handle: SessionHandle,
        config: Arc<SessionConfig>,
        context: Box<dyn EngineContext>,
    ) -> Self {
        Self {
            handle,
            config,
            state: SessionState::Created,
            garments: Vec::new(),
            obstacles: Vec::new(),
            context,
            prepared: false,
            commands_applied: 0,
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn garments(&self) -> &[Arc<GarmentDescriptor>] {
        &self.garments
    }

    pub fn obstacles(&self) -> &[Arc<ObstacleDescriptor>] {
        &self.obstacles
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Next state for `op`, without changing anything.
    pub fn check(&self, op: Operation) -> Result<SessionState, &'static str> {
        transition(self.state, op, self.garments.len())
    }

    // The mutators below run only after the kernel accepted the command.

    pub(crate) fn push_garment(&mut self, garment: Arc<GarmentDescriptor>, next: SessionState) {
        self.garments.push(garment);
        self.state = next;
    }

    pub(crate) fn push_obstacle(&mut self, obstacle: Arc<ObstacleDescriptor>, next: SessionState) {
        self.obstacles.push(obstacle);
        self.state = next;
    }

    pub(crate) fn mark_prepared(&mut self) {
        self.prepared = true;
    }

    pub(crate) fn set_state(&mut self, next: SessionState) {
        self.state = next;
    }

    pub(crate) fn record_command(&mut self) {
        self.commands_applied += 1;
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            handle: self.handle,
            state: self.state,
            garments: self.garments.len(),
            obstacles: self.obstacles.len(),
            prepared: self.prepared,
            commands_applied: self.commands_applied,
            uptime_ms: self.created_at.elapsed().as_millis() as u64,
            config: (*self.config).clone(),
        }
    }
}
