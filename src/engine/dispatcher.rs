// Command dispatcher - per-session FIFO execution against the engine context.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, warn};

use super::registry::{SessionEvent, SessionRegistry, SessionSlot};
use super::session::{Operation, Session, SessionHandle, SessionState, SessionStatus};
use crate::convert::descriptor::{GarmentDescriptor, ObstacleDescriptor};
use crate::error::{FacadeError, FacadeResult};
use crate::kernel::traits::EngineCommand;

#[derive(Debug, Clone)]
pub enum Command {
    AddGarment(Arc<GarmentDescriptor>),
    AddObstacle(Arc<ObstacleDescriptor>),
    Start,
    Pause,
    Destroy,
}

impl Command {
    pub fn operation(&self) -> Operation {
        match self {
            Command::AddGarment(_) => Operation::AddGarment,
            Command::AddObstacle(_) => Operation::AddObstacle,
            Command::Start => Operation::Start,
            Command::Pause => Operation::Pause,
            Command::Destroy => Operation::Destroy,
        }
    }
}

/// Run `command` on a session once every earlier command on it has finished.
/// Returns the session state after the command.
///
/// Commands on different sessions never wait on each other. A failed command
/// leaves the session exactly as it was. Once queued, a command runs to
/// completion even if the caller stops waiting for it.
pub async fn dispatch(
    registry: &Arc<SessionRegistry>,
    handle: SessionHandle,
    command: Command,
) -> FacadeResult<SessionState> {
    let slot = registry.resolve(handle)?;
    let op = command.operation();

    if op == Operation::Destroy && !slot.begin_close() {
        return Err(FacadeError::InvalidHandle(handle));
    }
    registry.stats.command_started();

    let task = tokio::spawn(run(registry.clone(), slot, command));
    match task.await {
        Ok(result) => result,
        Err(e) => Err(FacadeError::Engine(anyhow!(
            "session {}: {} task failed: {}",
            handle,
            op,
            e
        ))),
    }
}

async fn run(
    registry: Arc<SessionRegistry>,
    slot: Arc<SessionSlot>,
    command: Command,
) -> FacadeResult<SessionState> {
    let handle = slot.handle;
    let op = command.operation();

    let mut session = slot.session.lock().await;
    debug!("session {}: {} dispatched", handle, op);
    let result = execute(&registry, &mut session, command).await;
    drop(session);

    if op == Operation::Destroy {
        match &result {
            Ok(_) => registry.remove(handle),
            Err(_) => slot.abort_close(),
        }
    }
    registry.stats.command_finished(result.is_ok());
    result
}

/// Current status, read in queue order with the session's other commands.
pub async fn status(registry: &SessionRegistry, handle: SessionHandle) -> FacadeResult<SessionStatus> {
    let slot = registry.resolve(handle)?;
    let session = slot.session.lock().await;
    if session.state() == SessionState::Destroyed {
        return Err(FacadeError::InvalidHandle(handle));
    }
    Ok(session.status())
}

async fn execute(
    registry: &SessionRegistry,
    session: &mut Session,
    command: Command,
) -> FacadeResult<SessionState> {
    let handle = session.handle;
    let op = command.operation();
    let from = session.state();

    // Queued behind a destroy that completed.
    if from == SessionState::Destroyed {
        return Err(FacadeError::InvalidHandle(handle));
    }

    let next = session
        .check(op)
        .map_err(|reason| FacadeError::IllegalState {
            handle,
            operation: op,
            state: from,
            reason,
        })?;

    match command {
        Command::AddGarment(garment) => {
            garment.validate()?;
            forward(session, EngineCommand::AddGarment(garment.clone())).await?;
            session.push_garment(garment, next);
            registry.emit(SessionEvent::GarmentAdded {
                handle,
                garments: session.garments().len(),
            });
        }
        Command::AddObstacle(obstacle) => {
            obstacle.validate()?;
            forward(session, EngineCommand::AddObstacle(obstacle.clone())).await?;
            session.push_obstacle(obstacle, next);
            registry.emit(SessionEvent::ObstacleAdded {
                handle,
                obstacles: session.obstacles().len(),
            });
        }
        Command::Start => {
            if !session.is_prepared() {
                let config = session.config.clone();
                forward(session, EngineCommand::Prepare(config)).await?;
                session.mark_prepared();
            }
            forward(session, EngineCommand::Start).await?;
            session.set_state(next);
        }
        Command::Pause => {
            forward(session, EngineCommand::Pause).await?;
            session.set_state(next);
        }
        Command::Destroy => {
            forward(session, EngineCommand::Release).await?;
            session.set_state(next);
        }
    }

    if next != from {
        registry.emit(SessionEvent::StateChanged {
            handle,
            from,
            to: next,
        });
    }
    Ok(next)
}

async fn forward(session: &mut Session, command: EngineCommand) -> FacadeResult<()> {
    let name = command.name();
    match session.context.apply(command).await {
        Ok(()) => {
            session.record_command();
            Ok(())
        }
        Err(e) => {
            warn!("session {}: kernel rejected {}: {:#}", session.handle, name, e);
            Err(FacadeError::Engine(e))
        }
    }
}
