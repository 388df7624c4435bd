// Error taxonomy for every façade operation.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::engine::session::{Operation, SessionHandle, SessionState};

pub type FacadeResult<T> = std::result::Result<T, FacadeError>;

/// Coarse error classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidHandle,
    InvalidConfig,
    IllegalState,
    Format,
    Io,
    Engine,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidHandle => "invalid_handle",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::IllegalState => "illegal_state",
            ErrorKind::Format => "format",
            ErrorKind::Io => "io",
            ErrorKind::Engine => "engine",
        };
        f.write_str(name)
    }
}

/// Which half of a legacy scene bundle a conversion failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneSide {
    Garment,
    Obstacle,
}

impl fmt::Display for SceneSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneSide::Garment => f.write_str("garment"),
            SceneSide::Obstacle => f.write_str("obstacle"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FacadeError {
    /// Handle was never issued, or its session is destroyed or being destroyed.
    #[error("invalid session handle {0}")]
    InvalidHandle(SessionHandle),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("{operation} is not allowed while session {handle} is {state}: {reason}")]
    IllegalState {
        handle: SessionHandle,
        operation: Operation,
        state: SessionState,
        reason: &'static str,
    },

    /// Registry-wide refusal, e.g. after shutdown began.
    #[error("registry unavailable: {0}")]
    Unavailable(&'static str),

    #[error("legacy format error: {0}")]
    Format(String),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by the simulation kernel; the payload is passed through untouched.
    #[error("engine failure: {0:#}")]
    Engine(anyhow::Error),

    #[error("{side} conversion failed: {source}")]
    Scene {
        side: SceneSide,
        #[source]
        source: Box<FacadeError>,
    },
}

impl FacadeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FacadeError::InvalidHandle(_) => ErrorKind::InvalidHandle,
            FacadeError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            FacadeError::IllegalState { .. } | FacadeError::Unavailable(_) => {
                ErrorKind::IllegalState
            }
            FacadeError::Format(_) => ErrorKind::Format,
            FacadeError::Io { .. } => ErrorKind::Io,
            FacadeError::Engine(_) => ErrorKind::Engine,
            FacadeError::Scene { source, .. } => source.kind(),
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        FacadeError::Format(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FacadeError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn scene(side: SceneSide, source: FacadeError) -> Self {
        FacadeError::Scene {
            side,
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for FacadeError {
    fn from(err: serde_json::Error) -> Self {
        FacadeError::Format(format!("json: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_error_reports_inner_kind() {
        let inner = FacadeError::format("bad header");
        let err = FacadeError::scene(SceneSide::Obstacle, inner);
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().starts_with("obstacle conversion failed"));
    }

    #[test]
    fn engine_error_keeps_payload_text() {
        let err = FacadeError::Engine(anyhow::anyhow!("solver exploded"));
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert!(err.to_string().contains("solver exploded"));
    }
}
