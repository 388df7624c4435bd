// Axum control surface - translates HTTP requests into façade operations.

use std::path::PathBuf;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::api::ArcsimFacade;
use crate::config::SessionConfig;
use crate::engine::session::{SessionHandle, SessionState};
use crate::error::{ErrorKind, FacadeError};

pub struct ControlServer {
    port: u16,
    facade: ArcsimFacade,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ControlServer {
    /// Bind `addr` (port 0 picks a free one) and serve in the background.
    pub async fn start(facade: ArcsimFacade, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = router(facade.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("control server listening on port {}", port);
        Ok(Self {
            port,
            facade,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Start on the address from the façade's configuration.
    pub async fn start_configured(facade: ArcsimFacade) -> Result<Self> {
        let addr = facade.config().bind_addr.clone();
        Self::start(facade, &addr).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn facade(&self) -> &ArcsimFacade {
        &self.facade
    }

    /// Stop accepting requests. Sessions stay registered.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub fn router(facade: ArcsimFacade) -> Router {
    Router::new()
        .route("/version", get(version_handler))
        .route("/stats", get(stats_handler))
        .route("/sessions", post(create_handler))
        .route(
            "/sessions/{handle}",
            get(status_handler).delete(destroy_handler),
        )
        .route("/sessions/{handle}/garments", post(add_garment_handler))
        .route("/sessions/{handle}/obstacles", post(add_obstacle_handler))
        .route("/sessions/{handle}/start", post(start_handler))
        .route("/sessions/{handle}/pause", post(pause_handler))
        .route("/convert/garment", post(convert_garment_handler))
        .route("/convert/obstacle", post(convert_obstacle_handler))
        .route("/convert/scene", post(convert_scene_handler))
        .with_state(facade)
}

/// Façade error rendered as `{kind, message}`.
pub struct ApiError(FacadeError);

impl From<FacadeError> for ApiError {
    fn from(err: FacadeError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidHandle => StatusCode::NOT_FOUND,
        ErrorKind::InvalidConfig => StatusCode::BAD_REQUEST,
        ErrorKind::IllegalState => StatusCode::CONFLICT,
        ErrorKind::Format => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Io => StatusCode::BAD_REQUEST,
        ErrorKind::Engine => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        debug!("request failed ({}): {}", kind, self.0);
        let body = json!({ "kind": kind, "message": self.0.to_string() });
        (status_for(kind), Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Bodies are taken as raw bytes, whatever the content type, so every decode
/// failure maps onto the façade taxonomy.
fn decode<T: DeserializeOwned>(body: &[u8], on_error: fn(String) -> FacadeError) -> ApiResult<T> {
    if is_blank(body) {
        return Err(ApiError(on_error("request body is empty".to_string())));
    }
    serde_json::from_slice(body).map_err(|e| ApiError(on_error(e.to_string())))
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

#[derive(Serialize)]
struct StateReply {
    handle: SessionHandle,
    state: SessionState,
}

#[derive(Deserialize)]
struct ConvertRequest {
    binary_path: PathBuf,
    json_path: PathBuf,
}

#[derive(Deserialize)]
struct SceneRequest {
    garment_bin: PathBuf,
    garment_json: PathBuf,
    obstacle_bin: PathBuf,
    obstacle_json: PathBuf,
}

/// GET /version
async fn version_handler(State(facade): State<ArcsimFacade>) -> Response {
    let version = facade.version().await;
    let engine = facade.engine_version().await;
    Json(json!({ "version": version, "engine": engine })).into_response()
}

/// GET /stats
async fn stats_handler(State(facade): State<ArcsimFacade>) -> Response {
    Json(facade.stats()).into_response()
}

/// POST /sessions - body is a session config object. No body means defaults.
async fn create_handler(State(facade): State<ArcsimFacade>, body: Bytes) -> ApiResult<Response> {
    let config = if is_blank(&body) {
        SessionConfig::default()
    } else {
        decode(&body, FacadeError::InvalidConfig)?
    };
    let handle = facade.create_session(config).await?;
    let reply = StateReply {
        handle,
        state: SessionState::Created,
    };
    Ok((StatusCode::CREATED, Json(reply)).into_response())
}

/// GET /sessions/{handle}
async fn status_handler(
    State(facade): State<ArcsimFacade>,
    Path(handle): Path<u64>,
) -> ApiResult<Response> {
    let status = facade.session_status(SessionHandle(handle)).await?;
    Ok(Json(status).into_response())
}

/// DELETE /sessions/{handle}
async fn destroy_handler(
    State(facade): State<ArcsimFacade>,
    Path(handle): Path<u64>,
) -> ApiResult<StatusCode> {
    facade.destroy_session(SessionHandle(handle)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /sessions/{handle}/garments - body is a garment descriptor.
async fn add_garment_handler(
    State(facade): State<ArcsimFacade>,
    Path(handle): Path<u64>,
    body: Bytes,
) -> ApiResult<Json<StateReply>> {
    let handle = SessionHandle(handle);
    let garment = decode(&body, FacadeError::Format)?;
    let state = facade.add_garment(handle, garment).await?;
    Ok(Json(StateReply { handle, state }))
}

/// POST /sessions/{handle}/obstacles - body is an obstacle descriptor.
async fn add_obstacle_handler(
    State(facade): State<ArcsimFacade>,
    Path(handle): Path<u64>,
    body: Bytes,
) -> ApiResult<Json<StateReply>> {
    let handle = SessionHandle(handle);
    let obstacle = decode(&body, FacadeError::Format)?;
    let state = facade.add_obstacle(handle, obstacle).await?;
    Ok(Json(StateReply { handle, state }))
}

/// POST /sessions/{handle}/start
async fn start_handler(
    State(facade): State<ArcsimFacade>,
    Path(handle): Path<u64>,
) -> ApiResult<Json<StateReply>> {
    let handle = SessionHandle(handle);
    let state = facade.start_sim(handle).await?;
    Ok(Json(StateReply { handle, state }))
}

/// POST /sessions/{handle}/pause
async fn pause_handler(
    State(facade): State<ArcsimFacade>,
    Path(handle): Path<u64>,
) -> ApiResult<Json<StateReply>> {
    let handle = SessionHandle(handle);
    let state = facade.pause_sim(handle).await?;
    Ok(Json(StateReply { handle, state }))
}

/// POST /convert/garment
async fn convert_garment_handler(
    State(facade): State<ArcsimFacade>,
    body: Bytes,
) -> ApiResult<Response> {
    let req: ConvertRequest = decode(&body, FacadeError::Format)?;
    let garment = facade
        .convert_legacy_garment(req.binary_path, req.json_path)
        .await?;
    Ok(Json(garment).into_response())
}

/// POST /convert/obstacle
async fn convert_obstacle_handler(
    State(facade): State<ArcsimFacade>,
    body: Bytes,
) -> ApiResult<Response> {
    let req: ConvertRequest = decode(&body, FacadeError::Format)?;
    let obstacle = facade
        .convert_legacy_obstacle(req.binary_path, req.json_path)
        .await?;
    Ok(Json(obstacle).into_response())
}

/// POST /convert/scene
async fn convert_scene_handler(
    State(facade): State<ArcsimFacade>,
    body: Bytes,
) -> ApiResult<Response> {
    let req: SceneRequest = decode(&body, FacadeError::Format)?;
    let scene = facade
        .convert_legacy_arcsim_scene(
            req.garment_bin,
            req.garment_json,
            req.obstacle_bin,
            req.obstacle_json,
        )
        .await?;
    Ok(Json(scene).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_by_kind() {
        assert_eq!(status_for(ErrorKind::InvalidHandle), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::IllegalState), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Format), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorKind::Engine), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_config_decode_error_is_invalid_config() {
        let err = decode::<SessionConfig>(br#"{"time_step": "fast"}"#, FacadeError::InvalidConfig)
            .err()
            .unwrap();
        assert_eq!(err.0.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_blank_descriptor_body_is_format_error() {
        let err = decode::<ConvertRequest>(b" \n", FacadeError::Format).err().unwrap();
        assert_eq!(err.0.kind(), ErrorKind::Format);
        assert!(err.0.to_string().contains("empty"));
    }
}
