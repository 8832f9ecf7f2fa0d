//! Minimal HTTP control surface.
//!
//! Axum handlers never touch the supervisor directly; they send a
//! [`ControlRequest`] over a channel to the control task that owns it and
//! await the response on a oneshot. Two endpoints: status snapshot and
//! line injection.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Requests from web handlers to the control task.
#[derive(Debug)]
pub enum ControlRequest {
    GetStatus {
        respond_to: oneshot::Sender<StatusResponse>,
    },
    SubmitLine {
        line: String,
        respond_to: oneshot::Sender<Result<(), String>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub state: String,
    pub alarm: u8,
    pub mpos: [f64; 3],
    pub wpos: [f64; 3],
    pub feedrate: f64,
    pub spindle_speed: f64,
    pub lines_processed: u32,
    pub errors: u32,
    pub report: String,
}

#[derive(Debug, Deserialize)]
pub struct LineRequest {
    pub line: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn create_router(control_tx: mpsc::Sender<ControlRequest>) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/line", post(submit_line))
        .with_state(control_tx)
}

async fn get_status(
    State(control_tx): State<mpsc::Sender<ControlRequest>>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let (respond_to, response) = oneshot::channel();
    control_tx
        .send(ControlRequest::GetStatus { respond_to })
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    response.await.map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn submit_line(
    State(control_tx): State<mpsc::Sender<ControlRequest>>,
    Json(request): Json<LineRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let (respond_to, response) = oneshot::channel();
    control_tx
        .send(ControlRequest::SubmitLine {
            line: request.line,
            respond_to,
        })
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    error: "control task unavailable".to_string(),
                }),
            )
        })?;
    match response.await {
        Ok(Ok(())) => Ok(StatusCode::OK),
        Ok(Err(message)) => Err((StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorBody { error: message }))),
        Err(_) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: "control task dropped the request".to_string(),
            }),
        )),
    }
}
