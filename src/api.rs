//! HTTP API（feature = "web"）
//!
//! 供上层网关/客户端调用的薄 REST 层：只做参数搬运与错误码映射，
//! 业务全部在编排器里。协议违规（乱序、非法状态转换）映射 4xx，
//! 其余编排错误映射 500。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::coordinator::{
    Coordinator, CoordinatorError, SessionStatus, SessionSummary, StudentInsights, TurnIntent,
    TurnPayload, TurnRequest, TurnResponse,
};
use crate::reconcile::{OfflineProgressEvent, ReconciliationReport};

pub type SharedCoordinator = Arc<Coordinator>;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub student_id: String,
    pub subject: String,
    pub topic: String,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

/// 回合请求体（session_id 来自路径）
#[derive(Debug, Deserialize)]
pub struct TurnBody {
    pub intent: TurnIntent,
    pub turn_counter: u64,
    #[serde(default)]
    pub payload: TurnPayload,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileBody {
    pub student_id: String,
    pub events: Vec<OfflineProgressEvent>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// 组装路由
pub fn router(coordinator: SharedCoordinator) -> Router {
    Router::new()
        .route("/session/start", post(start_session))
        .route("/session/:id/turn", post(submit_turn))
        .route("/session/:id/pause", post(pause_session))
        .route("/session/:id/resume", post(resume_session))
        .route("/session/:id/end", post(end_session))
        .route("/student/:id/insights", get(student_insights))
        .route("/offline/reconcile", post(reconcile))
        .with_state(coordinator)
}

fn reject(e: CoordinatorError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &e {
        CoordinatorError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        CoordinatorError::InvalidTransition { .. } | CoordinatorError::TurnOutOfOrder { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: e.to_string() }))
}

async fn start_session(
    State(coordinator): State<SharedCoordinator>,
    Json(body): Json<StartSessionRequest>,
) -> Json<StartSessionResponse> {
    let session_id = coordinator
        .start_session(&body.student_id, &body.subject, &body.topic)
        .await;
    Json(StartSessionResponse { session_id })
}

async fn submit_turn(
    State(coordinator): State<SharedCoordinator>,
    Path(session_id): Path<String>,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnResponse>, (StatusCode, Json<ErrorBody>)> {
    let request = TurnRequest {
        session_id,
        turn_counter: body.turn_counter,
        intent: body.intent,
        payload: body.payload,
    };
    coordinator.turn(request).await.map(Json).map_err(reject)
}

async fn pause_session(
    State(coordinator): State<SharedCoordinator>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ErrorBody>)> {
    coordinator
        .pause(&session_id)
        .await
        .map(|status| Json(StatusResponse { status }))
        .map_err(reject)
}

async fn resume_session(
    State(coordinator): State<SharedCoordinator>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ErrorBody>)> {
    coordinator
        .resume(&session_id)
        .await
        .map(|status| Json(StatusResponse { status }))
        .map_err(reject)
}

async fn end_session(
    State(coordinator): State<SharedCoordinator>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, (StatusCode, Json<ErrorBody>)> {
    coordinator.end(&session_id).await.map(Json).map_err(reject)
}

async fn student_insights(
    State(coordinator): State<SharedCoordinator>,
    Path(student_id): Path<String>,
) -> Json<StudentInsights> {
    Json(coordinator.insights(&student_id).await)
}

async fn reconcile(
    State(coordinator): State<SharedCoordinator>,
    Json(body): Json<ReconcileBody>,
) -> Json<ReconciliationReport> {
    Json(coordinator.reconcile_offline(&body.student_id, body.events).await)
}
