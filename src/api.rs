//! HTTP API（`--api` 模式，feature `web`）
//!
//! POST /api/requests 同步处理到全部任务终态后返回汇总；处理期间可用
//! POST /api/requests/:id/cancel 取消。结果在请求结束后仍可经 /api/results 查询。

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agents::AgentDescriptor;
use crate::core::{
    OperationalMode, Orchestrator, OrchestratorError, Request, RequestId, RequestInput, RequestOutcome,
    StatusReport, TaskId,
};
use crate::memory::{AgentResult, MemoryError};

/// /api/results 单次最多返回条数
const MAX_RECENT: usize = 1000;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// 请求体的 input：纯文本，或带 type 标签的结构化输入
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InputBody {
    Text(String),
    Structured(RequestInput),
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub input: InputBody,
    #[serde(default)]
    pub mode: Option<OperationalMode>,
    /// 调用方指定的关联 ID（便于并发取消）
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub request_id: RequestId,
    pub cancelled: bool,
}

fn orchestrator_error(e: OrchestratorError) -> (StatusCode, String) {
    let code = match e {
        OrchestratorError::EmptyRequest => StatusCode::BAD_REQUEST,
        OrchestratorError::DuplicateRequest(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, e.to_string())
}

fn memory_error(e: MemoryError) -> (StatusCode, String) {
    let code = match e {
        MemoryError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, e.to_string())
}

async fn submit_request(
    State(orch): State<Arc<Orchestrator>>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<RequestOutcome> {
    let input = match body.input {
        InputBody::Text(text) => RequestInput::Text { text },
        InputBody::Structured(input) => input,
    };
    let mut request = Request::new(input, body.mode.unwrap_or_else(|| orch.mode()));
    if let Some(id) = body.request_id.filter(|s| !s.trim().is_empty()) {
        request = request.with_id(RequestId::from(id.as_str()));
    }
    orch.process(request).await.map(Json).map_err(orchestrator_error)
}

async fn cancel_request(
    State(orch): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> ApiResult<CancelResponse> {
    let request_id = RequestId::from(id.as_str());
    if orch.cancel(&request_id) {
        Ok(Json(CancelResponse {
            request_id,
            cancelled: true,
        }))
    } else {
        Err((StatusCode::NOT_FOUND, format!("no active request {id}")))
    }
}

async fn get_result(
    State(orch): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
) -> ApiResult<AgentResult> {
    orch.result(&TaskId::from(task_id))
        .map(Json)
        .map_err(memory_error)
}

async fn recent_results(
    State(orch): State<Arc<Orchestrator>>,
    Query(q): Query<RecentQuery>,
) -> ApiResult<Vec<AgentResult>> {
    let n = q.n.unwrap_or(orch.config().storage.context_window).min(MAX_RECENT);
    orch.recent(n).map(Json).map_err(memory_error)
}

async fn status(State(orch): State<Arc<Orchestrator>>) -> Json<StatusReport> {
    Json(orch.status())
}

async fn agents(State(orch): State<Arc<Orchestrator>>) -> Json<Vec<AgentDescriptor>> {
    Json(orch.agents())
}

pub fn router(orch: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/requests", post(submit_request))
        .route("/api/requests/:id/cancel", post(cancel_request))
        .route("/api/results", get(recent_results))
        .route("/api/results/:task_id", get(get_result))
        .route("/api/status", get(status))
        .route("/api/agents", get(agents))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(orch)
}

/// 监听 host:port 直到 shutdown 被取消
pub async fn serve(
    orch: Arc<Orchestrator>,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API listening on http://{}", addr);
    axum::serve(listener, router(orch))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
