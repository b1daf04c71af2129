//! HTTP处理器

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use screening_audit::{AuditQuery, AuditSeverity};
use screening_core::ScreeningError;
use screening_workflow::{FinalizeRequest, NewImageUpload, WorkflowEngine};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::identity::actor_from_headers;

/// API错误包装
///
/// 将核心错误映射为HTTP状态码；被拒绝的转换在响应体中
/// 携带当前状态与可用事件，客户端可据此提示下一步操作
pub struct ApiError(pub ScreeningError);

impl From<ScreeningError> for ApiError {
    fn from(err: ScreeningError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            ScreeningError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
            ScreeningError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ScreeningError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ScreeningError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            ScreeningError::ConcurrentModification(_) => {
                (StatusCode::CONFLICT, "concurrent_modification")
            }
            ScreeningError::AlreadyUnderReview(_) => (StatusCode::CONFLICT, "already_under_review"),
            ScreeningError::NotLockHolder(_) => (StatusCode::FORBIDDEN, "not_lock_holder"),
            ScreeningError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            ScreeningError::ActiveEpisodeExists(_) => {
                (StatusCode::CONFLICT, "active_episode_exists")
            }
            ScreeningError::AnalysisUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "analysis_unavailable")
            }
            ScreeningError::AnalysisRejected(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "analysis_rejected")
            }
            ScreeningError::AuditWriteFailure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "audit_write_failure")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        let mut body = json!({
            "error": code,
            "message": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        if let ScreeningError::InvalidTransition { from, allowed, .. } = &self.0 {
            body["current_state"] = json!(from);
            body["allowed_events"] = json!(allowed.split(", ").collect::<Vec<&str>>());
        }

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "Cervical Screening Workflow API",
        "version": "1.0.0",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": "/api/v1"
        }
    }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": "1.0.0"
    }))
}

/// 创建筛查周期请求
#[derive(Debug, Deserialize)]
pub struct CreateEpisodeRequest {
    pub patient_id: Uuid,
    pub reason: Option<String>,
    pub clinical_notes: Option<String>,
}

/// 作废请求
#[derive(Debug, Deserialize, Default)]
pub struct DiscardRequest {
    pub reason: Option<String>,
}

/// 驳回请求
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub note: String,
}

/// 审计查询参数
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub episode_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub event: Option<String>,
    pub severity: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// 创建筛查周期
pub async fn create_episode(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Json(request): Json<CreateEpisodeRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;
    info!("Creating episode for patient {}", request.patient_id);

    let episode = engine
        .create_episode(&actor, request.patient_id, request.reason, request.clinical_notes)
        .await?;
    Ok((StatusCode::CREATED, Json(episode)))
}

/// 上传影像
pub async fn attach_image(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(episode_id): Path<Uuid>,
    Json(upload): Json<NewImageUpload>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let image = engine.attach_image(&actor, episode_id, upload).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

/// 运行AI分析
pub async fn run_analysis(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(episode_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;
    info!("Analysis requested for episode {}", episode_id);

    let episode = engine.run_analysis(&actor, episode_id).await?;
    Ok(Json(episode))
}

/// 查询筛查周期详情
pub async fn get_episode(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(episode_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let detail = engine.get_episode(&actor, episode_id).await?;
    Ok(Json(detail))
}

/// 读取审计历史
pub async fn get_episode_history(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(episode_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let history = engine.get_episode_history(&actor, episode_id).await?;
    let total = history.len();
    Ok(Json(json!({
        "episode_id": episode_id,
        "entries": history,
        "total": total,
    })))
}

/// 作废筛查周期
pub async fn discard_episode(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(episode_id): Path<Uuid>,
    Json(request): Json<DiscardRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let episode = engine.discard_episode(&actor, episode_id, request.reason).await?;
    Ok(Json(episode))
}

/// 重新开放分析
pub async fn request_reanalysis(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(episode_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let episode = engine.request_reanalysis(&actor, episode_id).await?;
    Ok(Json(episode))
}

/// 开始评审
pub async fn begin_review(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(diagnosis_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let diagnosis = engine.begin_review(&actor, diagnosis_id).await?;
    Ok(Json(diagnosis))
}

/// 签署诊断
pub async fn finalize_diagnosis(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(diagnosis_id): Path<Uuid>,
    Json(request): Json<FinalizeRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let diagnosis = engine.finalize_diagnosis(&actor, diagnosis_id, request).await?;
    Ok(Json(diagnosis))
}

/// 驳回诊断
pub async fn reject_diagnosis(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(diagnosis_id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let diagnosis = engine.reject_diagnosis(&actor, diagnosis_id, request.note).await?;
    Ok(Json(diagnosis))
}

/// 释放评审锁
pub async fn release_review(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Path(diagnosis_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let diagnosis = engine.release_review(&actor, diagnosis_id).await?;
    Ok(Json(diagnosis))
}

/// 合规审计查询
pub async fn query_audit(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor_from_headers(&headers)?;

    let severity = match params.severity.as_deref() {
        Some("info") => Some(AuditSeverity::Info),
        Some("warning") => Some(AuditSeverity::Warning),
        Some("critical") => Some(AuditSeverity::Critical),
        Some(other) => {
            return Err(ScreeningError::Validation(format!("未知严重程度: {}", other)).into())
        }
        None => None,
    };

    let filter = AuditQuery {
        episode_id: params.episode_id,
        actor_id: params.actor_id,
        event: params.event,
        severity,
        from: params.from,
        to: params.to,
        offset: params.offset.unwrap_or(0),
        limit: Some(params.limit.unwrap_or(50)),
    };

    let entries = engine.query_audit(&actor, &filter).await;
    let total = entries.len();
    Ok(Json(json!({
        "entries": entries,
        "total": total,
        "offset": filter.offset,
    })))
}

/// 端到端校验审计链
pub async fn verify_audit(
    State(engine): State<Arc<WorkflowEngine>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    actor_from_headers(&headers)?;

    match engine.verify_audit_chain().await {
        Ok(()) => Ok(Json(json!({"valid": true}))),
        Err(err) => Ok(Json(json!({"valid": false, "detail": err.to_string()}))),
    }
}
