//! HTTP 接入层处理器
//!
//! webhook 与店员核销端点的薄胶水层：反序列化、参数校验、
//! 结果到 HTTP 状态码/状态标签的映射。业务规则全部在服务层。

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use validator::Validate;

use crate::models::{RedeemOutcome, TriggerEvent};
use crate::service::IssuanceService;
use crate::state::AppState;

// ==================== DTO 定义 ====================

/// webhook 请求体：消息平台一次可投递多个事件
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub events: Vec<TriggerEvent>,
}

/// webhook 响应体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub accepted: usize,
}

/// 店员核销请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    #[validate(length(min = 1, max = 32, message = "兑换码长度必须在1-32个字符之间"))]
    pub code: String,
    pub staff_pass: Option<String>,
}

/// 店员核销响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_uses: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<i32>,
}

impl RedeemResponse {
    fn failure(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
            remaining_uses: None,
            usage_limit: None,
        }
    }
}

// ==================== 处理器 ====================

/// 接收消息平台 webhook
///
/// 每个事件作为独立任务并发处理；事件入队即向平台确认 200，
/// 单个事件的处理失败只记录日志，避免平台整体重投。
pub async fn webhook(
    State(state): State<AppState>,
    Json(request): Json<WebhookRequest>,
) -> (StatusCode, Json<WebhookResponse>) {
    let accepted = request.events.len();

    for event in request.events {
        let issuance = Arc::clone(&state.issuance);
        tokio::spawn(async move {
            match issuance.handle_trigger(&event).await {
                Ok(outcome) => {
                    info!(
                        event_id = %event.event_id,
                        owner_id = %event.owner_id,
                        outcome = outcome.kind(),
                        "触发事件处理完成"
                    );
                }
                Err(e) => {
                    error!(
                        event_id = %event.event_id,
                        owner_id = %event.owner_id,
                        error = %e,
                        "触发事件处理失败"
                    );
                }
            }
        });
    }

    (StatusCode::OK, Json(WebhookResponse { accepted }))
}

/// 店员核销端点
pub async fn redeem(
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>,
) -> (StatusCode, Json<RedeemResponse>) {
    if request.validate().is_err() || request.code.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(RedeemResponse::failure("BAD_REQUEST", "缺少兑换码")),
        );
    }

    match state
        .redemption
        .redeem(&request.code, request.staff_pass.as_deref())
        .await
    {
        Ok(outcome) => {
            let status_code = outcome_status_code(&outcome);
            (status_code, Json(outcome_response(outcome)))
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "核销处理失败");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RedeemResponse::failure("ERROR", "处理失败，请稍后重试")),
            )
        }
    }
}

/// 核销结果到 HTTP 状态码的映射
///
/// 客户端错误 4xx、状态冲突 409，便于核销界面按原因区分反应
fn outcome_status_code(outcome: &RedeemOutcome) -> StatusCode {
    match outcome {
        RedeemOutcome::Success { .. } => StatusCode::OK,
        RedeemOutcome::InvalidPass => StatusCode::UNAUTHORIZED,
        RedeemOutcome::NotFound => StatusCode::NOT_FOUND,
        RedeemOutcome::Expired | RedeemOutcome::LimitReached | RedeemOutcome::AlreadyConsumed => {
            StatusCode::CONFLICT
        }
    }
}

fn outcome_response(outcome: RedeemOutcome) -> RedeemResponse {
    let status = outcome.status_tag().to_string();
    match outcome {
        RedeemOutcome::Success {
            remaining_uses,
            usage_limit,
        } => RedeemResponse {
            status,
            message: format!("核销成功，剩余 {} 次", remaining_uses),
            remaining_uses: Some(remaining_uses),
            usage_limit: Some(usage_limit),
        },
        RedeemOutcome::InvalidPass => RedeemResponse::failure(status, "核销口令不正确"),
        RedeemOutcome::NotFound => RedeemResponse::failure(status, "兑换码不存在"),
        RedeemOutcome::Expired => RedeemResponse::failure(status, "优惠券已过期"),
        RedeemOutcome::LimitReached => RedeemResponse::failure(status, "优惠券使用次数已用完"),
        RedeemOutcome::AlreadyConsumed => RedeemResponse::failure(status, "优惠券已被使用"),
    }
}
