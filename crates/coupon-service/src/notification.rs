//! 通知发送模块
//!
//! 通过 `NotificationSender` trait 抽象发送行为。配置了推送端点时
//! 使用 HTTP 推送实现；未配置时使用日志实现，便于在无外部依赖的
//! 情况下验证发放管道的完整性。对核心流程而言通知是 fire-and-forget：
//! 发送失败只记录日志，券在存储中的状态才是事实来源。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::Coupon;

/// 通知发送错误
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("推送请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("推送被拒绝: status={0}")]
    Rejected(u16),
}

/// 通知发送器 trait
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 发送优惠券快照（新发放或复用）
    async fn send_coupon(&self, owner_id: &str, coupon: &Coupon) -> Result<(), NotificationError>;

    /// 发送文本告知（冷却中、达到每日上限等策略性拒绝）
    async fn send_notice(&self, owner_id: &str, text: &str) -> Result<(), NotificationError>;
}

// ---------------------------------------------------------------------------
// 日志发送器
// ---------------------------------------------------------------------------

/// 日志通知发送器
///
/// 未配置推送端点时的默认实现，仅记录结构化日志。
pub struct LoggingSender;

#[async_trait]
impl NotificationSender for LoggingSender {
    async fn send_coupon(&self, owner_id: &str, coupon: &Coupon) -> Result<(), NotificationError> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            owner_id = %owner_id,
            message_id = %message_id,
            code = %coupon.code,
            expires_at = %coupon.expires_at,
            remaining = coupon.remaining_uses(),
            "模拟发送优惠券通知"
        );

        Ok(())
    }

    async fn send_notice(&self, owner_id: &str, text: &str) -> Result<(), NotificationError> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            owner_id = %owner_id,
            message_id = %message_id,
            text = %text,
            "模拟发送文本通知"
        );

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP 推送发送器
// ---------------------------------------------------------------------------

/// HTTP 推送通知发送器
///
/// 将通知以 JSON 形式 POST 到配置的消息平台端点。
pub struct PushSender {
    client: Client,
    endpoint: String,
}

impl PushSender {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn push(&self, payload: serde_json::Value) -> Result<(), NotificationError> {
        let response = self.client.post(&self.endpoint).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected(status.as_u16()));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSender for PushSender {
    async fn send_coupon(&self, owner_id: &str, coupon: &Coupon) -> Result<(), NotificationError> {
        self.push(json!({
            "to": owner_id,
            "type": "coupon",
            "code": coupon.code,
            "expiresAt": coupon.expires_at,
            "remainingUses": coupon.remaining_uses(),
            "usageLimit": coupon.usage_limit,
        }))
        .await
    }

    async fn send_notice(&self, owner_id: &str, text: &str) -> Result<(), NotificationError> {
        self.push(json!({
            "to": owner_id,
            "type": "text",
            "text": text,
        }))
        .await
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
