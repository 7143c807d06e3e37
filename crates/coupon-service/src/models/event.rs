//! 触发事件模型
//!
//! 消息平台 webhook 投递的入站事件，以及幂等台账中的已处理记录。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 入站触发事件
///
/// 消息平台可能对同一 event_id 重复投递，处理前必须先经过去重闸门。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    /// 平台侧事件标识，去重的依据
    pub event_id: String,
    /// 发送人标识
    pub owner_id: String,
    /// 消息文本
    pub text: String,
}

/// 已处理事件记录
///
/// 只追加的去重台账行：按 event_id 建一次，之后永不修改，
/// 除存在性检查外也不会被读取。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub processed_at: DateTime<Utc>,
}
