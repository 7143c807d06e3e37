//! 去重闸门
//!
//! 保证每个触发事件至多被处理一次。实现为"先查存在性、再追加记录"，
//! 两步之间对同一事件的真并发重复投递不做原子保护——偶发双发的代价
//! 被接受为软保证；追加一侧输掉主键竞争时按"已被占用"处理，
//! 调用方必须立即停止后续处理。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use coupon_shared::error::Result;

use crate::repository::ProcessedEventRepository;

/// 去重闸门
#[derive(Clone)]
pub struct DedupGate {
    events: Arc<dyn ProcessedEventRepository>,
}

impl DedupGate {
    pub fn new(events: Arc<dyn ProcessedEventRepository>) -> Self {
        Self { events }
    }

    /// 尝试占用事件
    ///
    /// 返回 true 表示事件首次出现、已被占用；返回 false 表示事件
    /// 已处理过，调用方不得再做任何事。
    pub async fn try_claim(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool> {
        if self.events.exists(event_id).await? {
            debug!(event_id, "事件已处理，跳过");
            return Ok(false);
        }

        let claimed = self.events.insert(event_id, now).await?;
        if !claimed {
            debug!(event_id, "事件被并发占用，跳过");
        }

        Ok(claimed)
    }
}
