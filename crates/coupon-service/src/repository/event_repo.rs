//! 去重台账仓储的 PostgreSQL 实现
//!
//! processed_events 是只追加的台账：每个 event_id 至多一行，
//! 写入后永不修改；除存在性检查外不提供读取。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

use coupon_shared::error::{Result, is_unique_violation};

use super::traits::ProcessedEventRepository;

/// 已处理事件仓储
#[derive(Clone)]
pub struct PgProcessedEventRepository {
    pool: PgPool,
}

impl PgProcessedEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventRepository for PgProcessedEventRepository {
    #[instrument(skip(self))]
    async fn exists(&self, event_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn insert(&self, event_id: &str, processed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO processed_events (event_id, processed_at) VALUES ($1, $2)",
        )
        .bind(event_id)
        .bind(processed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            // 同一事件的并发投递在主键上竞争，输掉的一方视为已被占用
            Err(e) if is_unique_violation(&e) => {
                debug!(event_id, "处理记录已存在，写入竞争失败");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
