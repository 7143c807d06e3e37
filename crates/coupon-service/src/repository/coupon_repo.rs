//! 优惠券仓储的 PostgreSQL 实现
//!
//! ## 查询降级策略
//!
//! 有序/过滤查询走 `active_coupons` 视图与 `(owner_id, issued_at)` 索引，
//! 两者由后置迁移建立。当部署尚未迁移到位时，这类查询以可枚举的
//! SQLSTATE 失败（见 `coupon_shared::error::is_index_unavailable`），
//! 仓储层退回到按 owner 全量扫描加内存过滤/排序的等价实现。
//! 降级路径与主路径语义完全一致，是正确性要求而非性能优化。
//!
//! ## 核销事务
//!
//! `SELECT ... FOR UPDATE` 行锁串行化同一张券上的并发写入；
//! 事务体调用纯判定函数 `decide_redemption`，按带标签的判定结果
//! 提交或放弃，失败路径永不递增 usage_count。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use coupon_shared::error::{Result, is_index_unavailable};

use crate::models::{Coupon, CouponStatus, NewCoupon, RedeemDecision, RedeemOutcome,
    decide_redemption};

use super::traits::CouponRepository;

/// 查询列清单，与 `Coupon` 的 FromRow 字段一一对应
const COUPON_COLUMNS: &str = "id, code, owner_id, issued_at, expires_at, \
     usage_limit, usage_count, status, last_used_at, created_at, updated_at";

/// 优惠券仓储
#[derive(Clone)]
pub struct PgCouponRepository {
    pool: PgPool,
}

impl PgCouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按 owner 做无序全量扫描（降级路径的数据来源）
    async fn scan_owner(&self, owner_id: &str) -> Result<Vec<Coupon>> {
        let coupons = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE owner_id = $1"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(coupons)
    }

    /// 降级：扫描后在内存中完成过滤与排序，语义与主路径一致
    async fn find_latest_scanned(
        &self,
        owner_id: &str,
        only_active: bool,
    ) -> Result<Option<Coupon>> {
        let coupons = self.scan_owner(owner_id).await?;

        Ok(coupons
            .into_iter()
            .filter(|c| !only_active || c.status == CouponStatus::Active)
            .max_by_key(|c| (c.issued_at, c.id)))
    }
}

#[async_trait]
impl CouponRepository for PgCouponRepository {
    #[instrument(skip(self))]
    async fn find_active_for_owner(&self, owner_id: &str) -> Result<Option<Coupon>> {
        let result = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM active_coupons \
             WHERE owner_id = $1 \
             ORDER BY issued_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(coupon) => Ok(coupon),
            Err(e) if is_index_unavailable(&e) => {
                warn!(owner_id, error = %e, "有序查询不可用，降级为全量扫描");
                self.find_latest_scanned(owner_id, true).await
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn find_most_recent_for_owner(&self, owner_id: &str) -> Result<Option<Coupon>> {
        let result = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons \
             WHERE owner_id = $1 \
             ORDER BY issued_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(coupon) => Ok(coupon),
            Err(e) if is_index_unavailable(&e) => {
                warn!(owner_id, error = %e, "有序查询不可用，降级为全量扫描");
                self.find_latest_scanned(owner_id, false).await
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn count_issued_since(&self, owner_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let result = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM coupons WHERE owner_id = $1 AND issued_at >= $2",
        )
        .bind(owner_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(count) => Ok(count),
            Err(e) if is_index_unavailable(&e) => {
                warn!(owner_id, error = %e, "计数查询不可用，降级为全量扫描");
                let coupons = self.scan_owner(owner_id).await?;
                Ok(coupons.iter().filter(|c| c.issued_at >= since).count() as i64)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon)
    }

    #[instrument(skip(self, new_coupon), fields(owner_id = %new_coupon.owner_id))]
    async fn create(&self, new_coupon: &NewCoupon) -> Result<Coupon> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            "INSERT INTO coupons \
                 (code, owner_id, issued_at, expires_at, usage_limit, usage_count, status) \
             VALUES ($1, $2, $3, $4, $5, 0, 'ACTIVE') \
             RETURNING {COUPON_COLUMNS}"
        ))
        .bind(&new_coupon.code)
        .bind(&new_coupon.owner_id)
        .bind(new_coupon.issued_at)
        .bind(new_coupon.expires_at)
        .bind(new_coupon.usage_limit)
        .fetch_one(&self.pool)
        .await?;

        info!(
            coupon_id = coupon.id,
            owner_id = %coupon.owner_id,
            expires_at = %coupon.expires_at,
            "优惠券已创建"
        );

        Ok(coupon)
    }

    #[instrument(skip(self))]
    async fn mark_status(&self, coupon_id: i64, status: CouponStatus) -> Result<()> {
        // 只允许从 ACTIVE 纠正出去，重复调用自然为 no-op
        let result = sqlx::query(
            "UPDATE coupons SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(coupon_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(coupon_id, ?status, "遗留有效券状态已纠正");
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn transactional_redeem(
        &self,
        coupon_id: i64,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        // FOR UPDATE 行锁：并发核销同一张券时后到者等待，
        // 解锁后读到的是前者已提交的计数与状态
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1 FOR UPDATE"
        ))
        .bind(coupon_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(coupon) = coupon else {
            tx.rollback().await?;
            return Ok(RedeemOutcome::NotFound);
        };

        match decide_redemption(&coupon, now) {
            RedeemDecision::Reject {
                outcome,
                corrective_status,
            } => {
                if let Some(status) = corrective_status {
                    sqlx::query(
                        "UPDATE coupons SET status = $2, updated_at = $3 WHERE id = $1",
                    )
                    .bind(coupon_id)
                    .bind(status)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;

                    info!(coupon_id, ?status, "核销拒绝，状态已在事务内纠正");
                }
                tx.commit().await?;
                Ok(outcome)
            }
            RedeemDecision::Accept {
                new_count,
                new_status,
            } => {
                sqlx::query(
                    "UPDATE coupons \
                     SET usage_count = $2, status = $3, last_used_at = $4, updated_at = $4 \
                     WHERE id = $1",
                )
                .bind(coupon_id)
                .bind(new_count)
                .bind(new_status)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                let remaining = coupon.usage_limit - new_count;
                info!(
                    coupon_id,
                    usage_count = new_count,
                    remaining,
                    ?new_status,
                    "优惠券核销成功"
                );

                Ok(RedeemOutcome::Success {
                    remaining_uses: remaining,
                    usage_limit: coupon.usage_limit,
                })
            }
        }
    }
}
