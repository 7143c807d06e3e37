//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use coupon_shared::error::Result;

use crate::models::{Coupon, CouponStatus, NewCoupon, RedeemOutcome};

/// 优惠券仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// 查询用户最近发放的 ACTIVE 状态券（同刻并列时取最晚发放）
    async fn find_active_for_owner(&self, owner_id: &str) -> Result<Option<Coupon>>;

    /// 查询用户最近一张券（不限状态），用于冷却判定
    async fn find_most_recent_for_owner(&self, owner_id: &str) -> Result<Option<Coupon>>;

    /// 统计用户自某时刻起（含）发放的券数，用于每日上限判定
    async fn count_issued_since(&self, owner_id: &str, since: DateTime<Utc>) -> Result<i64>;

    /// 按兑换码精确查询（调用方必须先归一化为大写）
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>>;

    /// 创建新券，usage_count=0、status=ACTIVE
    async fn create(&self, new_coupon: &NewCoupon) -> Result<Coupon>;

    /// 幂等的状态纠正：仅当券仍为 ACTIVE 时写入 EXPIRED/CONSUMED
    async fn mark_status(&self, coupon_id: i64, status: CouponStatus) -> Result<()>;

    /// 事务化核销
    ///
    /// 在行锁保护下重读、判定并写回，同一张券的并发核销被串行化，
    /// 保证每次物理核销至多一次成功递增。
    async fn transactional_redeem(
        &self,
        coupon_id: i64,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome>;
}

/// 已处理事件仓储接口（去重台账）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    /// 事件是否已处理过
    async fn exists(&self, event_id: &str) -> Result<bool>;

    /// 追加处理记录；返回 false 表示并发竞争下记录已存在
    async fn insert(&self, event_id: &str, processed_at: DateTime<Utc>) -> Result<bool>;
}
