//! 优惠券实体
//!
//! 优惠券是系统的核心实体，一经创建永不删除（保留审计痕迹）。
//! 状态只会从 ACTIVE 单向迁移到 CONSUMED 或 EXPIRED，
//! usage_count 只增不减。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 优惠券状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponStatus {
    /// 有效，可被核销
    Active,
    /// 使用次数已耗尽
    Consumed,
    /// 已过有效期
    Expired,
}

/// 优惠券
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: i64,
    /// 兑换码，存储为大写，比较时不区分大小写（调用方负责归一化）
    pub code: String,
    /// 领取人标识
    pub owner_id: String,
    pub issued_at: DateTime<Utc>,
    /// 过期时间 = issued_at + 有效期窗口，发放时固定
    pub expires_at: DateTime<Utc>,
    /// 可用次数上限，发放时固定
    pub usage_limit: i32,
    /// 已用次数，0 <= usage_count <= usage_limit
    pub usage_count: i32,
    pub status: CouponStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// 是否可核销：有效状态、未过期且还有剩余次数
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.status == CouponStatus::Active
            && self.expires_at > now
            && self.usage_count < self.usage_limit
    }

    /// 剩余可用次数
    pub fn remaining_uses(&self) -> i32 {
        (self.usage_limit - self.usage_count).max(0)
    }

    /// 次数是否已耗尽
    pub fn is_exhausted(&self) -> bool {
        self.usage_count >= self.usage_limit
    }

    /// 计算遗留有效券应纠正到的状态
    ///
    /// 仅对 status=ACTIVE 但实际已不可核销的券返回目标状态，
    /// 供发放引擎在事务外做幂等对账。过期优先于耗尽判定，
    /// 与核销事务内的判定顺序保持一致。
    pub fn stale_status(&self, now: DateTime<Utc>) -> Option<CouponStatus> {
        if self.status != CouponStatus::Active {
            return None;
        }
        if self.expires_at <= now {
            Some(CouponStatus::Expired)
        } else if self.is_exhausted() {
            Some(CouponStatus::Consumed)
        } else {
            None
        }
    }
}

/// 待创建的优惠券
///
/// usage_count 固定从 0 开始，状态固定为 ACTIVE，由仓储层写入。
#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub code: String,
    pub owner_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub usage_limit: i32,
}
