//! 核销结果与事务内判定
//!
//! 核销事务体被建模为返回带标签结果的纯函数，而不是异常驱动的
//! 控制流：事务包装层只根据判定结果决定提交还是放弃，任何失败
//! 路径都不会递增 usage_count，因此不可能出现重复扣减。

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::coupon::{Coupon, CouponStatus};

/// 核销结果
///
/// 覆盖核销协议的全部终态。策略性拒绝（过期、次数耗尽）属于
/// 预期结果而非错误，基础设施故障另以 `CouponError` 表达。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedeemOutcome {
    /// 核销成功，返回剩余次数
    Success {
        remaining_uses: i32,
        usage_limit: i32,
    },
    /// 店员口令不匹配
    InvalidPass,
    /// 兑换码不存在
    NotFound,
    /// 已过有效期
    Expired,
    /// 本次核销时发现次数已耗尽
    LimitReached,
    /// 券在更早之前已被标记消耗/失效
    AlreadyConsumed,
}

impl RedeemOutcome {
    /// API 响应中的状态标签
    pub fn status_tag(&self) -> &'static str {
        match self {
            Self::Success { .. } => "OK",
            Self::InvalidPass => "INVALID_PASS",
            Self::NotFound => "NOT_FOUND",
            Self::Expired => "EXPIRED",
            Self::LimitReached => "LIMIT_REACHED",
            Self::AlreadyConsumed => "CONSUMED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 事务内核销判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemDecision {
    /// 拒绝核销；corrective_status 非空时在同一事务内纠正存储状态
    Reject {
        outcome: RedeemOutcome,
        corrective_status: Option<CouponStatus>,
    },
    /// 接受核销，写入新的计数与状态
    Accept {
        new_count: i32,
        new_status: CouponStatus,
    },
}

/// 对行锁下重读的券快照做核销判定
///
/// 判定顺序固定：非 ACTIVE -> 过期 -> 次数耗尽 -> 接受。
/// 过期与耗尽在拒绝的同时给出纠正状态，由事务一并持久化；
/// 非 ACTIVE 的券说明状态早已纠正过，不再重复写。
pub fn decide_redemption(coupon: &Coupon, now: DateTime<Utc>) -> RedeemDecision {
    match coupon.status {
        CouponStatus::Consumed => RedeemDecision::Reject {
            outcome: RedeemOutcome::AlreadyConsumed,
            corrective_status: None,
        },
        CouponStatus::Expired => RedeemDecision::Reject {
            outcome: RedeemOutcome::Expired,
            corrective_status: None,
        },
        CouponStatus::Active => {
            if coupon.expires_at <= now {
                RedeemDecision::Reject {
                    outcome: RedeemOutcome::Expired,
                    corrective_status: Some(CouponStatus::Expired),
                }
            } else if coupon.is_exhausted() {
                RedeemDecision::Reject {
                    outcome: RedeemOutcome::LimitReached,
                    corrective_status: Some(CouponStatus::Consumed),
                }
            } else {
                let new_count = coupon.usage_count + 1;
                let new_status = if new_count >= coupon.usage_limit {
                    CouponStatus::Consumed
                } else {
                    CouponStatus::Active
                };
                RedeemDecision::Accept {
                    new_count,
                    new_status,
                }
            }
        }
    }
}
