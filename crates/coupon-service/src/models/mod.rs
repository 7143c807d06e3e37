//! 领域模型定义

mod coupon;
mod event;
mod redemption;

pub use coupon::{Coupon, CouponStatus, NewCoupon};
pub use event::{ProcessedEvent, TriggerEvent};
pub use redemption::{RedeemDecision, RedeemOutcome, decide_redemption};
