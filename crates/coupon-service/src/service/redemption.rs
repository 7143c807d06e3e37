//! 核销协议
//!
//! 店员凭兑换码（可选口令）消耗优惠券的一次使用额度。
//! 入口完成归一化、口令校验与查码；真正的读-判-写在仓储的
//! 核销事务内进行，同一张券的并发核销被行锁串行化，
//! 保证至多一次成功递增（见 `PgCouponRepository::transactional_redeem`）。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use coupon_shared::config::CouponConfig;
use coupon_shared::error::Result;

use crate::codegen::normalize_code;
use crate::models::RedeemOutcome;
use crate::repository::CouponRepository;

/// 核销服务
pub struct RedemptionService {
    coupons: Arc<dyn CouponRepository>,
    config: CouponConfig,
}

impl RedemptionService {
    pub fn new(coupons: Arc<dyn CouponRepository>, config: CouponConfig) -> Self {
        Self { coupons, config }
    }

    /// 核销一张优惠券
    ///
    /// 失败路径不产生任何状态变更，过期/耗尽的纠正写入
    /// 与判定在同一事务内完成。
    #[instrument(skip(self, raw_code, staff_pass))]
    pub async fn redeem(&self, raw_code: &str, staff_pass: Option<&str>) -> Result<RedeemOutcome> {
        let now = Utc::now();
        let code = normalize_code(raw_code);

        // 口令校验：未配置时跳过
        if let Some(expected) = self.config.effective_staff_pass() {
            if staff_pass != Some(expected) {
                info!("核销口令不匹配");
                return Ok(RedeemOutcome::InvalidPass);
            }
        }

        let Some(coupon) = self.coupons.find_by_code(&code).await? else {
            info!(code = %code, "兑换码不存在");
            return Ok(RedeemOutcome::NotFound);
        };

        let outcome = self.coupons.transactional_redeem(coupon.id, now).await?;

        info!(
            coupon_id = coupon.id,
            status = outcome.status_tag(),
            "核销处理完成"
        );

        Ok(outcome)
    }
}
