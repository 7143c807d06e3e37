//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use coupon_shared::database::Database;

use crate::service::{IssuanceService, RedemptionService};

/// Axum 应用共享状态
///
/// 服务句柄在启动时显式构造并注入，handler 间通过 Arc 共享，
/// 不依赖任何全局单例。
#[derive(Clone)]
pub struct AppState {
    pub issuance: Arc<IssuanceService>,
    pub redemption: Arc<RedemptionService>,
    pub db: Database,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        issuance: Arc<IssuanceService>,
        redemption: Arc<RedemptionService>,
        db: Database,
    ) -> Self {
        Self {
            issuance,
            redemption,
            db,
        }
    }
}
