//! 路由配置模块
//!
//! 定义所有 HTTP 端点的路由映射

use axum::{Router, routing::post};

use crate::{handlers, state::AppState};

/// 构建 webhook 路由（消息平台回调）
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(handlers::webhook))
}

/// 构建店员核销路由
pub fn staff_routes() -> Router<AppState> {
    Router::new().route("/api/staff/redeem", post(handlers::redeem))
}

/// 构建完整的 API 路由
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(webhook_routes()).merge(staff_routes())
}
