//! 优惠券服务入口
//!
//! 通过聊天消息 webhook 发放单用途折扣优惠券，提供店员核销端点。

use std::sync::Arc;

use axum::{Json, Router, routing::get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use coupon_service::notification::{LoggingSender, NotificationSender, PushSender};
use coupon_service::repository::{PgCouponRepository, PgProcessedEventRepository};
use coupon_service::service::{DedupGate, IssuanceService, RedemptionService};
use coupon_service::{CodeGenerator, routes, state::AppState};
use coupon_shared::{config::AppConfig, database::Database, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 统一加载配置：config/*.toml + COUPON_ 前缀环境变量
    let config = AppConfig::load("coupon-service").unwrap_or_default();

    observability::init(&config.observability)?;

    info!("Starting coupon-service on {}", config.server_addr());

    // 初始化基础设施
    let db = Database::connect(&config.database).await?;
    sqlx::migrate!("../../migrations").run(db.pool()).await?;

    // 通知发送器：配置了端点时走 HTTP 推送，否则仅记录日志
    let notifier: Arc<dyn NotificationSender> = match &config.coupon.notify_endpoint {
        Some(endpoint) if !endpoint.is_empty() => {
            info!("Notification push endpoint: {}", endpoint);
            Arc::new(PushSender::new(endpoint.clone()))
        }
        _ => {
            info!("No notification endpoint configured, using logging sender");
            Arc::new(LoggingSender)
        }
    };

    // 组装服务：仓储 -> 去重闸门/发放引擎/核销服务 -> 注入 AppState
    let coupon_repo = Arc::new(PgCouponRepository::new(db.pool().clone()));
    let event_repo = Arc::new(PgProcessedEventRepository::new(db.pool().clone()));

    let issuance = Arc::new(IssuanceService::new(
        coupon_repo.clone(),
        DedupGate::new(event_repo),
        CodeGenerator::new(),
        notifier,
        config.coupon.clone(),
    ));
    let redemption = Arc::new(RedemptionService::new(coupon_repo, config.coupon.clone()));

    let state = AppState::new(issuance, redemption, db.clone());

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db;
                move || readiness_check(db_for_ready.clone())
            }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：收到 SIGTERM（K8s 停止 Pod）或 Ctrl+C 时，
    // 停止接收新连接并等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
/// 收到任一信号后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "coupon-service"
    }))
}

/// 就绪探针：检查数据库连接是否可用
async fn readiness_check(db: Database) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "coupon-service",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" }
        }
    }))
}
