//! 优惠券服务
//!
//! 通过聊天消息 webhook 触发单用途折扣优惠券的发放与核销。
//!
//! ## 核心功能
//!
//! - **发放资格判定**：幂等去重、关键词匹配、冷却窗口、每日上限、
//!   有效券复用，按固定顺序短路求值
//! - **核销协议**：按兑换码原子消耗一次使用额度，并发场景下
//!   保证使用次数恰好递增一次
//! - **状态对账**：发现过期或用尽的遗留有效券时幂等纠正其状态
//! - **通知发送**：发放/复用/拒绝后的消息推送，失败不影响券状态
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `codegen`: 兑换码生成器
//! - `repository`: 数据库仓储层
//! - `service`: 业务服务层（发放引擎、去重闸门、核销协议）
//! - `notification`: 通知发送模块
//! - `handlers` / `routes` / `state`: HTTP 接入层

pub mod codegen;
pub mod handlers;
pub mod models;
pub mod notification;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;

pub use codegen::CodeGenerator;
pub use models::*;
pub use notification::{LoggingSender, NotificationError, NotificationSender, PushSender};
pub use repository::{
    CouponRepository, PgCouponRepository, PgProcessedEventRepository, ProcessedEventRepository,
};
pub use service::{DedupGate, IssuanceOutcome, IssuanceService, RedemptionService};
pub use state::AppState;
