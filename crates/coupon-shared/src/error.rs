//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 业务上的拒绝（冷却中、达到上限等）不属于错误，以结果类型表达。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum CouponError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 权限错误 ====================
    #[error("未授权访问")]
    Unauthorized,

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    // ==================== 通用错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, CouponError>;

impl CouponError {
    /// 获取错误码（用于 API 响应）
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::ExternalService { .. })
    }
}

/// 判断数据库错误是否为"索引/查询形态不可用"
///
/// 有序、带过滤条件的查询依赖迁移建立的表结构与索引；当只读副本尚未
/// 迁移到位时，PostgreSQL 以下列可枚举的 SQLSTATE 报错。仓储层识别到
/// 这类错误后，必须退回到全量扫描加内存过滤的等价实现——这是正确性
/// 保障而非性能优化，命中任何其他错误码都应照常向上传播。
///
/// - `42P01` undefined_table
/// - `42703` undefined_column
/// - `42704` undefined_object
pub fn is_index_unavailable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("42P01") | Some("42703") | Some("42704")
        ),
        _ => false,
    }
}

/// 判断数据库错误是否为唯一约束冲突
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        // 23505 = unique_violation
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
