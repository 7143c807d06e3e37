//! 数据库仓储层
//!
//! 优惠券与幂等台账的唯一持久化入口，其他组件一律通过仓储
//! trait 访问存储，不直接写库。

mod coupon_repo;
mod event_repo;
mod traits;

pub use coupon_repo::PgCouponRepository;
pub use event_repo::PgProcessedEventRepository;
pub use traits::{CouponRepository, ProcessedEventRepository};

#[cfg(test)]
pub use traits::{MockCouponRepository, MockProcessedEventRepository};
