//! 业务服务层

mod dedup;
mod issuance;
mod redemption;

pub use dedup::DedupGate;
pub use issuance::{IssuanceOutcome, IssuanceService};
pub use redemption::RedemptionService;
