// ==========================================
// 上门服务预约智能引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体与类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod booking;
pub mod demand;
pub mod job;
pub mod service;
pub mod types;
pub mod vendor;

// 重导出核心类型
pub use booking::{AllocationResult, BookingRequest, TimeSlot};
pub use demand::DemandSample;
pub use job::{CommittedJob, JobSnapshot, NewJob};
pub use service::ServiceOffering;
pub use types::{DemandTier, LocationKey, TierTable};
pub use vendor::VendorProfile;
