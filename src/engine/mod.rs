// ==========================================
// 上门服务预约智能引擎 - 引擎层
// ==========================================
// 职责: 需求分级 / 师傅分派 / 档期缓冲 / 动态定价 及其编排
// 红线: Engine 不拼 SQL；评分、缓冲、定价均为纯计算，不做阻塞 I/O
// ==========================================

pub mod allocator;
pub mod clock;
pub mod demand;
pub mod error;
pub mod geo;
pub mod orchestrator;
pub mod pricing;
pub mod schedule_buffer;

// 重导出核心引擎
pub use allocator::{
    CandidateRanking, ExcludedVendor, ExclusionReason, NoVendorAvailable, ScoreBreakdown,
    ScoredVendor, SelectedCandidate, VendorAllocator,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use demand::DemandClassifier;
pub use error::AllocationError;
pub use geo::{DistanceModel, GeoPoint, LocationDirectory};
pub use orchestrator::BookingEngine;
pub use pricing::{PriceQuote, PricingEngine, PricingError};
pub use schedule_buffer::ScheduleBuffer;
