// ==========================================
// 上门服务预约智能引擎 - 数据仓储层
// ==========================================
// 职责: 师傅注册中心、工单存储与需求样本日志的读写接口
// 红线: Repository 不含业务逻辑
// 约束: 所有查询使用参数化
// ==========================================

pub mod demand_repo;
pub mod error;
pub mod job_repo;
pub mod memory;
pub mod vendor_repo;

// 重导出核心仓储
pub use demand_repo::{DemandSampleLog, SqliteDemandSampleLog};
pub use error::{RepositoryError, RepositoryResult};
pub use job_repo::{JobStore, SqliteJobStore};
pub use memory::{InMemoryJobStore, InMemoryVendorRegistry};
pub use vendor_repo::{SqliteVendorRegistry, VendorRegistry};
