// ==========================================
// 上门服务预约智能引擎 - 核心库
// ==========================================
// 流程: 需求分级 → 师傅分派 → 档期缓冲 → 动态定价 → 条件提交
// 技术栈: Rust + Tokio + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 师傅注册中心 / 工单存储
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 引擎配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    AllocationResult, BookingRequest, CommittedJob, DemandSample, DemandTier, JobSnapshot,
    LocationKey, NewJob, ServiceOffering, TimeSlot, VendorProfile,
};

// 引擎
pub use engine::{
    AllocationError, BookingEngine, Clock, DemandClassifier, DistanceModel, PricingEngine,
    ScheduleBuffer, SystemClock, VendorAllocator,
};

// 配置
pub use config::{ConfigError, ConfigManager, EngineConfig};

// 仓储
pub use repository::{DemandSampleLog, JobStore, RepositoryError, VendorRegistry};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "上门服务预约智能引擎";
