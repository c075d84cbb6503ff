// ==========================================
// 上门服务预约智能引擎 - 配置层
// ==========================================
// 职责: 引擎配置定义、校验与加载
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod engine_config;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use engine_config::{
    BufferConfig, ConfigError, DemandConfig, EngineConfig, PeakWindow, PricingConfig,
    RetryConfig, ScoringConfig, ScoringWeights, ServiceCatalog,
};
