// ==========================================
// 上门服务预约智能引擎 - 引擎配置
// ==========================================
// 职责: 评分权重、需求阈值、定价倍率、缓冲常量、重试上限
// 生命周期: 进程启动时加载一次，引擎运行期间只读
// 红线: 配置不合法必须在启动时失败，不允许逐请求降级
// ==========================================

use crate::domain::service::{categories, ServiceOffering};
use crate::domain::types::{DemandTier, TierTable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// 权重之和允许的浮点误差
const WEIGHT_SUM_EPSILON: f64 = 1e-6;

// ==========================================
// ConfigError - 配置错误
// ==========================================
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置项不合法 (key={key}): {message}")]
    Invalid { key: String, message: String },

    #[error("配置值解析失败 (key={key}, value={value}): {message}")]
    Parse {
        key: String,
        value: String,
        message: String,
    },

    #[error("配置存储访问失败: {0}")]
    Storage(String),
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for ConfigError {
    fn from(err: rusqlite::Error) -> Self {
        ConfigError::Storage(err.to_string())
    }
}

// ==========================================
// 需求分级配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandConfig {
    /// 滚动统计窗口（小时）
    pub window_hours: i64,
    /// count <= low_max → LOW
    pub low_max: u32,
    /// low_max < count <= med_max → MEDIUM，否则 HIGH
    pub med_max: u32,
    /// 样本保留时长（小时），不得小于统计窗口
    pub retention_hours: i64,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            low_max: 20,
            med_max: 40,
            retention_hours: 48,
        }
    }
}

// ==========================================
// 师傅评分配置
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub rating: f64,
    pub proximity: f64,
    pub load: f64,
    pub demand: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.rating + self.proximity + self.load + self.demand
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            rating: 0.35,
            proximity: 0.35,
            load: 0.20,
            demand: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// 服务半径（公里），超出半径的师傅直接排除
    pub max_radius_km: f64,
    /// 负载归一化上限
    pub max_concurrent_jobs: u32,
    /// 需求等级加成 [0, 1]
    pub tier_weight: TierTable<f64>,
    /// 单次分派最多尝试的候选师傅数
    pub max_candidates_tried: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            max_radius_km: 15.0,
            max_concurrent_jobs: 5,
            tier_weight: TierTable {
                low: 0.0,
                medium: 0.5,
                high: 1.0,
            },
            max_candidates_tried: 5,
        }
    }
}

// ==========================================
// 行程缓冲配置
// ==========================================
// 行程时间 = base_travel_minutes + distance_factor_minutes_per_km * 距离
// 所需缓冲 = max(minimum_buffer_minutes, 行程时间)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub base_travel_minutes: f64,
    pub distance_factor_minutes_per_km: f64,
    pub minimum_buffer_minutes: f64,
    /// 备选时间搜索窗口（请求时间前后各多少分钟）
    pub search_window_minutes: i64,
    /// 备选时间探测步长（分钟）
    pub probe_step_minutes: i64,
    /// 读取工单快照时在搜索窗口外额外覆盖的时长（分钟）
    pub lookaround_minutes: i64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            base_travel_minutes: 10.0,
            distance_factor_minutes_per_km: 1.5,
            minimum_buffer_minutes: 15.0,
            search_window_minutes: 120,
            probe_step_minutes: 15,
            lookaround_minutes: 720,
        }
    }
}

// ==========================================
// 定价配置
// ==========================================

/// 高峰时段 [start_hour, end_hour)，按当地小时计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl PeakWindow {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub demand_multiplier: TierTable<Decimal>,
    pub peak_multiplier: Decimal,
    pub peak_windows: Vec<PeakWindow>,
    /// 周六/周日倍率（默认 1.0 即不启用，启用时常用 1.2）
    pub weekend_multiplier: Decimal,
    /// 计算当地小时所用的 UTC 偏移（分钟）
    pub utc_offset_minutes: i32,
    /// 货币最小单位精度（小数位）
    pub minor_units: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            demand_multiplier: TierTable {
                low: Decimal::new(100, 2),
                medium: Decimal::new(115, 2),
                high: Decimal::new(135, 2),
            },
            peak_multiplier: Decimal::new(120, 2),
            peak_windows: vec![
                PeakWindow {
                    start_hour: 8,
                    end_hour: 11,
                },
                PeakWindow {
                    start_hour: 17,
                    end_hour: 21,
                },
            ],
            // 默认关闭，报价保持 基础价 × 需求倍率 × 高峰倍率；需要周末加价时配置为 1.2
            weekend_multiplier: Decimal::ONE,
            utc_offset_minutes: 0,
            minor_units: 2,
        }
    }
}

// ==========================================
// 重试配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 条件写入冲突后的最大重试次数（不含首次）
    pub max_commit_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: 3,
        }
    }
}

// ==========================================
// 服务目录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub offerings: Vec<ServiceOffering>,
}

impl ServiceCatalog {
    pub fn find(&self, category: &str) -> Option<&ServiceOffering> {
        self.offerings.iter().find(|o| o.category == category)
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self {
            offerings: vec![
                ServiceOffering::new(categories::PLUMBING, Decimal::new(499, 0), 60),
                ServiceOffering::new(categories::ELECTRICAL, Decimal::new(449, 0), 60),
                ServiceOffering::new(categories::PAINTING, Decimal::new(1999, 0), 240),
                ServiceOffering::new(categories::CLEANING, Decimal::new(799, 0), 120),
                ServiceOffering::new(categories::CARPENTRY, Decimal::new(599, 0), 90),
                ServiceOffering::new(categories::APPLIANCE_REPAIR, Decimal::new(399, 0), 60),
            ],
        }
    }
}

// ==========================================
// EngineConfig - 引擎配置全集
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub demand: DemandConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub catalog: ServiceCatalog,
}

impl EngineConfig {
    /// 启动时校验配置一致性
    ///
    /// # 返回
    /// - Ok(()): 配置可用
    /// - Err(ConfigError::Invalid): 第一个不合法的配置项
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_demand()?;
        self.validate_scoring()?;
        self.validate_buffer()?;
        self.validate_pricing()?;
        self.validate_catalog()
    }

    fn validate_demand(&self) -> Result<(), ConfigError> {
        let d = &self.demand;
        if d.window_hours <= 0 {
            return Err(ConfigError::invalid("demand.window_hours", "必须大于 0"));
        }
        if d.retention_hours < d.window_hours {
            return Err(ConfigError::invalid(
                "demand.retention_hours",
                format!(
                    "保留时长 {}h 小于统计窗口 {}h",
                    d.retention_hours, d.window_hours
                ),
            ));
        }
        if d.low_max >= d.med_max {
            return Err(ConfigError::invalid(
                "demand.low_max",
                format!("low_max={} 必须小于 med_max={}", d.low_max, d.med_max),
            ));
        }
        Ok(())
    }

    fn validate_scoring(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        let w = &s.weights;
        for (key, value) in [
            ("scoring.weights.rating", w.rating),
            ("scoring.weights.proximity", w.proximity),
            ("scoring.weights.load", w.load),
            ("scoring.weights.demand", w.demand),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(key, format!("权重必须为非负数: {}", value)));
            }
        }
        if (w.sum() - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(ConfigError::invalid(
                "scoring.weights",
                format!("权重之和必须为 1，实际为 {}", w.sum()),
            ));
        }
        if !s.max_radius_km.is_finite() || s.max_radius_km <= 0.0 {
            return Err(ConfigError::invalid("scoring.max_radius_km", "必须大于 0"));
        }
        if s.max_concurrent_jobs == 0 {
            return Err(ConfigError::invalid("scoring.max_concurrent_jobs", "必须大于 0"));
        }
        if s.max_candidates_tried == 0 {
            return Err(ConfigError::invalid("scoring.max_candidates_tried", "必须大于 0"));
        }
        for (tier, value) in DemandTier::ALL.iter().zip(s.tier_weight.values()) {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(
                    "scoring.tier_weight",
                    format!("{} 加成必须在 [0, 1] 内: {}", tier, value),
                ));
            }
        }
        Ok(())
    }

    fn validate_buffer(&self) -> Result<(), ConfigError> {
        let b = &self.buffer;
        for (key, value) in [
            ("buffer.base_travel_minutes", b.base_travel_minutes),
            (
                "buffer.distance_factor_minutes_per_km",
                b.distance_factor_minutes_per_km,
            ),
            ("buffer.minimum_buffer_minutes", b.minimum_buffer_minutes),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(key, format!("必须为非负数: {}", value)));
            }
        }
        if b.search_window_minutes < 0 {
            return Err(ConfigError::invalid("buffer.search_window_minutes", "不能为负"));
        }
        if b.probe_step_minutes <= 0 {
            return Err(ConfigError::invalid("buffer.probe_step_minutes", "必须大于 0"));
        }
        if b.lookaround_minutes < 0 {
            return Err(ConfigError::invalid("buffer.lookaround_minutes", "不能为负"));
        }
        Ok(())
    }

    fn validate_pricing(&self) -> Result<(), ConfigError> {
        let p = &self.pricing;
        for (tier, value) in DemandTier::ALL.iter().zip(p.demand_multiplier.values()) {
            if value <= Decimal::ZERO {
                return Err(ConfigError::invalid(
                    "pricing.demand_multiplier",
                    format!("{} 倍率必须大于 0: {}", tier, value),
                ));
            }
        }
        if p.peak_multiplier <= Decimal::ZERO {
            return Err(ConfigError::invalid("pricing.peak_multiplier", "必须大于 0"));
        }
        if p.weekend_multiplier <= Decimal::ZERO {
            return Err(ConfigError::invalid("pricing.weekend_multiplier", "必须大于 0"));
        }
        for window in &p.peak_windows {
            if window.end_hour > 24 || window.start_hour >= window.end_hour {
                return Err(ConfigError::invalid(
                    "pricing.peak_windows",
                    format!("非法时段 [{}, {})", window.start_hour, window.end_hour),
                ));
            }
        }
        if p.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::invalid("pricing.utc_offset_minutes", "超出 ±24h"));
        }
        if p.minor_units > 8 {
            return Err(ConfigError::invalid("pricing.minor_units", "精度不得超过 8 位"));
        }
        Ok(())
    }

    fn validate_catalog(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for offering in &self.catalog.offerings {
            let category = offering.category.trim();
            if category.is_empty() {
                return Err(ConfigError::invalid("catalog", "品类名称不能为空"));
            }
            if !seen.insert(category.to_string()) {
                return Err(ConfigError::invalid(
                    "catalog",
                    format!("品类重复: {}", category),
                ));
            }
            if offering.base_price < Decimal::ZERO {
                return Err(ConfigError::invalid(
                    "catalog",
                    format!("{} 基础价格为负: {}", category, offering.base_price),
                ));
            }
            if offering.duration_minutes <= 0 {
                return Err(ConfigError::invalid(
                    "catalog",
                    format!("{} 服务工时必须大于 0", category),
                ));
            }
        }
        Ok(())
    }
}
