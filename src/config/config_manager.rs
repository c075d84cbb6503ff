// ==========================================
// 上门服务预约智能引擎 - 配置管理器
// ==========================================
// 职责: 从 config_kv 表加载引擎配置，缺省项回落到默认值
// 存储: config_kv 表 (key-value + scope)
// 红线: 存在但无法解析的配置值直接报错，不静默回落
// ==========================================

use crate::config::engine_config::{
    ConfigError, EngineConfig, PeakWindow, ScoringWeights, ServiceCatalog,
};
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::domain::service::ServiceOffering;
use crate::domain::types::TierTable;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// 配置键常量
pub mod config_keys {
    // ===== 需求分级 =====
    pub const DEMAND_WINDOW_HOURS: &str = "demand.window_hours";
    pub const DEMAND_LOW_MAX: &str = "demand.low_max";
    pub const DEMAND_MED_MAX: &str = "demand.med_max";
    pub const DEMAND_RETENTION_HOURS: &str = "demand.retention_hours";

    // ===== 师傅评分 =====
    pub const SCORING_WEIGHTS: &str = "scoring.weights";
    pub const SCORING_MAX_RADIUS_KM: &str = "scoring.max_radius_km";
    pub const SCORING_MAX_CONCURRENT_JOBS: &str = "scoring.max_concurrent_jobs";
    pub const SCORING_TIER_WEIGHT: &str = "scoring.tier_weight";
    pub const SCORING_MAX_CANDIDATES_TRIED: &str = "scoring.max_candidates_tried";

    // ===== 行程缓冲 =====
    pub const BUFFER_BASE_TRAVEL_MINUTES: &str = "buffer.base_travel_minutes";
    pub const BUFFER_DISTANCE_FACTOR: &str = "buffer.distance_factor_minutes_per_km";
    pub const BUFFER_MINIMUM_MINUTES: &str = "buffer.minimum_buffer_minutes";
    pub const BUFFER_SEARCH_WINDOW_MINUTES: &str = "buffer.search_window_minutes";
    pub const BUFFER_PROBE_STEP_MINUTES: &str = "buffer.probe_step_minutes";
    pub const BUFFER_LOOKAROUND_MINUTES: &str = "buffer.lookaround_minutes";

    // ===== 定价 =====
    pub const PRICING_DEMAND_MULTIPLIER: &str = "pricing.demand_multiplier";
    pub const PRICING_PEAK_MULTIPLIER: &str = "pricing.peak_multiplier";
    pub const PRICING_PEAK_WINDOWS: &str = "pricing.peak_windows";
    pub const PRICING_WEEKEND_MULTIPLIER: &str = "pricing.weekend_multiplier";
    pub const PRICING_UTC_OFFSET_MINUTES: &str = "pricing.utc_offset_minutes";
    pub const PRICING_MINOR_UNITS: &str = "pricing.minor_units";

    // ===== 重试 =====
    pub const RETRY_MAX_COMMIT_RETRIES: &str = "retry.max_commit_retries";

    // ===== 服务目录 =====
    pub const SERVICE_CATALOG: &str = "service_catalog";
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, ConfigError> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, ConfigError> {
        {
            let guard = conn
                .lock()
                .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))?;
            configure_sqlite_connection(&guard)?;
            crate::db::init_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> Result<String, ConfigError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        serde_json::to_string(&json!(config_map)).map_err(|e| ConfigError::Storage(e.to_string()))
    }

    // ==========================================
    // 引擎配置加载
    // ==========================================

    /// 加载完整引擎配置并校验
    ///
    /// # 返回
    /// - Ok(EngineConfig): 合法配置（缺失键使用默认值）
    /// - Err(ConfigError): 解析失败或校验不通过
    pub fn load_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        use config_keys::*;

        let defaults = EngineConfig::default();
        let mut config = defaults.clone();

        // ===== 需求分级 =====
        config.demand.window_hours = self.get_parsed(DEMAND_WINDOW_HOURS, defaults.demand.window_hours)?;
        config.demand.low_max = self.get_parsed(DEMAND_LOW_MAX, defaults.demand.low_max)?;
        config.demand.med_max = self.get_parsed(DEMAND_MED_MAX, defaults.demand.med_max)?;
        config.demand.retention_hours =
            self.get_parsed(DEMAND_RETENTION_HOURS, defaults.demand.retention_hours)?;

        // ===== 师傅评分 =====
        config.scoring.weights =
            self.get_json::<ScoringWeights>(SCORING_WEIGHTS, defaults.scoring.weights)?;
        config.scoring.max_radius_km =
            self.get_parsed(SCORING_MAX_RADIUS_KM, defaults.scoring.max_radius_km)?;
        config.scoring.max_concurrent_jobs =
            self.get_parsed(SCORING_MAX_CONCURRENT_JOBS, defaults.scoring.max_concurrent_jobs)?;
        config.scoring.tier_weight =
            self.get_json::<TierTable<f64>>(SCORING_TIER_WEIGHT, defaults.scoring.tier_weight)?;
        config.scoring.max_candidates_tried =
            self.get_parsed(SCORING_MAX_CANDIDATES_TRIED, defaults.scoring.max_candidates_tried)?;

        // ===== 行程缓冲 =====
        config.buffer.base_travel_minutes =
            self.get_parsed(BUFFER_BASE_TRAVEL_MINUTES, defaults.buffer.base_travel_minutes)?;
        config.buffer.distance_factor_minutes_per_km = self.get_parsed(
            BUFFER_DISTANCE_FACTOR,
            defaults.buffer.distance_factor_minutes_per_km,
        )?;
        config.buffer.minimum_buffer_minutes =
            self.get_parsed(BUFFER_MINIMUM_MINUTES, defaults.buffer.minimum_buffer_minutes)?;
        config.buffer.search_window_minutes =
            self.get_parsed(BUFFER_SEARCH_WINDOW_MINUTES, defaults.buffer.search_window_minutes)?;
        config.buffer.probe_step_minutes =
            self.get_parsed(BUFFER_PROBE_STEP_MINUTES, defaults.buffer.probe_step_minutes)?;
        config.buffer.lookaround_minutes =
            self.get_parsed(BUFFER_LOOKAROUND_MINUTES, defaults.buffer.lookaround_minutes)?;

        // ===== 定价 =====
        config.pricing.demand_multiplier = self.get_json::<TierTable<Decimal>>(
            PRICING_DEMAND_MULTIPLIER,
            defaults.pricing.demand_multiplier,
        )?;
        config.pricing.peak_multiplier =
            self.get_parsed(PRICING_PEAK_MULTIPLIER, defaults.pricing.peak_multiplier)?;
        config.pricing.peak_windows = self.get_json::<Vec<PeakWindow>>(
            PRICING_PEAK_WINDOWS,
            defaults.pricing.peak_windows.clone(),
        )?;
        config.pricing.weekend_multiplier =
            self.get_parsed(PRICING_WEEKEND_MULTIPLIER, defaults.pricing.weekend_multiplier)?;
        config.pricing.utc_offset_minutes =
            self.get_parsed(PRICING_UTC_OFFSET_MINUTES, defaults.pricing.utc_offset_minutes)?;
        config.pricing.minor_units =
            self.get_parsed(PRICING_MINOR_UNITS, defaults.pricing.minor_units)?;

        // ===== 重试 =====
        config.retry.max_commit_retries =
            self.get_parsed(RETRY_MAX_COMMIT_RETRIES, defaults.retry.max_commit_retries)?;

        // ===== 服务目录 =====
        config.catalog = ServiceCatalog {
            offerings: self.get_json::<Vec<ServiceOffering>>(
                SERVICE_CATALOG,
                defaults.catalog.offerings.clone(),
            )?,
        };

        config.validate()?;

        tracing::info!(
            window_hours = config.demand.window_hours,
            low_max = config.demand.low_max,
            med_max = config.demand.med_max,
            max_radius_km = config.scoring.max_radius_km,
            catalog_size = config.catalog.offerings.len(),
            "引擎配置加载完成"
        );

        Ok(config)
    }

    /// 读取标量配置（FromStr），缺失时返回默认值
    fn get_parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Parse {
                key: key.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// 读取 JSON 配置，缺失时返回默认值
    fn get_json<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => serde_json::from_str::<T>(&raw).map_err(|e| ConfigError::Parse {
                key: key.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            }),
        }
    }
}
