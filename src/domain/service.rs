// ==========================================
// 上门服务预约智能引擎 - 服务目录
// ==========================================
// 用途: 品类 → 基础价格 + 标准工时
// ==========================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 服务品类常量
pub mod categories {
    pub const PLUMBING: &str = "plumbing";
    pub const ELECTRICAL: &str = "electrical";
    pub const PAINTING: &str = "painting";
    pub const CLEANING: &str = "cleaning";
    pub const CARPENTRY: &str = "carpentry";
    pub const APPLIANCE_REPAIR: &str = "appliance_repair";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub category: String,
    pub base_price: Decimal,    // 基础价格（货币主单位）
    pub duration_minutes: i64,  // 标准服务工时（分钟）
}

impl ServiceOffering {
    pub fn new(category: &str, base_price: Decimal, duration_minutes: i64) -> Self {
        Self {
            category: category.to_string(),
            base_price,
            duration_minutes,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.duration_minutes)
    }
}
