// ==========================================
// 上门服务预约智能引擎 - 领域类型定义
// ==========================================
// 职责: 需求等级、区域编码等基础类型
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// 服务区域编码（邮编/片区编码），对引擎而言是不透明字符串
pub type LocationKey = String;

// ==========================================
// 需求等级 (Demand Tier)
// ==========================================
// 派生值: 由滚动窗口样本数实时计算，不单独存储
// 顺序: Low < Medium < High
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DemandTier {
    Low,    // 低需求
    Medium, // 中需求
    High,   // 高需求
}

impl DemandTier {
    pub const ALL: [DemandTier; 3] = [DemandTier::Low, DemandTier::Medium, DemandTier::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            DemandTier::Low => "LOW",
            DemandTier::Medium => "MEDIUM",
            DemandTier::High => "HIGH",
        }
    }
}

impl fmt::Display for DemandTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DemandTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(DemandTier::Low),
            "MEDIUM" | "MED" => Ok(DemandTier::Medium),
            "HIGH" => Ok(DemandTier::High),
            other => Err(format!("未知需求等级: {}", other)),
        }
    }
}

// ==========================================
// 按需求等级取值的配置表
// ==========================================
// 用途: 分派加成 (tier_weight) 与定价倍率 (demand_multiplier)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierTable<T> {
    pub low: T,
    pub medium: T,
    pub high: T,
}

impl<T: Copy> TierTable<T> {
    pub fn get(&self, tier: DemandTier) -> T {
        match tier {
            DemandTier::Low => self.low,
            DemandTier::Medium => self.medium,
            DemandTier::High => self.high,
        }
    }

    pub fn values(&self) -> [T; 3] {
        [self.low, self.medium, self.high]
    }
}
