// ==========================================
// 上门服务预约智能引擎 - 动态定价引擎
// ==========================================
// 职责: 根据基础价格、需求等级、上门时间计算报价
// 公式: 最终价格 = 基础价格 × 需求倍率[等级] × 高峰倍率(时段) × 周末倍率(星期)
// 舍入: 按货币最小单位四舍五入（half-up），保证报价可复现
// 红线: 纯函数，不依赖所选师傅，不读系统时间
// ==========================================

use crate::config::PricingConfig;
use crate::domain::types::DemandTier;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Timelike, Utc, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("定价输入非法: {0}")]
    InvalidInput(String),
}

/// 报价明细
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub base_price: Decimal,
    pub demand_multiplier: Decimal,
    pub peak_multiplier: Decimal,
    pub weekend_multiplier: Decimal,
    pub final_price: Decimal,
}

// ==========================================
// PricingEngine - 动态定价引擎
// ==========================================
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// 计算报价
    ///
    /// # 参数
    /// - `base_price`: 基础价格（不得为负）
    /// - `tier`: 需求等级
    /// - `requested_start`: 上门时间
    ///
    /// # 返回
    /// 按最小单位舍入后的最终价格
    pub fn quote(
        &self,
        base_price: Decimal,
        tier: DemandTier,
        requested_start: DateTime<Utc>,
    ) -> Result<Decimal, PricingError> {
        self.quote_breakdown(base_price, tier, requested_start)
            .map(|q| q.final_price)
    }

    /// 计算报价并返回各项倍率
    pub fn quote_breakdown(
        &self,
        base_price: Decimal,
        tier: DemandTier,
        requested_start: DateTime<Utc>,
    ) -> Result<PriceQuote, PricingError> {
        if base_price < Decimal::ZERO {
            return Err(PricingError::InvalidInput(format!(
                "基础价格不能为负: {}",
                base_price
            )));
        }

        let demand_multiplier = self.config.demand_multiplier.get(tier);
        let peak_multiplier = self.peak_multiplier(requested_start);
        let weekend_multiplier = self.weekend_multiplier(requested_start);

        let raw = base_price
            .checked_mul(demand_multiplier)
            .and_then(|v| v.checked_mul(peak_multiplier))
            .and_then(|v| v.checked_mul(weekend_multiplier))
            .ok_or_else(|| PricingError::InvalidInput(format!("金额溢出: {}", base_price)))?;

        let final_price =
            raw.round_dp_with_strategy(self.config.minor_units, RoundingStrategy::MidpointAwayFromZero);

        Ok(PriceQuote {
            base_price,
            demand_multiplier,
            peak_multiplier,
            weekend_multiplier,
            final_price,
        })
    }

    /// 高峰倍率：当地小时落在任一高峰时段内取 peak_multiplier，否则 1
    pub fn peak_multiplier(&self, requested_start: DateTime<Utc>) -> Decimal {
        let hour = self.local_time(requested_start).hour();
        if self.config.peak_windows.iter().any(|w| w.contains(hour)) {
            self.config.peak_multiplier
        } else {
            Decimal::ONE
        }
    }

    /// 周末倍率：当地周六、周日取 weekend_multiplier，否则 1
    pub fn weekend_multiplier(&self, requested_start: DateTime<Utc>) -> Decimal {
        match self.local_time(requested_start).weekday() {
            Weekday::Sat | Weekday::Sun => self.config.weekend_multiplier,
            _ => Decimal::ONE,
        }
    }

    fn local_time(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        (instant + Duration::minutes(i64::from(self.config.utc_offset_minutes))).naive_utc()
    }
}
