// ==========================================
// 上门服务预约智能引擎 - 预约请求与分派结果
// ==========================================

use crate::domain::types::{DemandTier, LocationKey};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// BookingRequest - 预约请求（调用方创建，引擎只读）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub booking_id: String,
    pub location: LocationKey,
    pub service_category: String,
    pub requested_start: DateTime<Utc>, // 期望上门时间
    pub created_at: DateTime<Utc>,
}

// ==========================================
// TimeSlot - 时间段
// ==========================================
// 区间语义: 左闭右开 [start, end)，首尾相接不算重叠
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// 两侧各扩展 buffer
    pub fn expand(&self, buffer: Duration) -> Self {
        Self {
            start: self.start - buffer,
            end: self.end + buffer,
        }
    }

    /// 左闭右开重叠判断
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// other 是否完全落在本时间段内
    pub fn covers(&self, other: &TimeSlot) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ==========================================
// AllocationResult - 分派结果（唯一输出物）
// ==========================================
// 每次成功分派构造一次，交由外部持久化协作方落库
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub booking_id: String,
    pub vendor_id: String,
    pub job_id: String,              // 工单存储分配的工单ID（用于补偿释放）
    pub committed_slot: TimeSlot,
    pub quoted_price: Decimal,
    pub demand_tier_used: DemandTier,
    pub attempts: u32,               // 提交尝试次数（含首次）
}
