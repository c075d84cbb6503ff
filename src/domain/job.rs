// ==========================================
// 上门服务预约智能引擎 - 已提交工单
// ==========================================
// 归属: 外部工单存储
// 不变量: 同一师傅的工单在加上行程缓冲后两两不重叠
// ==========================================

use crate::domain::booking::TimeSlot;
use crate::domain::types::LocationKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedJob {
    pub job_id: String,
    pub vendor_id: String,
    pub booking_id: String,
    pub slot: TimeSlot,
    pub location: LocationKey,
}

// ==========================================
// NewJob - 待提交工单（条件写入的输入）
// ==========================================
// conflict_window: 冲突检测范围，必须覆盖 slot；
//                  快照之后在此范围内新增的工单才使提交失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub vendor_id: String,
    pub booking_id: String,
    pub slot: TimeSlot,
    pub location: LocationKey,
    pub conflict_window: TimeSlot,
}

impl NewJob {
    /// 构造待提交工单，冲突检测范围默认等于 slot
    pub fn new(
        vendor_id: impl Into<String>,
        booking_id: impl Into<String>,
        slot: TimeSlot,
        location: impl Into<LocationKey>,
    ) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            booking_id: booking_id.into(),
            slot,
            location: location.into(),
            conflict_window: slot,
        }
    }

    /// 指定冲突检测范围
    pub fn with_conflict_window(mut self, window: TimeSlot) -> Self {
        self.conflict_window = window;
        self
    }
}

// ==========================================
// JobSnapshot - 师傅工单快照
// ==========================================
// revision: 师傅工单集合的版本号，每次提交/释放 +1；
//           条件写入时据此识别快照之后新增的工单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub vendor_id: String,
    pub jobs: Vec<CommittedJob>,
    pub revision: i64,
}

impl JobSnapshot {
    pub fn empty(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            jobs: Vec::new(),
            revision: 0,
        }
    }
}
