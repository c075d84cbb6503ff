// ==========================================
// 上门服务预约智能引擎 - 需求样本
// ==========================================
// 生命周期: 预约请求被受理时创建，只追加不修改，
//           超出保留窗口后由 DemandClassifier 丢弃
// ==========================================

use crate::domain::types::LocationKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandSample {
    pub location: LocationKey,     // 服务区域
    pub service_category: String,  // 服务品类
    pub timestamp: DateTime<Utc>,  // 受理时间
}

impl DemandSample {
    pub fn new(
        location: impl Into<LocationKey>,
        service_category: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            location: location.into(),
            service_category: service_category.into(),
            timestamp,
        }
    }
}
