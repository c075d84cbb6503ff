// ==========================================
// 上门服务预约智能引擎 - 师傅档案
// ==========================================
// 归属: 外部师傅注册中心，引擎每次分派读取一次快照
// 说明: 快照在读取与提交之间可能过期，引擎不得假设其最新
// ==========================================

use crate::domain::types::LocationKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorProfile {
    pub vendor_id: String,
    pub location: LocationKey,               // 常驻区域
    pub service_categories: BTreeSet<String>, // 可接品类
    pub average_rating: f64,                  // 平均评分 [0, 5]
    pub active_job_count: u32,                // 进行中工单数
    pub is_available: bool,                   // 是否接单
}

impl VendorProfile {
    pub fn offers(&self, service_category: &str) -> bool {
        self.service_categories.contains(service_category)
    }
}
