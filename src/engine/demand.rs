// ==========================================
// 上门服务预约智能引擎 - 需求分级器
// ==========================================
// 职责: 按区域维护滚动预约样本，输出需求等级
// 输入: DemandSample（预约受理时追加）
// 输出: DemandTier（LOW / MEDIUM / HIGH）
// 规则:
// - count <= low_max → LOW；count <= med_max → MEDIUM；否则 HIGH
// - 恰好等于阈值归入较低等级
// - 无历史区域默认 LOW（冷启动）
// 并发: 不同区域互不阻塞；同区域追加由该区域的互斥锁串行化
// ==========================================

use crate::config::DemandConfig;
use crate::domain::demand::DemandSample;
use crate::domain::types::{DemandTier, LocationKey};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::debug;

/// 单个区域的样本时间序列（按时间升序）
type SampleWindow = Mutex<VecDeque<DateTime<Utc>>>;

// ==========================================
// DemandClassifier - 需求分级器
// ==========================================
pub struct DemandClassifier {
    config: DemandConfig,
    windows: RwLock<HashMap<LocationKey, SampleWindow>>,
}

impl DemandClassifier {
    /// 构造函数
    ///
    /// # 参数
    /// - `config`: 需求分级配置（窗口、阈值、保留时长）
    pub fn new(config: DemandConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DemandConfig {
        &self.config
    }

    fn window(&self) -> Duration {
        Duration::hours(self.config.window_hours)
    }

    fn retention(&self) -> Duration {
        Duration::hours(self.config.retention_hours)
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 追加一条需求样本（不会失败）
    ///
    /// 同时丢弃该区域超出保留时长的旧样本。
    pub fn record_sample(&self, sample: DemandSample) {
        let DemandSample {
            location,
            timestamp,
            ..
        } = sample;

        {
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(window) = windows.get(&location) {
                let mut samples = window.lock().unwrap_or_else(PoisonError::into_inner);
                insert_sorted(&mut samples, timestamp, self.retention());
                return;
            }
        }

        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(location).or_default();
        let samples = window.get_mut().unwrap_or_else(PoisonError::into_inner);
        insert_sorted(samples, timestamp, self.retention());
    }

    /// 丢弃所有区域中超出保留时长的样本
    ///
    /// # 返回
    /// 被丢弃的样本数
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention();
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);

        let mut removed = 0;
        windows.retain(|_, window| {
            let samples = window.get_mut().unwrap_or_else(PoisonError::into_inner);
            let expired = samples.partition_point(|ts| *ts <= cutoff);
            samples.drain(..expired);
            removed += expired;
            !samples.is_empty()
        });

        debug!(removed, locations = windows.len(), "需求样本清理完成");
        removed
    }

    // ==========================================
    // 读取
    // ==========================================

    /// 统计窗口 (now - W, now] 内的样本数
    pub fn sample_count(&self, location: &str, now: DateTime<Utc>) -> u32 {
        let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
        let Some(window) = windows.get(location) else {
            return 0;
        };
        let samples = window.lock().unwrap_or_else(PoisonError::into_inner);

        let lower = now - self.window();
        let from = samples.partition_point(|ts| *ts <= lower);
        let to = samples.partition_point(|ts| *ts <= now);
        u32::try_from(to.saturating_sub(from)).unwrap_or(u32::MAX)
    }

    /// 判定区域需求等级
    pub fn classify(&self, location: &str, now: DateTime<Utc>) -> DemandTier {
        let count = self.sample_count(location, now);
        let tier = self.tier_for_count(count);
        debug!(location, count, tier = %tier, "需求等级判定");
        tier
    }

    /// 样本数 → 需求等级（阈值边界归入较低等级）
    pub fn tier_for_count(&self, count: u32) -> DemandTier {
        if count <= self.config.low_max {
            DemandTier::Low
        } else if count <= self.config.med_max {
            DemandTier::Medium
        } else {
            DemandTier::High
        }
    }

    /// 批量分级：按需求等级聚类区域
    ///
    /// # 返回
    /// BTreeMap<需求等级, 区域列表>，三个等级总是存在（可能为空），区域按输入顺序
    pub fn cluster<'a, I>(&self, locations: I, now: DateTime<Utc>) -> BTreeMap<DemandTier, Vec<LocationKey>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut clusters: BTreeMap<DemandTier, Vec<LocationKey>> =
            DemandTier::ALL.iter().map(|t| (*t, Vec::new())).collect();

        for location in locations {
            let tier = self.classify(location, now);
            clusters.entry(tier).or_default().push(location.to_string());
        }
        clusters
    }

    /// 当前持有样本的区域
    pub fn known_locations(&self) -> Vec<LocationKey> {
        let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
        let mut locations: Vec<LocationKey> = windows.keys().cloned().collect();
        locations.sort();
        locations
    }
}

/// 按时间有序插入，并丢弃早于 (最新样本 - retention) 的样本
fn insert_sorted(samples: &mut VecDeque<DateTime<Utc>>, timestamp: DateTime<Utc>, retention: Duration) {
    match samples.back() {
        Some(last) if *last > timestamp => {
            let pos = samples.partition_point(|ts| *ts <= timestamp);
            samples.insert(pos, timestamp);
        }
        _ => samples.push_back(timestamp),
    }

    if let Some(newest) = samples.back().copied() {
        let cutoff = newest - retention;
        while samples.front().is_some_and(|ts| *ts <= cutoff) {
            samples.pop_front();
        }
    }
}
