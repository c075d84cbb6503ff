// ==========================================
// 上门服务预约智能引擎 - 档期缓冲引擎
// ==========================================
// 职责: 判断师傅能否在期望时间（或附近）接单，并给出具体时间段
// 输入: 师傅 + 预约请求 + 该师傅已提交工单快照 + 服务工时
// 输出: 可行时间段 / None
// 规则:
// - 行程时间 = 基础行程 + 距离系数 * 距离（线性模型，常量来自配置）
// - 所需缓冲 = max(最小缓冲, 行程时间)，按每个已有工单的地点分别计算
// - 候选时间段两侧扩展缓冲后不得与任何已有工单重叠（左闭右开）
// - 期望时间不可行时在搜索窗口内按固定步长探测，返回最早的可行时间段
// 红线: 只给出建议时间段，不提交；提交由工单存储的条件写入完成
// ==========================================

use crate::config::BufferConfig;
use crate::domain::booking::{BookingRequest, TimeSlot};
use crate::domain::job::CommittedJob;
use crate::domain::vendor::VendorProfile;
use crate::engine::geo::DistanceModel;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, trace};

// ==========================================
// ScheduleBuffer - 档期缓冲引擎
// ==========================================
pub struct ScheduleBuffer {
    config: BufferConfig,
    distance: Arc<dyn DistanceModel>,
    /// 区域无坐标时使用的保守距离（公里）
    unknown_distance_km: f64,
}

impl ScheduleBuffer {
    /// 构造函数
    ///
    /// # 参数
    /// - `config`: 缓冲配置
    /// - `distance`: 区域距离模型
    /// - `unknown_distance_km`: 距离未知时的保守估计（通常取服务半径）
    pub fn new(config: BufferConfig, distance: Arc<dyn DistanceModel>, unknown_distance_km: f64) -> Self {
        Self {
            config,
            distance,
            unknown_distance_km,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    // ==========================================
    // 行程估算
    // ==========================================

    /// 估算两地之间的行程时间
    pub fn travel_time(&self, from: &str, to: &str) -> Duration {
        let distance_km = self
            .distance
            .distance_km(from, to)
            .filter(|d| d.is_finite())
            .unwrap_or(self.unknown_distance_km);
        self.travel_time_for_km(distance_km)
    }

    fn travel_time_for_km(&self, distance_km: f64) -> Duration {
        let minutes = self.config.base_travel_minutes
            + self.config.distance_factor_minutes_per_km * distance_km;
        minutes_to_duration(minutes)
    }

    /// 两个工单之间所需的缓冲
    pub fn required_buffer(&self, from: &str, to: &str) -> Duration {
        let minimum = minutes_to_duration(self.config.minimum_buffer_minutes);
        self.travel_time(from, to).max(minimum)
    }

    /// 缓冲上限：两地均在同一师傅服务半径内时，相距不超过两倍半径
    pub fn max_buffer(&self) -> Duration {
        let minimum = minutes_to_duration(self.config.minimum_buffer_minutes);
        self.travel_time_for_km(2.0 * self.unknown_distance_km)
            .max(minimum)
    }

    /// 提交时的冲突检测范围：slot 两侧各扩展缓冲上限
    pub fn conflict_window(&self, slot: &TimeSlot) -> TimeSlot {
        slot.expand(self.max_buffer())
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 尝试为师傅预留时间段
    ///
    /// # 参数
    /// - `vendor`: 候选师傅
    /// - `request`: 预约请求
    /// - `committed_jobs`: 该师傅已提交工单快照（其他师傅的工单会被忽略）
    /// - `service_duration`: 服务工时
    ///
    /// # 返回
    /// - Some(TimeSlot): 期望时间可行时即期望时间段，否则为搜索窗口内最早可行时间段
    /// - None: 搜索窗口内无可行时间段
    pub fn try_reserve(
        &self,
        vendor: &VendorProfile,
        request: &BookingRequest,
        committed_jobs: &[CommittedJob],
        service_duration: Duration,
    ) -> Option<TimeSlot> {
        self.try_reserve_not_before(
            vendor,
            request,
            committed_jobs,
            service_duration,
            DateTime::<Utc>::MIN_UTC,
        )
    }

    /// 同 try_reserve，但探测的备选开始时间不早于 `earliest_start`
    pub fn try_reserve_not_before(
        &self,
        vendor: &VendorProfile,
        request: &BookingRequest,
        committed_jobs: &[CommittedJob],
        service_duration: Duration,
        earliest_start: DateTime<Utc>,
    ) -> Option<TimeSlot> {
        let jobs: Vec<&CommittedJob> = committed_jobs
            .iter()
            .filter(|job| job.vendor_id == vendor.vendor_id)
            .collect();

        let requested = TimeSlot::starting_at(request.requested_start, service_duration);

        // 无已有工单：期望时间恒可行
        if jobs.is_empty() {
            return Some(requested);
        }

        if self.is_feasible(&requested, &request.location, &jobs) {
            return Some(requested);
        }

        let found = self
            .probe_starts(request.requested_start)
            .into_iter()
            .filter(|start| *start >= earliest_start && *start != request.requested_start)
            .map(|start| TimeSlot::starting_at(start, service_duration))
            .find(|slot| self.is_feasible(slot, &request.location, &jobs));

        match &found {
            Some(slot) => debug!(
                vendor_id = %vendor.vendor_id,
                requested_start = %request.requested_start,
                slot_start = %slot.start,
                "期望时间不可行，采用备选时间"
            ),
            None => debug!(
                vendor_id = %vendor.vendor_id,
                requested_start = %request.requested_start,
                jobs = jobs.len(),
                "搜索窗口内无可行时间段"
            ),
        }
        found
    }

    /// 时间段在给定地点是否与所有工单（含缓冲）不冲突
    pub fn is_feasible(&self, slot: &TimeSlot, location: &str, jobs: &[&CommittedJob]) -> bool {
        jobs.iter().all(|job| {
            let buffer = self.required_buffer(&job.location, location);
            let conflict = slot.expand(buffer).overlaps(&job.slot);
            if conflict {
                trace!(
                    job_id = %job.job_id,
                    buffer_minutes = buffer.num_minutes(),
                    "与已有工单冲突"
                );
            }
            !conflict
        })
    }

    /// 搜索窗口内的所有探测开始时间（升序，含期望时间）
    pub fn probe_starts(&self, requested_start: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let step = self.config.probe_step_minutes.max(1);
        let steps = self.config.search_window_minutes.max(0) / step;
        (-steps..=steps)
            .map(|k| requested_start + Duration::minutes(k * step))
            .collect()
    }

    /// 一次分派可能触及的最大时间范围（快照、探测、冲突检测均落在其中）
    ///
    /// # 返回
    /// - Some(TimeSlot): 范围
    /// - None: 时间运算溢出（期望时间过于接近可表示的边界）
    pub fn planning_span(&self, requested_start: DateTime<Utc>, service_duration: Duration) -> Option<TimeSlot> {
        let margin_minutes = self
            .config
            .search_window_minutes
            .max(0)
            .checked_add(self.config.lookaround_minutes.max(0))?;
        let margin = Duration::try_minutes(margin_minutes)?.checked_add(&self.max_buffer())?;

        let start = requested_start.checked_sub_signed(margin)?;
        let end = requested_start
            .checked_add_signed(service_duration)?
            .checked_add_signed(margin)?;
        Some(TimeSlot::new(start, end))
    }

    /// 读取工单快照所需覆盖的时间范围
    ///
    /// 覆盖整个搜索窗口，并在两侧各额外覆盖 lookaround_minutes，
    /// 保证窗口边缘的探测也能看到相邻工单。
    pub fn snapshot_window(&self, requested_start: DateTime<Utc>, service_duration: Duration) -> TimeSlot {
        let margin = Duration::minutes(self.config.search_window_minutes.max(0) + self.config.lookaround_minutes.max(0));
        TimeSlot::new(
            requested_start - margin,
            requested_start + service_duration + margin,
        )
    }
}

/// 分钟（浮点）→ Duration，按秒四舍五入
fn minutes_to_duration(minutes: f64) -> Duration {
    if !minutes.is_finite() || minutes <= 0.0 {
        return Duration::zero();
    }
    Duration::seconds((minutes * 60.0).round() as i64)
}
