// ==========================================
// 上门服务预约智能引擎 - 分派编排器
// ==========================================
// 主流程:
// 1. 校验请求，记录需求样本（配置了样本日志时同时落库）
// 2. DemandClassifier 判定需求等级
// 3. VendorAllocator 过滤、评分、排序候选师傅
// 4. ScheduleBuffer 按排序逐个确认档期（有上限）
// 5. PricingEngine 计算报价
// 6. JobStore 条件写入（冲突检测范围 = 时间段两侧各扩展缓冲上限）；
//    冲突则用新快照重新进入 3-5，超过重试上限报 AllocationConflict
// 并发: 快照读取 → 决策 → 提交 之间不持有任何锁，原子性由工单存储的条件写入保证
// ==========================================

use crate::config::{ConfigError, EngineConfig};
use crate::domain::booking::{AllocationResult, BookingRequest};
use crate::domain::demand::DemandSample;
use crate::domain::job::{JobSnapshot, NewJob};
use crate::domain::service::ServiceOffering;
use crate::domain::types::DemandTier;
use crate::engine::allocator::{NoVendorAvailable, SelectedCandidate, VendorAllocator};
use crate::engine::clock::Clock;
use crate::engine::demand::DemandClassifier;
use crate::engine::error::AllocationError;
use crate::engine::geo::DistanceModel;
use crate::engine::pricing::PricingEngine;
use crate::engine::schedule_buffer::ScheduleBuffer;
use crate::repository::{DemandSampleLog, JobStore, VendorRegistry};
use chrono::{DateTime, Datelike, Duration, Utc};
use futures::future::try_join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ==========================================
// BookingEngine - 分派编排器
// ==========================================
pub struct BookingEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    classifier: DemandClassifier,
    allocator: VendorAllocator,
    buffer: ScheduleBuffer,
    pricing: PricingEngine,
    registry: Arc<dyn VendorRegistry>,
    job_store: Arc<dyn JobStore>,
    demand_log: Option<Arc<dyn DemandSampleLog>>,
}

/// 可预约的年份范围（工单存储的定长时间戳范围）
const MAX_BOOKABLE_YEAR: i32 = 9999;
const MIN_BOOKABLE_YEAR: i32 = 0;

impl BookingEngine {
    /// 创建编排器（配置非法时拒绝启动）
    ///
    /// # 参数
    /// - `config`: 引擎配置（进程生命周期内不变）
    /// - `clock`: 时钟
    /// - `distance`: 区域距离模型
    /// - `registry`: 师傅注册中心
    /// - `job_store`: 工单存储
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        distance: Arc<dyn DistanceModel>,
        registry: Arc<dyn VendorRegistry>,
        job_store: Arc<dyn JobStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            classifier: DemandClassifier::new(config.demand.clone()),
            allocator: VendorAllocator::new(config.scoring.clone(), Arc::clone(&distance)),
            buffer: ScheduleBuffer::new(config.buffer.clone(), distance, config.scoring.max_radius_km),
            pricing: PricingEngine::new(config.pricing.clone()),
            config,
            clock,
            registry,
            job_store,
            demand_log: None,
        })
    }

    /// 挂接需求样本日志：受理的样本同时落库，重启后可回放
    pub fn with_demand_log(mut self, log: Arc<dyn DemandSampleLog>) -> Self {
        self.demand_log = Some(log);
        self
    }

    /// 从样本日志回放保留期内的需求样本，并清理过期样本
    ///
    /// # 返回
    /// 回放的样本数（未挂接日志时为 0）
    #[instrument(skip(self))]
    pub async fn restore_demand(&self) -> Result<usize, AllocationError> {
        let Some(log) = &self.demand_log else {
            return Ok(0);
        };

        let now = self.clock.now();
        let cutoff = Duration::try_hours(self.config.demand.retention_hours)
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let pruned = log.prune_before(cutoff).await?;
        let samples = log.load_since(cutoff).await?;
        let restored = samples.len();
        for sample in samples {
            self.classifier.record_sample(sample);
        }

        info!(restored, pruned, "需求样本已回放");
        Ok(restored)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classifier(&self) -> &DemandClassifier {
        &self.classifier
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    // ==========================================
    // 主流程
    // ==========================================

    /// 为预约请求分派师傅并提交工单
    ///
    /// # 返回
    /// - Ok(AllocationResult): 已提交的分派结果
    /// - Err(InvalidRequest): 品类未知、上门时间已过等
    /// - Err(NoVendorAvailable): 候选上限内无档期可行的师傅
    /// - Err(AllocationConflict): 条件写入连续冲突，重试已用尽
    #[instrument(skip(self, request), fields(
        booking_id = %request.booking_id,
        location = %request.location,
        category = %request.service_category
    ))]
    pub async fn allocate(&self, request: &BookingRequest) -> Result<AllocationResult, AllocationError> {
        let now = self.clock.now();
        let offering = self.validate_request(request, now)?;

        // 请求受理即计入需求
        let sample = DemandSample::new(
            request.location.clone(),
            request.service_category.clone(),
            now,
        );
        if let Some(log) = &self.demand_log {
            log.append(&sample).await?;
        }
        self.classifier.record_sample(sample);
        let tier = self.classifier.classify(&request.location, now);

        let max_attempts = self.config.retry.max_commit_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let (selected, expected_revision) =
                match self.select_candidate(request, tier, &offering, now).await? {
                    Ok(pick) => pick,
                    Err(NoVendorAvailable { candidates_tried }) => {
                        info!(candidates_tried, attempt, "无可用师傅");
                        return Err(AllocationError::NoVendorAvailable {
                            booking_id: request.booking_id.clone(),
                            candidates_tried,
                        });
                    }
                };

            let quote = self
                .pricing
                .quote_breakdown(offering.base_price, tier, selected.slot.start)?;

            let new_job = NewJob::new(
                selected.vendor.vendor_id.clone(),
                request.booking_id.clone(),
                selected.slot,
                request.location.clone(),
            )
            .with_conflict_window(self.buffer.conflict_window(&selected.slot));

            match self.job_store.commit_job(new_job, expected_revision).await {
                Ok(job) => {
                    info!(
                        vendor_id = %job.vendor_id,
                        job_id = %job.job_id,
                        slot_start = %job.slot.start,
                        price = %quote.final_price,
                        tier = %tier,
                        rank = selected.rank,
                        attempt,
                        "分派成功"
                    );
                    return Ok(AllocationResult {
                        booking_id: request.booking_id.clone(),
                        vendor_id: job.vendor_id,
                        job_id: job.job_id,
                        committed_slot: job.slot,
                        quoted_price: quote.final_price,
                        demand_tier_used: tier,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_conflict() => {
                    if attempt >= max_attempts {
                        warn!(attempt, error = %e, "提交冲突，重试已用尽");
                        return Err(AllocationError::AllocationConflict {
                            booking_id: request.booking_id.clone(),
                            attempts: attempt,
                        });
                    }
                    warn!(attempt, error = %e, "提交冲突，使用新快照重试");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 补偿释放已提交的分派
    #[instrument(skip(self, result), fields(booking_id = %result.booking_id, job_id = %result.job_id))]
    pub async fn release(&self, result: &AllocationResult) -> Result<(), AllocationError> {
        self.job_store.release_job(&result.job_id).await?;
        info!(vendor_id = %result.vendor_id, "分派已释放");
        Ok(())
    }

    // ==========================================
    // 内部步骤
    // ==========================================

    fn validate_request(
        &self,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<ServiceOffering, AllocationError> {
        if request.booking_id.trim().is_empty() {
            return Err(AllocationError::InvalidRequest("booking_id 不能为空".to_string()));
        }
        if request.location.trim().is_empty() {
            return Err(AllocationError::InvalidRequest("location 不能为空".to_string()));
        }
        if request.requested_start < now {
            return Err(AllocationError::InvalidRequest(format!(
                "上门时间已过: requested_start={}, now={}",
                request.requested_start, now
            )));
        }

        let offering = self
            .config
            .catalog
            .find(&request.service_category)
            .cloned()
            .ok_or_else(|| {
                AllocationError::InvalidRequest(format!("未知服务品类: {}", request.service_category))
            })?;

        if offering.base_price < Decimal::ZERO || offering.duration_minutes <= 0 {
            return Err(AllocationError::InvalidRequest(format!(
                "服务品类配置非法: {}",
                offering.category
            )));
        }

        // 探测、快照、冲突检测都不得越过可表示/可存储的时间边界
        let span = Duration::try_minutes(offering.duration_minutes)
            .and_then(|duration| self.buffer.planning_span(request.requested_start, duration))
            .ok_or_else(|| {
                AllocationError::InvalidRequest(format!(
                    "上门时间超出可计算范围: {}",
                    request.requested_start
                ))
            })?;
        if span.start.year() < MIN_BOOKABLE_YEAR || span.end.year() > MAX_BOOKABLE_YEAR {
            return Err(AllocationError::InvalidRequest(format!(
                "上门时间超出可预约范围: {}",
                request.requested_start
            )));
        }
        Ok(offering)
    }

    /// 读取新快照并按排序逐个确认档期
    ///
    /// # 返回
    /// - Ok(Ok((选中师傅, 快照 revision))): 可提交
    /// - Ok(Err(NoVendorAvailable)): 候选上限内无可行档期
    /// - Err: 仓储读取失败
    async fn select_candidate(
        &self,
        request: &BookingRequest,
        tier: DemandTier,
        offering: &ServiceOffering,
        now: DateTime<Utc>,
    ) -> Result<Result<(SelectedCandidate, i64), NoVendorAvailable>, AllocationError> {
        let vendors = self
            .registry
            .list_candidate_vendors(
                &request.service_category,
                &request.location,
                self.config.scoring.max_radius_km,
            )
            .await?;

        let ranking = self.allocator.score_candidates(request, tier, &vendors);
        debug!(
            candidates = ranking.ranked.len(),
            excluded = ranking.excluded.len(),
            "候选评分完成"
        );

        let duration = offering.duration();
        let window = self.buffer.snapshot_window(request.requested_start, duration);
        let shortlist = ranking
            .ranked
            .iter()
            .take(self.config.scoring.max_candidates_tried);

        let snapshots: HashMap<String, JobSnapshot> = try_join_all(
            shortlist.map(|c| self.job_store.list_committed_jobs(&c.vendor.vendor_id, window)),
        )
        .await?
        .into_iter()
        .map(|s| (s.vendor_id.clone(), s))
        .collect();

        let selected = self.allocator.select_with_fallback(&ranking.ranked, |vendor| {
            let snapshot = snapshots.get(&vendor.vendor_id)?;
            self.buffer
                .try_reserve_not_before(vendor, request, &snapshot.jobs, duration, now)
        });

        Ok(selected.map(|candidate| {
            let revision = snapshots
                .get(&candidate.vendor.vendor_id)
                .map(|s| s.revision)
                .unwrap_or(0);
            (candidate, revision)
        }))
    }
}
