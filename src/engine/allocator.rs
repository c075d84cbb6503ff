// ==========================================
// 上门服务预约智能引擎 - 师傅分派引擎
// ==========================================
// 职责: 过滤、评分、排序候选师傅，并按排序逐个确认档期
// 输入: 预约请求 + 需求等级 + 师傅快照
// 输出: 排序后的候选列表 / 首个档期可行的师傅
// 规则:
// - 不接单、品类不符、超出服务半径的师傅直接排除，不参与评分
// - 综合分 = w1*评分 + w2*距离 + w3*负载 + w4*需求加成
// - 同分依次比较: 进行中工单少者优先 → 评分高者优先 → 师傅ID字典序小者优先
// ==========================================

mod scoring;

pub use scoring::ScoreBreakdown;

use crate::config::ScoringConfig;
use crate::domain::booking::{BookingRequest, TimeSlot};
use crate::domain::types::DemandTier;
use crate::domain::vendor::VendorProfile;
use crate::engine::geo::DistanceModel;
use scoring::compute_score;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

// ==========================================
// 排除原因
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExclusionReason {
    Unavailable,                       // 不接单
    CategoryMismatch,                  // 品类不符
    OutOfRadius { distance_km: f64 },  // 超出服务半径
    UnknownLocation,                   // 区域无坐标，无法判断距离
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Unavailable => write!(f, "UNAVAILABLE"),
            ExclusionReason::CategoryMismatch => write!(f, "CATEGORY_MISMATCH"),
            ExclusionReason::OutOfRadius { distance_km } => {
                write!(f, "OUT_OF_RADIUS: distance_km={:.3}", distance_km)
            }
            ExclusionReason::UnknownLocation => write!(f, "UNKNOWN_LOCATION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedVendor {
    pub vendor_id: String,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredVendor {
    pub vendor: VendorProfile,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// 评分结果（排序后的候选 + 被排除的师傅及原因）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRanking {
    pub ranked: Vec<ScoredVendor>,
    pub excluded: Vec<ExcludedVendor>,
}

/// 档期确认选中的师傅
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedCandidate {
    pub vendor: VendorProfile,
    pub slot: TimeSlot,
    pub rank: usize,
    pub score: f64,
}

/// 候选全部不可行（正常业务结果，不是故障）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoVendorAvailable {
    pub candidates_tried: usize,
}

// ==========================================
// VendorAllocator - 师傅分派引擎
// ==========================================
pub struct VendorAllocator {
    config: ScoringConfig,
    distance: Arc<dyn DistanceModel>,
}

impl VendorAllocator {
    /// 构造函数
    ///
    /// # 参数
    /// - `config`: 评分配置
    /// - `distance`: 区域距离模型
    pub fn new(config: ScoringConfig, distance: Arc<dyn DistanceModel>) -> Self {
        Self { config, distance }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 过滤并评分候选师傅
    ///
    /// # 参数
    /// - `request`: 预约请求
    /// - `tier`: 请求区域的需求等级
    /// - `vendors`: 师傅快照
    ///
    /// # 返回
    /// CandidateRanking（ranked 按综合分降序）
    pub fn score_candidates(
        &self,
        request: &BookingRequest,
        tier: DemandTier,
        vendors: &[VendorProfile],
    ) -> CandidateRanking {
        let mut ranking = CandidateRanking::default();

        for vendor in vendors {
            match self.check_eligibility(request, vendor) {
                Ok(distance_km) => {
                    let breakdown = compute_score(vendor, distance_km, tier, &self.config);
                    ranking.ranked.push(ScoredVendor {
                        vendor: vendor.clone(),
                        score: breakdown.composite,
                        breakdown,
                    });
                }
                Err(reason) => {
                    debug!(
                        booking_id = %request.booking_id,
                        vendor_id = %vendor.vendor_id,
                        reason = %reason,
                        "师傅被排除"
                    );
                    ranking.excluded.push(ExcludedVendor {
                        vendor_id: vendor.vendor_id.clone(),
                        reason,
                    });
                }
            }
        }

        ranking.ranked.sort_by(compare_scored);
        ranking
    }

    /// 排序候选师傅（综合分降序，仅返回师傅档案）
    pub fn rank_candidates(
        &self,
        request: &BookingRequest,
        tier: DemandTier,
        vendors: &[VendorProfile],
    ) -> Vec<VendorProfile> {
        self.score_candidates(request, tier, vendors)
            .ranked
            .into_iter()
            .map(|s| s.vendor)
            .collect()
    }

    /// 按排序逐个确认档期，返回首个可行师傅
    ///
    /// 最多尝试 max_candidates_tried 个候选。
    ///
    /// # 参数
    /// - `ranked`: score_candidates 输出的排序候选
    /// - `try_reserve`: 档期确认函数（返回可行时间段或 None）
    ///
    /// # 返回
    /// - Ok(SelectedCandidate): 首个可行师傅及时间段
    /// - Err(NoVendorAvailable): 上限内无可行师傅
    pub fn select_with_fallback<F>(
        &self,
        ranked: &[ScoredVendor],
        mut try_reserve: F,
    ) -> Result<SelectedCandidate, NoVendorAvailable>
    where
        F: FnMut(&VendorProfile) -> Option<TimeSlot>,
    {
        let limit = self.config.max_candidates_tried;
        let mut tried = 0;

        for (rank, candidate) in ranked.iter().take(limit).enumerate() {
            tried += 1;
            match try_reserve(&candidate.vendor) {
                Some(slot) => {
                    return Ok(SelectedCandidate {
                        vendor: candidate.vendor.clone(),
                        slot,
                        rank,
                        score: candidate.score,
                    });
                }
                None => {
                    debug!(
                        vendor_id = %candidate.vendor.vendor_id,
                        rank,
                        "档期不可行，尝试下一候选"
                    );
                }
            }
        }

        Err(NoVendorAvailable {
            candidates_tried: tried,
        })
    }

    // ==========================================
    // 过滤
    // ==========================================

    /// 准入检查
    ///
    /// # 返回
    /// - Ok(distance_km): 通过，附带距离
    /// - Err(reason): 排除原因
    fn check_eligibility(
        &self,
        request: &BookingRequest,
        vendor: &VendorProfile,
    ) -> Result<f64, ExclusionReason> {
        if !vendor.is_available {
            return Err(ExclusionReason::Unavailable);
        }
        if !vendor.offers(&request.service_category) {
            return Err(ExclusionReason::CategoryMismatch);
        }

        let distance_km = self
            .distance
            .distance_km(&vendor.location, &request.location)
            .filter(|d| d.is_finite())
            .ok_or(ExclusionReason::UnknownLocation)?;

        if distance_km > self.config.max_radius_km {
            return Err(ExclusionReason::OutOfRadius { distance_km });
        }
        Ok(distance_km)
    }
}

// ==========================================
// 比较方法
// ==========================================

/// 综合分降序；同分依次比较进行中工单数升序、评分降序、师傅ID升序
///
/// # 返回
/// Ordering::Less 表示 a 优先于 b
fn compare_scored(a: &ScoredVendor, b: &ScoredVendor) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.vendor.active_job_count.cmp(&b.vendor.active_job_count))
        .then_with(|| b.vendor.average_rating.total_cmp(&a.vendor.average_rating))
        .then_with(|| a.vendor.vendor_id.cmp(&b.vendor.vendor_id))
}
