use crate::config::ScoringConfig;
use crate::domain::types::DemandTier;
use crate::domain::vendor::VendorProfile;
use serde::{Deserialize, Serialize};

/// 评分上限
const MAX_RATING: f64 = 5.0;

/// 各归一化因子 [0, 1] 及加权后的综合分
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub rating_score: f64,
    pub proximity_score: f64,
    pub load_score: f64,
    pub demand_boost: f64,
    pub distance_km: f64,
    pub composite: f64,
}

pub(super) fn compute_score(
    vendor: &VendorProfile,
    distance_km: f64,
    tier: DemandTier,
    config: &ScoringConfig,
) -> ScoreBreakdown {
    let w = &config.weights;

    let rating = if vendor.average_rating.is_finite() {
        vendor.average_rating.clamp(0.0, MAX_RATING)
    } else {
        0.0
    };
    let rating_score = rating / MAX_RATING;

    let proximity_score = 1.0 - (distance_km / config.max_radius_km).min(1.0);

    // 负载越低得分越高
    let load_ratio = vendor.active_job_count as f64 / config.max_concurrent_jobs as f64;
    let load_score = 1.0 - load_ratio.min(1.0);

    let demand_boost = config.tier_weight.get(tier);

    let composite = w.rating * rating_score
        + w.proximity * proximity_score
        + w.load * load_score
        + w.demand * demand_boost;

    ScoreBreakdown {
        rating_score,
        proximity_score,
        load_score,
        demand_boost,
        distance_km,
        composite,
    }
}
