// ==========================================
// 上门服务预约智能引擎 - 分派错误类型
// ==========================================
// 说明:
// - NoVendorAvailable / AllocationConflict 是正常业务结果，调用方据此降级或重试
// - Collaborator 表示外部仓储故障，不是引擎自身的判定
// ==========================================

use crate::engine::pricing::PricingError;
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("预约请求非法: {0}")]
    InvalidRequest(String),

    #[error("无可用师傅: booking_id={booking_id}, candidates_tried={candidates_tried}")]
    NoVendorAvailable {
        booking_id: String,
        candidates_tried: usize,
    },

    #[error("分派提交冲突（重试已用尽）: booking_id={booking_id}, attempts={attempts}")]
    AllocationConflict { booking_id: String, attempts: u32 },

    #[error("外部仓储错误: {0}")]
    Collaborator(#[from] RepositoryError),
}

impl From<PricingError> for AllocationError {
    fn from(err: PricingError) -> Self {
        AllocationError::InvalidRequest(err.to_string())
    }
}
