//! 风险评估模块
//!
//! 评估结果仅供参考，不会阻断交易；高风险结果进入人工复核队列，
//! 并累加到人员风险分，供后续请求的冻结判断使用。

pub mod detectors;
mod profile;
mod review;
mod scorer;

pub use profile::{BehaviorProfiles, MIN_BASELINE_RECORDS, build_baseline};
pub use review::{MemoryReviewQueue, ReviewItem, ReviewQueue};
pub use scorer::{RiskAssessment, RiskScorer};
