//! 人工复核队列

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::RiskResult;

/// 待复核的高风险交易
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub person_id: i64,
    pub order_no: String,
    pub result: RiskResult,
    pub submitted_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReviewQueue: Send + Sync {
    async fn submit(&self, item: ReviewItem) -> Result<()>;
}

/// 内存复核队列
#[derive(Debug, Default)]
pub struct MemoryReviewQueue {
    items: Mutex<Vec<ReviewItem>>,
}

impl MemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<ReviewItem> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl ReviewQueue for MemoryReviewQueue {
    async fn submit(&self, item: ReviewItem) -> Result<()> {
        self.items.lock().push(item);
        Ok(())
    }
}
