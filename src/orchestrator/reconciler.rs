//! 对账任务 - 编排层
//!
//! 收尾长时间停留在 pending 的请求（从认领时间起算，未认领则从创建时间起算）：
//! - 已有推荐结果（结果写入后状态更新失败）→ completed
//! - 没有推荐结果 → error（超时）

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult};
use crate::infrastructure::DocumentStore;
use crate::models::{RecommendationRequest, RequestStatus};
use crate::workflow::StatusTracker;

/// 单次对账的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// 补齐为 completed 的请求
    pub repaired: usize,
    /// 判定超时的请求
    pub expired: usize,
}

pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    tracker: StatusTracker,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>, stale_after: Duration) -> Self {
        Self {
            tracker: StatusTracker::new(store.clone()),
            store,
            stale_after,
        }
    }

    /// 处理所有在 `now` 时刻已超过 `stale_after` 的 pending 请求
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        let timeout_message = AppError::Timeout {
            secs: self.stale_after.as_secs(),
        }
        .to_string();

        for request in self.store.list_requests(RequestStatus::Pending).await? {
            if !self.is_stale(&request, now) {
                continue;
            }

            let outcome = match self.store.find_result_for_request(&request.id).await? {
                Some(result) => {
                    info!("[请求 {}] 🔧 已有推荐结果 {}，补记 completed", request.id, result.id);
                    self.tracker
                        .complete(&request.id, &result.id)
                        .await
                        .map(|_| report.repaired += 1)
                }
                None => {
                    info!("[请求 {}] ⌛ pending 超时，标记为 error", request.id);
                    self.tracker
                        .fail(&request.id, &timeout_message)
                        .await
                        .map(|_| report.expired += 1)
                }
            };

            // 与正在收尾的流程竞争时，对方先写入终态
            match outcome {
                Ok(()) => {}
                Err(AppError::Status(e)) => debug!("[请求 {}] 已结束，跳过: {}", request.id, e),
                Err(e) => return Err(e),
            }
        }

        if report.repaired + report.expired > 0 {
            info!(
                "🧹 对账完成: 补记 {} 个，超时 {} 个",
                report.repaired, report.expired
            );
        }
        Ok(report)
    }

    /// 请求自最近一次被接手以来已超过 `stale_after`
    pub fn is_stale(&self, request: &RecommendationRequest, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(request.last_activity())
            .to_std()
            .map_or(false, |age| age >= self.stale_after)
    }

    /// 按固定间隔对账，直到停机信号为 true
    pub async fn run_periodic(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!("对账失败: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryStore;
    use crate::models::{NewRecommendationRequest, NewRecommendationResult, Recommendation, Tier};
    use serde_json::json;

    async fn pending(store: &MemoryStore) -> String {
        store
            .create_request(NewRecommendationRequest::new(
                "user-1",
                json!([{"title": "Cheese"}]),
                vec!["img".to_string()],
                Tier::Standard,
            ))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_sweep_repairs_and_expires() {
        let store = Arc::new(MemoryStore::default());
        let with_result = pending(&store).await;
        let without_result = pending(&store).await;
        assert!(store.claim_request(&with_result, "flow-1").await.unwrap());
        let result = store
            .insert_result("flow-1", NewRecommendationResult {
                request_id: with_result.clone(),
                user_id: "user-1".to_string(),
                courses: Vec::new(),
                recommendation: Recommendation {
                    wines: Vec::new(),
                    overall_explanation: "ok".to_string(),
                },
                tier: Tier::Standard,
            })
            .await
            .unwrap();

        let reconciler = Reconciler::new(store.clone(), Duration::from_secs(60));

        // 尚未过期
        let report = reconciler.sweep(Utc::now()).await.unwrap();
        assert_eq!(report, SweepReport::default());

        let later = Utc::now() + chrono::Duration::seconds(120);
        let report = reconciler.sweep(later).await.unwrap();
        assert_eq!(report, SweepReport { repaired: 1, expired: 1 });

        let repaired = store.get_request(&with_result).await.unwrap();
        assert_eq!(repaired.status, RequestStatus::Completed);
        assert_eq!(repaired.recommendation_id, Some(result.id));

        let expired = store.get_request(&without_result).await.unwrap();
        assert_eq!(expired.status, RequestStatus::Error);
        assert!(expired.error_message.unwrap().contains("超时"));

        // 再次对账没有可处理的请求
        let report = reconciler.sweep(later).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_recent_claim_is_not_stale() {
        let store = Arc::new(MemoryStore::default());
        let reconciler = Reconciler::new(store.clone(), Duration::from_secs(300));
        let id = pending(&store).await;
        let mut request = store.get_request(&id).await.unwrap();

        // 在队列里等了很久，刚刚才被认领
        let now = request.created_at + chrono::Duration::seconds(400);
        assert!(reconciler.is_stale(&request, now));

        assert!(request.claim("flow-1", now - chrono::Duration::seconds(10)));
        assert!(!reconciler.is_stale(&request, now));
        assert!(reconciler.is_stale(&request, now + chrono::Duration::seconds(300)));
    }
}
