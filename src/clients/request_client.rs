//! 请求客户端
//!
//! 调用方一侧的能力：校验并创建请求、等待终态、读取推荐结果

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::AppResult;
use crate::infrastructure::DocumentStore;
use crate::models::{NewRecommendationRequest, RecommendationRequest, RecommendationResult};
use crate::workflow::StatusTracker;

pub struct RequestClient {
    store: Arc<dyn DocumentStore>,
    tracker: StatusTracker,
}

impl RequestClient {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            tracker: StatusTracker::new(store.clone()),
            store,
        }
    }

    /// 校验并创建请求，返回请求 ID
    ///
    /// 校验失败时不会创建任何记录。
    pub async fn submit(&self, new: NewRecommendationRequest) -> AppResult<String> {
        new.validate()?;
        let request = self.store.create_request(new).await?;
        info!(
            "📨 已提交请求 {} (档位: {}, 图片: {} 张, 积分: {})",
            request.id,
            request.tier,
            request.image_references.len(),
            request.credits_charged
        );
        Ok(request.id)
    }

    /// 等待请求进入 completed 或 error
    pub async fn wait_for_terminal(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> AppResult<RecommendationRequest> {
        self.tracker.wait_for_terminal(request_id, timeout).await
    }

    /// 读取已完成请求对应的推荐结果
    pub async fn fetch_result(&self, request_id: &str) -> AppResult<Option<RecommendationResult>> {
        self.store.find_result_for_request(request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ValidationError};
    use crate::infrastructure::MemoryStore;
    use crate::models::{RequestStatus, Tier};
    use serde_json::json;

    #[tokio::test]
    async fn test_submit_creates_pending_request() {
        let store = Arc::new(MemoryStore::default());
        let client = RequestClient::new(store.clone());

        let id = client
            .submit(NewRecommendationRequest::new(
                "user-1",
                json!({"Main": {"desc": "Lamb"}}),
                vec!["img".to_string()],
                Tier::Detailed,
            ))
            .await
            .unwrap();

        let stored = store.get_request(&id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(stored.credits_charged, 20);
        assert_eq!(client.fetch_result(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_created() {
        let store = Arc::new(MemoryStore::default());
        let client = RequestClient::new(store.clone());

        let err = client
            .submit(NewRecommendationRequest::new(
                "user-1",
                json!([{"title": "Lamb"}]),
                Vec::new(),
                Tier::Simple,
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::ImageCount { count: 0 })
        ));
        assert!(store
            .list_requests(RequestStatus::Pending)
            .await
            .unwrap()
            .is_empty());
    }
}
