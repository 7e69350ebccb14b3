//! 文档存储 - 基础设施层
//!
//! 请求与推荐结果的持久化，以及两类通知：
//! - 请求创建事件（广播请求 ID，供调度器消费）
//! - 单个请求的变更订阅（`watch`，始终持有最新记录）

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult, PersistenceError, StatusError};
use crate::models::{
    NewRecommendationRequest, NewRecommendationResult, RecommendationRequest,
    RecommendationResult, RequestStatus, StatusTransition,
};

pub const REQUESTS_COLLECTION: &str = "recommendationRequests";
pub const RESULTS_COLLECTION: &str = "recommendations";

/// 文档存储
///
/// 所有对请求记录的修改都是原子的"检查并写入"，
/// 终态检查、认领检查都在存储内部完成。
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 创建 pending 请求并发布创建事件
    async fn create_request(&self, new: NewRecommendationRequest) -> AppResult<RecommendationRequest>;

    async fn get_request(&self, id: &str) -> AppResult<RecommendationRequest>;

    /// 列出指定状态的请求
    async fn list_requests(&self, status: RequestStatus) -> AppResult<Vec<RecommendationRequest>>;

    /// 用幂等键认领请求；已被认领或已处于终态时返回 false
    async fn claim_request(&self, id: &str, token: &str) -> AppResult<bool>;

    /// 原子地应用一次状态转换
    async fn transition_request(
        &self,
        id: &str,
        transition: StatusTransition,
    ) -> AppResult<RecommendationRequest>;

    /// 写入推荐结果
    ///
    /// 请求必须仍为 pending 且由 `claim_token` 认领；同一请求只能写入一次。
    async fn insert_result(
        &self,
        claim_token: &str,
        new: NewRecommendationResult,
    ) -> AppResult<RecommendationResult>;

    async fn get_result(&self, id: &str) -> AppResult<RecommendationResult>;

    async fn find_result_for_request(
        &self,
        request_id: &str,
    ) -> AppResult<Option<RecommendationResult>>;

    /// 订阅单个请求的变更
    fn subscribe(&self, id: &str) -> AppResult<watch::Receiver<RecommendationRequest>>;

    /// 订阅请求创建事件
    fn subscribe_created(&self) -> broadcast::Receiver<String>;
}

#[derive(Default)]
struct Collections {
    requests: HashMap<String, watch::Sender<RecommendationRequest>>,
    results: HashMap<String, RecommendationResult>,
    /// request_id -> result_id
    result_by_request: HashMap<String, String>,
}

/// 进程内文档存储
pub struct MemoryStore {
    inner: Mutex<Collections>,
    created_tx: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new(event_capacity: usize) -> Self {
        let (created_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Mutex::new(Collections::default()),
            created_tx,
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Collections>> {
        self.inner
            .lock()
            .map_err(|_| AppError::store_unavailable("存储锁已损坏"))
    }

    /// 重新发布创建事件（模拟至少一次投递）
    pub fn redeliver(&self, id: &str) {
        let _ = self.created_tx.send(id.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_request(&self, new: NewRecommendationRequest) -> AppResult<RecommendationRequest> {
        let id = Uuid::new_v4().to_string();
        let request = RecommendationRequest::create(&id, new, Utc::now());

        {
            let mut inner = self.lock()?;
            let (tx, _) = watch::channel(request.clone());
            inner.requests.insert(id.clone(), tx);
        }

        debug!("创建请求 {}/{}", REQUESTS_COLLECTION, id);
        // 没有订阅者时发送失败不影响写入
        let _ = self.created_tx.send(id);
        Ok(request)
    }

    async fn get_request(&self, id: &str) -> AppResult<RecommendationRequest> {
        let inner = self.lock()?;
        inner
            .requests
            .get(id)
            .map(|tx| tx.borrow().clone())
            .ok_or_else(|| AppError::not_found(REQUESTS_COLLECTION, id))
    }

    async fn list_requests(&self, status: RequestStatus) -> AppResult<Vec<RecommendationRequest>> {
        let inner = self.lock()?;
        let mut requests: Vec<RecommendationRequest> = inner
            .requests
            .values()
            .map(|tx| tx.borrow().clone())
            .filter(|request| request.status == status)
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    async fn claim_request(&self, id: &str, token: &str) -> AppResult<bool> {
        let inner = self.lock()?;
        let tx = inner
            .requests
            .get(id)
            .ok_or_else(|| AppError::not_found(REQUESTS_COLLECTION, id))?;
        Ok(tx.send_if_modified(|request| request.claim(token, Utc::now())))
    }

    async fn transition_request(
        &self,
        id: &str,
        transition: StatusTransition,
    ) -> AppResult<RecommendationRequest> {
        let inner = self.lock()?;
        let tx = inner
            .requests
            .get(id)
            .ok_or_else(|| AppError::not_found(REQUESTS_COLLECTION, id))?;

        let mut outcome = Ok(());
        tx.send_if_modified(|request| {
            outcome = request.apply(transition, Utc::now());
            outcome.is_ok()
        });
        outcome?;

        let updated = tx.borrow().clone();
        Ok(updated)
    }

    async fn insert_result(
        &self,
        claim_token: &str,
        new: NewRecommendationResult,
    ) -> AppResult<RecommendationResult> {
        let mut inner = self.lock()?;

        // 请求检查与结果写入在同一把锁内完成
        {
            let tx = inner
                .requests
                .get(&new.request_id)
                .ok_or_else(|| AppError::not_found(REQUESTS_COLLECTION, &new.request_id))?;
            let request = tx.borrow();
            if request.status.is_terminal() {
                return Err(StatusError::AlreadyTerminal {
                    id: request.id.clone(),
                    status: request.status,
                }
                .into());
            }
            if !request.is_held_by(claim_token) {
                return Err(PersistenceError::ClaimLost {
                    request_id: new.request_id,
                }
                .into());
            }
        }

        if inner.result_by_request.contains_key(&new.request_id) {
            return Err(PersistenceError::DuplicateResult {
                request_id: new.request_id,
            }
            .into());
        }

        let id = Uuid::new_v4().to_string();
        let result = RecommendationResult::create(&id, new, Utc::now());
        inner
            .result_by_request
            .insert(result.request_id.clone(), id.clone());
        inner.results.insert(id.clone(), result.clone());

        debug!("写入结果 {}/{}", RESULTS_COLLECTION, id);
        Ok(result)
    }

    async fn get_result(&self, id: &str) -> AppResult<RecommendationResult> {
        let inner = self.lock()?;
        inner
            .results
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found(RESULTS_COLLECTION, id))
    }

    async fn find_result_for_request(
        &self,
        request_id: &str,
    ) -> AppResult<Option<RecommendationResult>> {
        let inner = self.lock()?;
        Ok(inner
            .result_by_request
            .get(request_id)
            .and_then(|result_id| inner.results.get(result_id))
            .cloned())
    }

    fn subscribe(&self, id: &str) -> AppResult<watch::Receiver<RecommendationRequest>> {
        let inner = self.lock()?;
        inner
            .requests
            .get(id)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| AppError::not_found(REQUESTS_COLLECTION, id))
    }

    fn subscribe_created(&self) -> broadcast::Receiver<String> {
        self.created_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Recommendation, Tier};
    use serde_json::json;

    fn new_request() -> NewRecommendationRequest {
        NewRecommendationRequest::new(
            "user-1",
            json!([{"title": "Steak"}]),
            vec!["https://img/1.jpg".to_string()],
            Tier::Simple,
        )
    }

    fn new_result(request_id: &str) -> NewRecommendationResult {
        NewRecommendationResult {
            request_id: request_id.to_string(),
            user_id: "user-1".to_string(),
            courses: Vec::new(),
            recommendation: Recommendation {
                wines: Vec::new(),
                overall_explanation: "ok".to_string(),
            },
            tier: Tier::Simple,
        }
    }

    #[tokio::test]
    async fn test_create_publishes_event() {
        let store = MemoryStore::default();
        let mut events = store.subscribe_created();

        let request = store.create_request(new_request()).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), request.id);
        assert_eq!(request.status, RequestStatus::Pending);
        let stored = tokio_test::assert_ok!(store.get_request(&request.id).await);
        assert_eq!(stored, request);
    }

    #[tokio::test]
    async fn test_subscription_sees_terminal_state() {
        let store = MemoryStore::default();
        let request = store.create_request(new_request()).await.unwrap();
        let mut rx = store.subscribe(&request.id).unwrap();

        store
            .transition_request(
                &request.id,
                StatusTransition::Fail {
                    message: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        rx.changed().await.unwrap();
        let seen = rx.borrow().clone();
        assert_eq!(seen.status, RequestStatus::Error);
        assert_eq!(seen.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_second_transition_rejected() {
        let store = MemoryStore::default();
        let request = store.create_request(new_request()).await.unwrap();
        store
            .transition_request(
                &request.id,
                StatusTransition::Complete {
                    recommendation_id: "rec".to_string(),
                },
            )
            .await
            .unwrap();

        let err = store
            .transition_request(
                &request.id,
                StatusTransition::Fail {
                    message: "late".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Status(StatusError::AlreadyTerminal { .. })
        ));
        let stored = store.get_request(&request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert_eq!(stored.error_message, None);
    }

    #[tokio::test]
    async fn test_claim_and_duplicate_result() {
        let store = MemoryStore::default();
        let request = store.create_request(new_request()).await.unwrap();

        assert!(store.claim_request(&request.id, "a").await.unwrap());
        assert!(!store.claim_request(&request.id, "b").await.unwrap());

        let result = store.insert_result("a", new_result(&request.id)).await.unwrap();
        assert!(matches!(
            store.insert_result("a", new_result(&request.id)).await,
            Err(AppError::Persistence(PersistenceError::DuplicateResult { .. }))
        ));
        assert_eq!(
            store.find_result_for_request(&request.id).await.unwrap(),
            Some(result.clone())
        );
        assert_eq!(store.get_result(&result.id).await.unwrap(), result);
    }

    #[tokio::test]
    async fn test_result_requires_live_claim() {
        let store = MemoryStore::default();
        let request = store.create_request(new_request()).await.unwrap();

        // 未认领
        assert!(matches!(
            store.insert_result("a", new_result(&request.id)).await,
            Err(AppError::Persistence(PersistenceError::ClaimLost { .. }))
        ));

        assert!(store.claim_request(&request.id, "a").await.unwrap());
        let claimed = store.get_request(&request.id).await.unwrap();
        assert!(claimed.claimed_at.is_some());

        // 其他处理者
        assert!(matches!(
            store.insert_result("b", new_result(&request.id)).await,
            Err(AppError::Persistence(PersistenceError::ClaimLost { .. }))
        ));

        // 认领者在请求被判定超时之后才尝试写入
        store
            .transition_request(
                &request.id,
                StatusTransition::Fail {
                    message: "expired".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            store.insert_result("a", new_result(&request.id)).await,
            Err(AppError::Status(StatusError::AlreadyTerminal { .. }))
        ));
        assert_eq!(store.find_result_for_request(&request.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let store = MemoryStore::default();
        let err = tokio_test::assert_err!(store.get_request("nope").await);
        assert!(matches!(
            err,
            AppError::Persistence(PersistenceError::NotFound { .. })
        ));
        assert!(store.subscribe("nope").is_err());
        assert_eq!(store.find_result_for_request("nope").await.unwrap(), None);
    }
}
