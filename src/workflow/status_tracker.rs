//! 请求状态追踪 - 流程层
//!
//! 请求状态只能从 pending 单向进入 completed 或 error，且只转换一次。
//! 终态检查由存储在同一次原子写入中完成，这里只负责表达意图和观察变化。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::DocumentStore;
use crate::models::{RecommendationRequest, StatusTransition};

/// 请求状态追踪器
pub struct StatusTracker {
    store: Arc<dyn DocumentStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// pending → completed，并记录推荐结果 ID
    pub async fn complete(
        &self,
        request_id: &str,
        recommendation_id: &str,
    ) -> AppResult<RecommendationRequest> {
        let updated = self
            .store
            .transition_request(
                request_id,
                StatusTransition::Complete {
                    recommendation_id: recommendation_id.to_string(),
                },
            )
            .await?;
        debug!("请求 {} → completed ({})", request_id, recommendation_id);
        Ok(updated)
    }

    /// pending → error，并记录错误信息
    pub async fn fail(&self, request_id: &str, message: &str) -> AppResult<RecommendationRequest> {
        let updated = self
            .store
            .transition_request(
                request_id,
                StatusTransition::Fail {
                    message: message.to_string(),
                },
            )
            .await?;
        warn!("请求 {} → error: {}", request_id, message);
        Ok(updated)
    }

    pub async fn current(&self, request_id: &str) -> AppResult<RecommendationRequest> {
        self.store.get_request(request_id).await
    }

    /// 订阅请求的后续变化
    pub fn subscribe(&self, request_id: &str) -> AppResult<watch::Receiver<RecommendationRequest>> {
        self.store.subscribe(request_id)
    }

    /// 等待请求进入终态
    ///
    /// 订阅时已经是终态则立即返回；超过 `timeout` 返回 [`AppError::Timeout`]。
    pub async fn wait_for_terminal(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> AppResult<RecommendationRequest> {
        let mut rx = self.subscribe(request_id)?;

        let wait = async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if snapshot.status.is_terminal() {
                        return Ok::<_, AppError>(snapshot.clone());
                    }
                }
                rx.changed()
                    .await
                    .map_err(|_| AppError::store_unavailable("请求订阅已关闭"))?;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| AppError::Timeout {
                secs: timeout.as_secs(),
            })?
    }
}
