//! 请求调度器 - 编排层
//!
//! ## 职责
//!
//! 消费存储的请求创建事件，为每个请求启动一次独立的处理流程。
//!
//! - **并发控制**：Semaphore 限制同时运行的流程数量
//! - **丢失补偿**：事件接收落后（Lagged）时重新扫描未认领的 pending 请求
//! - **幂等**：重复投递由流程内的认领步骤过滤，这里不做去重
//! - **停机**：收到停机信号后不再接收新事件，等待在途流程结束

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::AppResult;
use crate::infrastructure::DocumentStore;
use crate::models::RequestStatus;
use crate::workflow::{FlowOutcome, RecommendationFlow};

/// 调度统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub duplicates: usize,
    /// 流程本身返回错误或任务崩溃
    pub aborted: usize,
}

type FlowTasks = JoinSet<(String, AppResult<FlowOutcome>)>;

impl DispatchStats {
    fn record(&mut self, joined: Result<(String, AppResult<FlowOutcome>), JoinError>) {
        match joined {
            Ok((_, Ok(FlowOutcome::Completed { .. }))) => self.completed += 1,
            Ok((_, Ok(FlowOutcome::Failed { .. }))) => self.failed += 1,
            Ok((_, Ok(FlowOutcome::Duplicate))) => self.duplicates += 1,
            Ok((request_id, Err(e))) => {
                error!("[请求 {}] 流程中止: {}", request_id, e);
                self.aborted += 1;
            }
            Err(e) => {
                error!("任务执行失败: {}", e);
                self.aborted += 1;
            }
        }
    }
}

pub struct Dispatcher {
    flow: Arc<RecommendationFlow>,
    store: Arc<dyn DocumentStore>,
    max_concurrent: usize,
}

impl Dispatcher {
    pub fn new(
        flow: Arc<RecommendationFlow>,
        store: Arc<dyn DocumentStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            flow,
            store,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// 持续调度，直到停机信号为 true 或事件源关闭
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<DispatchStats> {
        // 先订阅再扫描，订阅前创建的请求由首次扫描补上
        let mut events = self.store.subscribe_created();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = FlowTasks::new();
        let mut stats = DispatchStats::default();

        info!("📡 调度器启动，最大并发: {}", self.max_concurrent);
        self.rescan(&semaphore, &mut tasks, &mut stats).await?;

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    stats.record(joined);
                }
                event = events.recv() => match event {
                    Ok(request_id) => {
                        self.spawn_flow(request_id, &semaphore, &mut tasks, &mut stats).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("⚠️ 事件接收落后，丢失 {} 条，重新扫描 pending 请求", skipped);
                        self.rescan(&semaphore, &mut tasks, &mut stats).await?;
                    }
                    Err(RecvError::Closed) => {
                        warn!("事件源已关闭，调度器停止接收");
                        break;
                    }
                },
            }
        }

        info!("⏳ 等待 {} 个在途请求结束...", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            stats.record(joined);
        }

        info!(
            "📡 调度器停止: 派发 {}，完成 {}，失败 {}，重复 {}，中止 {}",
            stats.dispatched, stats.completed, stats.failed, stats.duplicates, stats.aborted
        );
        Ok(stats)
    }

    /// 派发所有未认领的 pending 请求
    async fn rescan(
        &self,
        semaphore: &Arc<Semaphore>,
        tasks: &mut FlowTasks,
        stats: &mut DispatchStats,
    ) -> anyhow::Result<()> {
        let pending = self.store.list_requests(RequestStatus::Pending).await?;
        let unclaimed: Vec<String> = pending
            .into_iter()
            .filter(|request| request.claim_token.is_none())
            .map(|request| request.id)
            .collect();

        if !unclaimed.is_empty() {
            info!("🔁 扫描到 {} 个未认领的 pending 请求", unclaimed.len());
        }
        for request_id in unclaimed {
            self.spawn_flow(request_id, semaphore, tasks, stats).await?;
        }
        Ok(())
    }

    async fn spawn_flow(
        &self,
        request_id: String,
        semaphore: &Arc<Semaphore>,
        tasks: &mut FlowTasks,
        stats: &mut DispatchStats,
    ) -> anyhow::Result<()> {
        let permit = semaphore.clone().acquire_owned().await?;
        let flow = self.flow.clone();
        debug!("[请求 {}] 派发处理流程", request_id);

        tasks.spawn(async move {
            let _permit = permit;
            let outcome = flow.run(&request_id).await;
            (request_id, outcome)
        });
        stats.dispatched += 1;
        Ok(())
    }
}
