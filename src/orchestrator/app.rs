//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：日志文件、推理客户端、文档存储、处理流程
//! 2. **批量加载**：扫描请求目录中的所有 TOML 请求文件
//! 3. **提交与等待**：以客户端身份提交请求，等待每个请求进入终态
//! 4. **后台任务**：调度器和对账任务随运行启动、随结束停止
//! 5. **全局统计**：汇总处理结果并写入结果日志

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clients::{InferenceService, OpenAiInference, RequestClient};
use crate::config::Config;
use crate::infrastructure::{DocumentStore, MemoryStore};
use crate::models::{RecommendationRequest, RequestFile, RequestStatus};
use crate::orchestrator::dispatcher::{DispatchStats, Dispatcher};
use crate::orchestrator::reconciler::Reconciler;
use crate::utils::logging::{
    append_json_line, init_log_file, log_requests_loaded, log_startup, print_final_stats,
};
use crate::workflow::RecommendationFlow;

/// 一次运行的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// 提交前校验失败的请求文件
    pub rejected: usize,
    pub dispatch: DispatchStats,
}

/// 应用主结构
pub struct App {
    config: Config,
    store: Arc<dyn DocumentStore>,
    client: RequestClient,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
}

impl App {
    /// 初始化应用，使用 OpenAI 兼容的推理服务
    pub async fn initialize(config: Config) -> Result<Self> {
        let vision: Arc<dyn InferenceService> = Arc::new(OpenAiInference::vision(&config));
        let text: Arc<dyn InferenceService> = Arc::new(OpenAiInference::text(&config));
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::default());
        Self::with_services(config, vision, text, store)
    }

    /// 用给定的推理服务和存储组装应用
    pub fn with_services(
        config: Config,
        vision: Arc<dyn InferenceService>,
        text: Arc<dyn InferenceService>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        init_log_file(&config.output_log_file)?;
        log_startup(config.max_concurrent_requests, config.max_concurrent_images);

        let flow = Arc::new(RecommendationFlow::from_config(
            &config,
            vision,
            text,
            store.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            flow,
            store.clone(),
            config.max_concurrent_requests,
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            Duration::from_secs(config.stale_after_secs),
        ));

        Ok(Self {
            client: RequestClient::new(store.clone()),
            config,
            store,
            dispatcher,
            reconciler,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunStats> {
        let request_files = self.load_requests().await?;

        if request_files.is_empty() {
            warn!("⚠️ 没有找到待处理的TOML文件，程序结束");
            return Ok(RunStats::default());
        }
        log_requests_loaded(request_files.len());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher_handle = {
            let dispatcher = self.dispatcher.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { dispatcher.run(rx).await })
        };
        let reconciler_handle = {
            let reconciler = self.reconciler.clone();
            let interval = Duration::from_secs(self.config.stale_after_secs.max(1));
            tokio::spawn(async move { reconciler.run_periodic(interval, shutdown_rx).await })
        };

        let mut stats = self.submit_and_wait(request_files).await;

        // 停止后台任务
        let _ = shutdown_tx.send(true);
        match dispatcher_handle.await {
            Ok(Ok(dispatch)) => stats.dispatch = dispatch,
            Ok(Err(e)) => error!("调度器异常退出: {}", e),
            Err(e) => error!("调度任务执行失败: {}", e),
        }
        if let Err(e) = reconciler_handle.await {
            error!("对账任务执行失败: {}", e);
        }

        print_final_stats(
            stats.completed,
            stats.failed + stats.rejected,
            stats.total,
            &self.config.output_log_file,
        );
        Ok(stats)
    }

    /// 加载请求文件
    async fn load_requests(&self) -> Result<Vec<RequestFile>> {
        info!("\n📁 正在扫描待处理的请求...");
        crate::models::load_all_request_files(&self.config.request_folder).await
    }

    /// 提交所有请求并等待它们进入终态
    async fn submit_and_wait(&self, request_files: Vec<RequestFile>) -> RunStats {
        let mut stats = RunStats {
            total: request_files.len(),
            ..Default::default()
        };

        let mut submitted = Vec::new();
        for file in request_files {
            let source = file.file_path.clone().unwrap_or_default();
            match self.client.submit(file.into_new_request()).await {
                Ok(request_id) => submitted.push(request_id),
                Err(e) => {
                    error!("❌ 请求文件 {} 未通过校验: {}", source, e);
                    stats.rejected += 1;
                }
            }
        }

        // 留出对账任务收尾的时间
        let wait_limit =
            Duration::from_secs(self.config.request_timeout_secs + self.config.stale_after_secs * 2);

        for request_id in submitted {
            match self.client.wait_for_terminal(&request_id, wait_limit).await {
                Ok(request) => {
                    match request.status {
                        RequestStatus::Completed => stats.completed += 1,
                        _ => stats.failed += 1,
                    }
                    self.record_terminal(&request).await;
                }
                Err(e) => {
                    error!("[请求 {}] ❌ 等待结果失败: {}", request_id, e);
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// 把终态请求及其推荐结果写入结果日志
    async fn record_terminal(&self, request: &RecommendationRequest) {
        let log_file = &self.config.output_log_file;
        if let Err(e) = append_json_line(log_file, request) {
            error!("[请求 {}] 写入结果日志失败: {}", request.id, e);
        }

        if request.status != RequestStatus::Completed {
            return;
        }
        match self.store.find_result_for_request(&request.id).await {
            Ok(Some(result)) => {
                info!(
                    "[请求 {}] 🍷 {} 条配餐推荐",
                    request.id,
                    result.wines.len()
                );
                if let Err(e) = append_json_line(log_file, &result) {
                    error!("[请求 {}] 写入结果日志失败: {}", request.id, e);
                }
            }
            Ok(None) => warn!("[请求 {}] ⚠️ 已完成但没有找到推荐结果", request.id),
            Err(e) => error!("[请求 {}] 读取推荐结果失败: {}", request.id, e),
        }
    }
}
