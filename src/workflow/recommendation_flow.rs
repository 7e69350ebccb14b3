//! 推荐处理流程 - 流程层
//!
//! 核心职责：定义"一个请求"的完整处理流程
//!
//! 流程顺序：
//! 0. 认领请求（幂等键），重复投递直接跳过
//! 1. 识别图片中的酒
//! 2. 合成配餐推荐
//! 3. 写入推荐结果
//! 4. 请求状态 → completed
//!
//! 1~2 步在处理时限内完成；1~3 步任一出错，请求状态 → error。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::InferenceService;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::DocumentStore;
use crate::models::{normalize_courses, NewRecommendationResult, RecommendationRequest};
use crate::services::{RecommendationSynthesizer, WineDetector};
use crate::workflow::request_ctx::RequestCtx;
use crate::workflow::status_tracker::StatusTracker;

/// 单个请求的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// 已写入推荐结果，请求完成
    Completed { recommendation_id: String },
    /// 请求进入 error 状态
    Failed { message: String },
    /// 请求已被认领或已处于终态，本次投递被忽略
    Duplicate,
}

/// 推荐处理流程
///
/// - 编排完整的请求处理流程
/// - 保证每个请求恰好一次状态转换
/// - 不校验请求内容（由客户端负责）
pub struct RecommendationFlow {
    detector: WineDetector,
    synthesizer: RecommendationSynthesizer,
    store: Arc<dyn DocumentStore>,
    tracker: StatusTracker,
    request_timeout: Duration,
}

impl RecommendationFlow {
    pub fn new(
        detector: WineDetector,
        synthesizer: RecommendationSynthesizer,
        store: Arc<dyn DocumentStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            detector,
            synthesizer,
            tracker: StatusTracker::new(store.clone()),
            store,
            request_timeout,
        }
    }

    /// 按配置组装流程
    pub fn from_config(
        config: &Config,
        vision: Arc<dyn InferenceService>,
        text: Arc<dyn InferenceService>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self::new(
            WineDetector::new(vision, config.max_concurrent_images),
            RecommendationSynthesizer::new(text, config.synthesis_failure_policy),
            store,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub async fn run(&self, request_id: &str) -> AppResult<FlowOutcome> {
        let request = self.store.get_request(request_id).await?;

        let token = Uuid::new_v4().to_string();
        if !self.store.claim_request(request_id, &token).await? {
            debug!(
                "[请求 {}] 已被认领或已结束 (状态: {})，跳过重复投递",
                request_id, request.status
            );
            return Ok(FlowOutcome::Duplicate);
        }

        let ctx = RequestCtx::new(&request);
        info!(
            "{} ▶ 开始处理 (用户: {}, 档位: {}, 图片: {} 张)",
            ctx, ctx.user_id, ctx.tier, ctx.image_count
        );
        let started = Instant::now();

        match self.process(&request, &token, &ctx).await {
            Ok(recommendation_id) => {
                if let Err(e) = self.tracker.complete(request_id, &recommendation_id).await {
                    // 对账任务已用同一份结果补记 completed
                    let recorded = matches!(e, AppError::Status(_))
                        && self.store.get_request(request_id).await?.recommendation_id.as_deref()
                            == Some(recommendation_id.as_str());
                    if !recorded {
                        return Err(e);
                    }
                }
                info!(
                    "{} ✅ 处理完成，耗时 {:.1}s",
                    ctx,
                    started.elapsed().as_secs_f32()
                );
                Ok(FlowOutcome::Completed { recommendation_id })
            }
            Err(e) => {
                let message = e.to_string();
                error!("{} ❌ 处理失败: {}", ctx, message);
                match self.tracker.fail(request_id, &message).await {
                    Ok(_) => Ok(FlowOutcome::Failed { message }),
                    // 对账任务已先一步写入终态，沿用已记录的结局
                    Err(AppError::Status(_)) => {
                        let current = self.store.get_request(request_id).await?;
                        warn!("{} ⚠️ 请求已被对账任务结束 (状态: {})", ctx, current.status);
                        Ok(FlowOutcome::Failed {
                            message: current.error_message.unwrap_or(message),
                        })
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// 步骤 1~3，返回推荐结果 ID
    async fn process(
        &self,
        request: &RecommendationRequest,
        claim_token: &str,
        ctx: &RequestCtx,
    ) -> AppResult<String> {
        let courses = normalize_courses(&request.meal);
        if courses.is_empty() {
            warn!("{} ⚠️ 没有可用的菜品描述，按通用餐食处理", ctx);
        }

        let generate = async {
            info!("{} 🔍 正在识别 {} 张图片...", ctx, request.image_references.len());
            let wines = self.detector.detect(&request.image_references).await?;
            info!("{} ✓ 识别出 {} 瓶酒", ctx, wines.len());

            self.synthesizer
                .synthesize(&wines, &courses, request.tier)
                .await
        };

        let recommendation = tokio::time::timeout(self.request_timeout, generate)
            .await
            .map_err(|_| AppError::Timeout {
                secs: self.request_timeout.as_secs(),
            })??;

        let result = self
            .store
            .insert_result(
                claim_token,
                NewRecommendationResult {
                    request_id: request.id.clone(),
                    user_id: request.user_id.clone(),
                    courses,
                    recommendation,
                    tier: request.tier,
                },
            )
            .await?;
        info!("{} 💾 推荐结果已保存: {}", ctx, result.id);

        Ok(result.id)
    }
}
