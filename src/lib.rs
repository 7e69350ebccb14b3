//! # Wine Recommend
//!
//! 根据酒瓶照片和菜单生成配餐推荐的异步流水线
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure / Clients）
//! - `infrastructure/` - 文档存储，持久化请求与结果并发布变更通知
//! - `clients/` - 推理服务（视觉 / 文本）与请求客户端
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心请求状态
//! - `ResponseParser` - 从模型输出中提取 JSON
//! - `WineDetector` - 图片 → 酒的列表
//! - `RecommendationSynthesizer` - 酒 + 菜品 + 档位 → 配餐推荐
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个请求"的完整处理流程
//! - `RequestCtx` - 上下文封装（日志前缀）
//! - `StatusTracker` - 单向状态机 pending → completed | error
//! - `RecommendationFlow` - 流程编排（claim → detect → synthesize → persist → complete）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/dispatcher` - 消费创建事件，控制并发
//! - `orchestrator/reconciler` - 收尾停滞的 pending 请求
//! - `orchestrator/app` - 应用入口，批量提交请求文件

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{InferenceService, OpenAiInference, RequestClient};
pub use config::{Config, SynthesisFailurePolicy};
pub use error::{AppError, AppResult};
pub use infrastructure::{DocumentStore, MemoryStore};
pub use models::{
    Course, DetectedWine, NewRecommendationRequest, RecommendationRequest, RecommendationResult,
    RequestStatus, Tier, WineMatch,
};
pub use orchestrator::{App, Dispatcher, Reconciler};
pub use services::{RecommendationSynthesizer, ResponseParser, WineDetector};
pub use workflow::{FlowOutcome, RecommendationFlow, RequestCtx, StatusTracker};
