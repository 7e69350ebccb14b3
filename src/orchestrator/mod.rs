//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 管理应用生命周期（初始化、运行、停止后台任务）
//! - 批量加载请求文件并以客户端身份提交
//! - 输出全局统计信息
//!
//! ### `dispatcher` - 请求调度器
//! - 消费请求创建事件，控制并发数量（Semaphore）
//! - 事件丢失时重新扫描 pending 请求
//!
//! ### `reconciler` - 对账任务
//! - 收尾长时间停留在 pending 的请求
//!
//! ## 层次关系
//!
//! ```text
//! app (处理 Vec<RequestFile>)
//!     ↓
//! dispatcher (每个请求一次流程)
//!     ↓
//! workflow::RecommendationFlow (处理单个请求)
//!     ↓
//! services (能力层：detect / synthesize / parse)
//!     ↓
//! clients + infrastructure (推理服务、文档存储)
//! ```

pub mod app;
pub mod dispatcher;
pub mod reconciler;

pub use app::{App, RunStats};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use reconciler::{Reconciler, SweepReport};
