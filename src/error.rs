use thiserror::Error;

use crate::models::RequestStatus;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 推理服务调用错误
    #[error("推理服务错误: {0}")]
    Inference(#[from] InferenceError),
    /// 模型输出解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 文档存储错误
    #[error("存储错误: {0}")]
    Persistence(#[from] PersistenceError),
    /// 状态机错误
    #[error("状态错误: {0}")]
    Status(#[from] StatusError),
    /// 请求校验错误
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 处理超时
    #[error("处理超时: 超过 {secs} 秒仍未完成")]
    Timeout { secs: u64 },
}

/// 推理服务错误（视觉 / 文本）
#[derive(Debug, Error)]
pub enum InferenceError {
    /// API 调用失败（网络、鉴权、服务端错误）
    #[error("推理 API 调用失败 (模型: {model}): {source}")]
    CallFailed {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 返回内容为空
    #[error("推理服务返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
}

/// 所有解析策略均失败
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("无法从模型输出中提取 JSON (已尝试: {}): {preview}", .tried.join(", "))]
pub struct ParseError {
    /// 依次尝试过的策略名
    pub tried: Vec<&'static str>,
    /// 原始文本预览
    pub preview: String,
}

/// 文档存储错误
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// 记录不存在
    #[error("记录不存在: {collection}/{id}")]
    NotFound {
        collection: &'static str,
        id: String,
    },
    /// 同一请求的推荐结果已存在
    #[error("请求 {request_id} 的推荐结果已存在")]
    DuplicateResult { request_id: String },
    /// 写入结果时请求已不由当前处理者持有
    #[error("请求 {request_id} 未由当前处理者认领，拒绝写入结果")]
    ClaimLost { request_id: String },
    /// 存储不可用
    #[error("存储不可用: {reason}")]
    Unavailable { reason: String },
}

/// 状态机错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// 终态不允许再次转换
    #[error("请求 {id} 已处于终态 {status}，不允许再次转换")]
    AlreadyTerminal { id: String, status: RequestStatus },
}

/// 请求校验错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// 图片数量不在 1..=3 范围
    #[error("图片数量必须在 1 到 3 之间，实际: {count}")]
    ImageCount { count: usize },
    /// 没有任何菜品
    #[error("餐食中没有任何菜品")]
    NoCourses,
    /// 用户 ID 为空
    #[error("用户 ID 不能为空")]
    EmptyUserId,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 配置文件解析失败
    #[error("配置文件解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl InferenceError {
    /// 创建推理 API 调用错误
    pub fn call_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        InferenceError::CallFailed {
            model: model.into(),
            source: Box::new(source),
        }
    }
}

impl AppError {

    /// 创建记录不存在错误
    pub fn not_found(collection: &'static str, id: impl Into<String>) -> Self {
        AppError::Persistence(PersistenceError::NotFound {
            collection,
            id: id.into(),
        })
    }

    /// 创建存储不可用错误
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        AppError::Persistence(PersistenceError::Unavailable {
            reason: reason.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
