use std::path::Path;

use serde::Deserialize;

use crate::error::{AppResult, ConfigError};

/// 推荐合成阶段遇到无法解析的模型输出时的处理策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisFailurePolicy {
    /// 兜底合成推荐结果，请求照常完成
    #[default]
    Graceful,
    /// 直接抛出解析错误，请求进入 error 状态
    Strict,
}

impl std::str::FromStr for SynthesisFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "graceful" => Ok(Self::Graceful),
            "strict" => Ok(Self::Strict),
            other => Err(format!("未知的合成失败策略: {}", other)),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    /// 识别酒瓶用的视觉模型
    pub vision_model_name: String,
    /// 生成推荐用的文本模型
    pub text_model_name: String,
    // --- 并发与时限 ---
    /// 同时处理的请求数量
    pub max_concurrent_requests: usize,
    /// 单个请求内同时识别的图片数量（1 表示顺序识别）
    pub max_concurrent_images: usize,
    /// 单个请求的处理时限（秒）
    pub request_timeout_secs: u64,
    /// pending 超过该时长（秒）即由对账任务强制收尾
    pub stale_after_secs: u64,
    pub synthesis_failure_policy: SynthesisFailurePolicy,
    // --- 输入输出 ---
    /// 请求文件（TOML）存放目录
    pub request_folder: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            vision_model_name: "gpt-4o".to_string(),
            text_model_name: "gpt-4-turbo".to_string(),
            max_concurrent_requests: 8,
            max_concurrent_images: 1,
            request_timeout_secs: 120,
            stale_after_secs: 300,
            synthesis_failure_policy: SynthesisFailurePolicy::Graceful,
            request_folder: "requests".to_string(),
            output_log_file: "output.txt".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 从环境变量加载，未设置的项使用默认值
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载，再用环境变量覆盖
    pub fn from_toml_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
                path: path.display().to_string(),
                source,
            })?;
        Ok(config.with_env_overrides())
    }

    /// `WINE_CONFIG` 指向配置文件时从文件加载，否则只读环境变量
    pub fn load() -> AppResult<Self> {
        match std::env::var("WINE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_toml_file(path.trim()),
            _ => Ok(Self::from_env()),
        }
    }

    fn with_env_overrides(self) -> Self {
        Self {
            llm_api_key: env_or("LLM_API_KEY", self.llm_api_key),
            llm_api_base_url: env_or("LLM_API_BASE_URL", self.llm_api_base_url),
            vision_model_name: env_or("VISION_MODEL_NAME", self.vision_model_name),
            text_model_name: env_or("TEXT_MODEL_NAME", self.text_model_name),
            max_concurrent_requests: env_parse_or(
                "MAX_CONCURRENT_REQUESTS",
                self.max_concurrent_requests,
            ),
            max_concurrent_images: env_parse_or("MAX_CONCURRENT_IMAGES", self.max_concurrent_images),
            request_timeout_secs: env_parse_or("REQUEST_TIMEOUT_SECS", self.request_timeout_secs),
            stale_after_secs: env_parse_or("STALE_AFTER_SECS", self.stale_after_secs),
            synthesis_failure_policy: env_parse_or(
                "SYNTHESIS_FAILURE_POLICY",
                self.synthesis_failure_policy,
            ),
            request_folder: env_or("REQUEST_FOLDER", self.request_folder),
            output_log_file: env_or("OUTPUT_LOG_FILE", self.output_log_file),
            verbose_logging: env_parse_or("VERBOSE_LOGGING", self.verbose_logging),
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
