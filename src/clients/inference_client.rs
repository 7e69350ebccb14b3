//! 推理服务客户端 - 基础能力层
//!
//! 只负责"发提示词、拿回文本"，不关心返回内容是否是合法 JSON
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务，视觉和文本分别使用不同模型

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::InferenceError;

/// 外部推理服务
///
/// 输入提示词（可附带一张图片），返回模型的原始文本
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// 模型名称（用于日志和错误信息）
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        system_message: Option<&str>,
        user_message: &str,
        image_url: Option<&str>,
    ) -> Result<String, InferenceError>;
}

/// 基于 OpenAI 兼容接口的推理服务
pub struct OpenAiInference {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: Option<f32>,
    max_tokens: u32,
}

impl OpenAiInference {
    pub fn new(
        config: &Config,
        model_name: impl Into<String>,
        temperature: Option<f32>,
        max_tokens: u32,
    ) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: model_name.into(),
            temperature,
            max_tokens,
        }
    }

    /// 识别酒瓶用的视觉服务
    pub fn vision(config: &Config) -> Self {
        Self::new(config, &config.vision_model_name, None, 800)
    }

    /// 生成配餐推荐用的文本服务
    pub fn text(config: &Config) -> Self {
        Self::new(config, &config.text_model_name, Some(0.5), 1500)
    }

    fn call_failed(&self, source: impl std::error::Error + Send + Sync + 'static) -> InferenceError {
        InferenceError::call_failed(self.model_name.as_str(), source)
    }
}

#[async_trait]
impl InferenceService for OpenAiInference {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(
        &self,
        system_message: Option<&str>,
        user_message: &str,
        image_url: Option<&str>,
    ) -> Result<String, InferenceError> {
        debug!("调用推理 API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(|e| self.call_failed(e))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        // 有图片时使用 Vision 消息：文本 + 图片
        let user_msg = match image_url {
            Some(url) => {
                let content_parts = vec![
                    ChatCompletionRequestUserMessageContentPart::Text(
                        ChatCompletionRequestMessageContentPartText {
                            text: user_message.to_string(),
                        },
                    ),
                    ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImage {
                            image_url: ImageUrl {
                                url: url.to_string(),
                                detail: Some(ImageDetail::Auto),
                            },
                        },
                    ),
                ];
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(
                        content_parts,
                    ))
                    .build()
                    .map_err(|e| self.call_failed(e))?
            }
            None => ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()
                .map_err(|e| self.call_failed(e))?,
        };
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model_name)
            .messages(messages)
            .max_tokens(self.max_tokens);
        if let Some(temperature) = self.temperature {
            builder.temperature(temperature);
        }
        let request = builder.build().map_err(|e| self.call_failed(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("推理 API 调用失败 (模型: {}): {}", self.model_name, e);
            self.call_failed(e)
        })?;

        debug!("推理 API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| InferenceError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }
}
