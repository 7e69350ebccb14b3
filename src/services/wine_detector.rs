//! 酒瓶识别服务 - 业务能力层
//!
//! 只负责"图片 → 酒的列表"，不关心菜品和档位

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::clients::InferenceService;
use crate::error::AppResult;
use crate::models::DetectedWine;
use crate::services::ResponseParser;
use crate::utils::logging::truncate_text;

/// 发给视觉模型的固定指令
pub const DETECTION_INSTRUCTION: &str = "This is an image of wine bottles. Please identify all wine bottles visible in this image. For each wine, provide the following details if visible: name, producer, year, region, grape varietals, type (red, white, rosé, sparkling). Return the information in JSON format with an array of wine objects. Each wine object should have fields: name, producer, year, type, region, grape.";

/// 酒瓶识别服务
///
/// 职责：
/// - 每张图片独立调用一次视觉模型
/// - 解析失败时用文本规则兜底，不向上抛出
/// - 结果按图片顺序、再按单次响应内顺序拼接，不去重
pub struct WineDetector {
    vision: Arc<dyn InferenceService>,
    parser: ResponseParser,
    max_concurrent_images: usize,
}

impl WineDetector {
    pub fn new(vision: Arc<dyn InferenceService>, max_concurrent_images: usize) -> Self {
        Self {
            vision,
            parser: ResponseParser::new(),
            max_concurrent_images: max_concurrent_images.max(1),
        }
    }

    /// 识别所有图片中的酒
    ///
    /// 视觉服务调用失败会中止整个识别；某张图片识别不出任何酒则贡献空列表。
    pub async fn detect(&self, image_references: &[String]) -> AppResult<Vec<DetectedWine>> {
        debug!(
            "开始识别 {} 张图片，并发数: {}",
            image_references.len(),
            self.max_concurrent_images
        );

        // buffered 保证输出顺序与输入顺序一致
        let per_image: Vec<Vec<DetectedWine>> =
            stream::iter(image_references.iter().cloned().enumerate())
                .map(|(index, url)| async move { self.detect_one(index, &url).await })
                .buffered(self.max_concurrent_images)
                .try_collect()
                .await?;

        let wines: Vec<DetectedWine> = per_image.into_iter().flatten().collect();
        info!("✓ 共识别出 {} 瓶酒", wines.len());
        Ok(wines)
    }

    async fn detect_one(&self, index: usize, image_url: &str) -> AppResult<Vec<DetectedWine>> {
        let response = self
            .vision
            .complete(None, DETECTION_INSTRUCTION, Some(image_url))
            .await?;

        let wines = self.wines_from_response(&response);
        debug!("图片 {} 识别出 {} 瓶酒", index + 1, wines.len());
        Ok(wines)
    }

    /// 从一次视觉响应中提取酒的列表
    pub fn wines_from_response(&self, response: &str) -> Vec<DetectedWine> {
        match self.parser.extract(response) {
            Ok(value) => wines_from_json(&value),
            Err(e) => {
                warn!("⚠️ 视觉响应无法解析为 JSON，使用文本规则兜底: {}", e);
                extract_names_from_text(response)
            }
        }
    }
}

/// 从解析后的 JSON 中读取酒
///
/// 支持 `{"wines": [...]}`、直接数组，以及带 `name` 的单个对象。
fn wines_from_json(value: &JsonValue) -> Vec<DetectedWine> {
    let items: &[JsonValue] = match value {
        JsonValue::Array(items) => items.as_slice(),
        JsonValue::Object(obj) => match obj.get("wines") {
            Some(JsonValue::Array(items)) => items.as_slice(),
            _ if obj.contains_key("name") => std::slice::from_ref(value),
            _ => {
                debug!("JSON 中没有 wines 数组: {}", truncate_text(&value.to_string(), 80));
                &[]
            }
        },
        _ => &[],
    };

    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::Object(obj) => Some(DetectedWine::from_json(obj)),
            JsonValue::String(name) if !name.trim().is_empty() => {
                Some(DetectedWine::named(name.trim()))
            }
            _ => None,
        })
        .collect()
}

/// 文本兜底：逐行查找 `name: xxx`，只生成带名称的记录
pub fn extract_names_from_text(text: &str) -> Vec<DetectedWine> {
    let re = match Regex::new(r"(?i)name:\s*([^\n,]+)") {
        Ok(re) => re,
        Err(e) => {
            warn!("名称匹配规则编译失败: {}", e);
            return Vec::new();
        }
    };

    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty())
        .map(DetectedWine::named)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// 按图片地址返回固定文本的视觉服务
    struct ScriptedVision {
        responses: HashMap<String, String>,
        delays: HashMap<String, u64>,
    }

    #[async_trait]
    impl InferenceService for ScriptedVision {
        fn model_name(&self) -> &str {
            "scripted-vision"
        }

        async fn complete(
            &self,
            _system_message: Option<&str>,
            _user_message: &str,
            image_url: Option<&str>,
        ) -> Result<String, InferenceError> {
            let url = image_url.unwrap_or_default();
            if let Some(ms) = self.delays.get(url) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| InferenceError::EmptyContent {
                    model: self.model_name().to_string(),
                })
        }
    }

    fn detector(responses: &[(&str, &str)], delays: &[(&str, u64)], limit: usize) -> WineDetector {
        let vision = ScriptedVision {
            responses: responses
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            delays: delays.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        WineDetector::new(Arc::new(vision), limit)
    }

    fn names(wines: &[DetectedWine]) -> Vec<&str> {
        wines.iter().filter_map(|w| w.name.as_deref()).collect()
    }

    #[test]
    fn test_response_shapes() {
        let d = detector(&[], &[], 1);

        let wrapped = d.wines_from_response(
            "```json\n{\"wines\": [{\"name\": \"A\", \"year\": 2019}, {\"name\": \"B\"}]}\n```",
        );
        assert_eq!(names(&wrapped), vec!["A", "B"]);
        assert_eq!(wrapped[0].vintage.as_deref(), Some("2019"));

        let bare = d.wines_from_response("[{\"name\": \"C\"}, {\"name\": \"D\"}]");
        assert_eq!(names(&bare), vec!["C", "D"]);

        let single = d.wines_from_response("I found: {\"name\": \"E\", \"type\": \"white\"}");
        assert_eq!(names(&single), vec!["E"]);

        let no_wines = d.wines_from_response("{\"bottles\": 0}");
        assert!(no_wines.is_empty());
    }

    #[test]
    fn test_text_fallback() {
        let d = detector(&[], &[], 1);
        let wines = d.wines_from_response(
            "I can see:\n1. Name: Château Margaux, 2015\n2. name:Sancerre\nNo other bottles.",
        );
        assert_eq!(names(&wines), vec!["Château Margaux", "Sancerre"]);
        assert!(wines.iter().all(|w| w.producer.is_none() && w.vintage.is_none()));

        assert!(d.wines_from_response("Just two red bottles.").is_empty());
    }

    #[tokio::test]
    async fn test_detect_keeps_image_order_and_duplicates() {
        let d = detector(
            &[
                ("img1", "[{\"name\": \"A\"}, {\"name\": \"B\"}]"),
                ("img2", "{\"wines\": [{\"name\": \"A\"}]}"),
                ("img3", "```json\n[{\"name\": \"C\"}]\n```"),
            ],
            &[("img1", 40), ("img2", 20)],
            3,
        );
        let wines = d
            .detect(&["img1".to_string(), "img2".to_string(), "img3".to_string()])
            .await
            .unwrap();
        assert_eq!(names(&wines), vec!["A", "B", "A", "C"]);
    }

    #[tokio::test]
    async fn test_detect_empty_inputs() {
        let d = detector(&[("img1", "no wine here")], &[], 1);
        assert!(d.detect(&[]).await.unwrap().is_empty());
        assert!(d.detect(&["img1".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detect_propagates_call_failure() {
        let d = detector(&[("img1", "[{\"name\": \"A\"}]")], &[], 1);
        let err = d
            .detect(&["img1".to_string(), "missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Inference(_)));
    }
}
