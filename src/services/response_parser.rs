//! 模型输出解析 - 业务能力层
//!
//! 模型返回的是自由文本，不保证是合法 JSON。这里按顺序尝试多种提取策略，
//! 第一个能解析成功的策略胜出：
//! 1. 以 ```` ```json ```` 开头的代码块
//! 2. 第一个 `{` 到最后一个 `}` 之间的片段
//! 3. 整段文本

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::ParseError;
use crate::utils::logging::truncate_text;

/// 一种从文本中截取 JSON 候选片段的策略
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 截取候选片段；找不到时返回 None
    fn candidate<'a>(&self, text: &'a str) -> Option<&'a str>;
}

/// 以 ```json 开头的代码块（标记不区分大小写）
pub struct FencedJson;

impl ParseStrategy for FencedJson {
    fn name(&self) -> &'static str {
        "fenced_json"
    }

    fn candidate<'a>(&self, text: &'a str) -> Option<&'a str> {
        const OPEN: &str = "```json";
        // ASCII 小写不改变字节偏移
        let start = text.to_ascii_lowercase().find(OPEN)? + OPEN.len();
        let body = &text[start..];
        let end = body.find("```")?;
        Some(body[..end].trim())
    }
}

/// 第一个 `{` 到最后一个 `}`
pub struct BraceSpan;

impl ParseStrategy for BraceSpan {
    fn name(&self) -> &'static str {
        "brace_span"
    }

    fn candidate<'a>(&self, text: &'a str) -> Option<&'a str> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        (start < end).then(|| &text[start..=end])
    }
}

/// 整段文本原样解析
pub struct Verbatim;

impl ParseStrategy for Verbatim {
    fn name(&self) -> &'static str {
        "verbatim"
    }

    fn candidate<'a>(&self, text: &'a str) -> Option<&'a str> {
        Some(text.trim())
    }
}

/// 模型输出解析器
///
/// 职责：
/// - 按顺序执行解析策略，第一个成功者胜出
/// - 全部失败时返回 ParseError
/// - 无状态，同一段文本多次解析结果相同
pub struct ResponseParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(FencedJson),
            Box::new(BraceSpan),
            Box::new(Verbatim),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// 从文本中提取 JSON
    pub fn extract(&self, text: &str) -> Result<JsonValue, ParseError> {
        let mut tried = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            tried.push(strategy.name());
            let Some(candidate) = strategy.candidate(text) else {
                continue;
            };
            match serde_json::from_str::<JsonValue>(candidate) {
                Ok(value) => {
                    debug!("策略 {} 解析成功", strategy.name());
                    return Ok(value);
                }
                Err(e) => debug!("策略 {} 解析失败: {}", strategy.name(), e),
            }
        }

        Err(ParseError {
            tried,
            preview: truncate_text(text.trim(), 80),
        })
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_block() {
        let text = "Here you go:\n```json\n{\"wines\": [{\"name\": \"Chablis\"}]}\n```\nEnjoy {the} meal";
        assert_eq!(
            FencedJson.candidate(text),
            Some("{\"wines\": [{\"name\": \"Chablis\"}]}")
        );
        let value = ResponseParser::new().extract(text).unwrap();
        assert_eq!(value, json!({"wines": [{"name": "Chablis"}]}));
    }

    #[test]
    fn test_fenced_marker_is_case_insensitive() {
        let text = "```JSON\n[1, 2]\n```";
        assert_eq!(ResponseParser::new().extract(text).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_unterminated_fence_falls_through() {
        assert_eq!(FencedJson.candidate("```json\n{\"a\": 1}"), None);
        let value = ResponseParser::new()
            .extract("```json\n{\"a\": 1}")
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_brace_span_inside_prose() {
        let text = "Sure! {\"overallExplanation\": \"Great\"} Hope that helps.";
        assert_eq!(
            BraceSpan.candidate(text),
            Some("{\"overallExplanation\": \"Great\"}")
        );
        assert_eq!(
            ResponseParser::new().extract(text).unwrap(),
            json!({"overallExplanation": "Great"})
        );
        assert_eq!(BraceSpan.candidate("} backwards {"), None);
    }

    #[test]
    fn test_verbatim_array() {
        // 多个对象组成的数组：花括号片段不是合法 JSON，最终整段解析
        let text = "  [{\"name\": \"A\"}, {\"name\": \"B\"}]  ";
        assert_eq!(
            ResponseParser::new().extract(text).unwrap(),
            json!([{"name": "A"}, {"name": "B"}])
        );
    }

    #[test]
    fn test_all_strategies_fail() {
        let err = ResponseParser::new()
            .extract("I see two bottles of red wine on the table.")
            .unwrap_err();
        assert_eq!(err.tried, vec!["fenced_json", "brace_span", "verbatim"]);
        assert!(err.preview.starts_with("I see two bottles"));
    }

    #[test]
    fn test_extract_is_idempotent() {
        let parser = ResponseParser::new();
        for text in [
            "```json\n{\"a\": [1, 2]}\n```",
            "prefix {\"b\": true} suffix",
            "not json at all",
            "",
        ] {
            assert_eq!(parser.extract(text), parser.extract(text));
        }
    }
}
