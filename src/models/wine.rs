use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// 从图片中识别出的一瓶酒
///
/// 所有字段都可能缺失；写入提示词时缺失字段显示为 `Unknown`。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedWine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vintage: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub wine_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grape: Option<String>,
}

impl DetectedWine {
    /// 只有名称的记录（文本兜底提取时使用）
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// 宽松地从模型输出的 JSON 对象中读取字段
    ///
    /// 年份既可能叫 `year` 也可能叫 `vintage`，数字会被转成字符串。
    pub fn from_json(obj: &Map<String, JsonValue>) -> Self {
        Self {
            name: field_str(obj, &["name"]),
            producer: field_str(obj, &["producer"]),
            vintage: field_str(obj, &["vintage", "year"]),
            wine_type: field_str(obj, &["type"]),
            region: field_str(obj, &["region"]),
            grape: field_str(obj, &["grape", "grapes"]),
        }
    }

    /// 渲染为提示词中的一段文本
    pub fn render_for_prompt(&self) -> String {
        fn or_unknown(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("Unknown")
        }
        format!(
            "Name: {}\nProducer: {}\nYear: {}\nType: {}\nRegion: {}\nGrape: {}",
            or_unknown(&self.name),
            or_unknown(&self.producer),
            or_unknown(&self.vintage),
            or_unknown(&self.wine_type),
            or_unknown(&self.region),
            or_unknown(&self.grape),
        )
    }
}

/// 带有配餐建议的酒
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WineMatch {
    #[serde(flatten)]
    pub wine: DetectedWine,
    /// 推荐搭配的菜品，结果落库后必不为空
    pub course_pairing: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// 依次查找候选键，返回第一个可用的字符串值
pub(crate) fn field_str(obj: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| obj.get(*key).and_then(json_str))
}

/// 把 JSON 标量转成非空字符串；对象、数组、null 和空白串返回 None
pub(crate) fn json_str(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_accepts_year_and_numbers() {
        let value = json!({
            "name": "Barolo Riserva",
            "producer": "  ",
            "year": 2015,
            "type": "red",
            "grape": ["Nebbiolo"]
        });
        let wine = DetectedWine::from_json(value.as_object().unwrap());

        assert_eq!(wine.name.as_deref(), Some("Barolo Riserva"));
        assert_eq!(wine.producer, None);
        assert_eq!(wine.vintage.as_deref(), Some("2015"));
        assert_eq!(wine.wine_type.as_deref(), Some("red"));
        assert_eq!(wine.grape, None);
    }

    #[test]
    fn test_render_for_prompt_uses_unknown() {
        let rendered = DetectedWine::named("Chablis").render_for_prompt();
        assert_eq!(
            rendered,
            "Name: Chablis\nProducer: Unknown\nYear: Unknown\nType: Unknown\nRegion: Unknown\nGrape: Unknown"
        );
    }

    #[test]
    fn test_wine_match_serializes_flat() {
        let m = WineMatch {
            wine: DetectedWine {
                name: Some("Rioja".to_string()),
                wine_type: Some("red".to_string()),
                ..Default::default()
            },
            course_pairing: "Lamb".to_string(),
            explanation: None,
        };
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(
            value,
            json!({"name": "Rioja", "type": "red", "coursePairing": "Lamb"})
        );
    }
}
