//! 菜品模型与餐食描述的规范化
//!
//! 客户端提交的餐食描述有两种形态：
//! - 有序数组，每个元素是一道菜
//! - 以菜品 ID 为键的对象，其中混有图片、用户、时间等记账字段，需要按键名过滤

use phf::phf_set;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::models::wine::field_str;

/// 餐食对象中不属于菜品的记账字段
static BOOKKEEPING_KEYS: phf::Set<&'static str> = phf_set! {
    "images",
    "imageReferences",
    "imageUrls",
    "userId",
    "createdAt",
    "timestamp",
    "recommendationType",
    "tier",
    "credits",
    "creditsCharged",
    "mealId",
};

/// 表示"其他口味"的选项，选中时以自定义口味代替
static OTHER_TASTE_MARKERS: phf::Set<&'static str> = phf_set! {
    "Andet",
    "Other",
};

/// 一道菜
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub title: String,
    pub description: String,
    pub dish_type: String,
    pub portion_size: String,
    pub taste: String,
    pub accompaniment: String,
}

impl Course {
    fn from_raw(raw: &Map<String, JsonValue>, default_title: &str) -> Self {
        let taste = field_str(raw, &["taste"]).unwrap_or_default();
        let taste = if OTHER_TASTE_MARKERS.contains(taste.as_str()) {
            field_str(raw, &["customTaste"]).unwrap_or(taste)
        } else {
            taste
        };

        Self {
            title: field_str(raw, &["title"]).unwrap_or_else(|| default_title.to_string()),
            description: field_str(raw, &["desc", "description"]).unwrap_or_default(),
            dish_type: field_str(raw, &["type", "dishType"]).unwrap_or_default(),
            portion_size: field_str(raw, &["portion", "portionSize"]).unwrap_or_default(),
            taste,
            accompaniment: field_str(raw, &["extra", "accompaniment"]).unwrap_or_default(),
        }
    }
}

/// 把餐食描述规范化为有序的菜品列表
///
/// 数组形态按原顺序；对象形态按插入顺序，跳过记账字段和非对象值。
pub fn normalize_courses(meal: &JsonValue) -> Vec<Course> {
    match meal {
        JsonValue::Array(items) => items
            .iter()
            .filter_map(JsonValue::as_object)
            .map(|raw| Course::from_raw(raw, "Unnamed Course"))
            .collect(),
        JsonValue::Object(map) => map
            .iter()
            .filter(|(key, _)| !BOOKKEEPING_KEYS.contains(key.as_str()))
            .filter_map(|(key, value)| value.as_object().map(|raw| Course::from_raw(raw, key)))
            .collect(),
        _ => Vec::new(),
    }
}
