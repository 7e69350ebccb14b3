use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::course::Course;
use crate::models::request::Tier;
use crate::models::wine::WineMatch;

/// 推荐合成的输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub wines: Vec<WineMatch>,
    pub overall_explanation: String,
}

/// 待写入的推荐结果，ID 和时间由存储分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecommendationResult {
    pub request_id: String,
    pub user_id: String,
    pub courses: Vec<Course>,
    pub recommendation: Recommendation,
    pub tier: Tier,
}

/// 持久化的推荐结果（`recommendations/{id}`），写入后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResult {
    pub id: String,
    pub request_id: String,
    pub user_id: String,
    pub courses: Vec<Course>,
    pub wines: Vec<WineMatch>,
    pub overall_explanation: String,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
}

impl RecommendationResult {
    pub fn create(id: impl Into<String>, new: NewRecommendationResult, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            request_id: new.request_id,
            user_id: new.user_id,
            courses: new.courses,
            wines: new.recommendation.wines,
            overall_explanation: new.recommendation.overall_explanation,
            tier: new.tier,
            created_at: now,
        }
    }
}
