//! 推荐请求与状态机

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{StatusError, ValidationError};
use crate::models::course::normalize_courses;

/// 推荐档位，决定推荐的详细程度和消耗的积分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// 简单
    Simple,
    /// 标准
    Standard,
    /// 详细
    Detailed,
}

impl Tier {
    /// 该档位消耗的积分
    pub fn credit_cost(self) -> u32 {
        match self {
            Tier::Simple => 10,
            Tier::Standard => 15,
            Tier::Detailed => 20,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Simple => "simple",
            Tier::Standard => "standard",
            Tier::Detailed => "detailed",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// 创建时的初始状态
    Pending,
    /// 终态：已生成推荐结果
    Completed,
    /// 终态：处理失败
    Error,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Completed => "completed",
            RequestStatus::Error => "error",
        })
    }
}

/// 从 pending 出发的唯一一次状态转换
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTransition {
    Complete { recommendation_id: String },
    Fail { message: String },
}

/// 客户端提交的新请求
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecommendationRequest {
    pub user_id: String,
    /// 原始餐食描述（数组或对象形态）
    pub meal: JsonValue,
    pub image_references: Vec<String>,
    pub tier: Tier,
    pub credits_charged: u32,
}

impl NewRecommendationRequest {
    /// 按档位计费创建新请求
    pub fn new(
        user_id: impl Into<String>,
        meal: JsonValue,
        image_references: Vec<String>,
        tier: Tier,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            meal,
            image_references,
            tier,
            credits_charged: tier.credit_cost(),
        }
    }

    /// 客户端在创建请求前做的校验，流水线本身不再重复校验
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::EmptyUserId);
        }
        let count = self.image_references.len();
        if !(1..=3).contains(&count) {
            return Err(ValidationError::ImageCount { count });
        }
        if normalize_courses(&self.meal).is_empty() {
            return Err(ValidationError::NoCourses);
        }
        Ok(())
    }
}

/// 持久化的推荐请求（`recommendationRequests/{id}`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub id: String,
    pub user_id: String,
    /// 原始餐食描述
    #[serde(rename = "courses")]
    pub meal: JsonValue,
    pub image_references: Vec<String>,
    pub tier: Tier,
    pub credits_charged: u32,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// 幂等键：首个认领该请求的处理者写入
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl RecommendationRequest {
    /// 由新请求生成 pending 记录
    pub fn create(id: impl Into<String>, new: NewRecommendationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            user_id: new.user_id,
            meal: new.meal,
            image_references: new.image_references,
            tier: new.tier,
            credits_charged: new.credits_charged,
            status: RequestStatus::Pending,
            recommendation_id: None,
            error_message: None,
            created_at: now,
            completed_at: None,
            claim_token: None,
            claimed_at: None,
        }
    }

    /// 认领请求；已被认领或已处于终态时返回 false
    pub fn claim(&mut self, token: &str, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || self.claim_token.is_some() {
            return false;
        }
        self.claim_token = Some(token.to_string());
        self.claimed_at = Some(now);
        true
    }

    /// 仍处于 pending 且由 `token` 认领
    pub fn is_held_by(&self, token: &str) -> bool {
        !self.status.is_terminal() && self.claim_token.as_deref() == Some(token)
    }

    /// 最近一次有处理者接手的时间：认领时间，未认领时为创建时间
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.claimed_at.unwrap_or(self.created_at)
    }

    /// 应用一次状态转换，终态记录保持不变并返回错误
    pub fn apply(
        &mut self,
        transition: StatusTransition,
        now: DateTime<Utc>,
    ) -> Result<(), StatusError> {
        if self.status.is_terminal() {
            return Err(StatusError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status,
            });
        }

        match transition {
            StatusTransition::Complete { recommendation_id } => {
                self.status = RequestStatus::Completed;
                self.recommendation_id = Some(recommendation_id);
            }
            StatusTransition::Fail { message } => {
                self.status = RequestStatus::Error;
                self.error_message = Some(message);
            }
        }
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_new() -> NewRecommendationRequest {
        NewRecommendationRequest::new(
            "user-1",
            json!([{"title": "Steak"}]),
            vec!["https://img/1.jpg".to_string()],
            Tier::Standard,
        )
    }

    #[test]
    fn test_credits_follow_tier() {
        assert_eq!(sample_new().credits_charged, 15);
        assert_eq!(Tier::Simple.credit_cost(), 10);
        assert_eq!(Tier::Detailed.credit_cost(), 20);
    }

    #[test]
    fn test_validate() {
        assert!(sample_new().validate().is_ok());

        let mut no_images = sample_new();
        no_images.image_references.clear();
        assert_eq!(
            no_images.validate(),
            Err(ValidationError::ImageCount { count: 0 })
        );

        let mut too_many = sample_new();
        too_many.image_references = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert_eq!(
            too_many.validate(),
            Err(ValidationError::ImageCount { count: 4 })
        );

        let mut no_courses = sample_new();
        no_courses.meal = json!({"userId": "user-1", "images": []});
        assert_eq!(no_courses.validate(), Err(ValidationError::NoCourses));

        let mut anonymous = sample_new();
        anonymous.user_id = " ".to_string();
        assert_eq!(anonymous.validate(), Err(ValidationError::EmptyUserId));
    }

    #[test]
    fn test_transitions_are_single_shot() {
        let now = Utc::now();
        let mut req = RecommendationRequest::create("r1", sample_new(), now);
        assert_eq!(req.status, RequestStatus::Pending);

        req.apply(
            StatusTransition::Complete {
                recommendation_id: "rec-1".to_string(),
            },
            now,
        )
        .unwrap();
        assert_eq!(req.status, RequestStatus::Completed);
        assert_eq!(req.recommendation_id.as_deref(), Some("rec-1"));
        assert_eq!(req.completed_at, Some(now));

        let snapshot = req.clone();
        let err = req
            .apply(
                StatusTransition::Fail {
                    message: "late failure".to_string(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            StatusError::AlreadyTerminal {
                id: "r1".to_string(),
                status: RequestStatus::Completed
            }
        );
        assert_eq!(req, snapshot);
    }

    #[test]
    fn test_claim_once() {
        let created = Utc::now();
        let mut req = RecommendationRequest::create("r1", sample_new(), created);
        assert_eq!(req.last_activity(), created);

        let claimed = created + chrono::Duration::seconds(200);
        assert!(req.claim("t1", claimed));
        assert!(!req.claim("t2", Utc::now()));
        assert_eq!(req.claim_token.as_deref(), Some("t1"));
        assert_eq!(req.last_activity(), claimed);
        assert!(req.is_held_by("t1"));
        assert!(!req.is_held_by("t2"));

        req.apply(
            StatusTransition::Fail {
                message: "expired".to_string(),
            },
            Utc::now(),
        )
        .unwrap();
        assert!(!req.is_held_by("t1"));
    }

    #[test]
    fn test_persisted_field_names() {
        let req = RecommendationRequest::create("r1", sample_new(), Utc::now());
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["tier"], "standard");
        assert_eq!(value["creditsCharged"], 15);
        assert_eq!(value["userId"], "user-1");
        assert!(value["courses"].is_array());
        assert!(value["imageReferences"].is_array());
        assert!(value.get("recommendationId").is_none());
    }
}
