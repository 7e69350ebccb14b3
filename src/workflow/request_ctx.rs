//! 请求处理上下文
//!
//! 封装"我正在处理哪个请求"这一信息，用于日志前缀

use std::fmt::Display;

use crate::models::{RecommendationRequest, Tier};

/// 请求处理上下文
#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub request_id: String,
    pub user_id: String,
    pub tier: Tier,
    pub image_count: usize,
}

impl RequestCtx {
    pub fn new(request: &RecommendationRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            user_id: request.user_id.clone(),
            tier: request.tier,
            image_count: request.image_references.len(),
        }
    }
}

impl Display for RequestCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[请求 {}]", self.request_id)
    }
}
