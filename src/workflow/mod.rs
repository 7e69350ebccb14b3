pub mod recommendation_flow;
pub mod request_ctx;
pub mod status_tracker;

pub use recommendation_flow::{FlowOutcome, RecommendationFlow};
pub use request_ctx::RequestCtx;
pub use status_tracker::StatusTracker;
