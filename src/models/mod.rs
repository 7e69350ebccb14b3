pub mod course;
pub mod loaders;
pub mod request;
pub mod result;
pub mod wine;

pub use course::{normalize_courses, Course};
pub use loaders::{load_all_request_files, load_request_file, RequestFile};
pub use request::{
    NewRecommendationRequest, RecommendationRequest, RequestStatus, StatusTransition, Tier,
};
pub use result::{NewRecommendationResult, Recommendation, RecommendationResult};
pub use wine::{DetectedWine, WineMatch};
