pub mod recommendation_synthesizer;
pub mod response_parser;
pub mod wine_detector;

pub use recommendation_synthesizer::RecommendationSynthesizer;
pub use response_parser::{ParseStrategy, ResponseParser};
pub use wine_detector::WineDetector;
