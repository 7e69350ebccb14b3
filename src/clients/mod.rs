pub mod inference_client;
pub mod request_client;

pub use inference_client::{InferenceService, OpenAiInference};
pub use request_client::RequestClient;
