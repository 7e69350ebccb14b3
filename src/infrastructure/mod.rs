//! 基础设施层
//!
//! 持有持久化资源，只暴露读写和订阅能力

pub mod document_store;

pub use document_store::{DocumentStore, MemoryStore, REQUESTS_COLLECTION, RESULTS_COLLECTION};
