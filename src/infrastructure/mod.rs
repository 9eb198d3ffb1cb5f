//! 基础设施层（Infrastructure）
//!
//! 持有外部资源（LLM 客户端、共享缓存），只暴露能力，不关心流程。

pub mod completion_backend;
pub mod fingerprint;
pub mod response_cache;

pub use completion_backend::{
    CompletionBackend, CompletionRequest, CompletionResponse, OpenAiBackend, TokenUsage,
};
pub use fingerprint::{CompletionParams, RequestFingerprint};
pub use response_cache::{CacheLookup, CacheSource, CacheStats, CachedResponse, ResponseCache};
