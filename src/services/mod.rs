pub mod literature_service;
pub mod metadata_store;
pub mod llm_service;
pub mod output_writer;
pub mod polish_service;
pub mod review_service;

pub use literature_service::LiteratureService;
pub use metadata_store::MetadataStore;
pub use llm_service::{CallStats, Completion, LlmService, RetryPolicy};
pub use output_writer::{OutputPaths, OutputWriter};
pub use polish_service::PolishService;
pub use review_service::ReviewService;
