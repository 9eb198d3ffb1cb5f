pub mod polish_flow;
pub mod run_ctx;
pub mod run_result;
pub mod run_state;
pub mod stage_executor;

pub use polish_flow::PolishFlow;
pub use run_ctx::RunCtx;
pub use run_result::{ResultBag, RunMetadata, RunOutcome, RunStatus, StageFailure, StageResult};
pub use run_state::{LoopPolicy, RunState, Stage, StageOutcome};
pub use stage_executor::{LlmStageExecutor, StageExecutor};
