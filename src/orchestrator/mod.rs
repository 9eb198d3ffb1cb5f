//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责组装各层并调度运行，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量运行处理器
//! - 持有共享的响应缓存
//! - 组装 LLM 服务、阶段执行器和润色流程
//! - 控制并发数量（Semaphore）
//! - 输出全局统计信息
//!
//! ### `run_processor` - 单次运行处理器
//! - 为一篇手稿创建运行上下文
//! - 执行润色流程
//! - 输出单次运行的统计信息
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<RunInput>)
//!     ↓
//! run_processor (处理单个 RunInput)
//!     ↓
//! workflow::PolishFlow (状态机：分析 → 润色 → 审稿 → 汇总)
//!     ↓
//! services (能力层：literature / polish / review / llm)
//!     ↓
//! infrastructure (基础设施：CompletionBackend / ResponseCache)
//! ```

pub mod batch_processor;
pub mod run_processor;

// 重新导出主要类型
pub use batch_processor::{BatchReport, BatchStats, Orchestrator};
pub use run_processor::process_run;
