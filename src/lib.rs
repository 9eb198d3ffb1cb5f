//! # Manuscript Polish
//!
//! 结合参考文献，用 LLM 对学术手稿进行"分析 → 润色 → 审稿"的迭代润色
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源，只暴露能力
//! - `CompletionBackend` - LLM 补全后端（OpenAI 兼容接口），负责错误归类
//! - `ResponseCache` - 按请求指纹缓存响应，LRU + TTL，并发相同请求只调用一次
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单篇手稿
//! - `LlmService` - 缓存 + 指数退避重试
//! - `LiteratureService` - 关键词、文献排序、元数据、相关段落
//! - `MetadataStore` - 文献元数据缓存，支持运行前批量预处理
//! - `PolishService` / `ReviewService` - 润色和审稿
//! - `OutputWriter` - 写润色稿、报告和元数据
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一篇手稿"的完整处理流程
//! - `RunState` - 纯状态转移函数
//! - `PolishFlow` - 状态机驱动（分析 → 润色 → 审稿 →（重新润色）→ 汇总）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 组装各层，控制批量并发
//! - `orchestrator/run_processor` - 单次运行处理器

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, ErrorKind, LlmError, StageError};
pub use models::{Manuscript, RunInput};
pub use orchestrator::{BatchReport, Orchestrator};
pub use workflow::{RunOutcome, RunStatus, Stage};
