//! 阶段执行器
//!
//! 流程层只通过 [`StageExecutor`] 调用各阶段，状态机因此可以脱离真实的 LLM 测试。

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::StageError;
use crate::models::{AnalysisReport, Manuscript, PolishDraft, ReviewVerdict, RunInput};
use crate::services::{CallStats, LiteratureService, LlmService, PolishService, ReviewService};

/// 流水线各阶段的实现
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// 文献分析
    async fn analyze(
        &self,
        input: &RunInput,
        stats: &mut CallStats,
    ) -> Result<AnalysisReport, StageError>;

    /// 润色；`previous` 为上一版润色稿及其审稿结论
    async fn polish(
        &self,
        manuscript: &Manuscript,
        report: &AnalysisReport,
        previous: Option<(&PolishDraft, &ReviewVerdict)>,
        attempt: u32,
        stats: &mut CallStats,
    ) -> Result<PolishDraft, StageError>;

    /// 审稿
    async fn review(
        &self,
        manuscript: &Manuscript,
        draft: &PolishDraft,
        stats: &mut CallStats,
    ) -> Result<ReviewVerdict, StageError>;
}

/// 基于 LLM 服务的阶段执行器
pub struct LlmStageExecutor {
    literature: LiteratureService,
    polish: PolishService,
    review: ReviewService,
}

impl LlmStageExecutor {
    /// 三个阶段共用同一个 LLM 服务（也就共用同一个缓存）
    pub fn new(config: &Config, llm: Arc<LlmService>) -> Self {
        Self {
            literature: LiteratureService::new(config, Arc::clone(&llm)),
            polish: PolishService::new(config, Arc::clone(&llm)),
            review: ReviewService::new(config, llm),
        }
    }
}

#[async_trait]
impl StageExecutor for LlmStageExecutor {
    async fn analyze(
        &self,
        input: &RunInput,
        stats: &mut CallStats,
    ) -> Result<AnalysisReport, StageError> {
        self.literature
            .analyze(&input.manuscript, &input.literature, stats)
            .await
    }

    async fn polish(
        &self,
        manuscript: &Manuscript,
        report: &AnalysisReport,
        previous: Option<(&PolishDraft, &ReviewVerdict)>,
        attempt: u32,
        stats: &mut CallStats,
    ) -> Result<PolishDraft, StageError> {
        self.polish
            .polish(manuscript, report, previous, attempt, stats)
            .await
    }

    async fn review(
        &self,
        manuscript: &Manuscript,
        draft: &PolishDraft,
        stats: &mut CallStats,
    ) -> Result<ReviewVerdict, StageError> {
        self.review.review(manuscript, draft, stats).await
    }
}
