//! 手稿润色流程 - 流程层
//!
//! 核心职责：定义"一篇手稿"的完整处理流程
//!
//! 流程顺序：
//! 1. 文献分析
//! 2. 润色 → 审稿（不通过且次数未用完时重新润色）
//! 3. 汇总定稿
//!
//! 任一阶段出错立即结束运行，已完成阶段的结果保留在结果袋中。
//! 取消只在阶段之间检查，进行中的 LLM 调用会等待完成。

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, StageError};
use crate::models::RunInput;
use crate::services::CallStats;
use crate::workflow::run_ctx::RunCtx;
use crate::workflow::run_result::{
    ResultBag, RunMetadata, RunOutcome, RunStatus, StageFailure, StageResult,
};
use crate::workflow::run_state::{LoopPolicy, RunState, Stage, StageOutcome};
use crate::workflow::stage_executor::StageExecutor;

/// 手稿润色流程
///
/// - 驱动状态机，决定下一个阶段
/// - 把每个阶段的产出写入结果袋，记录调用统计
/// - 不持有任何资源，只依赖 [`StageExecutor`]
pub struct PolishFlow {
    executor: Arc<dyn StageExecutor>,
    policy: LoopPolicy,
    model: String,
}

impl PolishFlow {
    /// 创建新的润色流程
    pub fn new(executor: Arc<dyn StageExecutor>, policy: LoopPolicy, model: impl Into<String>) -> Self {
        Self {
            executor,
            policy,
            model: model.into(),
        }
    }

    pub fn policy(&self) -> &LoopPolicy {
        &self.policy
    }

    /// 执行一次完整的运行
    ///
    /// 永远返回 [`RunOutcome`]，错误体现在 `status` 中。
    pub async fn run(
        &self,
        ctx: &RunCtx,
        input: &RunInput,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut bag = ResultBag::default();
        let mut stages: Vec<StageResult> = Vec::new();
        let mut metadata = RunMetadata::new(ctx.run_id, &ctx.title, &self.model);
        let mut polish_attempts = 0u32;
        let mut state = RunState::Init.next(StageOutcome::Succeeded, 0, &self.policy);

        let status = loop {
            let Some(stage) = state.stage() else {
                break RunStatus::Done;
            };

            if cancel.is_cancelled() {
                warn!("{} ⏹ 运行已取消，未进入阶段: {}", ctx, stage);
                break RunStatus::Cancelled { before: stage };
            }

            let attempt = stages.iter().filter(|s| s.stage == stage).count() as u32 + 1;
            info!("{} ▶ {}（第 {} 次）", ctx, stage, attempt);

            let started_at = Utc::now();
            let mut stats = CallStats::default();

            let result: Result<StageOutcome, StageError> = match stage {
                Stage::Analyzing => self
                    .executor
                    .analyze(input, &mut stats)
                    .await
                    .map(|report| {
                        info!(
                            "{} ✓ 关键词 {} 个，引用文献 {} 篇，段落 {} 个",
                            ctx,
                            report.keywords.len(),
                            report.references.len(),
                            report.passages.len()
                        );
                        bag.set_analysis(report);
                        StageOutcome::Succeeded
                    }),

                Stage::Polishing => {
                    let polish_attempt = polish_attempts + 1;
                    let polished = match bag.analysis() {
                        Some(report) => {
                            let previous = bag.latest_draft().zip(bag.latest_verdict());
                            self.executor
                                .polish(
                                    &input.manuscript,
                                    report,
                                    previous,
                                    polish_attempt,
                                    &mut stats,
                                )
                                .await
                        }
                        None => Err(StageError::validation("缺少文献分析结果")),
                    };
                    polished.map(|draft| {
                        info!(
                            "{} ✓ 第 {} 版润色稿，修改建议 {} 条",
                            ctx,
                            polish_attempt,
                            draft.suggestions.len()
                        );
                        polish_attempts = polish_attempt;
                        metadata.polish_attempts = polish_attempt;
                        bag.push_draft(draft);
                        StageOutcome::Succeeded
                    })
                }

                Stage::Reviewing => {
                    let reviewed = match bag.latest_draft() {
                        Some(draft) => {
                            self.executor
                                .review(&input.manuscript, draft, &mut stats)
                                .await
                        }
                        None => Err(StageError::validation("缺少润色稿")),
                    };
                    reviewed.map(|verdict| {
                        let score = verdict.score;
                        let verdict_label = if verdict.is_accepted(self.policy.acceptance_threshold)
                        {
                            "通过"
                        } else {
                            "未通过"
                        };
                        info!(
                            "{} ✓ 审稿评分 {:.2}（阈值 {:.2}，{}）",
                            ctx, score, self.policy.acceptance_threshold, verdict_label
                        );
                        metadata.review_scores.push(score);
                        bag.push_verdict(verdict);
                        StageOutcome::Reviewed { score }
                    })
                }

                Stage::Finalizing => {
                    if bag.finalize().is_none() {
                        warn!("{} 没有可定稿的润色稿", ctx);
                    }
                    Ok(StageOutcome::Succeeded)
                }
            };

            let failure = result.as_ref().err().map(|e| StageFailure {
                kind: e.kind(),
                message: e.to_string(),
            });
            let stage_result = StageResult {
                stage,
                attempt,
                success: failure.is_none(),
                error: failure,
                stats,
                started_at,
                finished_at: Utc::now(),
            };
            metadata.record_stage(&stage_result);
            stages.push(stage_result);

            match result {
                Ok(outcome) => {
                    state = state.next(outcome, polish_attempts, &self.policy);
                    if state == RunState::Failed {
                        break RunStatus::Failed {
                            stage,
                            kind: ErrorKind::Validation,
                            reason: format!("{} 阶段的结果与状态不匹配", stage),
                        };
                    }
                }
                Err(e) => {
                    error!("{} ✗ {} 阶段失败: {}", ctx, stage, e);
                    break RunStatus::Failed {
                        stage,
                        kind: e.kind(),
                        reason: e.to_string(),
                    };
                }
            }
        };

        metadata.finish();
        log_run_summary(ctx, &status, &metadata);

        RunOutcome {
            run_id: ctx.run_id,
            status,
            stages,
            bag,
            metadata,
        }
    }
}

fn log_run_summary(ctx: &RunCtx, status: &RunStatus, metadata: &RunMetadata) {
    match status {
        RunStatus::Done => info!(
            "{} ✅ 运行完成: 润色 {} 次，LLM 调用 {} 次（缓存命中 {}，重试 {}），耗时 {:.1}s",
            ctx,
            metadata.polish_attempts,
            metadata.llm_calls,
            metadata.cache_hits,
            metadata.retries,
            metadata.duration_secs
        ),
        RunStatus::Failed { stage, kind, reason } => error!(
            "{} ❌ 运行失败于 {} 阶段 ({}): {}",
            ctx, stage, kind, reason
        ),
        RunStatus::Cancelled { before } => warn!("{} ⏹ 运行在 {} 阶段前取消", ctx, before),
    }
}
