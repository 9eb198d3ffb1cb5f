//! 单次运行处理器 - 编排层
//!
//! ## 职责
//!
//! 为一篇手稿创建运行上下文，交给 [`PolishFlow`] 执行，并输出单次运行的统计。

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::models::RunInput;
use crate::utils::logging::{log_run_start, truncate_text};
use crate::workflow::{PolishFlow, RunCtx, RunOutcome, Stage};

/// 处理单篇手稿
///
/// # 参数
/// - `flow`: 润色流程（可在多次运行间复用）
/// - `input`: 手稿和文献
/// - `run_index`: 运行序号（用于日志）
/// - `cancel`: 取消信号
pub async fn process_run(
    flow: &PolishFlow,
    input: &RunInput,
    run_index: usize,
    cancel: &CancellationToken,
) -> RunOutcome {
    let ctx = RunCtx::new(&input.manuscript.title, run_index);
    log_run_start(&ctx.to_string(), &input.manuscript.title);
    info!(
        "{} 📝 手稿 {} 字，参考文献 {} 篇{}",
        ctx,
        input.manuscript.content.chars().count(),
        input.literature.len(),
        if input.preprocess { "（已预处理元数据）" } else { "" }
    );

    let outcome = flow.run(&ctx, input, cancel).await;
    log_run_stats(&ctx, &outcome);
    outcome
}

// ========== 日志辅助函数 ==========

fn log_run_stats(ctx: &RunCtx, outcome: &RunOutcome) {
    info!("{} 📊 阶段序列: {:?}", ctx, outcome.stage_sequence());
    info!(
        "{} 📊 润色 {} 次 / 审稿 {} 次，token 共 {}",
        ctx,
        outcome.count_stage(Stage::Polishing),
        outcome.count_stage(Stage::Reviewing),
        outcome.metadata.total_tokens
    );
    if let Some(text) = outcome.polished_text() {
        info!("{} 📄 定稿预览: {}", ctx, truncate_text(text, 80));
    }
}
