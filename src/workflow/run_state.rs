//! 运行状态机
//!
//! `Init → Analyzing → Polishing → Reviewing → {Polishing | Finalizing} → Done | Failed`
//!
//! 状态转移是纯函数，不依赖任何阶段的实现。

use serde::Serialize;

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyzing,
    Polishing,
    Reviewing,
    Finalizing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Analyzing => "文献分析",
            Stage::Polishing => "润色",
            Stage::Reviewing => "审稿",
            Stage::Finalizing => "汇总",
        };
        f.write_str(name)
    }
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Analyzing,
    Polishing,
    Reviewing,
    Finalizing,
    Done,
    Failed,
}

/// 一个阶段执行完的结果，驱动状态转移
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageOutcome {
    /// 分析 / 润色 / 汇总成功
    Succeeded,
    /// 审稿完成，附带归一化分数
    Reviewed { score: f64 },
    /// 阶段失败
    Failed,
}

/// 重新润色的策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopPolicy {
    /// 分数低于该值视为不通过
    pub acceptance_threshold: f64,
    /// 润色阶段的最大次数（含首次）
    pub max_polish_attempts: u32,
}

impl RunState {
    /// 当前状态对应的阶段，`Init` 和终止状态没有阶段
    pub fn stage(self) -> Option<Stage> {
        match self {
            RunState::Analyzing => Some(Stage::Analyzing),
            RunState::Polishing => Some(Stage::Polishing),
            RunState::Reviewing => Some(Stage::Reviewing),
            RunState::Finalizing => Some(Stage::Finalizing),
            RunState::Init | RunState::Done | RunState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// 状态转移
    ///
    /// # 参数
    /// - `outcome`: 当前阶段的结果（`Init` 忽略该参数）
    /// - `polish_attempts`: 到目前为止已完成的润色次数
    /// - `policy`: 重新润色策略
    ///
    /// 审稿不通过且润色次数少于上限时回到 `Polishing`，否则进入 `Finalizing`。
    /// 结果与当前阶段不匹配时视为失败。
    pub fn next(self, outcome: StageOutcome, polish_attempts: u32, policy: &LoopPolicy) -> RunState {
        if self.is_terminal() {
            return self;
        }
        if self == RunState::Init {
            return RunState::Analyzing;
        }

        match (self, outcome) {
            (_, StageOutcome::Failed) => RunState::Failed,
            (RunState::Analyzing, StageOutcome::Succeeded) => RunState::Polishing,
            (RunState::Polishing, StageOutcome::Succeeded) => RunState::Reviewing,
            (RunState::Reviewing, StageOutcome::Reviewed { score }) => {
                if score < policy.acceptance_threshold
                    && polish_attempts < policy.max_polish_attempts
                {
                    RunState::Polishing
                } else {
                    RunState::Finalizing
                }
            }
            (RunState::Finalizing, StageOutcome::Succeeded) => RunState::Done,
            _ => RunState::Failed,
        }
    }
}
