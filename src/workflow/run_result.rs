//! 运行结果
//!
//! 结果袋只追加不删除：润色稿和审稿结论按顺序累积，失败时已完成的部分照样返回。

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::models::{AnalysisReport, PolishDraft, ReviewVerdict, Suggestion};
use crate::services::CallStats;
use crate::workflow::run_state::Stage;

/// 阶段失败的详情
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// 单个阶段的执行记录
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    /// 同一阶段第几次执行（从 1 开始）
    pub attempt: u32,
    pub success: bool,
    pub error: Option<StageFailure>,
    pub stats: CallStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 运行中累积的结果
///
/// 字段只能通过 `set_analysis` / `push_*` / `finalize` 写入，外部只读。
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultBag {
    analysis: Option<AnalysisReport>,
    drafts: Vec<PolishDraft>,
    verdicts: Vec<ReviewVerdict>,
    final_text: Option<String>,
}

impl ResultBag {
    pub fn analysis(&self) -> Option<&AnalysisReport> {
        self.analysis.as_ref()
    }

    /// 按润色顺序排列的所有润色稿
    pub fn drafts(&self) -> &[PolishDraft] {
        &self.drafts
    }

    /// 按审稿顺序排列的所有审稿结论
    pub fn verdicts(&self) -> &[ReviewVerdict] {
        &self.verdicts
    }

    pub fn final_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }

    /// 记录分析报告，已有报告时不覆盖
    pub fn set_analysis(&mut self, report: AnalysisReport) {
        if self.analysis.is_none() {
            self.analysis = Some(report);
        }
    }

    pub fn push_draft(&mut self, draft: PolishDraft) {
        self.drafts.push(draft);
    }

    pub fn push_verdict(&mut self, verdict: ReviewVerdict) {
        self.verdicts.push(verdict);
    }

    pub fn latest_draft(&self) -> Option<&PolishDraft> {
        self.drafts.last()
    }

    pub fn latest_verdict(&self) -> Option<&ReviewVerdict> {
        self.verdicts.last()
    }

    /// 最终采用的修改建议（最后一版润色稿的建议）
    pub fn final_suggestions(&self) -> &[Suggestion] {
        self.drafts
            .last()
            .map(|d| d.suggestions.as_slice())
            .unwrap_or_default()
    }

    /// 以最后一版润色稿定稿，已定稿时不覆盖
    pub fn finalize(&mut self) -> Option<&str> {
        if self.final_text.is_none() {
            self.final_text = self.drafts.last().map(|d| d.polished_text.clone());
        }
        self.final_text.as_deref()
    }
}

/// 运行的最终状态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed {
        stage: Stage,
        kind: ErrorKind,
        reason: String,
    },
    /// 在进入某个阶段之前被取消
    Cancelled { before: Stage },
}

/// 运行元数据
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub manuscript_title: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub llm_calls: u32,
    pub cache_hits: u32,
    pub retries: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub polish_attempts: u32,
    pub review_scores: Vec<f64>,
    pub stage_sequence: Vec<Stage>,
}

impl RunMetadata {
    pub fn new(run_id: Uuid, manuscript_title: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            run_id,
            manuscript_title: manuscript_title.into(),
            model: model.into(),
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: 0.0,
            llm_calls: 0,
            cache_hits: 0,
            retries: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            polish_attempts: 0,
            review_scores: Vec::new(),
            stage_sequence: Vec::new(),
        }
    }

    /// 累加一个阶段的记录
    pub fn record_stage(&mut self, result: &StageResult) {
        self.stage_sequence.push(result.stage);
        self.llm_calls += result.stats.llm_calls;
        self.cache_hits += result.stats.cache_hits;
        self.retries += result.stats.retries;
        self.prompt_tokens += result.stats.token_usage.prompt_tokens;
        self.completion_tokens += result.stats.token_usage.completion_tokens;
        self.total_tokens += result.stats.token_usage.total_tokens;
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration_secs = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.finished_at = Some(now);
    }
}

/// 一次运行的完整结果
///
/// 无论成功与否都会返回；失败时结果袋中保留已完成阶段的产出。
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    pub bag: ResultBag,
    pub metadata: RunMetadata,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, RunStatus::Cancelled { .. })
    }

    pub fn stage_sequence(&self) -> Vec<Stage> {
        self.stages.iter().map(|s| s.stage).collect()
    }

    /// 指定阶段执行的次数
    pub fn count_stage(&self, stage: Stage) -> usize {
        self.stages.iter().filter(|s| s.stage == stage).count()
    }

    pub fn polished_text(&self) -> Option<&str> {
        self.bag.final_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(attempt: u32, text: &str) -> PolishDraft {
        PolishDraft {
            attempt,
            polished_text: text.to_string(),
            suggestions: vec![Suggestion {
                original: "原".to_string(),
                revised: format!("改{}", attempt),
                reason: String::new(),
            }],
        }
    }

    fn verdict(score: f64) -> ReviewVerdict {
        ReviewVerdict {
            attempt: 1,
            score,
            feedback: String::new(),
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_bag_keeps_first_analysis_and_appends_drafts() {
        let mut bag = ResultBag::default();
        bag.set_analysis(AnalysisReport {
            literature_count: 1,
            ..Default::default()
        });
        bag.set_analysis(AnalysisReport {
            literature_count: 9,
            ..Default::default()
        });
        bag.push_draft(draft(1, "第一版"));
        bag.push_draft(draft(2, "第二版"));

        assert_eq!(bag.analysis().unwrap().literature_count, 1);
        assert_eq!(bag.drafts().len(), 2);
        assert_eq!(bag.final_suggestions()[0].revised, "改2");
        assert_eq!(bag.finalize(), Some("第二版"));

        bag.push_draft(draft(3, "第三版"));
        assert_eq!(bag.finalize(), Some("第二版"));
    }

    #[test]
    fn test_accessors_follow_appends() {
        let mut bag = ResultBag::default();
        assert!(bag.analysis().is_none());
        assert!(bag.final_text().is_none());

        bag.push_draft(draft(1, "第一版"));
        bag.push_verdict(verdict(0.6));
        bag.push_verdict(verdict(0.8));

        assert_eq!(bag.drafts()[0].polished_text, "第一版");
        let scores: Vec<f64> = bag.verdicts().iter().map(|v| v.score).collect();
        assert_eq!(scores, vec![0.6, 0.8]);
        assert_eq!(bag.latest_verdict().map(|v| v.score), Some(0.8));

        bag.finalize();
        assert_eq!(bag.final_text(), Some("第一版"));

        // 序列化字段名保持不变
        let json = serde_json::to_value(&bag).unwrap();
        assert_eq!(json["final_text"], "第一版");
        assert_eq!(json["verdicts"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let status = RunStatus::Failed {
            stage: Stage::Reviewing,
            kind: ErrorKind::Validation,
            reason: "no score".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "reviewing");
        assert_eq!(json["kind"], "validation");
    }
}
