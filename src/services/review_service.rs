//! 审稿服务 - 业务能力层
//!
//! 只负责"给润色稿打分"能力；是否重新润色由流程层决定

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::StageError;
use crate::models::{Manuscript, PolishDraft, ReviewVerdict};
use crate::services::llm_service::{CallStats, LlmService};
use crate::utils::text_utils::extract_json_object;
use crate::utils::truncate_text;

const REVIEW_SYSTEM_MESSAGE: &str = "你是一名严格的学术审稿人，只返回 JSON。";

/// 审稿服务
pub struct ReviewService {
    llm: Arc<LlmService>,
    manuscript_preview_limit: usize,
}

impl ReviewService {
    pub fn new(config: &Config, llm: Arc<LlmService>) -> Self {
        Self {
            llm,
            manuscript_preview_limit: config.manuscript_preview_limit,
        }
    }

    /// 审阅一版润色稿
    ///
    /// 无法解析出分数时返回校验错误。
    pub async fn review(
        &self,
        manuscript: &Manuscript,
        draft: &PolishDraft,
        stats: &mut CallStats,
    ) -> Result<ReviewVerdict, StageError> {
        let prompt = format!(
            r#"请审阅以下学术手稿的润色稿，从学术规范性、逻辑性、引用是否恰当、是否保持原意四个方面给出评分。

原始手稿（节选）：
{}

润色稿（第 {} 版）：
{}

以 JSON 格式返回，score 取值 0 到 1：
{{"score": 0.85, "feedback": "总体评价", "issues": ["问题1", "问题2"]}}"#,
            truncate_text(&manuscript.content, self.manuscript_preview_limit),
            draft.attempt,
            truncate_text(&draft.polished_text, self.manuscript_preview_limit)
        );

        let response = self
            .llm
            .send_to_llm(&prompt, Some(REVIEW_SYSTEM_MESSAGE), stats)
            .await?;

        let verdict = parse_review_response(&response, draft.attempt)?;
        debug!("第 {} 版审稿评分: {:.2}", draft.attempt, verdict.score);
        Ok(verdict)
    }
}

/// 解析审稿结果
///
/// 分数可以是 0~1，也可以是 0~100（大于 1 时除以 100）；数字字符串同样接受。
pub fn parse_review_response(response: &str, attempt: u32) -> Result<ReviewVerdict, StageError> {
    let json = extract_json_object(response)
        .ok_or_else(|| StageError::validation("审稿结果中没有 JSON"))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| StageError::validation(format!("审稿结果 JSON 解析失败: {}", e)))?;

    let raw_score = match value.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| StageError::validation("审稿结果缺少有效的 score 字段"))?;

    let score = normalize_score(raw_score)?;

    let feedback = value
        .get("feedback")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let issues = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(ReviewVerdict {
        attempt,
        score,
        feedback,
        issues,
    })
}

fn normalize_score(raw: f64) -> Result<f64, StageError> {
    if !raw.is_finite() || raw < 0.0 || raw > 100.0 {
        return Err(StageError::validation(format!("审稿分数超出范围: {}", raw)));
    }
    Ok(if raw > 1.0 { raw / 100.0 } else { raw })
}
