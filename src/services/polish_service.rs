//! 润色服务 - 业务能力层
//!
//! 只负责"根据文献润色手稿"能力，不关心审稿和重试次数

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::StageError;
use crate::models::{AnalysisReport, Manuscript, PolishDraft, ReviewVerdict, Suggestion};
use crate::services::llm_service::{CallStats, LlmService};
use crate::utils::text_utils::extract_json_object;
use crate::utils::truncate_text;

const POLISH_SYSTEM_MESSAGE: &str = "你是一名资深的学术编辑，擅长结合参考文献润色中文学术论文。\
                                     你需要保持作者原意，只返回 JSON。";

/// 参考文献摘要中摘要的最大字符数
const ABSTRACT_PREVIEW_CHARS: usize = 200;
/// 放进提示词的段落数量
const PROMPT_PASSAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct PolishReply {
    #[serde(default)]
    polished_text: String,
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

/// 润色服务
///
/// 职责：
/// - 组装润色提示词（手稿、参考文献、召回段落、审稿意见）
/// - 解析 LLM 返回的润色稿和修改建议
pub struct PolishService {
    llm: Arc<LlmService>,
    max_references: usize,
    manuscript_preview_limit: usize,
}

impl PolishService {
    pub fn new(config: &Config, llm: Arc<LlmService>) -> Self {
        Self {
            llm,
            max_references: config.max_references,
            manuscript_preview_limit: config.manuscript_preview_limit,
        }
    }

    /// 润色一次手稿
    ///
    /// # 参数
    /// - `manuscript`: 原始手稿
    /// - `report`: 文献分析报告
    /// - `previous`: 上一轮的润色稿和审稿意见（首次润色为 `None`）
    /// - `attempt`: 第几次润色（从 1 开始）
    pub async fn polish(
        &self,
        manuscript: &Manuscript,
        report: &AnalysisReport,
        previous: Option<(&PolishDraft, &ReviewVerdict)>,
        attempt: u32,
        stats: &mut CallStats,
    ) -> Result<PolishDraft, StageError> {
        let prompt = self.build_prompt(manuscript, report, previous);
        debug!("第 {} 次润色，提示词长度: {} 字符", attempt, prompt.chars().count());

        let response = self
            .llm
            .send_to_llm(&prompt, Some(POLISH_SYSTEM_MESSAGE), stats)
            .await?;

        let draft = parse_polish_response(&response, attempt);
        if draft.polished_text.trim().is_empty() {
            return Err(StageError::validation("润色结果为空"));
        }
        Ok(draft)
    }

    fn build_prompt(
        &self,
        manuscript: &Manuscript,
        report: &AnalysisReport,
        previous: Option<(&PolishDraft, &ReviewVerdict)>,
    ) -> String {
        let references = format_references(report, self.max_references);
        let passages = format_passages(report);

        let mut prompt = format!(
            r#"请根据提供的参考文献，优化以下学术手稿。要求：

1. 保持原文的核心观点和结构
2. 根据参考文献补充相关的理论支撑和实证证据
3. 在适当位置添加引用（格式：[作者, 年份]）
4. 改进表达的学术性和准确性
5. 确保逻辑清晰，论证充分
6. 保持中文表达的流畅性

原始手稿（{}）：
{}

参考文献：
{}

相关文献段落：
{}
"#,
            manuscript.title,
            truncate_text(&manuscript.content, self.manuscript_preview_limit),
            references,
            passages
        );

        if let Some((draft, verdict)) = previous {
            prompt.push_str(&format!(
                r#"
上一版润色稿（第 {} 次，审稿评分 {:.2}）：
{}

审稿意见：
{}
{}
请针对审稿意见重新润色。
"#,
                draft.attempt,
                verdict.score,
                truncate_text(&draft.polished_text, self.manuscript_preview_limit),
                verdict.feedback,
                verdict
                    .issues
                    .iter()
                    .map(|issue| format!("- {}", issue))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        prompt.push_str(
            r#"
以 JSON 格式返回：
{"polished_text": "润色后的完整手稿", "suggestions": [{"original": "原文片段", "revised": "修改后", "reason": "修改理由"}]}"#,
        );
        prompt
    }
}

/// 参考文献摘要：编号、标题、前两位作者、年份、摘要前 200 字
fn format_references(report: &AnalysisReport, max_references: usize) -> String {
    if report.references.is_empty() {
        return "（无）".to_string();
    }

    report
        .references
        .iter()
        .take(max_references)
        .enumerate()
        .map(|(i, reference)| {
            let title = if reference.title.is_empty() {
                "Unknown Title"
            } else {
                reference.title.as_str()
            };
            let mut summary = format!("{}. {}", i + 1, title);
            if !reference.authors.is_empty() {
                summary.push_str(&format!(
                    " - {}",
                    reference
                        .authors
                        .iter()
                        .take(2)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
            if !reference.year.is_empty() {
                summary.push_str(&format!(" ({})", reference.year));
            }
            if !reference.abstract_text.is_empty() {
                summary.push_str(&format!(
                    "\n   摘要: {}",
                    truncate_text(&reference.abstract_text, ABSTRACT_PREVIEW_CHARS)
                ));
            }
            summary
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_passages(report: &AnalysisReport) -> String {
    if report.passages.is_empty() {
        return "（无）".to_string();
    }

    report
        .passages
        .iter()
        .take(PROMPT_PASSAGES)
        .map(|p| format!("- {}\n  来源: {}", p.text, p.citation))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 解析润色结果
///
/// 回复不是 JSON 时把整段回复当作润色稿，修改建议为空。
pub fn parse_polish_response(response: &str, attempt: u32) -> PolishDraft {
    let parsed = extract_json_object(response)
        .and_then(|json| serde_json::from_str::<PolishReply>(json).ok())
        .filter(|reply| !reply.polished_text.trim().is_empty());

    match parsed {
        Some(reply) => PolishDraft {
            attempt,
            polished_text: reply.polished_text.trim().to_string(),
            suggestions: reply.suggestions,
        },
        None => {
            warn!("润色结果不是预期的 JSON，按纯文本处理");
            PolishDraft {
                attempt,
                polished_text: response.trim().to_string(),
                suggestions: Vec::new(),
            }
        }
    }
}
