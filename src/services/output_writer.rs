//! 产物写入服务 - 业务能力层
//!
//! 只负责"把一次运行的结果写到磁盘"能力，不关心流程

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::{AnalysisReport, PolishDraft, ReviewVerdict, Suggestion};
use crate::workflow::{RunMetadata, RunOutcome, RunStatus, StageResult};

/// 一次运行写出的文件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPaths {
    /// 润色稿（运行未定稿时为 `None`）
    pub polished: Option<PathBuf>,
    pub report: PathBuf,
    pub metadata: PathBuf,
}

#[derive(Serialize)]
struct ReportFile<'a> {
    manuscript_title: &'a str,
    analysis: Option<&'a AnalysisReport>,
    suggestions: &'a [Suggestion],
    drafts: &'a [PolishDraft],
    verdicts: &'a [ReviewVerdict],
}

#[derive(Serialize)]
struct MetadataFile<'a> {
    #[serde(flatten)]
    metadata: &'a RunMetadata,
    #[serde(flatten)]
    status: &'a RunStatus,
    stages: &'a [StageResult],
}

/// 产物写入服务
///
/// 职责：
/// - 写润色稿 `polished_<标题>_<时间戳>.md`
/// - 写分析报告和修改建议 `report_<标题>_<时间戳>.json`
/// - 写运行元数据 `metadata_<标题>_<时间戳>.json`
pub struct OutputWriter {
    output_dir: PathBuf,
}

impl OutputWriter {
    /// 创建新的产物写入服务
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 写出一次运行的全部产物
    ///
    /// 失败的运行同样写报告和元数据，便于排查。
    pub async fn write(&self, title: &str, outcome: &RunOutcome) -> AppResult<OutputPaths> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| AppError::file_write_failed(self.output_dir.display().to_string(), e))?;

        let timestamp = outcome.metadata.started_at.format("%Y%m%d_%H%M%S");
        let stem = format!("{}_{}", sanitize_file_stem(title), timestamp);
        debug!("写入运行产物: {}", stem);

        let polished = match outcome.polished_text() {
            Some(text) => {
                let path = self.output_dir.join(format!("polished_{}.md", stem));
                write_file(&path, text.as_bytes()).await?;
                Some(path)
            }
            None => None,
        };

        let report = ReportFile {
            manuscript_title: title,
            analysis: outcome.bag.analysis(),
            suggestions: outcome.bag.final_suggestions(),
            drafts: outcome.bag.drafts(),
            verdicts: outcome.bag.verdicts(),
        };
        let report_path = self.output_dir.join(format!("report_{}.json", stem));
        write_file(&report_path, &serde_json::to_vec_pretty(&report)?).await?;

        let metadata = MetadataFile {
            metadata: &outcome.metadata,
            status: &outcome.status,
            stages: &outcome.stages,
        };
        let metadata_path = self.output_dir.join(format!("metadata_{}.json", stem));
        write_file(&metadata_path, &serde_json::to_vec_pretty(&metadata)?).await?;

        info!("💾 结果已保存到: {}", self.output_dir.display());

        Ok(OutputPaths {
            polished,
            report: report_path,
            metadata: metadata_path,
        })
    }
}

async fn write_file(path: &Path, content: &[u8]) -> AppResult<()> {
    fs::write(path, content)
        .await
        .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))
}

/// 把标题转成可用的文件名片段
fn sanitize_file_stem(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::workflow::{ResultBag, Stage};
    use uuid::Uuid;

    fn outcome(status: RunStatus, with_draft: bool) -> RunOutcome {
        let mut bag = ResultBag::default();
        bag.set_analysis(AnalysisReport {
            keywords: vec!["图神经网络".to_string()],
            ..Default::default()
        });
        if with_draft {
            bag.push_draft(PolishDraft {
                attempt: 1,
                polished_text: "润色后的手稿".to_string(),
                suggestions: Vec::new(),
            });
            bag.finalize();
        }
        let run_id = Uuid::new_v4();
        RunOutcome {
            run_id,
            status,
            stages: Vec::new(),
            bag,
            metadata: RunMetadata::new(run_id, "我的 论文", "qwen-plus"),
        }
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("a/b c"), "a_b_c");
        assert_eq!(sanitize_file_stem("  "), "untitled");
        assert_eq!(sanitize_file_stem("论文初稿"), "论文初稿");
    }

    #[tokio::test]
    async fn test_write_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().join("out"));

        let paths = writer
            .write("我的 论文", &outcome(RunStatus::Done, true))
            .await
            .unwrap();

        let polished = paths.polished.unwrap();
        assert!(polished
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("polished_我的_论文_"));
        assert_eq!(std::fs::read_to_string(polished).unwrap(), "润色后的手稿");

        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&paths.metadata).unwrap()).unwrap();
        assert_eq!(metadata["status"], "done");
        assert_eq!(metadata["model"], "qwen-plus");

        let report: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&paths.report).unwrap()).unwrap();
        assert_eq!(report["analysis"]["keywords"][0], "图神经网络");
    }

    #[tokio::test]
    async fn test_failed_run_writes_no_polished_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());
        let status = RunStatus::Failed {
            stage: Stage::Polishing,
            kind: ErrorKind::Fatal,
            reason: "quota".to_string(),
        };

        let paths = writer.write("稿件", &outcome(status, false)).await.unwrap();

        assert!(paths.polished.is_none());
        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&paths.metadata).unwrap()).unwrap();
        assert_eq!(metadata["status"], "failed");
        assert_eq!(metadata["stage"], "polishing");
    }
}
