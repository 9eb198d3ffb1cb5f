use serde::{Deserialize, Serialize};

use crate::models::literature::{LiteratureMetadata, Passage, ScoredLiterature};

/// 文献分析报告
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisReport {
    /// 手稿检索关键词
    pub keywords: Vec<String>,
    /// 参与匹配的文献总数
    pub literature_count: usize,
    /// 按综合评分排序的相关文献
    pub ranked_literature: Vec<ScoredLiterature>,
    /// 实际引用的文献元数据
    pub references: Vec<LiteratureMetadata>,
    /// 召回的相关段落
    pub passages: Vec<Passage>,
}

/// 一条修改建议
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub revised: String,
    #[serde(default)]
    pub reason: String,
}

/// 一次润色的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolishDraft {
    /// 第几次润色（从 1 开始）
    pub attempt: u32,
    pub polished_text: String,
    pub suggestions: Vec<Suggestion>,
}

/// 审稿结论
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewVerdict {
    /// 对应的润色次数
    pub attempt: u32,
    /// 归一化到 [0, 1] 的分数
    pub score: f64,
    pub feedback: String,
    pub issues: Vec<String>,
}

impl ReviewVerdict {
    pub fn is_accepted(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}
