//! 文献分析服务 - 业务能力层
//!
//! 只负责"分析文献"能力：生成关键词、匹配排序、提取元数据、召回段落，不关心流程

use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::StageError;
use crate::models::{
    AnalysisReport, ExtractionMethod, LiteratureDocument, LiteratureMetadata, Manuscript, Passage,
    ScoredLiterature,
};
use crate::services::llm_service::{CallStats, LlmService};
use crate::services::metadata_store::MetadataStore;
use crate::utils::text_utils::{
    expand_keywords, extract_json_object, extract_keywords, generate_citation,
    keyword_match_score, matched_keywords, split_sentences, tfidf_score,
};
use crate::utils::truncate_text;

/// 段落召回的全局上限
const MAX_PASSAGES: usize = 20;
/// 单个段落的最大字符数
const MAX_PASSAGE_CHARS: usize = 300;
/// 元数据和段落提取时送给 LLM 的最大正文字符数
const METADATA_INPUT_LIMIT: usize = 2000;
/// 段落提取提示词中的关键词数
const PASSAGE_PROMPT_KEYWORDS: usize = 10;
/// 综合评分低于该值的文献视为无关
const MIN_COMBINED_SCORE: f64 = 0.1;

const KEYWORD_SYSTEM_MESSAGE: &str = "你是一个学术文献检索助手，擅长从论文中提炼检索关键词。";
const METADATA_SYSTEM_MESSAGE: &str = "你是一个文献元数据提取助手，只返回 JSON。";
const PASSAGE_SYSTEM_MESSAGE: &str = "你是一个专业的文献分析助手，擅长从学术文献中提取相关段落。";

#[derive(Debug, Deserialize)]
struct PassageReply {
    #[serde(default)]
    passages: Vec<PassageItem>,
}

#[derive(Debug, Deserialize)]
struct PassageItem {
    #[serde(default)]
    text: String,
    #[serde(default)]
    relevance_score: Option<f64>,
    #[serde(default)]
    related_keywords: Vec<String>,
}

/// 文献分析服务
///
/// 职责：
/// - 调用 LLM 生成手稿的检索关键词
/// - 本地计算文献相关性并排序
/// - 提取被引用文献的元数据（优先读元数据缓存），召回相关段落
/// - 不关心润色和审稿
pub struct LiteratureService {
    llm: Arc<LlmService>,
    store: Option<MetadataStore>,
    max_keywords: usize,
    max_literature_count: usize,
    max_references: usize,
    passages_per_literature: usize,
    manuscript_preview_limit: usize,
}

impl LiteratureService {
    pub fn new(config: &Config, llm: Arc<LlmService>) -> Self {
        Self {
            llm,
            store: config.metadata_cache_dir.as_ref().map(MetadataStore::new),
            max_keywords: config.max_keywords,
            max_literature_count: config.max_literature_count,
            max_references: config.max_references,
            passages_per_literature: config.passages_per_literature,
            manuscript_preview_limit: config.manuscript_preview_limit,
        }
    }

    /// 完整的文献分析
    ///
    /// # 参数
    /// - `manuscript`: 待润色手稿
    /// - `literature`: 参考文献原文
    /// - `stats`: 调用统计
    ///
    /// # 返回
    /// 分析报告；手稿为空返回校验错误，LLM 调用失败原样返回
    pub async fn analyze(
        &self,
        manuscript: &Manuscript,
        literature: &[LiteratureDocument],
        stats: &mut CallStats,
    ) -> Result<AnalysisReport, StageError> {
        if manuscript.content.trim().is_empty() {
            return Err(StageError::validation("手稿内容为空"));
        }

        let keywords = self.generate_keywords(&manuscript.content, stats).await?;
        info!("生成关键词: {:?}", keywords);

        let ranked = self.rank_literature(&keywords, literature);
        info!("找到 {} 篇相关文献（共 {} 篇）", ranked.len(), literature.len());

        let mut references = Vec::new();
        let mut passages = Vec::new();
        for scored in ranked.iter().take(self.max_references) {
            let Some(doc) = literature.iter().find(|d| d.source == scored.source) else {
                continue;
            };

            let metadata = self.resolve_metadata(doc, stats).await?;
            passages.extend(
                self.extract_passages_with_llm(
                    doc,
                    &keywords,
                    &metadata,
                    scored.combined_score,
                    stats,
                )
                .await?,
            );
            references.push(metadata);
        }

        passages.sort_by(|a, b| passage_rank(b).total_cmp(&passage_rank(a)));
        passages.truncate(MAX_PASSAGES);
        debug!("召回 {} 个相关段落", passages.len());

        Ok(AnalysisReport {
            keywords,
            literature_count: literature.len(),
            ranked_literature: ranked,
            references,
            passages,
        })
    }

    /// 生成检索关键词
    ///
    /// LLM 回复中解析不出关键词时退回本地词频统计。
    pub async fn generate_keywords(
        &self,
        text: &str,
        stats: &mut CallStats,
    ) -> Result<Vec<String>, StageError> {
        let preview = truncate_text(text, self.manuscript_preview_limit);
        let prompt = format!(
            r#"请从以下文本中提取{}个最重要的关键词，用于文献检索。
要求：
1. 关键词应该是学术术语或专业概念
2. 优先选择名词和名词短语
3. 避免过于通用的词汇
4. 每个关键词用逗号分隔
5. 只返回关键词，不要其他解释

文本内容：
{}

关键词："#,
            self.max_keywords, preview
        );

        let response = self
            .llm
            .send_to_llm(&prompt, Some(KEYWORD_SYSTEM_MESSAGE), stats)
            .await?;

        let keywords = parse_keywords(&response, self.max_keywords);
        if keywords.is_empty() {
            warn!("无法从 LLM 响应中解析关键词，使用词频统计");
            return Ok(extract_keywords(text, self.max_keywords));
        }
        Ok(keywords)
    }

    /// 按关键词对文献排序
    ///
    /// 综合评分 = 0.6 × 关键词命中率 + 0.4 × TF-IDF，只保留综合评分大于 0.1 的文献。
    pub fn rank_literature(
        &self,
        keywords: &[String],
        literature: &[LiteratureDocument],
    ) -> Vec<ScoredLiterature> {
        let expanded = expand_keywords(keywords);
        let corpus: Vec<String> = literature.iter().map(|d| d.content.to_lowercase()).collect();

        let mut ranked: Vec<ScoredLiterature> = literature
            .iter()
            .filter_map(|doc| {
                let keyword_score = keyword_match_score(&expanded, &doc.content);
                let tfidf = tfidf_score(&expanded, &doc.content, &corpus);
                let combined_score = keyword_score * 0.6 + tfidf * 0.4;
                (combined_score > MIN_COMBINED_SCORE).then(|| ScoredLiterature {
                    source: doc.source.clone(),
                    keyword_score,
                    tfidf_score: tfidf,
                    combined_score,
                    matched_keywords: matched_keywords(&expanded, &doc.content),
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        ranked.truncate(self.max_literature_count);
        ranked
    }

    /// 获取文献元数据：元数据缓存中有可用条目时直接使用，否则用 LLM 提取并写回缓存
    pub async fn resolve_metadata(
        &self,
        doc: &LiteratureDocument,
        stats: &mut CallStats,
    ) -> Result<LiteratureMetadata, StageError> {
        if let Some(store) = &self.store {
            if let Some(mut metadata) = store.load(doc).await {
                metadata.source = doc.source.clone();
                return Ok(metadata);
            }
        }

        let metadata = self.extract_metadata_with_llm(doc, stats).await?;
        if let Some(store) = &self.store {
            if let Err(e) = store.save(doc, &metadata).await {
                warn!("保存元数据缓存失败 {}: {}", doc.source, e);
            }
        }
        Ok(metadata)
    }

    /// 用 LLM 从文献中挑选相关段落
    ///
    /// 上下文为摘要加正文前 2000 字符。回复解析不出段落时退回本地召回，
    /// LLM 调用失败原样返回。
    pub async fn extract_passages_with_llm(
        &self,
        doc: &LiteratureDocument,
        keywords: &[String],
        metadata: &LiteratureMetadata,
        combined_score: f64,
        stats: &mut CallStats,
    ) -> Result<Vec<Passage>, StageError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let preview = truncate_text(&doc.content, METADATA_INPUT_LIMIT);
        let context = if metadata.abstract_text.trim().is_empty() {
            preview
        } else {
            format!("摘要：{}\n\n正文预览：{}", metadata.abstract_text, preview)
        };
        let keyword_list = keywords
            .iter()
            .take(PASSAGE_PROMPT_KEYWORDS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");

        let prompt = format!(
            r#"请从以下文献中提取与关键词最相关的{}个段落：

关键词：{}

文献标题：{}

文献内容：
{}

要求：
1. 选择与关键词最相关的段落
2. 每个段落80-200字
3. 保持段落的完整性和上下文
4. 按相关性排序
5. 确保段落内容完整，不要截断句子

请以JSON格式返回：
{{"passages": [{{"text": "段落内容", "relevance_score": 0.9, "related_keywords": ["相关关键词"]}}]}}

只返回JSON，不要其他内容。"#,
            self.passages_per_literature, keyword_list, metadata.title, context
        );

        let response = self
            .llm
            .send_to_llm(&prompt, Some(PASSAGE_SYSTEM_MESSAGE), stats)
            .await?;

        let passages = parse_passages(
            &response,
            metadata,
            combined_score,
            self.passages_per_literature,
        );
        if passages.is_empty() {
            warn!("LLM 段落提取结果无法解析，使用本地召回: {}", doc.source);
            return Ok(extract_passages(
                &doc.content,
                keywords,
                metadata,
                combined_score,
                self.passages_per_literature,
            ));
        }
        Ok(passages)
    }

    /// 用 LLM 提取文献元数据
    ///
    /// JSON 解析失败时按正则从回复中提取，缺失字段用本地规则补齐。
    pub async fn extract_metadata_with_llm(
        &self,
        doc: &LiteratureDocument,
        stats: &mut CallStats,
    ) -> Result<LiteratureMetadata, StageError> {
        let prompt = format!(
            r#"请从以下文献内容中提取元数据信息，以JSON格式返回。
要求的字段：
- title: 文献标题
- authors: 作者列表（数组）
- abstract: 摘要
- keywords: 关键词列表（数组）
- year: 发表年份

如果某个字段无法提取，请设为空字符串或空数组。
只返回JSON，不要其他解释。

文献内容：
{}"#,
            truncate_text(&doc.content, METADATA_INPUT_LIMIT)
        );

        let response = self
            .llm
            .send_to_llm(&prompt, Some(METADATA_SYSTEM_MESSAGE), stats)
            .await?;

        let mut metadata = match extract_json_object(&response)
            .and_then(|json| serde_json::from_str::<LiteratureMetadata>(json).ok())
        {
            Some(metadata) => metadata,
            None => {
                warn!("元数据 JSON 解析失败，使用文本解析: {}", doc.source);
                parse_metadata_from_text(&response)
            }
        };

        metadata.source = doc.source.clone();
        metadata.extraction_method = ExtractionMethod::Llm;
        metadata.fill_missing_from(&extract_metadata_fast(doc));
        Ok(metadata)
    }
}

fn passage_rank(passage: &Passage) -> f64 {
    passage.relevance_score + passage.combined_score * 0.1
}

/// 解析逗号分隔的关键词
///
/// 过滤长度不超过 1 个字符或纯数字的条目。
pub fn parse_keywords(response: &str, max_keywords: usize) -> Vec<String> {
    response
        .split([',', '，', '、', '\n'])
        .map(|kw| kw.trim().trim_matches(|c: char| c == '"' || c == '“' || c == '”'))
        .filter(|kw| kw.chars().count() > 1 && !kw.chars().all(|c| c.is_ascii_digit()))
        .take(max_keywords)
        .map(str::to_string)
        .collect()
}

/// 解析 LLM 返回的段落 JSON，丢弃空段落
pub fn parse_passages(
    response: &str,
    metadata: &LiteratureMetadata,
    combined_score: f64,
    max_passages: usize,
) -> Vec<Passage> {
    let Some(reply) = extract_json_object(response)
        .and_then(|json| serde_json::from_str::<PassageReply>(json).ok())
    else {
        return Vec::new();
    };

    let citation = generate_citation(metadata);
    reply
        .passages
        .into_iter()
        .filter(|item| !item.text.trim().is_empty())
        .take(max_passages)
        .map(|item| Passage {
            text: item.text.trim().to_string(),
            source_title: metadata.title.clone(),
            source_year: metadata.year.clone(),
            relevance_score: item.relevance_score.unwrap_or(0.5).clamp(0.0, 1.0),
            related_keywords: item.related_keywords,
            citation: citation.clone(),
            source: metadata.source.clone(),
            combined_score,
        })
        .collect()
}

/// 从非 JSON 的 LLM 回复中提取标题和年份
pub fn parse_metadata_from_text(text: &str) -> LiteratureMetadata {
    let mut metadata = LiteratureMetadata::default();

    let title_re = Regex::new(r#"(?i)title["\s]*[:：]["\s]*([^"\n]+)"#)
        .expect("regex for metadata title");
    if let Some(caps) = title_re.captures(text) {
        metadata.title = caps[1].trim().trim_end_matches(',').trim().to_string();
    }
    let year_re =
        Regex::new(r#"(?i)year["\s]*[:：]["\s]*(\d{4})"#).expect("regex for metadata year");
    if let Some(caps) = year_re.captures(text) {
        metadata.year = caps[1].to_string();
    }

    metadata
}

/// 本地规则快速提取元数据，不调用 LLM
pub fn extract_metadata_fast(doc: &LiteratureDocument) -> LiteratureMetadata {
    let lines: Vec<&str> = doc.content.lines().collect();

    let title = lines
        .iter()
        .take(10)
        .map(|line| line.trim())
        .find(|line| {
            let lower = line.to_lowercase();
            !line.starts_with('#')
                && line.chars().count() > 5
                && !["author", "date", "@", "http", "doi"]
                    .iter()
                    .any(|skip| lower.contains(skip))
        })
        .map(str::to_string)
        .unwrap_or_else(|| doc.stem());

    let mut abstract_text = find_abstract(&lines);
    if abstract_text.is_empty() {
        let paragraphs: Vec<&str> = lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| line.chars().count() > 20)
            .take(3)
            .collect();
        abstract_text = paragraphs.join(" ").chars().take(500).collect();
    }

    let year = Regex::new(r"\b(?:19|20)\d{2}\b")
        .expect("regex for publication year")
        .find(&doc.content)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    LiteratureMetadata {
        title,
        authors: find_authors(&lines),
        abstract_text,
        keywords: find_keywords(&lines),
        year,
        source: doc.source.clone(),
        extraction_method: ExtractionMethod::FastLocal,
    }
}

fn find_abstract(lines: &[&str]) -> String {
    const PATTERNS: &[&str] = &["abstract", "摘要", "summary", "概 要"];

    let Some(start) = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        PATTERNS.iter().any(|p| lower.contains(p))
    }) else {
        return String::new();
    };

    let mut collected: Vec<&str> = Vec::new();
    for line in lines.iter().skip(start + 1).take(19) {
        if line.trim().is_empty() {
            if !collected.is_empty() {
                break;
            }
            continue;
        }
        if line.starts_with('#') {
            break;
        }
        collected.push(line.trim());
    }
    collected.join(" ")
}

fn find_keywords(lines: &[&str]) -> Vec<String> {
    const PATTERNS: &[&str] = &["keywords", "关键词", "key words", "关键字"];

    let Some(start) = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        PATTERNS.iter().any(|p| lower.contains(p))
    }) else {
        return Vec::new();
    };

    // 关键词可能和标签在同一行，也可能在后面几行
    let inline = lines[start]
        .split_once([':', '：'])
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();
    let text = if inline.is_empty() {
        lines
            .iter()
            .skip(start + 1)
            .take(4)
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        inline.to_string()
    };

    text.split([',', '，', ';', '；'])
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .take(10)
        .map(str::to_string)
        .collect()
}

fn find_authors(lines: &[&str]) -> Vec<String> {
    let Some(line) = lines.iter().take(15).copied().find(|line| {
        let lower = line.to_lowercase();
        ["author", "作者", "@"].iter().any(|p| lower.contains(p))
    }) else {
        return Vec::new();
    };

    let text = line
        .split_once([':', '：'])
        .map(|(_, rest)| rest)
        .unwrap_or(line)
        .replace('@', "")
        .replace(" and ", ",");

    text.split([',', '，', '、'])
        .map(str::trim)
        .filter(|author| !author.is_empty())
        .take(5)
        .map(str::to_string)
        .collect()
}

/// 从一篇文献中召回与关键词相关的段落
///
/// 按句子命中的关键词数选出前 `max_passages` 句，并带上前后各一句作为上下文。
pub fn extract_passages(
    content: &str,
    keywords: &[String],
    metadata: &LiteratureMetadata,
    combined_score: f64,
    max_passages: usize,
) -> Vec<Passage> {
    if keywords.is_empty() {
        return Vec::new();
    }

    let sentences = split_sentences(content);
    let mut scored: Vec<(usize, Vec<String>)> = sentences
        .iter()
        .enumerate()
        .filter(|(_, sentence)| sentence.chars().count() >= 10)
        .filter_map(|(index, sentence)| {
            let lower = sentence.to_lowercase();
            let hits: Vec<String> = keywords
                .iter()
                .filter(|k| lower.contains(&k.to_lowercase()))
                .cloned()
                .collect();
            (!hits.is_empty()).then_some((index, hits))
        })
        .collect();

    // 稳定排序，命中数相同时保留原文顺序
    scored.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let citation = generate_citation(metadata);
    scored
        .into_iter()
        .take(max_passages)
        .map(|(index, hits)| {
            let start = index.saturating_sub(1);
            let end = (index + 2).min(sentences.len());
            let text: String = sentences[start..end]
                .join("。")
                .chars()
                .take(MAX_PASSAGE_CHARS)
                .collect();

            Passage {
                text,
                source_title: metadata.title.clone(),
                source_year: metadata.year.clone(),
                relevance_score: (hits.len() as f64 / keywords.len() as f64).min(1.0),
                related_keywords: hits.into_iter().take(5).collect(),
                citation: citation.clone(),
                source: metadata.source.clone(),
                combined_score,
            }
        })
        .collect()
}
