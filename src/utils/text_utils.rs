//! 文本处理工具
//!
//! 关键词、TF-IDF 评分、句子切分、引用格式等本地算法，不依赖 LLM。

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::models::literature::LiteratureMetadata;

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("regex for words"))
}

fn sentence_split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[。.!?！？]").expect("regex for sentence boundaries"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("regex for whitespace"))
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "this", "that", "from", "as", "be",
];

/// 合并连续空白并去掉首尾空白
pub fn clean_text(text: &str) -> String {
    whitespace_regex().replace_all(text, " ").trim().to_string()
}

/// 按中英文句末标点切分句子，过滤空句
pub fn split_sentences(text: &str) -> Vec<String> {
    sentence_split_regex()
        .split(text)
        .map(clean_text)
        .filter(|s| !s.is_empty())
        .collect()
}

/// 基于词频的关键词提取（LLM 不可用时的兜底）
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();

    for word in word_regex().find_iter(&lower).map(|m| m.as_str()) {
        if word.chars().count() <= 2
            || STOP_WORDS.contains(&word)
            || word.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }
        let count = counts.entry(word).or_insert(0);
        if *count == 0 {
            first_seen.push(word);
        }
        *count += 1;
    }

    // 频率相同时保持首次出现的顺序
    let mut ranked: Vec<(usize, &str)> = first_seen
        .iter()
        .enumerate()
        .map(|(order, word)| (order, *word))
        .collect();
    ranked.sort_by(|a, b| counts[b.1].cmp(&counts[a.1]).then(a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(max_keywords)
        .map(|(_, word)| word.to_string())
        .collect()
}

/// 通用同义词表
pub fn general_synonyms() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("research", &["study", "investigation", "analysis", "examination"][..]),
        ("method", &["approach", "technique", "methodology", "procedure"][..]),
        ("result", &["outcome", "finding", "conclusion", "output"][..]),
        ("analysis", &["examination", "evaluation", "assessment", "study"][..]),
        ("data", &["information", "dataset", "statistics", "evidence"][..]),
        ("model", &["framework", "system", "structure", "design"][..]),
        ("algorithm", &["method", "procedure", "technique", "approach"][..]),
        ("performance", &["efficiency", "effectiveness", "capability", "quality"][..]),
        ("evaluation", &["assessment", "analysis", "examination", "review"][..]),
        ("experiment", &["test", "trial", "study", "investigation"][..]),
        ("application", &["use", "implementation", "deployment", "utilization"][..]),
        ("development", &["creation", "construction", "building", "design"][..]),
        ("improvement", &["enhancement", "optimization", "refinement", "upgrade"][..]),
        ("comparison", &["contrast", "evaluation", "analysis", "assessment"][..]),
        ("validation", &["verification", "confirmation", "testing", "proof"][..]),
    ])
}

/// 用同义词扩展关键词，保持原关键词在前且去重
pub fn expand_keywords(keywords: &[String]) -> Vec<String> {
    let synonyms = general_synonyms();
    let mut seen = HashSet::new();
    let mut expanded = Vec::new();

    for keyword in keywords {
        if seen.insert(keyword.to_lowercase()) {
            expanded.push(keyword.clone());
        }
    }
    for keyword in keywords {
        if let Some(words) = synonyms.get(keyword.to_lowercase().as_str()) {
            for word in words.iter() {
                if seen.insert(word.to_string()) {
                    expanded.push(word.to_string());
                }
            }
        }
    }

    expanded
}

/// 关键词在文本中出现
///
/// ASCII 关键词按单词边界匹配；中文等没有词边界的文字按子串匹配。
pub fn contains_keyword(text_lower: &str, keyword: &str) -> bool {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    if !keyword.is_ascii() {
        return text_lower.contains(&keyword);
    }
    Regex::new(&format!(r"\b{}\b", regex::escape(&keyword)))
        .map(|re| re.is_match(text_lower))
        .unwrap_or(false)
}

/// 关键词命中比例
pub fn keyword_match_score(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() || text.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let matched = keywords
        .iter()
        .filter(|k| contains_keyword(&lower, k))
        .count();
    matched as f64 / keywords.len() as f64
}

/// 文本中命中的关键词
pub fn matched_keywords(keywords: &[String], text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| contains_keyword(&lower, k))
        .cloned()
        .collect()
}

/// 基于 TF-IDF 的相关性评分
///
/// `corpus_lower` 为所有文档的小写文本，用于计算逆文档频率。
pub fn tfidf_score(keywords: &[String], document: &str, corpus_lower: &[String]) -> f64 {
    let doc_lower = document.to_lowercase();
    let words: Vec<&str> = word_regex()
        .find_iter(&doc_lower)
        .map(|m| m.as_str())
        .collect();
    if words.is_empty() || corpus_lower.is_empty() {
        return 0.0;
    }

    let total = words.len() as f64;
    let mut word_counts: HashMap<&str, usize> = HashMap::new();
    for word in &words {
        *word_counts.entry(word).or_insert(0) += 1;
    }

    let mut score = 0.0;
    for keyword in keywords {
        let keyword_lower = keyword.to_lowercase();
        for term in word_regex().find_iter(&keyword_lower).map(|m| m.as_str()) {
            let count = if term.is_ascii() {
                word_counts.get(term).copied().unwrap_or(0)
            } else {
                doc_lower.matches(term).count()
            };
            if count == 0 {
                continue;
            }
            let tf = count as f64 / total;
            let docs_containing = corpus_lower.iter().filter(|d| d.contains(term)).count();
            if docs_containing > 0 {
                let idf = (corpus_lower.len() as f64 / docs_containing as f64).ln();
                score += tf * idf;
            }
        }
    }

    score
}

/// 生成引用格式：`作者1, 作者2, 作者3 et al. (年份). 标题`
pub fn generate_citation(metadata: &LiteratureMetadata) -> String {
    let authors = if metadata.authors.is_empty() {
        "未知作者".to_string()
    } else {
        let mut joined = metadata
            .authors
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if metadata.authors.len() > 3 {
            joined.push_str(" et al.");
        }
        joined
    };
    let title = if metadata.title.is_empty() {
        "未知标题"
    } else {
        metadata.title.as_str()
    };

    format!("{} ({}). {}", authors, metadata.year, title)
}

/// 从 LLM 响应中取出 JSON 对象
///
/// 兼容 ```json 代码块和前后夹杂说明文字的情况。
pub fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}
