use serde::{Deserialize, Serialize};

/// 元数据的提取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// 本地规则快速提取
    #[default]
    FastLocal,
    /// LLM 提取
    Llm,
}

/// 文献元数据
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LiteratureMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_year")]
    pub year: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub extraction_method: ExtractionMethod,
}

impl LiteratureMetadata {
    /// 用另一份元数据补齐缺失字段
    pub fn fill_missing_from(&mut self, other: &LiteratureMetadata) {
        if self.title.trim().is_empty() {
            self.title = other.title.clone();
        }
        if self.authors.is_empty() {
            self.authors = other.authors.clone();
        }
        if self.abstract_text.trim().is_empty() {
            self.abstract_text = other.abstract_text.clone();
        }
        if self.keywords.is_empty() {
            self.keywords = other.keywords.clone();
        }
        if self.year.trim().is_empty() {
            self.year = other.year.clone();
        }
        if self.source.is_empty() {
            self.source = other.source.clone();
        }
    }
}

/// 与手稿关键词匹配后的文献
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredLiterature {
    pub source: String,
    pub keyword_score: f64,
    pub tfidf_score: f64,
    pub combined_score: f64,
    pub matched_keywords: Vec<String>,
}

/// 召回的文献段落
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_title: String,
    pub source_year: String,
    pub relevance_score: f64,
    pub related_keywords: Vec<String>,
    pub citation: String,
    pub source: String,
    pub combined_score: f64,
}

// LLM 返回的年份可能是字符串也可能是整数
fn deserialize_year<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Visitor;
    use std::fmt;

    struct YearVisitor;

    impl<'de> Visitor<'de> for YearVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or integer representing a year")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(String::new())
        }
    }

    deserializer.deserialize_any(YearVisitor)
}
