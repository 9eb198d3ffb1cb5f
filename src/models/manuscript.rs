use serde::{Deserialize, Serialize};

/// 待润色的手稿
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manuscript {
    pub title: String,
    pub content: String,
}

impl Manuscript {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// 一篇参考文献的原文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteratureDocument {
    /// 来源标识（通常是文件路径）
    pub source: String,
    pub content: String,
}

impl LiteratureDocument {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
        }
    }

    /// 来源的文件名主干，用作缺省标题
    pub fn stem(&self) -> String {
        std::path::Path::new(&self.source)
            .file_stem()
            .map(|s| s.to_string_lossy().replace('_', " "))
            .unwrap_or_else(|| self.source.clone())
    }
}

/// 一次运行的输入
#[derive(Debug, Clone)]
pub struct RunInput {
    pub manuscript: Manuscript,
    pub literature: Vec<LiteratureDocument>,
    /// 运行前用本地规则预处理文献元数据并写入元数据缓存
    pub preprocess: bool,
}
