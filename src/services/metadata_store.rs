//! 文献元数据缓存 - 业务能力层
//!
//! 每篇文献的元数据保存为 `<文件名主干>_metadata.json`，跨运行复用。
//! 读不出来或缺少标题的条目视为损坏，由调用方重新提取。

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{LiteratureDocument, LiteratureMetadata};
use crate::services::literature_service::extract_metadata_fast;

/// 文献元数据缓存
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 文献对应的元数据文件
    pub fn entry_path(&self, doc: &LiteratureDocument) -> PathBuf {
        let stem = Path::new(&doc.source)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| doc.source.replace(['/', '\\'], "_"));
        self.dir.join(format!("{}_metadata.json", stem))
    }

    /// 读取已保存的元数据
    ///
    /// 文件不存在、不是合法 JSON 或缺少标题时返回 `None`。
    pub async fn load(&self, doc: &LiteratureDocument) -> Option<LiteratureMetadata> {
        let path = self.entry_path(doc);
        let content = fs::read_to_string(&path).await.ok()?;

        match serde_json::from_str::<LiteratureMetadata>(&content) {
            Ok(metadata) if !metadata.title.trim().is_empty() => {
                debug!("使用已缓存的元数据: {}", path.display());
                Some(metadata)
            }
            Ok(_) => {
                warn!("元数据缓存缺少标题，重新提取: {}", path.display());
                None
            }
            Err(e) => {
                warn!("元数据缓存损坏，重新提取 ({}): {}", path.display(), e);
                None
            }
        }
    }

    /// 保存一篇文献的元数据
    pub async fn save(
        &self,
        doc: &LiteratureDocument,
        metadata: &LiteratureMetadata,
    ) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::file_write_failed(self.dir.display().to_string(), e))?;

        let path = self.entry_path(doc);
        let json = serde_json::to_vec_pretty(metadata)?;
        fs::write(&path, json)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
        Ok(path)
    }

    /// 批量预处理：用本地规则提取元数据并写入缓存
    ///
    /// 已有可用条目且 `force_update` 为 false 时跳过；单篇失败只记录警告。
    ///
    /// # 返回
    /// 本次写入的条目数
    pub async fn preprocess(
        &self,
        literature: &[LiteratureDocument],
        force_update: bool,
    ) -> usize {
        info!(
            "📚 开始预处理文献元数据: {} 篇（目录: {}）",
            literature.len(),
            self.dir.display()
        );

        let mut processed = 0usize;
        for doc in literature {
            if !force_update && self.load(doc).await.is_some() {
                continue;
            }

            let metadata = extract_metadata_fast(doc);
            match self.save(doc, &metadata).await {
                Ok(_) => {
                    processed += 1;
                    if processed % 10 == 0 {
                        info!("已处理 {} 篇文献...", processed);
                    }
                }
                Err(e) => warn!("预处理文献失败 {}: {}", doc.source, e),
            }
        }

        info!("✓ 预处理完成，写入 {} 篇文献的元数据", processed);
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionMethod;

    fn doc() -> LiteratureDocument {
        LiteratureDocument::new(
            "refs/attention_paper.md",
            "Attention Is All You Need\nAuthors: Vaswani, Shazeer\n2017\nTransformers rely on attention.",
        )
    }

    #[test]
    fn test_entry_path_uses_file_stem() {
        let store = MetadataStore::new("/tmp/meta");
        assert_eq!(
            store.entry_path(&doc()),
            PathBuf::from("/tmp/meta/attention_paper_metadata.json")
        );
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("metadata"));
        let metadata = extract_metadata_fast(&doc());

        store.save(&doc(), &metadata).await.unwrap();

        assert_eq!(store.load(&doc()).await, Some(metadata));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_rebuilt_by_preprocess() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        fs::write(store.entry_path(&doc()), "{not json").await.unwrap();

        assert!(store.load(&doc()).await.is_none());
        assert_eq!(store.preprocess(&[doc()], false).await, 1);

        let loaded = store.load(&doc()).await.unwrap();
        assert_eq!(loaded.title, "Attention Is All You Need");
        assert_eq!(loaded.extraction_method, ExtractionMethod::FastLocal);
    }

    #[tokio::test]
    async fn test_preprocess_keeps_existing_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let stored = LiteratureMetadata {
            title: "旧标题".to_string(),
            ..Default::default()
        };
        store.save(&doc(), &stored).await.unwrap();

        assert_eq!(store.preprocess(&[doc()], false).await, 0);
        assert_eq!(store.load(&doc()).await.unwrap().title, "旧标题");

        assert_eq!(store.preprocess(&[doc()], true).await, 1);
        assert_eq!(
            store.load(&doc()).await.unwrap().title,
            "Attention Is All You Need"
        );
    }
}
