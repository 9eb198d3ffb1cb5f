use crate::models::manuscript::{LiteratureDocument, Manuscript};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 支持的文献格式
pub const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt"];

/// 读取手稿文件，标题取文件名主干
pub async fn load_manuscript(path: &Path) -> Result<Manuscript> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取手稿文件: {}", path.display()))?;

    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "untitled".to_string());

    Ok(Manuscript::new(title, content))
}

/// 递归加载文献目录中的所有文本文件
///
/// 无法读取或不是 UTF-8 的文件跳过并记录警告，结果按路径排序。
pub async fn load_literature_dir(folder_path: &Path) -> Result<Vec<LiteratureDocument>> {
    if !folder_path.is_dir() {
        anyhow::bail!("文献目录不存在: {}", folder_path.display());
    }

    let mut files = collect_supported_files(folder_path).await?;
    files.sort();

    let mut documents = Vec::new();
    for path in files {
        match fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => {
                tracing::debug!("已加载文献: {}", path.display());
                documents.push(LiteratureDocument::new(
                    path.to_string_lossy().to_string(),
                    content,
                ));
            }
            Ok(_) => tracing::warn!("跳过空文件: {}", path.display()),
            Err(e) => tracing::warn!("加载文件失败 {}: {}", path.display(), e),
        }
    }

    tracing::info!("成功加载 {} 篇文献", documents.len());
    Ok(documents)
}

async fn collect_supported_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("无法读取文件夹: {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if is_supported(&path) {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
