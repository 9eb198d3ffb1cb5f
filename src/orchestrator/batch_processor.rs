//! 批量运行处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是核心流水线的入口，负责组装各层并调度运行。
//!
//! ## 核心功能
//!
//! 1. **组装**：创建共享的响应缓存、LLM 服务和阶段执行器
//! 2. **单次运行**：`run` 处理一篇手稿
//! 3. **并发控制**：`run_batch` 使用 Semaphore 限制同时执行的运行数
//! 4. **元数据预处理**：运行前把文献元数据批量写入元数据缓存
//! 5. **全局统计**：汇总所有运行的成功 / 失败 / 取消数量
//!
//! ## 设计特点
//!
//! - **资源所有者**：唯一持有 `Arc<ResponseCache>` 的模块，所有运行共享同一个缓存
//! - **向下委托**：委托 run_processor 处理单次运行

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::{CompletionBackend, OpenAiBackend, ResponseCache};
use crate::models::{LiteratureDocument, RunInput};
use crate::orchestrator::run_processor;
use crate::services::{LlmService, MetadataStore};
use crate::workflow::{LlmStageExecutor, LoopPolicy, PolishFlow, RunOutcome, StageExecutor};

/// 批量运行统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchStats {
    fn from_outcomes(outcomes: &[RunOutcome]) -> Self {
        let mut stats = BatchStats {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome.is_success() {
                stats.success += 1;
            } else if outcome.is_cancelled() {
                stats.cancelled += 1;
            } else {
                stats.failed += 1;
            }
        }
        stats
    }
}

/// 批量运行结果，顺序与输入一致
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<RunOutcome>,
    pub stats: BatchStats,
}

/// 流水线编排器
pub struct Orchestrator {
    cache: Arc<ResponseCache>,
    flow: PolishFlow,
    metadata_store: Option<MetadataStore>,
    force_update: bool,
    max_concurrent_runs: usize,
}

impl Orchestrator {
    /// 使用真实的 OpenAI 兼容后端
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, Arc::new(OpenAiBackend::new(config)))
    }

    /// 使用指定后端，创建新的缓存
    pub fn new(config: &Config, backend: Arc<dyn CompletionBackend>) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache_capacity));
        Self::with_cache(config, backend, cache)
    }

    /// 使用指定后端和已有的缓存
    pub fn with_cache(
        config: &Config,
        backend: Arc<dyn CompletionBackend>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        let llm = Arc::new(LlmService::new(config, backend, Arc::clone(&cache)));
        let executor: Arc<dyn StageExecutor> = Arc::new(LlmStageExecutor::new(config, llm));
        let policy = LoopPolicy {
            acceptance_threshold: config.acceptance_threshold,
            max_polish_attempts: config.max_polish_attempts,
        };

        Self {
            cache,
            flow: PolishFlow::new(executor, policy, &config.llm_model_name),
            metadata_store: config.metadata_cache_dir.as_ref().map(MetadataStore::new),
            force_update: config.metadata_force_update,
            max_concurrent_runs: config.max_concurrent_runs.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// 用本地规则预处理文献元数据，写入元数据缓存
    ///
    /// 之后的分析阶段直接读取缓存，不再为这些文献调用 LLM 提取元数据。
    ///
    /// # 返回
    /// 本次写入的条目数；未配置元数据缓存目录时为 0
    pub async fn preprocess_literature(&self, literature: &[LiteratureDocument]) -> usize {
        match &self.metadata_store {
            Some(store) => store.preprocess(literature, self.force_update).await,
            None => {
                warn!("未配置元数据缓存目录，跳过预处理");
                0
            }
        }
    }

    /// 处理单篇手稿
    pub async fn run(&self, input: &RunInput, cancel: &CancellationToken) -> RunOutcome {
        if input.preprocess && !cancel.is_cancelled() {
            self.preprocess_literature(&input.literature).await;
        }
        run_processor::process_run(&self.flow, input, 1, cancel).await
    }

    /// 并发处理多篇手稿
    ///
    /// 同时执行的运行数不超过 `max_concurrent_runs`，所有运行共享同一个缓存。
    pub async fn run_batch(&self, inputs: &[RunInput], cancel: &CancellationToken) -> BatchReport {
        log_batch_start(inputs.len(), self.max_concurrent_runs);

        // 多个运行共用的文献只预处理一次
        if !cancel.is_cancelled() {
            let mut seen = HashSet::new();
            let pending: Vec<LiteratureDocument> = inputs
                .iter()
                .filter(|input| input.preprocess)
                .flat_map(|input| input.literature.iter())
                .filter(|doc| seen.insert(doc.source.as_str()))
                .cloned()
                .collect();
            if !pending.is_empty() {
                self.preprocess_literature(&pending).await;
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_runs));
        let runs = inputs.iter().enumerate().map(|(idx, input)| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // 信号量不会被关闭，获取失败时直接执行
                let _permit = semaphore.acquire().await.ok();
                run_processor::process_run(&self.flow, input, idx + 1, cancel).await
            }
        });

        let outcomes = join_all(runs).await;
        let stats = BatchStats::from_outcomes(&outcomes);
        log_batch_complete(&stats, &self.cache);

        BatchReport { outcomes, stats }
    }
}

// ========== 日志辅助函数 ==========

fn log_batch_start(total: usize, max_concurrent: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始批量处理 {} 篇手稿", total);
    info!("📊 最大并发运行数: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

fn log_batch_complete(stats: &BatchStats, cache: &ResponseCache) {
    let cache_stats = cache.stats();
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 批量处理完成: 成功 {}/{}，失败 {}，取消 {}",
        stats.success, stats.total, stats.failed, stats.cancelled
    );
    info!(
        "🗄 缓存: 命中 {}，未命中 {}，合并等待 {}，淘汰 {}",
        cache_stats.hits, cache_stats.misses, cache_stats.coalesced, cache_stats.evictions
    );
    info!("{}", "─".repeat(60));
}
