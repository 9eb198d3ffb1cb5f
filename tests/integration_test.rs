use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use manuscript_polish::config::Config;
use manuscript_polish::error::{ErrorKind, LlmError};
use manuscript_polish::infrastructure::{
    CacheSource, CachedResponse, CompletionBackend, CompletionParams, CompletionRequest,
    CompletionResponse, RequestFingerprint, ResponseCache, TokenUsage,
};
use manuscript_polish::models::{ExtractionMethod, LiteratureDocument, Manuscript, RunInput};
use manuscript_polish::orchestrator::Orchestrator;
use manuscript_polish::services::OutputWriter;
use manuscript_polish::workflow::{RunStatus, Stage};

/// 按提示词内容回复的假后端
struct StubBackend {
    calls: AtomicUsize,
    metadata_calls: AtomicUsize,
    review_score: f64,
    fail_with: Option<LlmError>,
}

impl StubBackend {
    fn scoring(review_score: f64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            review_score,
            fail_with: None,
        }
    }

    fn failing(error: LlmError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            review_score: 0.0,
            fail_with: Some(error),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;

        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        let prompt = &request.prompt;
        let text = if prompt.contains("最重要的关键词") {
            "graph, neural, molecules".to_string()
        } else if prompt.contains("提取元数据") {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            r#"{"title": "Neural Message Passing", "authors": ["Gilmer"], "year": "2017"}"#
                .to_string()
        } else if prompt.contains("最相关的") {
            r#"{"passages": [{"text": "Message passing is a neural framework.", "relevance_score": 0.8, "related_keywords": ["neural"]}]}"#
                .to_string()
        } else if prompt.contains("请审阅") {
            format!(
                r#"{{"score": {}, "feedback": "引用需要更具体", "issues": ["引用不足"]}}"#,
                self.review_score
            )
        } else if prompt.contains("审稿意见") {
            r#"{"polished_text": "修订后的润色稿", "suggestions": []}"#.to_string()
        } else {
            r#"{"polished_text": "第一版润色稿", "suggestions": [{"original": "a", "revised": "b", "reason": "更准确"}]}"#
                .to_string()
        };

        Ok(CompletionResponse {
            text,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        })
    }
}

fn test_config() -> Config {
    Config {
        backoff_base_ms: 1,
        backoff_max_ms: 2,
        max_polish_attempts: 2,
        acceptance_threshold: 0.7,
        max_concurrent_runs: 2,
        metadata_cache_dir: None,
        ..Config::default()
    }
}

fn config_with_store(dir: &std::path::Path) -> Config {
    Config {
        metadata_cache_dir: Some(dir.display().to_string()),
        ..test_config()
    }
}

fn sample_input(title: &str) -> RunInput {
    RunInput {
        manuscript: Manuscript::new(
            title,
            "Graph neural networks predict molecules properties. We study neural message passing.",
        ),
        literature: vec![
            LiteratureDocument::new(
                "refs/gilmer.md",
                "Neural Message Passing for Quantum Chemistry\nGilmer et al. 2017\n\
                 Graph neural networks learn on molecules. Message passing is a neural framework.",
            ),
            LiteratureDocument::new("refs/unrelated.md", "Cooking recipes with tomatoes."),
        ],
        preprocess: false,
    }
}

fn params() -> CompletionParams {
    CompletionParams {
        model: "qwen-plus".to_string(),
        temperature: 0.3,
        max_tokens: 4096,
    }
}

fn cached(text: &str) -> CachedResponse {
    CachedResponse {
        text: text.to_string(),
        model: "qwen-plus".to_string(),
        usage: TokenUsage::default(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_end_to_end_accepted_run() {
    let backend = Arc::new(StubBackend::scoring(0.85));
    let orchestrator = Orchestrator::new(&test_config(), backend.clone());

    let outcome = orchestrator
        .run(&sample_input("图神经网络"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(
        outcome.stage_sequence(),
        vec![
            Stage::Analyzing,
            Stage::Polishing,
            Stage::Reviewing,
            Stage::Finalizing
        ]
    );
    assert_eq!(outcome.polished_text(), Some("第一版润色稿"));
    assert_eq!(outcome.metadata.review_scores, vec![0.85]);
    assert_eq!(outcome.metadata.cache_hits, 0);
    assert_eq!(outcome.metadata.llm_calls as usize, backend.calls());

    let analysis = outcome.bag.analysis().unwrap();
    assert_eq!(analysis.ranked_literature.len(), 1);
    assert!(analysis.keywords.iter().any(|k| k == "graph"));
    assert_eq!(analysis.passages.len(), 1);
    assert_eq!(analysis.passages[0].text, "Message passing is a neural framework.");
}

#[tokio::test]
async fn test_low_scores_stop_after_max_polishes() {
    let backend = Arc::new(StubBackend::scoring(0.4));
    let orchestrator = Orchestrator::new(&test_config(), backend);

    let outcome = orchestrator
        .run(&sample_input("低分稿件"), &CancellationToken::new())
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.count_stage(Stage::Polishing), 2);
    assert_eq!(outcome.count_stage(Stage::Reviewing), 2);
    assert_eq!(outcome.stage_sequence().last(), Some(&Stage::Finalizing));
    assert_eq!(outcome.metadata.polish_attempts, 2);
    // 未达标时采用最后一版
    assert_eq!(outcome.polished_text(), Some("修订后的润色稿"));
}

#[tokio::test]
async fn test_fatal_backend_fails_in_analysis() {
    let backend = Arc::new(StubBackend::failing(LlmError::fatal("qwen-plus", "invalid api key")));
    let orchestrator = Orchestrator::new(&test_config(), backend.clone());

    let outcome = orchestrator
        .run(&sample_input("鉴权失败"), &CancellationToken::new())
        .await;

    match &outcome.status {
        RunStatus::Failed { stage, kind, .. } => {
            assert_eq!(*stage, Stage::Analyzing);
            assert_eq!(*kind, ErrorKind::Fatal);
        }
        other => panic!("unexpected status: {:?}", other),
    }
    assert_eq!(outcome.stage_sequence(), vec![Stage::Analyzing]);
    assert!(outcome.polished_text().is_none());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_transient_backend_exhausts_retries() {
    let config = Config {
        max_attempts: 3,
        ..test_config()
    };
    let backend = Arc::new(StubBackend::failing(LlmError::transient("qwen-plus", "429")));
    let orchestrator = Orchestrator::new(&config, backend.clone());

    let outcome = orchestrator
        .run(&sample_input("限流"), &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome.status,
        RunStatus::Failed {
            kind: ErrorKind::Transient,
            ..
        }
    ));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_concurrent_identical_fetches_call_once() {
    let cache = Arc::new(ResponseCache::new(16));
    let fingerprint = RequestFingerprint::compute(Some("system"), "same prompt", &params());
    let fetches = AtomicUsize::new(0);

    let lookups = (0..2).map(|_| {
        let cache = Arc::clone(&cache);
        let fingerprint = fingerprint.clone();
        let fetches = &fetches;
        async move {
            cache
                .get_or_fetch(&fingerprint, Duration::from_secs(60), || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(cached("shared"))
                })
                .await
        }
    });
    let results = join_all(lookups).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let sources: Vec<CacheSource> = results
        .iter()
        .map(|r| r.as_ref().unwrap().source)
        .collect();
    assert!(sources.contains(&CacheSource::Fetched));
    assert!(sources.contains(&CacheSource::Coalesced));
    assert!(results
        .iter()
        .all(|r| r.as_ref().unwrap().response.text == "shared"));
}

#[tokio::test]
async fn test_concurrent_lookups_of_cached_entry_never_fetch() {
    let cache = Arc::new(ResponseCache::new(16));
    let fingerprint = RequestFingerprint::compute(Some("system"), "cached prompt", &params());
    cache.put(fingerprint.clone(), cached("R1"), Duration::from_secs(60));
    let fetches = AtomicUsize::new(0);

    let lookups = (0..2).map(|_| {
        let cache = Arc::clone(&cache);
        let fingerprint = fingerprint.clone();
        let fetches = &fetches;
        async move {
            cache
                .get_or_fetch(&fingerprint, Duration::from_secs(60), || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(cached("R2"))
                })
                .await
        }
    });
    let results = join_all(lookups).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    for result in &results {
        let lookup = result.as_ref().unwrap();
        assert_eq!(lookup.source, CacheSource::Hit);
        assert_eq!(lookup.response.text, "R1");
    }
    assert_eq!(cache.stats().hits, 2);
}

#[tokio::test]
async fn test_cache_expiry_and_eviction() {
    let cache = ResponseCache::new(2);
    let a = RequestFingerprint::compute(None, "a", &params());
    let b = RequestFingerprint::compute(None, "b", &params());
    let c = RequestFingerprint::compute(None, "c", &params());

    cache.put(a.clone(), cached("A"), Duration::from_secs(60));
    cache.put(b.clone(), cached("B"), Duration::from_secs(60));
    // 访问 a，使 b 成为最久未使用
    assert!(cache.get(&a).is_some());
    cache.put(c.clone(), cached("C"), Duration::from_secs(60));

    assert!(cache.get(&b).is_none());
    assert_eq!(cache.get(&a).map(|r| r.text), Some("A".to_string()));
    assert_eq!(cache.stats().evictions, 1);

    cache.put(b.clone(), cached("B"), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(cache.get(&b).is_none());
}

#[tokio::test]
async fn test_batch_shares_cache_across_runs() {
    let backend = Arc::new(StubBackend::scoring(0.9));
    let orchestrator = Orchestrator::new(&test_config(), backend.clone());
    let inputs = vec![sample_input("同一稿件"), sample_input("同一稿件")];

    let report = orchestrator
        .run_batch(&inputs, &CancellationToken::new())
        .await;

    assert_eq!(report.stats.total, 2);
    assert_eq!(report.stats.success, 2);
    // 关键词、元数据、段落、润色、审稿各只调用一次
    assert_eq!(backend.calls(), 5);
    let total_hits: u32 = report.outcomes.iter().map(|o| o.metadata.cache_hits).sum();
    assert_eq!(total_hits, 5);
    assert_eq!(
        report.outcomes[0].polished_text(),
        report.outcomes[1].polished_text()
    );
}

#[tokio::test]
async fn test_second_run_reads_stored_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_store(dir.path());
    let backend = Arc::new(StubBackend::scoring(0.9));

    let first = Orchestrator::new(&config, backend.clone())
        .run(&sample_input("元数据缓存"), &CancellationToken::new())
        .await;
    assert!(first.is_success());
    assert_eq!(backend.metadata_calls(), 1);
    assert!(dir.path().join("gilmer_metadata.json").exists());

    // 新的编排器没有共享响应缓存，只能从元数据缓存读取
    let second = Orchestrator::new(&config, backend.clone())
        .run(&sample_input("元数据缓存"), &CancellationToken::new())
        .await;
    assert!(second.is_success());
    assert_eq!(backend.metadata_calls(), 1);

    let reference = &second.bag.analysis().unwrap().references[0];
    assert_eq!(reference.title, "Neural Message Passing");
    assert_eq!(reference.extraction_method, ExtractionMethod::Llm);
}

#[tokio::test]
async fn test_preprocess_fills_store_before_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(StubBackend::scoring(0.9));
    let orchestrator = Orchestrator::new(&config_with_store(dir.path()), backend.clone());
    let mut input = sample_input("预处理");
    input.preprocess = true;

    let outcome = orchestrator.run(&input, &CancellationToken::new()).await;

    assert!(outcome.is_success());
    assert_eq!(backend.metadata_calls(), 0);
    assert!(dir.path().join("gilmer_metadata.json").exists());
    assert!(dir.path().join("unrelated_metadata.json").exists());
    let reference = &outcome.bag.analysis().unwrap().references[0];
    assert_eq!(reference.extraction_method, ExtractionMethod::FastLocal);
    assert_eq!(reference.title, "Neural Message Passing for Quantum Chemistry");
}

#[tokio::test]
async fn test_force_update_overwrites_stored_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(StubBackend::scoring(0.9));

    // 先由 LLM 写入元数据
    Orchestrator::new(&config_with_store(dir.path()), backend.clone())
        .run(&sample_input("覆盖"), &CancellationToken::new())
        .await;

    let mut input = sample_input("覆盖");
    input.preprocess = true;
    let kept = Orchestrator::new(&config_with_store(dir.path()), backend.clone())
        .run(&input, &CancellationToken::new())
        .await;
    assert_eq!(
        kept.bag.analysis().unwrap().references[0].extraction_method,
        ExtractionMethod::Llm
    );

    let forced_config = Config {
        metadata_force_update: true,
        ..config_with_store(dir.path())
    };
    let forced = Orchestrator::new(&forced_config, backend.clone())
        .run(&input, &CancellationToken::new())
        .await;
    assert_eq!(
        forced.bag.analysis().unwrap().references[0].extraction_method,
        ExtractionMethod::FastLocal
    );
    assert_eq!(backend.metadata_calls(), 1);
}

#[tokio::test]
async fn test_cancelled_before_first_stage() {
    let backend = Arc::new(StubBackend::scoring(0.9));
    let orchestrator = Orchestrator::new(&test_config(), backend.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = orchestrator.run(&sample_input("取消"), &cancel).await;

    assert!(outcome.is_cancelled());
    assert!(outcome.stages.is_empty());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_outputs_written_for_successful_run() {
    let backend = Arc::new(StubBackend::scoring(0.9));
    let orchestrator = Orchestrator::new(&test_config(), backend);
    let outcome = orchestrator
        .run(&sample_input("输出测试"), &CancellationToken::new())
        .await;

    let dir = tempfile::tempdir().unwrap();
    let writer = OutputWriter::new(dir.path());
    let paths = writer.write("输出测试", &outcome).await.unwrap();

    let polished = paths.polished.expect("成功的运行应写出润色稿");
    assert_eq!(
        tokio::fs::read_to_string(&polished).await.unwrap(),
        "第一版润色稿"
    );

    let metadata: serde_json::Value =
        serde_json::from_str(&tokio::fs::read_to_string(&paths.metadata).await.unwrap()).unwrap();
    assert_eq!(metadata["status"], "done");
    assert!(paths.report.exists());
}

#[tokio::test]
#[ignore] // 需要真实的 API Key：cargo test -- --ignored
async fn test_live_polish_single_manuscript() {
    let config = Config::from_env().expect("加载配置失败");
    let orchestrator = Orchestrator::from_config(&config);

    let outcome = orchestrator
        .run(&sample_input("live"), &CancellationToken::new())
        .await;

    println!("{:?}", outcome.status);
    assert!(!outcome.stages.is_empty());
}
