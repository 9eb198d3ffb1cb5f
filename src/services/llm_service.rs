//! LLM 服务 - 业务能力层
//!
//! 只负责"调用 LLM"能力：缓存、重试、错误归类，不关心流程
//!
//! ## 调用路径
//! 1. 计算请求指纹，查询共享的 [`ResponseCache`]
//! 2. 未命中时由唯一的执行者调用后端，临时错误按指数退避重试
//! 3. 成功的响应写入缓存，失败的结果只共享给正在等待的同指纹请求

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LlmError;
use crate::infrastructure::{
    CacheSource, CachedResponse, CompletionBackend, CompletionParams, CompletionRequest,
    RequestFingerprint, ResponseCache, TokenUsage,
};

/// 重试策略
///
/// 第 n 次失败后等待 `min(base * 2^(n-1), max)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// 第 `attempt` 次尝试失败后的等待时间（`attempt` 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// 一次成功的调用
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub source: CacheSource,
    /// 本请求实际发起的外部调用次数，命中缓存时为 0
    pub attempts: u32,
}

impl Completion {
    /// 没有发起外部调用（命中缓存或共享了进行中的调用）
    pub fn cache_hit(&self) -> bool {
        self.source != CacheSource::Fetched
    }
}

/// 调用统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    /// 经过本服务的逻辑调用次数
    pub llm_calls: u32,
    pub cache_hits: u32,
    /// 重试次数（不含首次尝试）
    pub retries: u32,
    pub token_usage: TokenUsage,
}

impl CallStats {
    pub fn merge(&mut self, other: &CallStats) {
        self.llm_calls += other.llm_calls;
        self.cache_hits += other.cache_hits;
        self.retries += other.retries;
        self.token_usage.add(&other.token_usage);
    }
}

/// LLM 服务
///
/// 职责：
/// - 把一次提示词调用转成带缓存、带重试的外部调用
/// - 将错误归类为临时 / 致命 / 重试耗尽
/// - 不关心调用它的是哪个阶段
pub struct LlmService {
    backend: Arc<dyn CompletionBackend>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
    default_params: CompletionParams,
    cache_ttl: Duration,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(
        config: &Config,
        backend: Arc<dyn CompletionBackend>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            backend,
            cache,
            retry: RetryPolicy::from_config(config),
            default_params: CompletionParams {
                model: config.llm_model_name.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            cache_ttl: config.cache_ttl(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.default_params.model
    }

    pub fn default_params(&self) -> &CompletionParams {
        &self.default_params
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// 通用的 LLM 调用函数，使用默认参数
    pub async fn complete(
        &self,
        system_message: Option<&str>,
        user_message: &str,
        stats: &mut CallStats,
    ) -> Result<Completion, LlmError> {
        let params = self.default_params.clone();
        self.complete_with(system_message, user_message, &params, stats)
            .await
    }

    /// 使用指定参数调用 LLM
    ///
    /// 相同指纹的请求在 TTL 内只会真正调用一次后端。
    pub async fn complete_with(
        &self,
        system_message: Option<&str>,
        user_message: &str,
        params: &CompletionParams,
        stats: &mut CallStats,
    ) -> Result<Completion, LlmError> {
        let fingerprint = RequestFingerprint::compute(system_message, user_message, params);
        let request = CompletionRequest {
            system: system_message.map(str::to_string),
            prompt: user_message.to_string(),
            params: params.clone(),
        };

        debug!(
            "LLM 请求 {}，模型: {}，消息长度: {} 字符",
            fingerprint.short(),
            params.model,
            user_message.chars().count()
        );

        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let request_ref = &request;
        let result = self
            .cache
            .get_or_fetch(&fingerprint, self.cache_ttl, move || async move {
                self.fetch_with_retry(request_ref, attempts_ref).await
            })
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        stats.llm_calls += 1;
        stats.retries += attempts.saturating_sub(1);

        let lookup = result?;
        let completion = Completion {
            text: lookup.response.text,
            usage: lookup.response.usage,
            source: lookup.source,
            attempts,
        };

        if completion.cache_hit() {
            stats.cache_hits += 1;
            debug!("LLM 请求 {} 命中缓存 ({:?})", fingerprint.short(), completion.source);
        } else {
            stats.token_usage.add(&completion.usage);
        }

        Ok(completion)
    }

    /// 只返回文本的便捷接口
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        stats: &mut CallStats,
    ) -> Result<String, LlmError> {
        Ok(self.complete(system_message, user_message, stats).await?.text)
    }

    async fn fetch_with_retry(
        &self,
        request: &CompletionRequest,
        attempts: &AtomicU32,
    ) -> Result<CachedResponse, LlmError> {
        let model = request.params.model.as_str();

        loop {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

            let error = match self.backend.complete(request).await {
                Ok(response) if response.text.trim().is_empty() => {
                    return Err(LlmError::fatal(model, "LLM 返回内容为空"));
                }
                Ok(response) => {
                    debug!("LLM API 调用成功（第 {} 次尝试）", attempt);
                    return Ok(CachedResponse {
                        text: response.text,
                        model: model.to_string(),
                        usage: response.usage,
                        created_at: Utc::now(),
                    });
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!("LLM 致命错误，不再重试: {}", error);
                return Err(error);
            }

            if attempt >= self.retry.max_attempts {
                warn!("LLM 重试耗尽（共 {} 次）: {}", attempt, error);
                return Err(LlmError::RetriesExhausted {
                    model: model.to_string(),
                    attempts: attempt,
                    last_message: error_message(&error),
                });
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                "LLM 临时错误，{:?} 后重试（第 {}/{} 次）: {}",
                delay, attempt, self.retry.max_attempts, error
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn error_message(error: &LlmError) -> String {
    match error {
        LlmError::Transient { message, .. } | LlmError::Fatal { message, .. } => message.clone(),
        LlmError::RetriesExhausted { last_message, .. } => last_message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::completion_backend::test_support::ScriptedBackend;

    fn test_config() -> Config {
        Config {
            llm_model_name: "test-model".to_string(),
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
            ..Config::default()
        }
    }

    fn service_with(backend: ScriptedBackend) -> LlmService {
        LlmService::new(
            &test_config(),
            Arc::new(backend),
            Arc::new(ResponseCache::new(16)),
        )
    }

    #[test]
    fn test_retry_delay_is_capped_exponential() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(6), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_second_identical_call_hits_cache() {
        let backend = ScriptedBackend::new(|_, _| Ok("回答".to_string()));
        let service = service_with(backend.clone());
        let mut stats = CallStats::default();

        let first = service.complete(Some("系统"), "问题", &mut stats).await.unwrap();
        let second = service.complete(Some("系统"), "问题", &mut stats).await.unwrap();

        assert_eq!(first.source, CacheSource::Fetched);
        assert!(second.cache_hit());
        assert_eq!(second.text, "回答");
        assert_eq!(backend.calls(), 1);
        assert_eq!(stats.llm_calls, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.token_usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_concurrent_identical_calls_share_one_backend_call() {
        let backend = ScriptedBackend::new(|_, _| Ok("共享结果".to_string()))
            .with_delay(Duration::from_millis(50));
        let service = service_with(backend.clone());
        let mut stats_a = CallStats::default();
        let mut stats_b = CallStats::default();

        let (a, b) = tokio::join!(
            service.complete(None, "相同提示词", &mut stats_a),
            service.complete(None, "相同提示词", &mut stats_b),
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.text, b.text);
        assert_eq!(backend.calls(), 1);
        assert_eq!(stats_a.cache_hits + stats_b.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let backend = ScriptedBackend::new(|_, index| {
            if index < 2 {
                Err(LlmError::transient("test-model", "503 Service Unavailable"))
            } else {
                Ok("终于成功".to_string())
            }
        });
        let service = service_with(backend.clone());
        let mut stats = CallStats::default();

        let completion = service.complete(None, "重试", &mut stats).await;
        let completion = tokio_test::assert_ok!(completion);

        assert_eq!(completion.attempts, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let backend = ScriptedBackend::new(|_, _| Err(LlmError::fatal("test-model", "401")));
        let service = service_with(backend.clone());
        let mut stats = CallStats::default();

        let err = tokio_test::assert_err!(service.complete(None, "鉴权", &mut stats).await);

        assert!(matches!(err, LlmError::Fatal { .. }));
        assert_eq!(backend.calls(), 1);
        assert_eq!(stats.retries, 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let backend =
            ScriptedBackend::new(|_, _| Err(LlmError::transient("test-model", "timeout")));
        let service = service_with(backend.clone());
        let mut stats = CallStats::default();

        let err = service.complete(None, "超时", &mut stats).await.unwrap_err();

        assert_eq!(
            err,
            LlmError::RetriesExhausted {
                model: "test-model".to_string(),
                attempts: 3,
                last_message: "timeout".to_string(),
            }
        );
        assert_eq!(backend.calls(), 3);
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_empty_response_is_fatal() {
        let backend = ScriptedBackend::new(|_, _| Ok("   ".to_string()));
        let service = service_with(backend.clone());
        let mut stats = CallStats::default();

        let err = service.complete(None, "空", &mut stats).await.unwrap_err();
        assert!(matches!(err, LlmError::Fatal { .. }));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_different_params_are_different_requests() {
        let backend = ScriptedBackend::new(|request, _| {
            Ok(format!("temperature={}", request.params.temperature))
        });
        let service = service_with(backend.clone());
        let mut stats = CallStats::default();

        let mut cold = service.default_params().clone();
        cold.temperature = 0.0;

        service.complete(None, "同一问题", &mut stats).await.unwrap();
        let second = service
            .complete_with(None, "同一问题", &cold, &mut stats)
            .await
            .unwrap();

        assert_eq!(second.source, CacheSource::Fetched);
        assert_eq!(backend.calls(), 2);
    }
}
