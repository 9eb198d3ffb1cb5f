//! LLM 补全后端 - 基础设施层
//!
//! 只负责把一次请求发到外部服务并把错误归类，不做重试和缓存。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（通义千问 DashScope 兼容模式、Azure 等）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ErrorKind, LlmError};
use crate::infrastructure::fingerprint::CompletionParams;

/// token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// 一次补全请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub params: CompletionParams,
}

/// 一次补全响应
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// 补全后端
///
/// 实现者必须把错误归类为 [`LlmError::Transient`] 或 [`LlmError::Fatal`]，
/// 重试由 [`crate::services::LlmService`] 负责。
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// OpenAI 兼容接口后端
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
}

impl OpenAiBackend {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = &request.params.model;
        debug!("调用 LLM API，模型: {}", model);
        debug!("用户消息长度: {} 字符", request.prompt.chars().count());

        let build_failed = |e: OpenAIError| LlmError::fatal(model.as_str(), format!("构建请求失败: {}", e));

        let mut messages = Vec::new();

        if let Some(sys_msg) = &request.system {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg.as_str())
                .build()
                .map_err(build_failed)?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.as_str())
            .build()
            .map_err(build_failed)?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(model.as_str())
            .messages(messages)
            .temperature(request.params.temperature)
            .max_tokens(request.params.max_tokens)
            .build()
            .map_err(build_failed)?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_openai_error(model, e)
        })?;

        debug!("LLM API 调用成功");

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse { text, usage })
    }
}

/// 把 `async-openai` 的错误归类为临时或致命
fn classify_openai_error(model: &str, err: OpenAIError) -> LlmError {
    let kind = match &err {
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) => classify_status(status.as_u16()),
            None if e.is_builder() => ErrorKind::Fatal,
            None => ErrorKind::Transient,
        },
        OpenAIError::ApiError(api) => {
            classify_api_error(api.code.as_deref(), api.r#type.as_deref(), &api.message)
        }
        OpenAIError::InvalidArgument(_) => ErrorKind::Fatal,
        _ => ErrorKind::Transient,
    };

    match kind {
        ErrorKind::Fatal => LlmError::fatal(model, err.to_string()),
        _ => LlmError::transient(model, err.to_string()),
    }
}

/// 按 HTTP 状态码归类
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        408 | 409 | 425 | 429 => ErrorKind::Transient,
        500..=599 => ErrorKind::Transient,
        400..=499 => ErrorKind::Fatal,
        _ => ErrorKind::Transient,
    }
}

const FATAL_MARKERS: &[&str] = &[
    "invalid_api_key",
    "authentication",
    "unauthorized",
    "permission",
    "access_denied",
    "invalid_request",
    "model_not_found",
    "not_found",
    "context_length_exceeded",
    "insufficient_quota",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "rate_limit",
    "ratelimit",
    "throttl",
    "server_error",
    "overloaded",
    "timeout",
    "timed out",
    "temporarily",
    "unavailable",
];

/// 按接口返回的错误码 / 类型 / 信息归类
///
/// 错误码和类型优先于错误信息；无法识别的错误视为临时错误。
pub fn classify_api_error(code: Option<&str>, error_type: Option<&str>, message: &str) -> ErrorKind {
    let tagged = [code, error_type]
        .iter()
        .flatten()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    if TRANSIENT_MARKERS.iter().any(|m| tagged.contains(m)) {
        return ErrorKind::Transient;
    }
    if FATAL_MARKERS.iter().any(|m| tagged.contains(m)) {
        return ErrorKind::Fatal;
    }

    let message = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorKind::Transient;
    }
    if FATAL_MARKERS.iter().any(|m| message.contains(m)) || message.contains("api key") {
        return ErrorKind::Fatal;
    }

    ErrorKind::Transient
}

#[cfg(test)]
pub(crate) mod test_support {
    //! 测试用的脚本化后端

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    type Script = dyn Fn(&CompletionRequest, usize) -> Result<String, LlmError> + Send + Sync;

    /// 根据请求内容和调用序号返回响应，并记录调用次数
    #[derive(Clone)]
    pub struct ScriptedBackend {
        script: Arc<Script>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ScriptedBackend {
        pub fn new(
            script: impl Fn(&CompletionRequest, usize) -> Result<String, LlmError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Arc::new(script),
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let text = (self.script)(request, index)?;
            Ok(CompletionResponse {
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
                text,
            })
        }
    }
}
