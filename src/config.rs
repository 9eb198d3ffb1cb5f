use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError};

/// 程序配置
///
/// 加载顺序：默认值 → TOML 配置文件 → 环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 单次调用的最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 指数退避的基础间隔（毫秒）
    pub backoff_base_ms: u64,
    /// 退避间隔上限（毫秒）
    pub backoff_max_ms: u64,

    // --- 缓存配置 ---
    /// 缓存条目上限，0 表示不缓存
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,

    // --- 审稿循环配置 ---
    /// 审稿分数低于该值时触发重新润色
    pub acceptance_threshold: f64,
    /// 单次运行中润色阶段的最大次数
    pub max_polish_attempts: u32,

    // --- 文献分析配置 ---
    pub max_keywords: usize,
    pub max_literature_count: usize,
    pub max_references: usize,
    pub passages_per_literature: usize,
    pub manuscript_preview_limit: usize,
    /// 文献元数据缓存目录，`None` 表示不持久化
    pub metadata_cache_dir: Option<String>,
    /// 预处理时覆盖已有的元数据
    pub metadata_force_update: bool,

    // --- 运行配置 ---
    /// 同时执行的运行数量
    pub max_concurrent_runs: usize,
    pub output_dir: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            llm_model_name: "qwen-plus".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            cache_capacity: 256,
            cache_ttl_secs: 3600,
            acceptance_threshold: 0.7,
            max_polish_attempts: 2,
            max_keywords: 10,
            max_literature_count: 50,
            max_references: 10,
            passages_per_literature: 2,
            manuscript_preview_limit: 3000,
            metadata_cache_dir: Some("cache/metadata".to_string()),
            metadata_force_update: false,
            max_concurrent_runs: 4,
            output_dir: "output".to_string(),
            verbose_logging: false,
            output_log_file: "manuscript_polish_workflow.log".to_string(),
        }
    }
}

impl Config {
    /// 加载配置：默认值 → 配置文件（可选）→ 环境变量
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    /// 只使用默认值和环境变量
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件读取配置，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        Self::from_toml_str(&content).map_err(|source| {
            AppError::Config(ConfigError::TomlParseFailed {
                path: path.display().to_string(),
                source,
            })
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn with_env_overrides(mut self) -> AppResult<Self> {
        if let Some(key) = env_string("LLM_API_KEY")
            .or_else(|| env_string("QWEN_API_KEY"))
            .or_else(|| env_string("DASHSCOPE_API_KEY"))
        {
            self.llm_api_key = key;
        }
        if let Some(v) = env_string("LLM_API_BASE_URL") {
            self.llm_api_base_url = v;
        }
        if let Some(v) = env_string("LLM_MODEL_NAME") {
            self.llm_model_name = v;
        }
        if let Some(v) = env_string("WORKFLOW_OUTPUT_DIR") {
            self.output_dir = v;
        }
        if let Some(v) = env_string("OUTPUT_LOG_FILE") {
            self.output_log_file = v;
        }
        if let Some(v) = env_string("METADATA_CACHE_DIR") {
            self.metadata_cache_dir = Some(v);
        }

        override_parsed(&mut self.temperature, "LLM_TEMPERATURE")?;
        override_parsed(&mut self.max_tokens, "LLM_MAX_TOKENS")?;
        override_parsed(&mut self.max_attempts, "LLM_MAX_ATTEMPTS")?;
        override_parsed(&mut self.backoff_base_ms, "LLM_BACKOFF_BASE_MS")?;
        override_parsed(&mut self.backoff_max_ms, "LLM_BACKOFF_MAX_MS")?;
        override_parsed(&mut self.cache_capacity, "CACHE_CAPACITY")?;
        override_parsed(&mut self.cache_ttl_secs, "CACHE_TTL_SECS")?;
        override_parsed(&mut self.acceptance_threshold, "ACCEPTANCE_THRESHOLD")?;
        override_parsed(&mut self.max_polish_attempts, "MAX_POLISH_ATTEMPTS")?;
        override_parsed(&mut self.max_literature_count, "MAX_LITERATURE_COUNT")?;
        override_parsed(&mut self.max_references, "MAX_REFERENCES")?;
        override_parsed(&mut self.max_concurrent_runs, "MAX_CONCURRENT_RUNS")?;
        override_parsed(&mut self.verbose_logging, "VERBOSE_LOGGING")?;
        override_parsed(&mut self.metadata_force_update, "METADATA_FORCE_UPDATE")?;

        Ok(self)
    }

    /// 校验配置，调用真实服务前必须通过
    pub fn validate(&self) -> AppResult<()> {
        if self.llm_api_key.trim().is_empty() {
            return Err(AppError::invalid_config(
                "llm_api_key",
                "未设置 LLM API Key，请设置 LLM_API_KEY / QWEN_API_KEY / DASHSCOPE_API_KEY 环境变量",
            ));
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(AppError::invalid_config(
                "acceptance_threshold",
                format!("必须位于 [0, 1]，当前为 {}", self.acceptance_threshold),
            ));
        }
        if self.max_attempts == 0 {
            return Err(AppError::invalid_config("max_attempts", "至少为 1"));
        }
        if self.max_polish_attempts == 0 {
            return Err(AppError::invalid_config("max_polish_attempts", "至少为 1"));
        }
        if self.max_concurrent_runs == 0 {
            return Err(AppError::invalid_config("max_concurrent_runs", "至少为 1"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, var_name: &str) -> AppResult<()> {
    if let Some(value) = env_string(var_name) {
        *target = value.trim().parse().map_err(|_| {
            AppError::Config(ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value: value.clone(),
                expected_type: std::any::type_name::<T>().to_string(),
            })
        })?;
    }
    Ok(())
}
