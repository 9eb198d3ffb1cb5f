use serde::Serialize;
use thiserror::Error;

/// 错误类别
///
/// 编排层只根据类别决定运行的走向，不关心具体的错误来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 可重试的网络 / 限流错误
    Transient,
    /// 鉴权失败、请求格式错误等不可恢复错误
    Fatal,
    /// 阶段输出不符合预期结构（例如无法解析审稿分数）
    Validation,
    /// 运行被取消
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// LLM 调用错误
///
/// 需要 `Clone`：同一指纹的并发请求共享首个调用的结果（包括错误）。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    /// 临时错误，可以重试
    #[error("LLM 临时错误 (模型: {model}): {message}")]
    Transient { model: String, message: String },

    /// 致命错误，不重试
    #[error("LLM 致命错误 (模型: {model}): {message}")]
    Fatal { model: String, message: String },

    /// 重试次数耗尽
    #[error("LLM 重试耗尽 (模型: {model}, 共尝试 {attempts} 次): {last_message}")]
    RetriesExhausted {
        model: String,
        attempts: u32,
        last_message: String,
    },
}

impl LlmError {
    pub fn transient(model: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Transient {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn fatal(model: impl Into<String>, message: impl Into<String>) -> Self {
        LlmError::Fatal {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Transient { .. } | LlmError::RetriesExhausted { .. } => ErrorKind::Transient,
            LlmError::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient { .. })
    }
}

/// 流水线阶段错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// 阶段输出校验失败
    #[error("阶段输出校验失败: {0}")]
    Validation(String),
}

impl StageError {
    pub fn validation(message: impl Into<String>) -> Self {
        StageError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Llm(e) => e.kind(),
            StageError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// 应用程序错误类型
///
/// 只在编排核心之外使用（配置加载、文件读写、产物输出）。
#[derive(Debug, Error)]
pub enum AppError {
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 流水线阶段错误
    #[error("阶段错误: {0}")]
    Stage(#[from] StageError),

    /// JSON 序列化失败
    #[error("JSON序列化失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// 配置文件解析失败
    #[error("配置文件解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// 配置值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    Invalid { field: String, reason: String },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建配置项不合法错误
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
