//! 请求指纹
//!
//! 由规范化后的提示词和调用参数（模型、温度、最大 token）计算出的 SHA-256，
//! 作为响应缓存的键。

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// LLM 调用参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// 请求指纹，计算后不可变
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn compute(system: Option<&str>, prompt: &str, params: &CompletionParams) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"model\0");
        hasher.update(params.model.as_bytes());
        // 按位写入温度，避免浮点格式化带来的差异
        hasher.update(b"\0temperature\0");
        hasher.update(params.temperature.to_bits().to_le_bytes());
        hasher.update(b"\0max_tokens\0");
        hasher.update(params.max_tokens.to_le_bytes());
        hasher.update(b"\0system\0");
        if let Some(system) = system {
            hasher.update(normalize_prompt(system).as_bytes());
        }
        hasher.update(b"\0prompt\0");
        hasher.update(normalize_prompt(prompt).as_bytes());

        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志用的短前缀
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 统一换行符、去掉行尾空白和首尾空行
pub fn normalize_prompt(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
