//! 运行上下文
//!
//! 封装"我正在润色哪一篇手稿"这一信息

use std::fmt::Display;

use uuid::Uuid;

/// 运行上下文
///
/// 每次运行生成新的 run_id，日志里用短 id 区分并发的运行
#[derive(Debug, Clone)]
pub struct RunCtx {
    /// 运行ID
    pub run_id: Uuid,

    /// 手稿标题
    pub title: String,

    /// 批量运行中的序号（从1开始，仅用于日志显示）
    pub run_index: usize,
}

impl RunCtx {
    /// 创建新的运行上下文
    pub fn new(title: impl Into<String>, run_index: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            title: title.into(),
            run_index,
        }
    }

    /// run_id 的前 8 位
    pub fn short_id(&self) -> String {
        self.run_id.simple().to_string()[..8].to_string()
    }
}

impl Display for RunCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[运行 #{} {}]", self.run_index, self.short_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ctx_display_and_unique_ids() {
        let a = RunCtx::new("稿件", 1);
        let b = RunCtx::new("稿件", 2);

        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.short_id().len(), 8);
        assert_eq!(a.to_string(), format!("[运行 #1 {}]", a.short_id()));
    }
}
