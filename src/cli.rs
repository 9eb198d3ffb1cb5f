use std::path::PathBuf;

use clap::Parser;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(
    name = "manuscript-polish",
    version,
    about = "结合参考文献，用 LLM 润色学术手稿"
)]
pub struct Cli {
    /// 手稿文件（.md / .txt），可重复指定以批量处理
    #[arg(short = 'm', long = "manuscript", value_name = "FILE", required = true)]
    pub manuscripts: Vec<PathBuf>,

    /// 参考文献目录（递归扫描 .md / .txt）
    #[arg(short = 'l', long, value_name = "DIR")]
    pub literature: PathBuf,

    /// 运行前用本地规则批量提取文献元数据并写入元数据缓存
    #[arg(short = 'p', long)]
    pub preprocess: bool,

    /// 预处理时覆盖元数据缓存中已有的条目
    #[arg(short = 'f', long, requires = "preprocess")]
    pub force_update: bool,

    /// 显示详细日志
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// TOML 配置文件
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 输出目录（覆盖配置）
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}
