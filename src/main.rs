mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use cli::Cli;
use manuscript_polish::config::Config;
use manuscript_polish::models::{load_literature_dir, load_manuscript, RunInput};
use manuscript_polish::orchestrator::Orchestrator;
use manuscript_polish::services::OutputWriter;
use manuscript_polish::utils::logging;
use manuscript_polish::workflow::RunOutcome;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let mut config = Config::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(output) = &cli.output {
        config.output_dir = output.display().to_string();
    }
    config.verbose_logging |= cli.verbose;
    config.metadata_force_update |= cli.force_update;

    // 初始化日志
    logging::init(config.verbose_logging);
    config.validate().context("配置校验失败")?;

    if let Err(e) = logging::init_log_file(&config.output_log_file) {
        warn!("无法初始化日志文件 {}: {}", config.output_log_file, e);
    }
    logging::log_startup(&config.llm_model_name, config.max_concurrent_runs);

    // 加载输入
    let literature = load_literature_dir(&cli.literature).await?;
    let mut inputs = Vec::with_capacity(cli.manuscripts.len());
    for path in &cli.manuscripts {
        inputs.push(RunInput {
            manuscript: load_manuscript(path).await?,
            literature: literature.clone(),
            preprocess: cli.preprocess,
        });
    }
    logging::log_inputs_loaded(inputs.len(), literature.len());

    // Ctrl-C 在阶段之间生效
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，当前阶段完成后停止");
            signal_token.cancel();
        }
    });

    let orchestrator = Orchestrator::from_config(&config);
    let outcomes: Vec<RunOutcome> = if inputs.len() == 1 {
        vec![orchestrator.run(&inputs[0], &cancel).await]
    } else {
        orchestrator.run_batch(&inputs, &cancel).await.outcomes
    };

    // 写出产物
    let writer = OutputWriter::new(&config.output_dir);
    for (input, outcome) in inputs.iter().zip(&outcomes) {
        match writer.write(&input.manuscript.title, outcome).await {
            Ok(paths) => {
                let line = format!(
                    "{} | {:?} | 润色稿: {}",
                    input.manuscript.title,
                    outcome.status,
                    paths
                        .polished
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "无".to_string())
                );
                if let Err(e) = logging::append_log_line(&config.output_log_file, &line) {
                    warn!("写入日志文件失败: {}", e);
                }
            }
            Err(e) => error!("保存结果失败 ({}): {}", input.manuscript.title, e),
        }
    }

    let success = outcomes.iter().filter(|o| o.is_success()).count();
    let cancelled = outcomes.iter().filter(|o| o.is_cancelled()).count();
    let failed = outcomes.len() - success - cancelled;
    logging::print_final_stats(
        success,
        failed,
        cancelled,
        outcomes.len(),
        &config.output_log_file,
    );

    if success < outcomes.len() {
        std::process::exit(1);
    }
    Ok(())
}
