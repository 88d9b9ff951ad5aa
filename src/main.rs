//! ADDM - 自适应协调引擎
//!
//! 入口：加载配置、初始化日志、选择生成后端，对命令行给出的任务跑一次完整的协调流程，
//! 流式输出生成内容，最后打印引擎状态快照。
//!
//! 用法：`addm [--config <path>] <task...>`

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use addm::addm::LoopSession;
use addm::config::load_config;
use addm::core::{create_llm_from_config, CoordinationEngine};
use addm::observability;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn parse_args() -> (Option<PathBuf>, String) {
    let mut config_path = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = args.next().map(PathBuf::from);
        } else {
            words.push(arg);
        }
    }
    (config_path, words.join(" "))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config_path, task) = parse_args();
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);
    cfg.validate().context("Invalid config")?;

    let task = if task.trim().is_empty() {
        "Explain how ocean tides work".to_string()
    } else {
        task
    };

    let client = create_llm_from_config(&cfg);
    let engine = CoordinationEngine::with_client(cfg, client.clone())
        .context("Failed to create coordination engine")?;

    // Ctrl-C 在两个章节之间取消
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (stream_tx, mut stream_rx) = broadcast::channel::<String>(1024);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Ok(chunk) = stream_rx.recv().await {
            let _ = write!(stdout, "{chunk}");
            let _ = stdout.flush();
        }
    });

    let session = LoopSession::new(cancel)
        .with_stream_tx(&stream_tx)
        .with_compile_document(true);
    let result = engine.run_task(&task, session).await;
    drop(stream_tx);
    let _ = printer.await;
    println!();

    let failure = match result {
        Ok(report) => {
            println!("\n===== final ({:?}, quality {:.2}) =====", report.outcome.termination, report.quality());
            println!("{}", report.final_content());
            None
        }
        Err(failure) => {
            eprintln!(
                "\nTask failed after {} section(s): {}",
                failure.state.sections.len(),
                failure.source
            );
            Some(failure)
        }
    };

    let (prompt_tokens, completion_tokens, total_tokens) = client.token_usage();
    if total_tokens > 0 {
        println!("\ntokens: prompt {prompt_tokens}, completion {completion_tokens}, total {total_tokens}");
    }

    let snapshot = serde_json::to_string_pretty(&engine.snapshot())
        .context("Failed to serialize snapshot")?;
    println!("\n===== engine status =====\n{snapshot}");

    if let Some(failure) = failure {
        anyhow::bail!(failure);
    }
    Ok(())
}
