//! apidesk 命令行入口
//!
//! `apidesk [--config <file>] [--session <id>] "<prompt>"`：对演示工作区执行一次 Agent 请求。
//! 没有 API Key 时使用 Mock LLM；Ctrl+C 取消当前运行。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use apidesk::config::load_config;
use apidesk::react::{AgentContext, AgentEvent, ToolConfirmer};
use apidesk::session::{new_id, ToolCallRecord};
use apidesk::{create_agent_components, observability, AgentRunner, RunOutcome};

/// 在终端询问是否执行需要确认的工具
struct StdinConfirmer;

#[async_trait]
impl ToolConfirmer for StdinConfirmer {
    async fn confirm(&self, call: &ToolCallRecord) -> bool {
        let mut stdout = tokio::io::stdout();
        let question = format!("Allow {} with {}? [y/N] ", call.name, call.arguments);
        if stdout.write_all(question.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            return false;
        }
        let mut line = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
            Err(_) => false,
        }
    }
}

/// 对演示工作区执行一次 Agent 请求
#[derive(Parser, Debug)]
#[command(name = "apidesk", about = "Agent execution engine for API design workspaces", long_about = None)]
struct Args {
    /// 额外的 TOML 配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 会话 id，缺省时沿用上次会话
    #[arg(long)]
    session: Option<String>,

    /// 用户请求
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
}

impl Args {
    fn prompt(&self) -> String {
        self.prompt.join(" ")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = Args::parse();
    let prompt = args.prompt();
    if prompt.trim().is_empty() {
        anyhow::bail!("prompt must not be empty");
    }
    let cfg = load_config(args.config).context("Failed to load config")?;
    let components = create_agent_components(&cfg)
        .await
        .context("Failed to create agent components")?;

    let session_id = match args.session {
        Some(id) => id,
        None => components
            .store
            .get_last_session_id()
            .await?
            .unwrap_or_else(new_id),
    };

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let runner = AgentRunner::from_components(&components, cfg.agent.clone())
        .with_confirmer(Arc::new(StdinConfirmer))
        .with_event_tx(event_tx);

    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            match ev {
                AgentEvent::ToolCallStarted { name, .. } => eprintln!("  -> {}", name),
                AgentEvent::ToolCallFinished { name, success, .. } => {
                    eprintln!("  <- {} ({})", name, if success { "ok" } else { "error" })
                }
                AgentEvent::PlanInstalled { steps } => eprintln!("  plan: {} steps", steps),
                AgentEvent::StepCompleted { step } => eprintln!("  step {} done", step),
                AgentEvent::FallbackStarted => eprintln!("  retrying with all tools"),
                _ => {}
            }
        }
    });

    let runs = runner.runs().clone();
    let stop_session = session_id.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            runs.stop(&stop_session);
        }
    });

    let outcome = runner
        .run(&session_id, &prompt, &AgentContext::default())
        .await;
    // 关闭事件通道，等待剩余事件输出完毕
    drop(runner);
    let _ = printer.await;

    match outcome {
        RunOutcome::Completed { content } => {
            println!("{}", content);
            Ok(())
        }
        RunOutcome::Aborted { error } => {
            eprintln!("{}", error);
            Ok(())
        }
        RunOutcome::Failed { error, kind } => anyhow::bail!("run failed ({:?}): {}", kind, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_join_prompt_words() {
        let args = Args::try_parse_from(["apidesk", "--session", "s1", "list", "my", "projects"]).unwrap();
        assert_eq!(args.session.as_deref(), Some("s1"));
        assert_eq!(args.config, None);
        assert_eq!(args.prompt(), "list my projects");
    }

    #[test]
    fn test_args_require_prompt() {
        assert!(Args::try_parse_from(["apidesk", "--config", "dev.toml"]).is_err());
    }

    #[test]
    fn test_args_option_needs_value() {
        assert!(Args::try_parse_from(["apidesk", "hello", "--session"]).is_err());
    }
}
