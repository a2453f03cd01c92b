//! 工具执行器
//!
//! 对单次工具调用施加可选超时，并输出结构化审计日志（JSON）。
//! 工具返回的 Aborted 原样传播；超时转为 ToolTimeout。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolOutput};

/// 工具执行器；timeout 为 None 时不限时
#[derive(Clone, Debug, Default)]
pub struct ToolExecutor {
    timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(timeout_secs: Option<u64>) -> Self {
        Self {
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    /// 执行工具并记录审计日志
    pub async fn execute(&self, tool: &Arc<dyn Tool>, args: Value) -> Result<ToolOutput, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = match self.timeout {
            Some(limit) => match timeout(limit, tool.execute(args)).await {
                Ok(r) => r,
                Err(_) => Err(AgentError::ToolTimeout(tool.name().to_string())),
            },
            None => tool.execute(args).await,
        };

        let outcome = match &result {
            Ok(out) if out.is_success() => "ok",
            Ok(_) => "error_code",
            Err(AgentError::Aborted) => "aborted",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool.name(),
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<ToolOutput, AgentError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::ok(Value::Null))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let tool: Arc<dyn Tool> = Arc::new(SlowTool);
        let err = ToolExecutor::new(Some(1))
            .execute(&tool, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(name) if name == "slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timeout_by_default() {
        let tool: Arc<dyn Tool> = Arc::new(SlowTool);
        let out = ToolExecutor::default().execute(&tool, Value::Null).await.unwrap();
        assert!(out.is_success());
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = Value::String("x".repeat(500));
        assert!(args_preview(&long).ends_with("..."));
        assert_eq!(args_preview(&Value::Null), "null");
    }
}
