//! 工具选择器
//!
//! 用一次轻量分类调用从注册表中挑出与本次请求相关的工具子集。
//! 任何解析失败或调用失败都回退到全量工具（fail-open）；只有取消会向上传播。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{check_aborted, AgentError};
use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::react::prompt::AgentContext;
use crate::react::todo::unfence;
use crate::tools::{ToolRegistry, ToolSet};

/// 工具选择器
pub struct ToolSelector {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    enabled: bool,
    min_tools: usize,
}

impl ToolSelector {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            registry,
            enabled: true,
            min_tools: 0,
        }
    }

    /// 关闭后始终使用全量工具
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 工具数不超过 min_tools 时跳过分类调用
    pub fn with_min_tools(mut self, min_tools: usize) -> Self {
        self.min_tools = min_tools;
        self
    }

    fn system_prompt(&self, context: &AgentContext) -> String {
        let catalog: Vec<String> = self
            .registry
            .summaries()
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect();
        let mut system = format!(
            "You are a tool selector. Given the user's request, choose the tools that may be needed to fulfil it.\n\
             Reply with ONLY a JSON array of tool names, e.g. [\"tool_a\", \"tool_b\"]. No explanation.\n\n\
             Available tools:\n{}",
            catalog.join("\n")
        );
        if let Some(block) = context.context_block() {
            system.push_str("\n\n");
            system.push_str(&block);
        }
        system
    }

    /// 选择工具子集
    pub async fn select_tools(
        &self,
        prompt: &str,
        context: &AgentContext,
        token: &CancellationToken,
    ) -> Result<ToolSet, AgentError> {
        check_aborted(token)?;

        if !self.enabled || self.registry.len() <= self.min_tools {
            return Ok(self.registry.full_set());
        }

        let request = ChatRequest::new(vec![
            ChatMessage::system(self.system_prompt(context)),
            ChatMessage::user(prompt),
        ]);
        let result = self.llm.chat(&request).await;
        check_aborted(token)?;

        let content = match result {
            Ok(resp) => resp.content,
            Err(e) => {
                tracing::warn!(error = %e, "tool selection call failed, using all tools");
                return Ok(self.registry.full_set());
            }
        };

        let names = match parse_tool_names(&content) {
            Ok(names) if !names.is_empty() => names,
            Ok(_) => {
                tracing::debug!("empty tool selection, using all tools");
                return Ok(self.registry.full_set());
            }
            Err(e) => {
                tracing::debug!(error = %e, response = %content, "tool selection unparseable, using all tools");
                return Ok(self.registry.full_set());
            }
        };

        let set = self.registry.subset(&names);
        if set.is_empty() {
            tracing::debug!(?names, "no known tools selected, using all tools");
            return Ok(self.registry.full_set());
        }
        tracing::info!(tools = ?set.names(), narrowed = set.is_narrowed(), "tools selected");
        Ok(set)
    }
}

/// 解析模型回复中的第一个 JSON 字符串数组（允许围栏与前后说明文字）
fn parse_tool_names(content: &str) -> Result<Vec<String>, AgentError> {
    let body = unfence(content);
    if let Ok(names) = serde_json::from_str::<Vec<String>>(body) {
        return Ok(names);
    }
    let array = body
        .find('[')
        .and_then(|start| body[start..].find(']').map(|end| &body[start..=start + end]))
        .ok_or_else(|| AgentError::ProtocolParse("no JSON array in tool selection reply".to_string()))?;
    serde_json::from_str::<Vec<String>>(array)
        .map_err(|e| AgentError::ProtocolParse(format!("tool selection array: {}", e)))
}
