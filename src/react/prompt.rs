//! 提示词与对话上下文拼装
//!
//! transcript = system prompt + 上下文块 + 最近 N 条可作上下文的历史 + 本次用户输入。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;
use crate::session::{Message, MessageBody};

/// Agent 模式系统提示词（含计划 / 步骤标记约定）
pub const AGENT_SYSTEM_PROMPT: &str = r#"You are an assistant inside an API design and testing tool. You help the user manage projects, API endpoints (nodes) and environment variables by calling the provided tools.

Rules:
- Call tools whenever you need data or need to change something; never invent ids.
- Tool calls are executed one at a time in the order you request them.
- If the task needs more than two steps, first output a plan exactly once:
  <todo_plan>[{"stepNumber":1,"title":"..."},{"stepNumber":2,"title":"..."},{"stepNumber":3,"title":"..."}]</todo_plan>
- Whenever you finish a step of that plan, output <step_done>N</step_done> with the step number.
- When you are done, reply to the user with a short, concrete summary."#;

/// Ask 模式系统提示词
pub const ASK_SYSTEM_PROMPT: &str = "You are an assistant inside an API design and testing tool. Answer the user's question concisely. You cannot call tools in this mode.";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub id: String,
    pub name: String,
}

/// 当前界面上下文：激活的项目 / 标签页 / 变量
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub project: Option<ProjectRef>,
    pub active_tab: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl AgentContext {
    pub fn is_empty(&self) -> bool {
        self.project.is_none() && self.active_tab.is_none() && self.variables.is_empty()
    }

    /// 渲染为文本块；无上下文时返回 None
    pub fn context_block(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut lines = vec!["Current context:".to_string()];
        if let Some(project) = &self.project {
            lines.push(format!("- Active project: {} (id: {})", project.name, project.id));
        }
        if let Some(tab) = &self.active_tab {
            lines.push(format!("- Active tab: {}", tab));
        }
        if !self.variables.is_empty() {
            lines.push("- Variables:".to_string());
            for (k, v) in &self.variables {
                lines.push(format!("  - {} = {}", k, v));
            }
        }
        Some(lines.join("\n"))
    }
}

/// 取最近 limit 条可作上下文的 ask / textResponse 消息，转为对话记录
pub fn history_messages(history: &[Message], limit: usize) -> Vec<ChatMessage> {
    let eligible: Vec<ChatMessage> = history
        .iter()
        .filter(|m| m.can_be_context)
        .filter_map(|m| match &m.body {
            MessageBody::Ask { content } => Some(ChatMessage::user(content.clone())),
            MessageBody::TextResponse { content } => Some(ChatMessage::assistant(content.clone())),
            _ => None,
        })
        .collect();
    let skip = eligible.len().saturating_sub(limit);
    eligible.into_iter().skip(skip).collect()
}

/// 拼装完整 transcript
pub fn build_transcript(
    system_prompt: &str,
    context: &AgentContext,
    history: &[Message],
    history_limit: usize,
    prompt: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if let Some(block) = context.context_block() {
        messages.push(ChatMessage::system(block));
    }
    messages.extend(history_messages(history, history_limit));
    messages.push(ChatMessage::user(prompt));
    messages
}
