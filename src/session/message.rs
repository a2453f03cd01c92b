//! 会话消息实体
//!
//! Message 为带 `type` 判别字段的联合体；公共字段 id / timestamp / sessionId / mode / canBeContext。
//! loading 仅存在于视图状态，永不持久化。agentExecution 携带工具调用、任务计划与执行状态。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ErrorKind;
use crate::llm::Usage;

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 对话模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatMode {
    Agent,
    Ask,
}

/// 会话中的一条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub timestamp: i64,
    pub session_id: String,
    pub mode: ChatMode,
    /// 是否可作为后续请求的历史上下文
    pub can_be_context: bool,
    #[serde(flatten)]
    pub body: MessageBody,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageBody {
    /// 用户提问
    Ask { content: String },
    /// 模型文本回复
    TextResponse { content: String },
    /// 临时占位（仅视图状态）
    Loading,
    Error {
        kind: ErrorKind,
        error: String,
        prompt: String,
    },
    AgentExecution(AgentExecution),
}

impl Message {
    fn build(session_id: &str, mode: ChatMode, can_be_context: bool, body: MessageBody) -> Self {
        Self {
            id: new_id(),
            timestamp: now_millis(),
            session_id: session_id.to_string(),
            mode,
            can_be_context,
            body,
        }
    }

    pub fn ask(session_id: &str, mode: ChatMode, content: impl Into<String>) -> Self {
        Self::build(session_id, mode, true, MessageBody::Ask { content: content.into() })
    }

    pub fn text_response(session_id: &str, mode: ChatMode, content: impl Into<String>) -> Self {
        Self::build(
            session_id,
            mode,
            true,
            MessageBody::TextResponse { content: content.into() },
        )
    }

    pub fn loading(session_id: &str, mode: ChatMode) -> Self {
        Self::build(session_id, mode, false, MessageBody::Loading)
    }

    pub fn error(
        session_id: &str,
        mode: ChatMode,
        kind: ErrorKind,
        error: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self::build(
            session_id,
            mode,
            false,
            MessageBody::Error {
                kind,
                error: error.into(),
                prompt: prompt.into(),
            },
        )
    }

    /// 新建一条 running 状态的 agentExecution 消息
    pub fn agent_execution(session_id: &str, prompt: impl Into<String>) -> Self {
        Self::build(
            session_id,
            ChatMode::Agent,
            false,
            MessageBody::AgentExecution(AgentExecution::new(prompt)),
        )
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.body, MessageBody::Loading)
    }

    pub fn as_execution(&self) -> Option<&AgentExecution> {
        match &self.body {
            MessageBody::AgentExecution(exec) => Some(exec),
            _ => None,
        }
    }

    /// 文本内容（ask / textResponse）
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Ask { content } | MessageBody::TextResponse { content } => Some(content),
            _ => None,
        }
    }
}

/// agentExecution 的整体状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Aborted,
}

/// 一次 Agent 运行在消息上的可见状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExecution {
    pub prompt: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub todo_list: Vec<TodoItem>,
    pub current_todo_id: Option<String>,
    pub status: ExecutionStatus,
    pub thinking_content: Option<String>,
    pub is_streaming: bool,
}

impl AgentExecution {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tool_calls: Vec::new(),
            todo_list: Vec::new(),
            current_todo_id: None,
            status: ExecutionStatus::Running,
            thinking_content: None,
            is_streaming: true,
        }
    }

    /// 返回替换了第 index 条工具调用后的新列表；越界时原样返回
    ///
    /// 按追加位置寻址：服务商可能跨轮复用 tool_call id（如每轮都是 `call_0`）或给出空 id。
    pub fn with_tool_call_at(&self, index: usize, f: impl FnOnce(&mut ToolCallRecord)) -> Vec<ToolCallRecord> {
        let mut calls = self.tool_calls.clone();
        if let Some(call) = calls.get_mut(index) {
            f(call);
        }
        calls
    }

    /// 中止收尾：所有未结束的工具调用转为 cancelled
    pub fn mark_aborted(&mut self) {
        let now = now_millis();
        for call in &mut self.tool_calls {
            if call.status.is_in_flight() {
                call.status = ToolCallStatus::Cancelled;
                call.finished_at.get_or_insert(now);
            }
        }
        self.status = ExecutionStatus::Aborted;
        self.is_streaming = false;
    }
}

/// 单个工具调用的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
    WaitingConfirm,
}

impl ToolCallStatus {
    /// 尚未结束（中止时需转为 cancelled）
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            ToolCallStatus::Pending | ToolCallStatus::Running | ToolCallStatus::WaitingConfirm
        )
    }
}

/// 工具调用记录，仅由创建它的那次运行修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// 与模型给出的 tool_call id 对应
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ToolCallRecord {
    pub fn pending(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
            usage: None,
        }
    }
}

/// 计划步骤状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TodoStatus {
    Pending,
    Running,
    Success,
}

/// 计划中的一步；stepNumber 从 1 连续递增，创建后不重排
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: String,
    pub step_number: u32,
    pub title: String,
    pub status: TodoStatus,
}

impl TodoItem {
    pub fn new(step_number: u32, title: impl Into<String>) -> Self {
        Self {
            id: format!("step-{}", step_number),
            step_number,
            title: title.into(),
            status: TodoStatus::Pending,
        }
    }
}
