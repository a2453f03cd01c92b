//! 运行过程事件：供前端实时展示工具调用、计划进度与执行消息快照

use serde::Serialize;

use crate::session::Message;

/// 单次运行中的过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    RunStarted { session_id: String, run_id: String },
    /// 工具筛选结果
    ToolsSelected { names: Vec<String>, narrowed: bool },
    /// 第几轮 LLM 调用
    TurnStarted { turn: usize, max_turns: usize },
    PlanInstalled { steps: usize },
    StepCompleted { step: u32 },
    /// 模型在请求工具前给出的思考内容
    Thinking { text: String },
    ToolCallStarted { id: String, name: String },
    ToolCallFinished { id: String, name: String, success: bool },
    /// 子集无进展，改用全量工具重跑
    FallbackStarted,
    /// agentExecution 消息的最新快照
    ExecutionUpdated { message: Message },
    RunFinished { status: String },
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<AgentEvent>;

pub(crate) fn send_event(tx: &Option<EventSender>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
