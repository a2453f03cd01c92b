//! 执行消息跟踪
//!
//! 持有本次运行的 agentExecution 快照。每次 patch 在副本上修改，写入存储成功后才替换快照，
//! 并推送 ExecutionUpdated 事件。工具调用记录按追加位置（slot）更新，顺序保持追加顺序。

use std::sync::Arc;

use crate::core::AgentError;
use crate::react::events::{send_event, AgentEvent, EventSender};
use crate::session::{AgentExecution, ExecutionStatus, Message, MessageBody, MessageStore, ToolCallRecord};

pub struct ExecutionTracker {
    message: Message,
    execution: AgentExecution,
    store: Arc<dyn MessageStore>,
    events: Option<EventSender>,
}

fn store_err(e: anyhow::Error) -> AgentError {
    AgentError::Store(e.to_string())
}

impl ExecutionTracker {
    /// 创建 running 状态的执行消息并落盘
    pub async fn start(
        store: Arc<dyn MessageStore>,
        session_id: &str,
        prompt: &str,
        events: Option<EventSender>,
    ) -> Result<Self, AgentError> {
        let message = Message::agent_execution(session_id, prompt);
        let execution = AgentExecution::new(prompt);
        store.add_message(&message).await.map_err(store_err)?;
        let tracker = Self {
            message,
            execution,
            store,
            events,
        };
        tracker.publish();
        Ok(tracker)
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn execution(&self) -> &AgentExecution {
        &self.execution
    }

    pub fn events(&self) -> &Option<EventSender> {
        &self.events
    }

    fn publish(&self) {
        send_event(
            &self.events,
            AgentEvent::ExecutionUpdated {
                message: self.message.clone(),
            },
        );
    }

    /// 在副本上应用修改并写入存储
    pub async fn patch(&mut self, f: impl FnOnce(&mut AgentExecution)) -> Result<(), AgentError> {
        let mut next = self.execution.clone();
        f(&mut next);
        let message = Message {
            body: MessageBody::AgentExecution(next.clone()),
            ..self.message.clone()
        };
        self.store.update_message(&message).await.map_err(store_err)?;
        self.execution = next;
        self.message = message;
        self.publish();
        Ok(())
    }

    /// 按模型请求顺序追加一批工具调用记录，返回第一条的 slot
    pub async fn append_tool_calls(&mut self, records: Vec<ToolCallRecord>) -> Result<usize, AgentError> {
        let first = self.execution.tool_calls.len();
        self.patch(|exec| exec.tool_calls.extend(records)).await?;
        Ok(first)
    }

    pub fn tool_call(&self, slot: usize) -> Option<&ToolCallRecord> {
        self.execution.tool_calls.get(slot)
    }

    pub async fn update_tool_call(
        &mut self,
        slot: usize,
        f: impl FnOnce(&mut ToolCallRecord),
    ) -> Result<(), AgentError> {
        let calls = self.execution.with_tool_call_at(slot, f);
        self.patch(|exec| exec.tool_calls = calls).await
    }

    pub async fn finish_success(&mut self) -> Result<(), AgentError> {
        self.patch(|exec| {
            exec.status = ExecutionStatus::Success;
            exec.is_streaming = false;
        })
        .await
    }

    /// 中止收尾：未结束的工具调用转为 cancelled
    pub async fn finish_aborted(&mut self) -> Result<(), AgentError> {
        self.patch(AgentExecution::mark_aborted).await
    }

    /// 非中止失败：删除执行消息
    pub async fn discard(&self) -> Result<(), AgentError> {
        self.store
            .delete_message(&self.message.id)
            .await
            .map_err(store_err)
    }
}
