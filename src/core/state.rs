//! 视图状态：ChatView 投影
//!
//! 前端只持有轻量的 ChatView（会话消息 + 流式状态）；loading 占位只存在于这里，从不写入消息存储。

use serde::Serialize;

use crate::session::{Message, MessageStore};

/// 流式输出状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamingState {
    Idle,
    /// 已发出请求，尚未收到首个增量
    Waiting,
    Streaming,
}

/// 单个会话的视图状态
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub streaming: StreamingState,
}

impl ChatView {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            streaming: StreamingState::Idle,
        }
    }

    /// 从存储恢复会话（不含 loading）
    pub async fn load(store: &dyn MessageStore, session_id: &str) -> anyhow::Result<Self> {
        let mut view = Self::new(session_id);
        view.messages = store.get_messages_by_session_id(session_id).await?;
        Ok(view)
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// 用新消息替换指定 id 的消息（位置不变）；不存在时追加
    pub fn replace(&mut self, id: &str, message: Message) {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(slot) => *slot = message,
            None => self.messages.push(message),
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.messages.retain(|m| m.id != id);
    }

    pub fn has_loading(&self) -> bool {
        self.messages.iter().any(|m| m.is_loading())
    }
}
