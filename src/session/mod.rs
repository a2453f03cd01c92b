//! 会话层：消息实体与消息存储

pub mod message;
pub mod store;

pub use message::{
    new_id, now_millis, AgentExecution, ChatMode, ExecutionStatus, Message, MessageBody,
    TodoItem, TodoStatus, ToolCallRecord, ToolCallStatus,
};
pub use store::{InMemoryMessageStore, MessageStore, SqliteMessageStore};
