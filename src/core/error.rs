//! Agent 错误类型
//!
//! Aborted 是用户主动取消的专用信号，优先级高于普通错误：编排器据此保留（而非丢弃）执行中的消息。
//! 工具类错误记录在单个 ToolCallRecord 上并回灌给模型，不会中止运行。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 用户取消（Stop generating）
    #[error("Aborted by user")]
    Aborted,

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    /// 计划标记、步骤标记或工具筛选 JSON 解析失败（调用方总是降级处理）
    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl AgentError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, AgentError::Aborted)
    }

    /// 错误分类，写入 error 消息供前端展示
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Aborted => ErrorKind::Aborted,
            AgentError::ToolNotFound(_)
            | AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_) => ErrorKind::Tool,
            AgentError::LlmError(LlmError::Http(_)) => ErrorKind::Network,
            AgentError::LlmError(_) => ErrorKind::Model,
            AgentError::ProtocolParse(_) => ErrorKind::Protocol,
            AgentError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// error 消息上的错误分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Aborted,
    Network,
    Model,
    Tool,
    Protocol,
    Internal,
}
