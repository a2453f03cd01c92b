//! apidesk - API 设计工具的 Agent 执行引擎
//!
//! 模块划分：
//! - **agent**: 运行编排（工具筛选 -> 主循环 -> 全量回退 -> 收尾）
//! - **ask**: 单轮流式问答
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、取消协调、视图状态
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **react**: 工具筛选、计划标记解析、主循环、执行消息跟踪
//! - **session**: 消息模型与消息存储（内存 / SQLite）
//! - **tools**: 工具注册表、执行器与领域工具

pub mod agent;
pub mod ask;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod react;
pub mod session;
pub mod tools;

pub use agent::{create_agent_components, AgentComponents, AgentRunner, RunOutcome};
pub use ask::AskPipeline;
