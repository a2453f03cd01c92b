//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与流式解码

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod streaming;
pub mod traits;

pub use deepseek::{create_deepseek_client, deepseek_api_key, DEEPSEEK_CHAT};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use streaming::{decode_stream, SseDecoder};
pub use traits::{
    ChatMessage, ChatRequest, ChatResponse, ChatStream, FinishReason, LlmClient, LlmError, Role,
    StreamEvent, ToolCallRequest, ToolSpec, Usage,
};
