//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：回显最后一条 user 消息，作为最终回复（不调用工具）
//! - ScriptedLlmClient：按脚本依次返回预设响应 / 流，并记录每次请求，供引擎测试断言

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::streaming::decode_stream;
use crate::llm::{
    ChatRequest, ChatResponse, ChatStream, LlmClient, LlmError, Role, StreamEvent,
    ToolCallRequest, Usage,
};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn reply(request: &ChatRequest) -> String {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        format!("Echo from Mock: {}", last_user)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse::text(Self::reply(request)))
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, LlmError> {
        let content = Self::reply(request);
        Ok(Box::pin(stream::iter(vec![
            Ok(StreamEvent::Delta(content)),
            Ok(StreamEvent::Done),
        ])))
    }
}

type ChatHook = Box<dyn Fn(&ChatRequest) + Send + Sync>;

/// 脚本化客户端：chat 依次弹出预设响应；chat_stream 依次弹出预设的原始流行（经真实解码器）
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    streams: Mutex<VecDeque<Vec<String>>>,
    requests: Mutex<Vec<ChatRequest>>,
    usage: Mutex<Usage>,
    hook: Option<ChatHook>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次 chat / chat_stream 调用（返回前）执行的回调，如在调用过程中触发取消
    pub fn with_hook(mut self, hook: impl Fn(&ChatRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn push_response(&self, response: ChatResponse) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn push_text(&self, content: &str) -> &Self {
        self.push_response(ChatResponse::text(content))
    }

    /// 请求工具调用：calls 为 (id, name, arguments JSON)
    pub fn push_tool_calls(&self, content: &str, calls: &[(&str, &str, &str)]) -> &Self {
        let calls = calls
            .iter()
            .map(|(id, name, args)| ToolCallRequest {
                id: id.to_string(),
                name: name.to_string(),
                arguments: args.to_string(),
            })
            .collect();
        self.push_response(ChatResponse::with_tool_calls(content, calls))
    }

    pub fn push_error(&self, err: LlmError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    /// 预设一次流式响应的原始行（如 `data: {...}`、`data: [DONE]`）
    pub fn push_stream_lines(&self, lines: &[&str]) -> &Self {
        self.streams
            .lock()
            .unwrap()
            .push_back(lines.iter().map(|l| l.to_string()).collect());
        self
    }

    /// 已收到的所有请求（按调用顺序）
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(hook) = &self.hook {
            hook(request);
        }
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Decode("script exhausted".to_string())));
        if let Ok(ChatResponse { usage: Some(usage), .. }) = &response {
            self.usage.lock().unwrap().accumulate(usage);
        }
        response
    }

    fn token_usage(&self) -> Usage {
        *self.usage.lock().unwrap()
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(hook) = &self.hook {
            hook(request);
        }
        let lines = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Decode("stream script exhausted".to_string()))?;
        let chunks: Vec<Result<Vec<u8>, LlmError>> = lines
            .into_iter()
            .map(|l| Ok(format!("{}\n", l).into_bytes()))
            .collect();
        Ok(decode_stream(stream::iter(chunks)))
    }
}
