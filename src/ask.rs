//! Ask 模式：单轮流式问答
//!
//! 与 Agent 运行共用 RunRegistry（取消 / 会话标识）。loading 占位只存在于 ChatView，
//! 流结束后被 textResponse 或 error 消息替换，流式状态回到 idle。

use std::sync::Arc;

use futures_util::StreamExt;

use crate::agent::RunOutcome;
use crate::core::{AgentError, ChatView, RunRegistry, StreamingState};
use crate::llm::{ChatRequest, LlmClient, StreamEvent};
use crate::react::{build_transcript, AgentContext, ASK_SYSTEM_PROMPT};
use crate::session::{ChatMode, Message, MessageStore};

const DEFAULT_HISTORY_LIMIT: usize = 10;

/// 流读取结果
enum StreamEnd {
    Done,
    Aborted,
}

pub struct AskPipeline {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn MessageStore>,
    runs: RunRegistry,
    history_limit: usize,
}

impl AskPipeline {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            llm,
            store,
            runs: RunRegistry::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// 与 AgentRunner 共用同一登记表
    pub fn with_runs(mut self, runs: RunRegistry) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub fn stop(&self, session_id: &str) -> bool {
        self.runs.stop(session_id)
    }

    /// 对 view 所在会话提问；结束时 view 中不再有 loading
    pub async fn ask(&self, view: &mut ChatView, prompt: &str, context: &AgentContext) -> RunOutcome {
        let session_id = view.session_id.clone();
        let guard = self.runs.begin(&session_id);
        let loading = Message::loading(&session_id, ChatMode::Ask);
        let loading_id = loading.id.clone();

        let mut answer = String::new();
        let result = self
            .stream_answer(view, loading, prompt, context, guard.token(), &mut answer)
            .await;
        view.streaming = StreamingState::Idle;

        let outcome = match result {
            Ok(end) => {
                let aborted = matches!(end, StreamEnd::Aborted);
                if aborted && answer.is_empty() {
                    view.remove(&loading_id);
                    RunOutcome::Aborted {
                        error: AgentError::Aborted.to_string(),
                    }
                } else {
                    // 中止时保留已收到的部分回答
                    let text = Message::text_response(&session_id, ChatMode::Ask, answer.clone());
                    match self.store.add_message(&text).await {
                        Ok(()) => {
                            view.replace(&loading_id, text);
                            if aborted {
                                RunOutcome::Aborted {
                                    error: AgentError::Aborted.to_string(),
                                }
                            } else {
                                RunOutcome::Completed { content: answer }
                            }
                        }
                        Err(e) => {
                            self.fail(view, &loading_id, prompt, AgentError::Store(e.to_string()))
                                .await
                        }
                    }
                }
            }
            Err(e) => self.fail(view, &loading_id, prompt, e).await,
        };
        drop(guard);
        outcome
    }

    async fn stream_answer(
        &self,
        view: &mut ChatView,
        loading: Message,
        prompt: &str,
        context: &AgentContext,
        token: &tokio_util::sync::CancellationToken,
        answer: &mut String,
    ) -> Result<StreamEnd, AgentError> {
        let session_id = view.session_id.clone();
        let store_err = |e: anyhow::Error| AgentError::Store(e.to_string());

        self.store.set_last_session_id(&session_id).await.map_err(store_err)?;
        let history = self
            .store
            .get_messages_by_session_id(&session_id)
            .await
            .map_err(store_err)?;
        let ask = Message::ask(&session_id, ChatMode::Ask, prompt);
        self.store.add_message(&ask).await.map_err(store_err)?;
        view.push(ask);
        view.push(loading);
        view.streaming = StreamingState::Waiting;

        let transcript = build_transcript(ASK_SYSTEM_PROMPT, context, &history, self.history_limit, prompt);
        let request = ChatRequest::new(transcript);
        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(StreamEnd::Aborted),
            s = self.llm.chat_stream(&request) => s?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(StreamEnd::Aborted),
                ev = stream.next() => ev,
            };
            match next {
                Some(Ok(StreamEvent::Delta(text))) => {
                    view.streaming = StreamingState::Streaming;
                    answer.push_str(&text);
                }
                Some(Ok(StreamEvent::Done)) | None => return Ok(StreamEnd::Done),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn fail(&self, view: &mut ChatView, loading_id: &str, prompt: &str, error: AgentError) -> RunOutcome {
        let kind = error.kind();
        tracing::error!(session_id = %view.session_id, error = %error, ?kind, "ask failed");
        let message = Message::error(&view.session_id, ChatMode::Ask, kind, error.to_string(), prompt);
        if let Err(store_err) = self.store.add_message(&message).await {
            tracing::error!(error = %store_err, "failed to persist error message");
        }
        view.replace(loading_id, message);
        RunOutcome::Failed {
            error: error.to_string(),
            kind,
        }
    }
}
