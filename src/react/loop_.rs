//! Agent 主循环
//!
//! START -> TURN -> (TOOL_EXECUTION -> TURN)* -> END，最多 max_turns 轮。
//! 每轮：检查取消 -> 调用 LLM -> 解析计划 / 步骤标记 -> 若请求工具则按顺序逐个执行并写回 transcript。
//! 工具调用严格串行：模型依赖结果与请求的顺序一一对应。

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{check_aborted, AgentError};
use crate::llm::{ChatMessage, ChatRequest, LlmClient, ToolCallRequest, Usage};
use crate::react::events::{send_event, AgentEvent};
use crate::react::todo::{
    complete_through, finish_remaining, mark_step_as_running, parse_current_step, parse_todo_plan,
    strip_markers,
};
use crate::react::tracker::ExecutionTracker;
use crate::session::{now_millis, ToolCallRecord, ToolCallStatus};
use crate::tools::{ToolExecutor, ToolSet};

/// 单次运行默认最大轮数
pub const DEFAULT_MAX_TURNS: usize = 10;
/// 回复字符数低于此值且从未调用工具时，视为「几乎无输出」，触发全量工具回退
pub const FALLBACK_MIN_CONTENT_CHARS: usize = 10;

/// 用户拒绝确认时记录的错误
pub const REJECTED_BY_USER: &str = "rejected by user";

/// 需要确认的工具在执行前询问用户
#[async_trait]
pub trait ToolConfirmer: Send + Sync {
    /// 返回 true 表示允许执行
    async fn confirm(&self, call: &ToolCallRecord) -> bool;
}

/// 单次循环运行的结果
#[derive(Clone, Debug, PartialEq)]
pub struct LoopOutcome {
    pub content: String,
    pub need_fallback: bool,
    pub has_tool_calls: bool,
}

/// 循环运行配置
pub struct LoopSession<'a> {
    /// LLM（必需）
    pub llm: &'a dyn LlmClient,
    /// 本次可用工具（必需）
    pub tools: &'a ToolSet,
    /// 工具执行器（必需）
    pub executor: &'a ToolExecutor,
    /// 取消令牌（必需）
    pub cancel_token: CancellationToken,
    pub max_turns: usize,
    pub fallback_min_chars: usize,
    /// 可选：需要确认的工具由它把关；未设置时直接执行
    pub confirmer: Option<&'a dyn ToolConfirmer>,
}

impl<'a> LoopSession<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        tools: &'a ToolSet,
        executor: &'a ToolExecutor,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            llm,
            tools,
            executor,
            cancel_token,
            max_turns: DEFAULT_MAX_TURNS,
            fallback_min_chars: FALLBACK_MIN_CONTENT_CHARS,
            confirmer: None,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_fallback_min_chars(mut self, chars: usize) -> Self {
        self.fallback_min_chars = chars;
        self
    }

    pub fn with_confirmer(mut self, confirmer: &'a dyn ToolConfirmer) -> Self {
        self.confirmer = Some(confirmer);
        self
    }
}

/// 执行主循环
pub async fn agent_loop(
    session: &LoopSession<'_>,
    tracker: &mut ExecutionTracker,
    mut transcript: Vec<ChatMessage>,
) -> Result<LoopOutcome, AgentError> {
    let token = &session.cancel_token;
    let specs = session.tools.specs();
    let mut has_tool_calls = false;
    let mut last_completed: u32 = 0;
    let mut last_content = String::new();

    for turn in 0..session.max_turns {
        check_aborted(token)?;
        send_event(
            tracker.events(),
            AgentEvent::TurnStarted {
                turn: turn + 1,
                max_turns: session.max_turns,
            },
        );

        let request = ChatRequest::new(transcript.clone()).with_tools(specs.clone());
        let response = session.llm.chat(&request).await;
        check_aborted(token)?;
        let response = response?;
        tracing::info!(
            turn = turn + 1,
            tool_calls = response.tool_calls.len(),
            finish_reason = ?response.finish_reason,
            "llm turn"
        );
        let content = response.content.clone();
        last_content = content.clone();

        if turn == 0 {
            if let Some(plan) = parse_todo_plan(&content) {
                let steps = plan.len();
                tracker
                    .patch(|exec| {
                        exec.todo_list = mark_step_as_running(&plan, 1);
                        exec.current_todo_id = plan.first().map(|s| s.id.clone());
                    })
                    .await?;
                send_event(tracker.events(), AgentEvent::PlanInstalled { steps });
            }
        }

        if let Some(step) = parse_current_step(&content) {
            if step > last_completed && !tracker.execution().todo_list.is_empty() {
                let (todo_list, current) = complete_through(&tracker.execution().todo_list, step);
                tracker
                    .patch(|exec| {
                        exec.todo_list = todo_list;
                        exec.current_todo_id = current;
                    })
                    .await?;
                last_completed = step;
                send_event(tracker.events(), AgentEvent::StepCompleted { step });
            }
        }

        // finish_reason 不是 tool_calls 时，附带的调用不会执行，按纯文本回复处理
        let usage = response.usage;
        let calls = if response.wants_tools() {
            response.tool_calls
        } else {
            if !response.tool_calls.is_empty() {
                tracing::debug!(
                    ignored = response.tool_calls.len(),
                    "tool calls without tool_calls finish reason"
                );
            }
            Vec::new()
        };
        if !calls.is_empty() {
            has_tool_calls = true;
            let thinking = strip_markers(&content);
            if !thinking.is_empty() {
                send_event(tracker.events(), AgentEvent::Thinking { text: thinking.clone() });
                tracker
                    .patch(|exec| exec.thinking_content = Some(thinking))
                    .await?;
            }
        }

        if calls.is_empty() {
            tracker
                .patch(|exec| {
                    exec.todo_list = finish_remaining(&exec.todo_list);
                    exec.current_todo_id = None;
                })
                .await?;
            let need_fallback =
                !has_tool_calls && content.chars().count() < session.fallback_min_chars;
            return Ok(LoopOutcome {
                content,
                need_fallback,
                has_tool_calls,
            });
        }

        transcript.push(ChatMessage::assistant_with_tools(content, calls.clone()));

        // 先按请求顺序全部登记为 pending
        let records: Vec<ToolCallRecord> = calls
            .iter()
            .map(|call| {
                let arguments = parse_arguments(&call.arguments)
                    .unwrap_or_else(|_| Value::String(call.arguments.clone()));
                let mut record = ToolCallRecord::pending(&call.id, &call.name, arguments);
                record.usage = usage;
                record
            })
            .collect();
        let first = tracker.append_tool_calls(records).await?;

        for (offset, call) in calls.iter().enumerate() {
            check_aborted(token)?;
            let observation = run_tool_call(session, tracker, first + offset, call, usage).await?;
            transcript.push(ChatMessage::tool(&call.id, observation));
        }
    }

    tracing::warn!(max_turns = session.max_turns, "turn cap reached");
    Ok(LoopOutcome {
        content: last_content,
        need_fallback: false,
        has_tool_calls,
    })
}

fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

/// 以错误结束一次工具调用，返回写入 transcript 的内容
async fn fail_call(
    tracker: &mut ExecutionTracker,
    slot: usize,
    call: &ToolCallRequest,
    error: String,
    result: Option<Value>,
) -> Result<String, AgentError> {
    let message = error.clone();
    tracker
        .update_tool_call(slot, |c| {
            c.status = ToolCallStatus::Error;
            c.error = Some(message);
            c.result = result;
            c.finished_at = Some(now_millis());
        })
        .await?;
    send_event(
        tracker.events(),
        AgentEvent::ToolCallFinished {
            id: call.id.clone(),
            name: call.name.clone(),
            success: false,
        },
    );
    tracing::debug!(tool = %call.name, error = %error, "tool call failed");
    Ok(format!("Error: {}", error))
}

/// 执行单个工具调用；只有 Aborted 与存储错误向上传播，其余失败记录在调用上并反馈给模型
async fn run_tool_call(
    session: &LoopSession<'_>,
    tracker: &mut ExecutionTracker,
    slot: usize,
    call: &ToolCallRequest,
    usage: Option<Usage>,
) -> Result<String, AgentError> {
    let token = &session.cancel_token;

    let Some(tool) = session.tools.get(&call.name) else {
        let err = AgentError::ToolNotFound(call.name.clone());
        return fail_call(tracker, slot, call, err.to_string(), None).await;
    };

    let args = match parse_arguments(&call.arguments) {
        Ok(args) => args,
        Err(e) => {
            let err = AgentError::ToolExecutionFailed(format!("invalid arguments: {}", e));
            return fail_call(tracker, slot, call, err.to_string(), None).await;
        }
    };

    if tool.need_confirm() {
        if let Some(confirmer) = session.confirmer {
            tracker
                .update_tool_call(slot, |c| c.status = ToolCallStatus::WaitingConfirm)
                .await?;
            let record = tracker
                .tool_call(slot)
                .cloned()
                .unwrap_or_else(|| ToolCallRecord::pending(&call.id, &call.name, args.clone()));
            let approved = confirmer.confirm(&record).await;
            check_aborted(token)?;
            if !approved {
                return fail_call(tracker, slot, call, REJECTED_BY_USER.to_string(), None).await;
            }
        }
    }

    tracker
        .update_tool_call(slot, |c| {
            c.status = ToolCallStatus::Running;
            c.started_at = Some(now_millis());
            c.usage = usage;
        })
        .await?;
    send_event(
        tracker.events(),
        AgentEvent::ToolCallStarted {
            id: call.id.clone(),
            name: call.name.clone(),
        },
    );

    let outcome = session.executor.execute(&tool, args).await;
    let observation = match outcome {
        Err(AgentError::Aborted) => return Err(AgentError::Aborted),
        Ok(output) if output.is_success() => {
            let observation = output.data.to_string();
            tracker
                .update_tool_call(slot, |c| {
                    c.status = ToolCallStatus::Success;
                    c.result = Some(output.data);
                    c.finished_at = Some(now_millis());
                })
                .await?;
            send_event(
                tracker.events(),
                AgentEvent::ToolCallFinished {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    success: true,
                },
            );
            observation
        }
        Ok(output) => {
            let error = format!("tool returned code {}: {}", output.code, output.data);
            fail_call(tracker, slot, call, error, Some(output.data)).await?
        }
        Err(e) => fail_call(tracker, slot, call, e.to_string(), None).await?,
    };

    check_aborted(token)?;
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::llm::{ChatResponse, FinishReason, ScriptedLlmClient};
    use crate::session::{InMemoryMessageStore, MessageStore, TodoStatus};
    use crate::tools::registry::tests::registry_of;
    use crate::tools::{Tool, ToolOutput, ToolRegistry};

    async fn tracker() -> ExecutionTracker {
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        ExecutionTracker::start(store, "s1", "prompt", None).await.unwrap()
    }

    fn transcript() -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user("prompt")]
    }

    #[tokio::test]
    async fn test_text_only_turn() {
        let llm = ScriptedLlmClient::default();
        llm.push_text("Here is a complete answer.");
        let registry = registry_of(&["a"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let mut tracker = tracker().await;

        let outcome = agent_loop(&session, &mut tracker, transcript()).await.unwrap();
        assert_eq!(outcome.content, "Here is a complete answer.");
        assert!(!outcome.need_fallback);
        assert!(!outcome.has_tool_calls);
        assert_eq!(llm.requests()[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_short_answer_without_tools_needs_fallback() {
        let llm = ScriptedLlmClient::default();
        llm.push_text("Hmm.");
        let registry = registry_of(&["a"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let outcome = agent_loop(&session, &mut tracker().await, transcript())
            .await
            .unwrap();
        assert!(outcome.need_fallback);

        // 阈值可调
        llm.push_text("Hmm.");
        let session = session.with_fallback_min_chars(3);
        let outcome = agent_loop(&session, &mut tracker().await, transcript())
            .await
            .unwrap();
        assert!(!outcome.need_fallback);
    }

    #[tokio::test]
    async fn test_tool_calls_in_order_and_transcript() {
        let llm = ScriptedLlmClient::default();
        llm.push_tool_calls(
            "Let me look.",
            &[("c1", "b", "{}"), ("c2", "a", r#"{"x":1}"#)],
        );
        llm.push_text("Done with both lookups.");
        let registry = registry_of(&["a", "b"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let mut tracker = tracker().await;

        let outcome = agent_loop(&session, &mut tracker, transcript()).await.unwrap();
        assert!(outcome.has_tool_calls);

        let exec = tracker.execution();
        let ids: Vec<&str> = exec.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(exec.tool_calls.iter().all(|c| c.status == ToolCallStatus::Success));
        assert_eq!(exec.tool_calls[1].arguments["x"], 1);
        assert_eq!(exec.thinking_content.as_deref(), Some("Let me look."));

        let second = &llm.requests()[1].messages;
        let n = second.len();
        assert_eq!(second[n - 3].tool_calls.len(), 2);
        assert_eq!(second[n - 2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(second[n - 2].content, "\"b\"");
        assert_eq!(second[n - 1].tool_call_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments() {
        let llm = ScriptedLlmClient::default();
        llm.push_tool_calls("", &[("c1", "missing", "{}"), ("c2", "a", "{not json")]);
        llm.push_text("Sorry, could not do it.");
        let registry = registry_of(&["a"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let mut tracker = tracker().await;

        agent_loop(&session, &mut tracker, transcript()).await.unwrap();
        let calls = &tracker.execution().tool_calls;
        assert_eq!(calls[0].status, ToolCallStatus::Error);
        assert!(calls[0].error.as_deref().unwrap().contains("missing"));
        assert_eq!(calls[1].status, ToolCallStatus::Error);
        assert!(calls[1].error.as_deref().unwrap().contains("invalid arguments"));
        assert!(tracker.execution().thinking_content.is_none());
    }

    #[tokio::test]
    async fn test_nonzero_code_is_error() {
        let llm = ScriptedLlmClient::default();
        llm.push_tool_calls("", &[("c1", "bad", "{}")]);
        llm.push_text("The tool failed, sorry.");
        let mut registry = ToolRegistry::new();
        registry.register(crate::tools::registry::tests::StaticTool {
            name: "bad",
            output: ToolOutput::fail(404, serde_json::json!({"error": "nope"})),
        });
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let mut tracker = tracker().await;

        agent_loop(&session, &mut tracker, transcript()).await.unwrap();
        let call = &tracker.execution().tool_calls[0];
        assert_eq!(call.status, ToolCallStatus::Error);
        assert_eq!(call.result.as_ref().unwrap()["error"], "nope");
        let last = llm.requests()[1].messages.last().cloned().unwrap();
        assert!(last.content.starts_with("Error: tool returned code 404"));
    }

    #[tokio::test]
    async fn test_plan_and_step_marker() {
        let llm = ScriptedLlmClient::default();
        llm.push_tool_calls(
            r#"<todo_plan>[{"stepNumber":1,"title":"A"},{"stepNumber":2,"title":"B"},{"stepNumber":3,"title":"C"}]</todo_plan>"#,
            &[("c1", "a", "{}")],
        );
        llm.push_tool_calls("<step_done>2</step_done>", &[("c2", "a", "{}")]);
        llm.push_text("All finished now.");
        let registry = registry_of(&["a"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut tracker = ExecutionTracker::start(store, "s1", "prompt", Some(tx))
            .await
            .unwrap();

        agent_loop(&session, &mut tracker, transcript()).await.unwrap();

        let mut snapshots = Vec::new();
        let mut after_plan = None;
        let mut after_step = None;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                AgentEvent::ExecutionUpdated { message } => snapshots.push(message),
                AgentEvent::PlanInstalled { steps } => {
                    assert_eq!(steps, 3);
                    after_plan = snapshots.last().cloned();
                }
                AgentEvent::StepCompleted { step } => {
                    assert_eq!(step, 2);
                    after_step = snapshots.last().cloned();
                }
                _ => {}
            }
        }

        let statuses = |m: &crate::session::Message| -> Vec<TodoStatus> {
            m.as_execution().unwrap().todo_list.iter().map(|t| t.status).collect()
        };
        let after_plan = after_plan.unwrap();
        assert_eq!(
            statuses(&after_plan),
            vec![TodoStatus::Running, TodoStatus::Pending, TodoStatus::Pending]
        );
        let after_step = after_step.unwrap();
        assert_eq!(
            statuses(&after_step),
            vec![TodoStatus::Success, TodoStatus::Success, TodoStatus::Running]
        );
        assert_eq!(
            after_step.as_execution().unwrap().current_todo_id.as_deref(),
            Some("step-3")
        );

        // 结束时剩余步骤全部完成
        let exec = tracker.execution();
        assert!(exec.todo_list.iter().all(|t| t.status == TodoStatus::Success));
        assert_eq!(exec.current_todo_id, None);
        // 只有标记的内容剥离后为空，不写入思考内容
        assert!(exec.thinking_content.is_none());
    }

    #[tokio::test]
    async fn test_turn_cap() {
        let llm = ScriptedLlmClient::default();
        for i in 0..3 {
            let id = format!("c{}", i);
            llm.push_tool_calls(&format!("turn {}", i), &[(id.as_str(), "a", "{}")]);
        }
        let registry = registry_of(&["a"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session =
            LoopSession::new(&llm, &tools, &executor, CancellationToken::new()).with_max_turns(2);
        let outcome = agent_loop(&session, &mut tracker().await, transcript())
            .await
            .unwrap();
        assert_eq!(outcome.content, "turn 1");
        assert!(!outcome.need_fallback);
        assert_eq!(llm.call_count(), 2);
    }

    struct AbortingTool {
        token: CancellationToken,
    }

    #[async_trait]
    impl Tool for AbortingTool {
        fn name(&self) -> &str {
            "stopper"
        }

        fn description(&self) -> &str {
            "cancels the run"
        }

        async fn execute(&self, _args: Value) -> Result<ToolOutput, AgentError> {
            self.token.cancel();
            Ok(ToolOutput::ok(Value::Null))
        }
    }

    #[tokio::test]
    async fn test_cancel_during_tool_stops_loop() {
        let token = CancellationToken::new();
        let llm = ScriptedLlmClient::default();
        llm.push_tool_calls("", &[("c1", "stopper", "{}"), ("c2", "a", "{}")]);
        llm.push_text("never reached");
        let mut registry = registry_of(&["a"]);
        registry.register(AbortingTool {
            token: token.clone(),
        });
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, token);
        let mut tracker = tracker().await;

        let err = agent_loop(&session, &mut tracker, transcript()).await.unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(llm.call_count(), 1);
        let calls = &tracker.execution().tool_calls;
        assert_eq!(calls[0].status, ToolCallStatus::Success);
        assert_eq!(calls[1].status, ToolCallStatus::Pending);
    }

    struct Deny;

    #[async_trait]
    impl ToolConfirmer for Deny {
        async fn confirm(&self, call: &ToolCallRecord) -> bool {
            assert_eq!(call.status, ToolCallStatus::WaitingConfirm);
            false
        }
    }

    struct Guarded;

    #[async_trait]
    impl Tool for Guarded {
        fn name(&self) -> &str {
            "guarded"
        }

        fn description(&self) -> &str {
            "needs confirmation"
        }

        fn need_confirm(&self) -> bool {
            true
        }

        async fn execute(&self, _args: Value) -> Result<ToolOutput, AgentError> {
            panic!("must not run when denied");
        }
    }

    #[tokio::test]
    async fn test_confirmation_denied() {
        let llm = ScriptedLlmClient::default();
        llm.push_tool_calls("", &[("c1", "guarded", "{}")]);
        llm.push_text("Okay, I will not delete it.");
        let mut registry = ToolRegistry::new();
        registry.register(Guarded);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session =
            LoopSession::new(&llm, &tools, &executor, CancellationToken::new()).with_confirmer(&Deny);
        let mut tracker = tracker().await;

        agent_loop(&session, &mut tracker, transcript()).await.unwrap();
        let call = &tracker.execution().tool_calls[0];
        assert_eq!(call.status, ToolCallStatus::Error);
        assert_eq!(call.error.as_deref(), Some(REJECTED_BY_USER));
    }

    #[tokio::test]
    async fn test_reused_call_ids_across_turns() {
        let llm = ScriptedLlmClient::default();
        llm.push_tool_calls("", &[("call_0", "a", "{}")]);
        llm.push_tool_calls("", &[("call_0", "b", "{}")]);
        llm.push_text("Both lookups finished.");
        let registry = registry_of(&["a", "b"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let mut tracker = tracker().await;

        agent_loop(&session, &mut tracker, transcript()).await.unwrap();
        let calls = &tracker.execution().tool_calls;
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.status == ToolCallStatus::Success));
        assert_eq!(calls[0].result, Some(Value::String("a".to_string())));
        assert_eq!(calls[1].result, Some(Value::String("b".to_string())));
    }

    #[tokio::test]
    async fn test_empty_call_ids_within_one_turn() {
        let llm = ScriptedLlmClient::default();
        llm.push_tool_calls("", &[("", "a", "{}"), ("", "missing", "{}")]);
        llm.push_text("One lookup failed.");
        let registry = registry_of(&["a"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let mut tracker = tracker().await;

        agent_loop(&session, &mut tracker, transcript()).await.unwrap();
        let calls = &tracker.execution().tool_calls;
        assert_eq!(calls[0].status, ToolCallStatus::Success);
        assert_eq!(calls[1].status, ToolCallStatus::Error);
    }

    #[tokio::test]
    async fn test_tool_calls_ignored_without_tool_finish_reason() {
        let llm = ScriptedLlmClient::default();
        llm.push_response(ChatResponse {
            content: "Hmm.".to_string(),
            tool_calls: vec![ToolCallRequest {
                id: "c1".to_string(),
                name: "a".to_string(),
                arguments: "{}".to_string(),
            }],
            finish_reason: FinishReason::Stop,
            usage: None,
        });
        let registry = registry_of(&["a"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, CancellationToken::new());
        let mut tracker = tracker().await;

        let outcome = agent_loop(&session, &mut tracker, transcript()).await.unwrap();
        assert!(!outcome.has_tool_calls);
        assert!(outcome.need_fallback);
        assert!(tracker.execution().tool_calls.is_empty());
        assert!(tracker.execution().thinking_content.is_none());
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_llm_call_stops_loop() {
        let token = CancellationToken::new();
        let stopper = token.clone();
        let llm = ScriptedLlmClient::new().with_hook(move |_| stopper.cancel());
        llm.push_tool_calls("", &[("c1", "a", "{}")]);
        llm.push_text("never reached");
        let registry = registry_of(&["a"]);
        let tools = registry.full_set();
        let executor = ToolExecutor::default();
        let session = LoopSession::new(&llm, &tools, &executor, token);
        let mut tracker = tracker().await;

        let err = agent_loop(&session, &mut tracker, transcript()).await.unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(llm.call_count(), 1);
        // 响应在取消之后到达，不登记任何调用
        assert!(tracker.execution().tool_calls.is_empty());

        tracker.finish_aborted().await.unwrap();
        assert_eq!(tracker.execution().status, crate::session::ExecutionStatus::Aborted);
    }
}
