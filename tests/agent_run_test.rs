//! Agent 运行集成测试：工具筛选、计划跟踪、取消、全量回退、工具失败

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use apidesk::core::{AgentError, RunRegistry};
    use apidesk::llm::ScriptedLlmClient;
    use apidesk::react::{AgentContext, AgentEvent};
    use apidesk::session::{
        ExecutionStatus, InMemoryMessageStore, Message, MessageStore, TodoStatus, ToolCallStatus,
    };
    use apidesk::tools::{register_catalog, Tool, ToolOutput, ToolRegistry, Workspace};
    use apidesk::{AgentRunner, RunOutcome};
    use async_trait::async_trait;
    use serde_json::Value;

    /// 执行时取消所在会话的工具
    struct StoppingTool {
        runs: RunRegistry,
        session_id: String,
    }

    #[async_trait]
    impl Tool for StoppingTool {
        fn name(&self) -> &str {
            "slow_export"
        }

        fn description(&self) -> &str {
            "Export the whole project"
        }

        async fn execute(&self, _args: Value) -> Result<ToolOutput, AgentError> {
            self.runs.stop(&self.session_id);
            Ok(ToolOutput::ok(Value::String("exported".to_string())))
        }
    }

    /// 每次执行都失败的工具
    struct BrokenTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn execute(&self, _args: Value) -> Result<ToolOutput, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::ToolExecutionFailed("backend unavailable".to_string()))
        }
    }

    async fn catalog_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        register_catalog(&mut registry, Workspace::demo().await);
        Arc::new(registry)
    }

    async fn execution_of(store: &InMemoryMessageStore, session_id: &str) -> Message {
        store
            .get_messages_by_session_id(session_id)
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.as_execution().is_some())
            .expect("execution message")
    }

    #[tokio::test]
    async fn test_list_projects_with_narrowed_tools() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text(r#"["get_project_list"]"#);
        llm.push_tool_calls("", &[("c1", "get_project_list", "{}")]);
        llm.push_text("You have two projects: Petstore and Billing.");
        let store = Arc::new(InMemoryMessageStore::new());
        let runner = AgentRunner::new(llm.clone(), catalog_registry().await, store.clone());

        let outcome = runner.run("s1", "list my projects", &AgentContext::default()).await;
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                content: "You have two projects: Petstore and Billing.".to_string()
            }
        );
        assert_eq!(llm.call_count(), 3);
        // 主循环只看到筛选后的工具
        let loop_request = &llm.requests()[1];
        assert_eq!(loop_request.tools.len(), 1);
        assert_eq!(loop_request.tools[0].name, "get_project_list");

        let msg = execution_of(&store, "s1").await;
        let exec = msg.as_execution().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Success);
        assert!(exec.todo_list.is_empty());
        assert_eq!(exec.tool_calls.len(), 1);
        let call = &exec.tool_calls[0];
        assert_eq!(call.status, ToolCallStatus::Success);
        assert!(call.started_at.is_some() && call.finished_at.is_some());
        let projects = call.result.as_ref().unwrap().as_array().unwrap();
        assert_eq!(projects.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_progress_through_markers() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_tool_calls(
            r#"<todo_plan>[{"stepNumber":1,"title":"Check projects"},{"stepNumber":2,"title":"Create project"},{"stepNumber":3,"title":"Summarize"}]</todo_plan>"#,
            &[("c1", "get_project_list", "{}")],
        );
        llm.push_tool_calls(
            "No Orders project yet.<step_done>2</step_done>",
            &[("c2", "create_project", r#"{"name":"Orders"}"#)],
        );
        llm.push_text("All done.<step_done>3</step_done>");
        let store = Arc::new(InMemoryMessageStore::new());
        let mut settings = apidesk::config::AgentSection::default();
        settings.tool_selection = false;
        let runner =
            AgentRunner::new(llm, catalog_registry().await, store.clone()).with_settings(settings);

        let outcome = runner.run("s1", "create an Orders project", &AgentContext::default()).await;
        assert_eq!(outcome, RunOutcome::Completed { content: "All done.".to_string() });

        let msg = execution_of(&store, "s1").await;
        let exec = msg.as_execution().unwrap();
        assert_eq!(exec.todo_list.len(), 3);
        assert!(exec.todo_list.iter().all(|t| t.status == TodoStatus::Success));
        assert_eq!(exec.current_todo_id, None);
        assert_eq!(exec.thinking_content.as_deref(), Some("No Orders project yet."));
        assert_eq!(exec.tool_calls.len(), 2);
        assert!(exec.tool_calls.iter().all(|c| c.status == ToolCallStatus::Success));
    }

    #[tokio::test]
    async fn test_stop_during_tool_cancels_remaining_calls() {
        let runs = RunRegistry::default();
        let mut registry = ToolRegistry::new();
        registry.register(StoppingTool {
            runs: runs.clone(),
            session_id: "s1".to_string(),
        });
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_tool_calls(
            "",
            &[("c1", "slow_export", "{}"), ("c2", "slow_export", "{}")],
        );
        llm.push_text("never reached");
        let store = Arc::new(InMemoryMessageStore::new());
        let runner =
            AgentRunner::new(llm.clone(), Arc::new(registry), store.clone()).with_runs(runs);

        let outcome = runner.run("s1", "export", &AgentContext::default()).await;
        assert!(outcome.is_aborted());
        assert_eq!(llm.call_count(), 1);
        assert_eq!(runner.runs().active_count(), 0);

        let msgs = store.get_messages_by_session_id("s1").await.unwrap();
        // 中止时保留执行消息，不追加回复或错误消息
        assert_eq!(msgs.len(), 2);
        let exec = msgs[1].as_execution().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Aborted);
        assert!(!exec.is_streaming);
        assert_eq!(exec.tool_calls[1].status, ToolCallStatus::Cancelled);
        assert!(exec.tool_calls.iter().all(|c| !c.status.is_in_flight()));
    }

    #[tokio::test]
    async fn test_fallback_runs_once_with_all_tools() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text(r#"["get_variable_list"]"#);
        llm.push_text("ok");
        llm.push_text("Petstore defines a single baseUrl variable.");
        let store = Arc::new(InMemoryMessageStore::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runner = AgentRunner::new(llm.clone(), catalog_registry().await, store.clone())
            .with_event_tx(tx);

        let outcome = runner.run("s1", "what variables exist", &AgentContext::default()).await;
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                content: "Petstore defines a single baseUrl variable.".to_string()
            }
        );
        let requests = llm.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].tools.len(), 1);
        assert_eq!(requests[2].tools.len(), 7);

        drop(runner);
        let mut fallbacks = 0;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, AgentEvent::FallbackStarted) {
                fallbacks += 1;
            }
        }
        assert_eq!(fallbacks, 1);
    }

    #[tokio::test]
    async fn test_short_fallback_reply_is_final() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text(r#"["get_variable_list"]"#);
        llm.push_text("ok");
        llm.push_text("Hmm.");
        llm.push_text("never reached");
        let store = Arc::new(InMemoryMessageStore::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runner = AgentRunner::new(llm.clone(), catalog_registry().await, store.clone())
            .with_event_tx(tx);

        let outcome = runner.run("s1", "what variables exist", &AgentContext::default()).await;
        assert_eq!(outcome, RunOutcome::Completed { content: "Hmm.".to_string() });
        // 回退结果再短也不会触发第二次回退
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.requests()[2].tools.len(), 7);

        drop(runner);
        let mut fallbacks = 0;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, AgentEvent::FallbackStarted) {
                fallbacks += 1;
            }
        }
        assert_eq!(fallbacks, 1);
    }

    #[tokio::test]
    async fn test_no_fallback_when_full_set_used() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("not json at all");
        llm.push_text("ok");
        let store = Arc::new(InMemoryMessageStore::new());
        let runner = AgentRunner::new(llm.clone(), catalog_registry().await, store);

        let outcome = runner.run("s1", "hi", &AgentContext::default()).await;
        assert_eq!(outcome, RunOutcome::Completed { content: "ok".to_string() });
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_tools_are_recorded_and_run_continues() {
        let broken = Arc::new(BrokenTool {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ToolRegistry::new();
        registry.register_arc(broken.clone());
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_tool_calls("", &[("c1", "broken", "{}"), ("c2", "missing_tool", "{}")]);
        llm.push_text("Both calls failed, please retry later.");
        let store = Arc::new(InMemoryMessageStore::new());
        let runner = AgentRunner::new(llm.clone(), Arc::new(registry), store.clone());

        let outcome = runner.run("s1", "do it", &AgentContext::default()).await;
        assert!(outcome.is_success());
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);

        let msg = execution_of(&store, "s1").await;
        let exec = msg.as_execution().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Success);
        assert!(exec.tool_calls.iter().all(|c| c.status == ToolCallStatus::Error));
        assert!(exec.tool_calls[0]
            .error
            .as_deref()
            .unwrap()
            .contains("backend unavailable"));
        assert!(exec.tool_calls[1].error.is_some());

        // 两个错误都作为 tool 消息回灌给模型
        let second = &llm.requests()[1];
        let tool_replies: Vec<&str> = second
            .messages
            .iter()
            .filter(|m| m.tool_call_id.is_some())
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tool_replies.len(), 2);
        assert!(tool_replies.iter().all(|c| c.starts_with("Error:")));
    }
}
