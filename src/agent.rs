//! Agent 运行编排
//!
//! create_agent_components 按配置构建 LLM / 工具注册表 / 消息存储 / 执行器；
//! AgentRunner::run 对单条用户请求依次执行：登记运行 -> 工具筛选 -> 主循环 -> 可选一次全量回退 -> 落盘收尾。
//! 结果三态：Completed / Aborted（保留执行消息）/ Failed（删除执行消息，追加 error 消息）。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{AgentSection, AppConfig, StoreBackend};
use crate::core::{AgentError, ErrorKind, RunRegistry};
use crate::llm::{create_deepseek_client, ChatMessage, LlmClient, MockLlmClient, OpenAiClient};
use crate::react::events::send_event;
use crate::react::{
    agent_loop, build_transcript, strip_markers, AgentContext, AgentEvent, EventSender,
    ExecutionTracker, LoopSession, ToolConfirmer, ToolSelector, AGENT_SYSTEM_PROMPT,
};
use crate::session::{
    ChatMode, InMemoryMessageStore, Message, MessageStore, SqliteMessageStore,
};
use crate::tools::{register_catalog, ToolExecutor, ToolRegistry, ToolSet, Workspace};

/// 单次运行的结果
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed { content: String },
    /// 用户取消；执行消息已标记 aborted
    Aborted { error: String },
    Failed { error: String, kind: ErrorKind },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RunOutcome::Aborted { .. })
    }

    fn status(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "success",
            RunOutcome::Aborted { .. } => "aborted",
            RunOutcome::Failed { .. } => "error",
        }
    }
}

/// 按配置与 API Key 选择 LLM 后端；没有 Key 时使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.timeouts.request;

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            return Arc::new(MockLlmClient);
        }
        "deepseek" => {
            if let Some(client) =
                create_deepseek_client(cfg.llm.model.as_deref(), cfg.llm.base_url.as_deref())
            {
                let client = client.with_timeout(timeout);
                tracing::info!("Using DeepSeek LLM ({})", client.model());
                return Arc::new(client);
            }
        }
        _ => {}
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let model = cfg.llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI-compatible LLM ({})", model);
        let client = OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, Some(key.as_str()))
            .with_timeout(timeout);
        Arc::new(client)
    } else {
        tracing::warn!(provider = %provider, "No API key set, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

/// 按 [store] 段创建消息存储
pub fn create_store_from_config(cfg: &AppConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    match cfg.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryMessageStore::new())),
        StoreBackend::Sqlite => {
            let path = cfg
                .store
                .path
                .clone()
                .unwrap_or_else(|| cfg.app.data_dir().join("messages.db"));
            tracing::info!(path = %path.display(), "Using SQLite message store");
            Ok(Arc::new(SqliteMessageStore::open(path)?))
        }
    }
}

/// 预构建的运行组件，可多会话共享
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<ToolRegistry>,
    pub workspace: Arc<Workspace>,
    pub store: Arc<dyn MessageStore>,
    pub executor: ToolExecutor,
}

/// 创建运行组件：LLM、领域工具（演示工作区）、消息存储、工具执行器
pub async fn create_agent_components(cfg: &AppConfig) -> anyhow::Result<AgentComponents> {
    let llm = create_llm_from_config(cfg);
    let workspace = Workspace::demo().await;
    let mut registry = ToolRegistry::new();
    register_catalog(&mut registry, workspace.clone());
    let store = create_store_from_config(cfg)?;
    Ok(AgentComponents {
        llm,
        registry: Arc::new(registry),
        workspace,
        store,
        executor: ToolExecutor::new(cfg.tools.tool_timeout_secs),
    })
}

/// 运行编排器
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn MessageStore>,
    executor: ToolExecutor,
    settings: AgentSection,
    runs: RunRegistry,
    confirmer: Option<Arc<dyn ToolConfirmer>>,
    event_tx: Option<EventSender>,
}

impl AgentRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let settings = AgentSection::default();
        Self {
            llm,
            registry,
            store,
            executor: ToolExecutor::default(),
            runs: RunRegistry::new(settings.single_flight),
            settings,
            confirmer: None,
            event_tx: None,
        }
    }

    pub fn from_components(components: &AgentComponents, settings: AgentSection) -> Self {
        Self::new(
            components.llm.clone(),
            components.registry.clone(),
            components.store.clone(),
        )
        .with_executor(components.executor.clone())
        .with_settings(settings)
    }

    /// 替换 [agent] 配置；保留当前（可能共享的）运行登记表，只更新其跟踪模式
    pub fn with_settings(mut self, settings: AgentSection) -> Self {
        self.runs.set_single_flight(settings.single_flight);
        self.settings = settings;
        self
    }

    pub fn with_executor(mut self, executor: ToolExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// 共享运行登记表（如与 AskPipeline 共用）
    pub fn with_runs(mut self, runs: RunRegistry) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn ToolConfirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    pub fn with_event_tx(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// 取消指定会话的运行
    pub fn stop(&self, session_id: &str) -> bool {
        self.runs.stop(session_id)
    }

    pub fn stop_all(&self) -> usize {
        self.runs.stop_all()
    }

    /// 对一条用户请求执行完整运行
    pub async fn run(&self, session_id: &str, prompt: &str, context: &AgentContext) -> RunOutcome {
        let guard = self.runs.begin(session_id);
        let token = guard.token().clone();
        tracing::info!(session_id, run_id = %guard.run_id(), "agent run started");
        send_event(
            &self.event_tx,
            AgentEvent::RunStarted {
                session_id: session_id.to_string(),
                run_id: guard.run_id().to_string(),
            },
        );

        let outcome = match self.prepare(session_id, prompt, context).await {
            Ok((transcript, mut tracker)) => {
                let result = self.drive(&mut tracker, prompt, context, transcript, &token).await;
                self.finalize(&mut tracker, session_id, prompt, result).await
            }
            Err(e) => self.record_failure(session_id, prompt, e).await,
        };

        let usage = self.llm.token_usage();
        tracing::info!(
            session_id,
            status = outcome.status(),
            llm_total_tokens = usage.total_tokens,
            "agent run finished"
        );
        send_event(
            &self.event_tx,
            AgentEvent::RunFinished {
                status: outcome.status().to_string(),
            },
        );
        drop(guard);
        outcome
    }

    /// 读取历史、记录用户输入、创建执行消息
    async fn prepare(
        &self,
        session_id: &str,
        prompt: &str,
        context: &AgentContext,
    ) -> Result<(Vec<ChatMessage>, ExecutionTracker), AgentError> {
        let store_err = |e: anyhow::Error| AgentError::Store(e.to_string());
        self.store.set_last_session_id(session_id).await.map_err(store_err)?;
        let history = self
            .store
            .get_messages_by_session_id(session_id)
            .await
            .map_err(store_err)?;
        let transcript = build_transcript(
            AGENT_SYSTEM_PROMPT,
            context,
            &history,
            self.settings.history_limit,
            prompt,
        );
        self.store
            .add_message(&Message::ask(session_id, ChatMode::Agent, prompt))
            .await
            .map_err(store_err)?;
        let tracker =
            ExecutionTracker::start(self.store.clone(), session_id, prompt, self.event_tx.clone())
                .await?;
        Ok((transcript, tracker))
    }

    fn loop_session<'a>(&'a self, tools: &'a ToolSet, token: &CancellationToken) -> LoopSession<'a> {
        let session = LoopSession::new(self.llm.as_ref(), tools, &self.executor, token.clone())
            .with_max_turns(self.settings.max_turns)
            .with_fallback_min_chars(self.settings.fallback_min_content_chars);
        match &self.confirmer {
            Some(confirmer) => session.with_confirmer(confirmer.as_ref()),
            None => session,
        }
    }

    /// 工具筛选 -> 主循环 -> 至多一次全量回退；返回模型原始最终内容
    async fn drive(
        &self,
        tracker: &mut ExecutionTracker,
        prompt: &str,
        context: &AgentContext,
        transcript: Vec<ChatMessage>,
        token: &CancellationToken,
    ) -> Result<String, AgentError> {
        let selector = ToolSelector::new(self.llm.clone(), self.registry.clone())
            .with_enabled(self.settings.tool_selection)
            .with_min_tools(self.settings.tool_selection_min_tools);
        let tools = selector.select_tools(prompt, context, token).await?;
        send_event(
            &self.event_tx,
            AgentEvent::ToolsSelected {
                names: tools.names(),
                narrowed: tools.is_narrowed(),
            },
        );

        let outcome = agent_loop(&self.loop_session(&tools, token), tracker, transcript.clone()).await?;
        if !(tools.is_narrowed() && outcome.need_fallback) {
            return Ok(outcome.content);
        }

        tracing::warn!(
            content_chars = outcome.content.chars().count(),
            "narrowed tool set made no progress, retrying with all tools"
        );
        send_event(&self.event_tx, AgentEvent::FallbackStarted);
        let full = self.registry.full_set();
        let fallback = agent_loop(&self.loop_session(&full, token), tracker, transcript).await?;
        Ok(fallback.content)
    }

    async fn finalize(
        &self,
        tracker: &mut ExecutionTracker,
        session_id: &str,
        prompt: &str,
        result: Result<String, AgentError>,
    ) -> RunOutcome {
        match result {
            Ok(raw) => {
                let content = strip_markers(&raw);
                let persisted = async {
                    tracker.finish_success().await?;
                    self.store
                        .add_message(&Message::text_response(session_id, ChatMode::Agent, &content))
                        .await
                        .map_err(|e| AgentError::Store(e.to_string()))
                }
                .await;
                match persisted {
                    Ok(()) => RunOutcome::Completed { content },
                    Err(e) => self.discard_and_fail(tracker, session_id, prompt, e).await,
                }
            }
            Err(e) if e.is_aborted() => {
                if let Err(store_err) = tracker.finish_aborted().await {
                    tracing::error!(error = %store_err, "failed to persist aborted execution");
                }
                RunOutcome::Aborted {
                    error: e.to_string(),
                }
            }
            Err(e) => self.discard_and_fail(tracker, session_id, prompt, e).await,
        }
    }

    /// 非中止失败：执行消息不可信，删除后记录 error 消息
    async fn discard_and_fail(
        &self,
        tracker: &ExecutionTracker,
        session_id: &str,
        prompt: &str,
        error: AgentError,
    ) -> RunOutcome {
        if let Err(store_err) = tracker.discard().await {
            tracing::error!(error = %store_err, "failed to delete execution message");
        }
        self.record_failure(session_id, prompt, error).await
    }

    async fn record_failure(&self, session_id: &str, prompt: &str, error: AgentError) -> RunOutcome {
        if error.is_aborted() {
            return RunOutcome::Aborted {
                error: error.to_string(),
            };
        }
        let kind = error.kind();
        tracing::error!(session_id, error = %error, ?kind, "agent run failed");
        let message = Message::error(session_id, ChatMode::Agent, kind, error.to_string(), prompt);
        if let Err(store_err) = self.store.add_message(&message).await {
            tracing::error!(error = %store_err, "failed to persist error message");
        }
        RunOutcome::Failed {
            error: error.to_string(),
            kind,
        }
    }
}
