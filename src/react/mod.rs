//! 认知层：工具筛选、计划标记解析、Agent 主循环、执行消息跟踪

pub mod events;
pub mod loop_;
pub mod prompt;
pub mod selector;
pub mod todo;
pub mod tracker;

pub use events::{AgentEvent, EventSender};
pub use loop_::{
    agent_loop, LoopOutcome, LoopSession, ToolConfirmer, DEFAULT_MAX_TURNS,
    FALLBACK_MIN_CONTENT_CHARS, REJECTED_BY_USER,
};
pub use prompt::{build_transcript, AgentContext, ProjectRef, AGENT_SYSTEM_PROMPT, ASK_SYSTEM_PROMPT};
pub use selector::ToolSelector;
pub use todo::{
    complete_through, finish_remaining, mark_step_as_running, parse_current_step, parse_todo_plan,
    strip_markers, update_todo_item_status,
};
pub use tracker::ExecutionTracker;
