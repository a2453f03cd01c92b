//! 核心层：错误类型、运行取消协调、视图状态

pub mod cancel;
pub mod error;
pub mod state;

pub use cancel::{check_aborted, RunGuard, RunRegistry};
pub use error::{AgentError, ErrorKind};
pub use state::{ChatView, StreamingState};
