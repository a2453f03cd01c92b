//! 运行取消协调
//!
//! 每次运行持有一个 RunContext（run_id + CancellationToken），登记在按 session_id 索引的表中。
//! single_flight 模式（默认）下整个进程只跟踪一个运行：新运行开始时，其他会话的登记被直接替换
//! （不触发取消）。该模式由所有克隆共享。取消是协作式的：check_aborted 只在挂起点检查令牌。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::session::new_id;

/// 挂起点检查：令牌已触发则返回 Aborted
pub fn check_aborted(token: &CancellationToken) -> Result<(), AgentError> {
    if token.is_cancelled() {
        Err(AgentError::Aborted)
    } else {
        Ok(())
    }
}

/// 单次运行的取消上下文
#[derive(Clone, Debug)]
pub(crate) struct RunContext {
    pub run_id: String,
    pub session_id: String,
    pub token: CancellationToken,
}

/// 运行登记表
#[derive(Clone, Debug)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, RunContext>>>,
    single_flight: Arc<AtomicBool>,
}

impl RunRegistry {
    pub fn new(single_flight: bool) -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            single_flight: Arc::new(AtomicBool::new(single_flight)),
        }
    }

    pub fn single_flight(&self) -> bool {
        self.single_flight.load(Ordering::Relaxed)
    }

    /// 切换跟踪模式；已登记的运行保持不动，从下一次 begin 起生效
    pub fn set_single_flight(&self, single_flight: bool) {
        self.single_flight.store(single_flight, Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunContext>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 登记新运行，返回 RAII guard；guard 释放时撤销登记
    pub fn begin(&self, session_id: &str) -> RunGuard {
        let ctx = RunContext {
            run_id: new_id(),
            session_id: session_id.to_string(),
            token: CancellationToken::new(),
        };
        let mut runs = self.lock();
        if self.single_flight() {
            for (sid, previous) in runs.drain() {
                tracing::warn!(
                    session_id = %sid,
                    run_id = %previous.run_id,
                    "superseding tracked run"
                );
            }
        } else if let Some(previous) = runs.remove(session_id) {
            tracing::warn!(session_id, run_id = %previous.run_id, "superseding tracked run");
        }
        runs.insert(session_id.to_string(), ctx.clone());
        tracing::debug!(session_id, run_id = %ctx.run_id, "run registered");
        RunGuard {
            registry: self.clone(),
            ctx,
        }
    }

    /// 取消指定会话的运行并清除登记；返回是否存在该运行
    pub fn stop(&self, session_id: &str) -> bool {
        match self.lock().remove(session_id) {
            Some(ctx) => {
                tracing::info!(session_id, run_id = %ctx.run_id, "run stop requested");
                ctx.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消所有运行
    pub fn stop_all(&self) -> usize {
        let drained: Vec<RunContext> = self.lock().drain().map(|(_, ctx)| ctx).collect();
        for ctx in &drained {
            tracing::info!(session_id = %ctx.session_id, run_id = %ctx.run_id, "run stop requested");
            ctx.token.cancel();
        }
        drained.len()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    fn release(&self, ctx: &RunContext) {
        let mut runs = self.lock();
        // 只清除自己的登记，已被新运行替换时不动
        if runs
            .get(&ctx.session_id)
            .map(|current| current.run_id == ctx.run_id)
            .unwrap_or(false)
        {
            runs.remove(&ctx.session_id);
        }
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

/// 运行期间持有；Drop 时撤销登记
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    ctx: RunContext,
}

impl RunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.ctx.token
    }

    pub fn run_id(&self) -> &str {
        &self.ctx.run_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.release(&self.ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_aborted() {
        let token = CancellationToken::new();
        assert!(check_aborted(&token).is_ok());
        token.cancel();
        assert!(matches!(check_aborted(&token), Err(AgentError::Aborted)));
    }

    #[test]
    fn test_stop_cancels_and_clears() {
        let registry = RunRegistry::default();
        let guard = registry.begin("s1");
        assert!(registry.is_active("s1"));
        assert!(registry.stop("s1"));
        assert!(guard.token().is_cancelled());
        assert!(!registry.is_active("s1"));
        assert!(!registry.stop("s1"));
    }

    #[test]
    fn test_guard_drop_releases() {
        let registry = RunRegistry::default();
        {
            let _guard = registry.begin("s1");
            assert_eq!(registry.active_count(), 1);
        }
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_single_flight_supersedes_without_cancel() {
        let registry = RunRegistry::new(true);
        let first = registry.begin("s1");
        let second = registry.begin("s2");
        assert_eq!(registry.active_count(), 1);
        assert!(!first.token().is_cancelled());
        // 旧运行已不再被跟踪，stop 只影响新运行
        assert!(!registry.stop("s1"));
        drop(first);
        assert!(registry.is_active("s2"));
        assert!(registry.stop("s2"));
        assert!(second.token().is_cancelled());
    }

    #[test]
    fn test_multi_session_tracking() {
        let registry = RunRegistry::new(false);
        let a = registry.begin("a");
        let b = registry.begin("b");
        assert_eq!(registry.active_count(), 2);
        assert!(registry.stop("a"));
        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
        assert_eq!(registry.stop_all(), 1);
        assert!(b.token().is_cancelled());
    }

    #[test]
    fn test_mode_is_shared_between_clones() {
        let registry = RunRegistry::new(true);
        let shared = registry.clone();
        shared.set_single_flight(false);
        assert!(!registry.single_flight());
        let _a = registry.begin("a");
        let _b = registry.begin("b");
        assert_eq!(shared.active_count(), 2);
    }
}
