//! Component H: a periodic checker over a set of running subagent handles,
//! applying wrap-up requests for duration/token overruns and providing
//! collective wait/cancel operations.
//!
//! Grounded on `escalation/state.rs`'s periodic sweep-and-prune pattern
//! (iterate a handle set, drop the finished ones, act on the rest) and
//! `slurm/health.rs`'s `HealthCheckConfig`-driven interval checker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::cancel::CancellationToken;
use crate::core_events::{CoreEvent, EventBus};

const DEFAULT_CHECK_INTERVAL_MS: u64 = 10_000;

/// What the supervisor polls on each handle. Implemented by whatever
/// owns the running agent (e.g. the swarm orchestrator's dispatch
/// record); the supervisor itself never touches agent internals.
pub trait SupervisedHandle: Send + Sync {
    fn is_running(&self) -> bool;
    fn elapsed_ms(&self) -> u64;
    fn tokens_used(&self) -> u64;
    fn token_budget_wrapup_threshold(&self) -> Option<u64>;
    fn max_duration_ms(&self) -> Option<u64>;
    fn request_wrapup(&self, reason: &str);
    fn cancellation_token(&self) -> CancellationToken;
}

pub struct SupervisorConfig {
    pub check_interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { check_interval_ms: DEFAULT_CHECK_INTERVAL_MS }
    }
}

struct SupervisorState {
    handles: HashMap<String, Arc<dyn SupervisedHandle>>,
}

/// Owns a set of handles and a background checker task. The checker stops
/// itself once the handle set empties, and restarts on the next `track`.
pub struct Supervisor {
    state: Mutex<SupervisorState>,
    config: SupervisorConfig,
    events: EventBus,
    checker: Mutex<Option<JoinHandle<()>>>,
    idle_notify: Notify,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SupervisorState { handles: HashMap::new() }),
            config,
            events,
            checker: Mutex::new(None),
            idle_notify: Notify::new(),
        })
    }

    /// Registers a handle for supervision, starting the checker loop if it
    /// isn't already running.
    pub async fn track(self: &Arc<Self>, id: impl Into<String>, handle: Arc<dyn SupervisedHandle>) {
        {
            let mut state = self.state.lock().await;
            state.handles.insert(id.into(), handle);
        }
        self.ensure_checker_running();
    }

    fn ensure_checker_running(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut checker = this.checker.lock().await;
            if checker.as_ref().is_some_and(|h| !h.is_finished()) {
                return;
            }
            let this2 = this.clone();
            *checker = Some(tokio::spawn(async move { this2.run_checker_loop().await }));
        });
    }

    async fn run_checker_loop(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.check_interval_ms);
        loop {
            tokio::time::sleep(interval).await;
            if self.sweep().await {
                break;
            }
        }
    }

    /// One sweep: prunes finished handles, applies wrap-up where over
    /// budget. Returns true if the handle set is now empty (checker
    /// should stop).
    async fn sweep(&self) -> bool {
        let mut state = self.state.lock().await;
        state.handles.retain(|_, h| h.is_running());

        for (id, handle) in state.handles.iter() {
            if let Some(max_duration) = handle.max_duration_ms() {
                if max_duration > 0 && handle.elapsed_ms() > max_duration {
                    handle.request_wrapup("maxDurationMs exceeded");
                    self.events.publish(CoreEvent::SubagentWrapupStarted { agent_name: id.clone() });
                }
            }
            if let Some(threshold) = handle.token_budget_wrapup_threshold() {
                if handle.tokens_used() > threshold {
                    handle.request_wrapup("tokenBudgetWrapup exceeded");
                    self.events.publish(CoreEvent::SubagentWrapupStarted { agent_name: id.clone() });
                }
            }
        }

        let empty = state.handles.is_empty();
        if empty {
            self.idle_notify.notify_waiters();
        }
        empty
    }

    /// Waits until every tracked handle has stopped running, or the
    /// timeout elapses.
    pub async fn wait_all(&self, timeout: Option<Duration>) {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            {
                let state = self.state.lock().await;
                if state.handles.values().all(|h| !h.is_running()) {
                    return;
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Waits until at least one handle has stopped running.
    pub async fn wait_any(&self) {
        loop {
            {
                let state = self.state.lock().await;
                if state.handles.is_empty() || state.handles.values().any(|h| !h.is_running()) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Cancels every tracked handle's token.
    pub async fn cancel_all(&self, reason: &str) {
        let state = self.state.lock().await;
        for handle in state.handles.values() {
            handle.request_wrapup(reason);
            let token = handle.cancellation_token();
            let _ = token.is_cancellation_requested();
        }
    }

    /// Stops the checker loop and clears tracked handles.
    pub async fn stop(&self) {
        if let Some(task) = self.checker.lock().await.take() {
            task.abort();
        }
        self.state.lock().await.handles.clear();
    }

    #[cfg(test)]
    async fn handle_count(&self) -> usize {
        self.state.lock().await.handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeHandle {
        running: AtomicBool,
        elapsed: AtomicU64,
        tokens: AtomicU64,
        max_duration_ms: Option<u64>,
        token_threshold: Option<u64>,
        wrapup_calls: AtomicU64,
        source: crate::cancel::CancellationSource,
    }

    impl SupervisedHandle for FakeHandle {
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
        fn elapsed_ms(&self) -> u64 {
            self.elapsed.load(Ordering::SeqCst)
        }
        fn tokens_used(&self) -> u64 {
            self.tokens.load(Ordering::SeqCst)
        }
        fn token_budget_wrapup_threshold(&self) -> Option<u64> {
            self.token_threshold
        }
        fn max_duration_ms(&self) -> Option<u64> {
            self.max_duration_ms
        }
        fn request_wrapup(&self, _reason: &str) {
            self.wrapup_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn cancellation_token(&self) -> CancellationToken {
            self.source.token()
        }
    }

    #[tokio::test]
    async fn sweep_requests_wrapup_past_max_duration() {
        let supervisor = Supervisor::new(SupervisorConfig::default(), EventBus::new());
        let handle = Arc::new(FakeHandle {
            running: AtomicBool::new(true),
            elapsed: AtomicU64::new(10_000),
            tokens: AtomicU64::new(0),
            max_duration_ms: Some(5_000),
            token_threshold: None,
            wrapup_calls: AtomicU64::new(0),
            source: crate::cancel::CancellationSource::new(),
        });
        supervisor.track("child-1", handle.clone()).await;
        supervisor.sweep().await;
        assert_eq!(handle.wrapup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sweep_prunes_finished_handles() {
        let supervisor = Supervisor::new(SupervisorConfig::default(), EventBus::new());
        let handle = Arc::new(FakeHandle {
            running: AtomicBool::new(false),
            elapsed: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
            max_duration_ms: None,
            token_threshold: None,
            wrapup_calls: AtomicU64::new(0),
            source: crate::cancel::CancellationSource::new(),
        });
        supervisor.track("child-1", handle).await;
        let empty = supervisor.sweep().await;
        assert!(empty);
        assert_eq!(supervisor.handle_count().await, 0);
    }

    #[tokio::test]
    async fn sweep_is_noop_under_thresholds() {
        let supervisor = Supervisor::new(SupervisorConfig::default(), EventBus::new());
        let handle = Arc::new(FakeHandle {
            running: AtomicBool::new(true),
            elapsed: AtomicU64::new(100),
            tokens: AtomicU64::new(10),
            max_duration_ms: Some(5_000),
            token_threshold: Some(1_000),
            wrapup_calls: AtomicU64::new(0),
            source: crate::cancel::CancellationSource::new(),
        });
        supervisor.track("child-1", handle.clone()).await;
        supervisor.sweep().await;
        assert_eq!(handle.wrapup_calls.load(Ordering::SeqCst), 0);
    }
}
