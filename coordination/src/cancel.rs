//! Cooperative cancellation: sources, tokens, graceful timeouts, linked sources.
//!
//! Mirrors `tokio_util::sync::CancellationToken`'s cooperative model but adds
//! the one-shot callback registration, the graceful-timeout wrap-up phase,
//! and N-way linking that the orchestration core needs and the stock type
//! doesn't expose directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::CancellationError;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
    callbacks: Mutex<Vec<Callback>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            reason: Mutex::new(None),
            notify: Notify::new(),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn fire(&self, reason: Option<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.lock().unwrap() = reason;
            let cbs: Vec<Callback> = std::mem::take(&mut *self.callbacks.lock().unwrap());
            for cb in cbs {
                cb();
            }
            self.notify.notify_waiters();
        }
    }
}

/// A cancellation token: the read side of a [`CancellationSource`].
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().unwrap().clone()
    }

    /// Resolves once cancellation has fired. Resolves immediately if already fired.
    pub fn on_cancellation_requested(&self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if inner.cancelled.load(Ordering::SeqCst) {
                return;
            }
            inner.notify.notified().await;
        })
    }

    /// Registers a callback invoked exactly once on cancellation. If cancellation
    /// already fired, the callback runs immediately (synchronously).
    pub fn register<F: FnOnce() + Send + 'static>(&self, callback: F) {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            callback();
            return;
        }
        let mut cbs = self.inner.callbacks.lock().unwrap();
        // Re-check under the lock: fire() may have run between the first load and here.
        if self.inner.cancelled.load(Ordering::SeqCst) {
            drop(cbs);
            callback();
        } else {
            cbs.push(Box::new(callback));
        }
    }

    pub fn throw_if_cancellation_requested(&self) -> Result<(), CancellationError> {
        if self.is_cancellation_requested() {
            Err(CancellationError::Cancelled {
                reason: self.reason().unwrap_or_else(|| "cancelled".to_string()),
            })
        } else {
            Ok(())
        }
    }
}

/// Owns a [`CancellationToken`] and the ability to fire it.
pub struct CancellationSource {
    inner: Arc<Inner>,
    disposed: AtomicBool,
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: self.inner.clone(),
        }
    }

    pub fn cancel(&self, reason: Option<String>) {
        self.inner.fire(reason);
    }

    /// Schedules a cancellation after `ms` milliseconds, unless disposed first.
    pub fn cancel_after(self: &Arc<Self>, ms: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if !this.disposed.load(Ordering::SeqCst) {
                this.cancel(Some(format!("timeout after {ms}ms")));
            }
        });
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Combines N parent tokens: cancels when *any* parent cancels.
///
/// A pre-cancelled parent causes immediate cancellation on construction.
pub struct LinkedSource {
    source: Arc<CancellationSource>,
}

impl LinkedSource {
    pub fn new(parents: Vec<CancellationToken>) -> Arc<Self> {
        let source = Arc::new(CancellationSource::new());
        let linked = Arc::new(Self {
            source: source.clone(),
        });

        for parent in &parents {
            if parent.is_cancellation_requested() {
                source.cancel(parent.reason());
                return linked;
            }
        }

        for parent in parents {
            let source = source.clone();
            parent.register(move || {
                source.cancel(Some("linked parent cancelled".to_string()));
            });
        }

        linked
    }

    pub fn token(&self) -> CancellationToken {
        self.source.token()
    }

    pub fn cancel(&self, reason: Option<String>) {
        self.source.cancel(reason);
    }
}

/// Inputs controlling a [`GracefulTimeout`] source.
#[derive(Debug, Clone, Copy)]
pub struct GracefulTimeoutConfig {
    pub hard_deadline_ms: u64,
    pub idle_threshold_ms: u64,
    pub wrapup_window_ms: u64,
    pub idle_check_interval_ms: u64,
}

impl GracefulTimeoutConfig {
    pub const DEFAULT_IDLE_CHECK_INTERVAL_MS: u64 = 5000;

    pub fn new(hard_deadline_ms: u64, idle_threshold_ms: u64, wrapup_window_ms: u64) -> Self {
        Self {
            hard_deadline_ms,
            idle_threshold_ms,
            wrapup_window_ms,
            idle_check_interval_ms: Self::DEFAULT_IDLE_CHECK_INTERVAL_MS,
        }
    }
}

struct GracefulInner {
    source: CancellationSource,
    last_progress: Mutex<Instant>,
    started_at: Instant,
    wrapup_fired: AtomicBool,
    wrapup_callbacks: Mutex<Vec<Callback>>,
    config: GracefulTimeoutConfig,
}

/// A cancellation source with a wrap-up phase ahead of the hard deadline.
///
/// Starts a periodic checker on construction (every `idle_check_interval_ms`)
/// that compares `now` against the hard deadline and the last-progress
/// timestamp.
pub struct GracefulTimeout {
    inner: Arc<GracefulInner>,
}

impl GracefulTimeout {
    pub fn start(config: GracefulTimeoutConfig) -> Arc<Self> {
        let inner = Arc::new(GracefulInner {
            source: CancellationSource::new(),
            last_progress: Mutex::new(Instant::now()),
            started_at: Instant::now(),
            wrapup_fired: AtomicBool::new(false),
            wrapup_callbacks: Mutex::new(Vec::new()),
            config,
        });

        let checker = inner.clone();
        tokio::spawn(async move {
            let interval = Duration::from_millis(checker.config.idle_check_interval_ms);
            loop {
                tokio::time::sleep(interval).await;
                if checker.source.token().is_cancellation_requested() {
                    break;
                }
                if Self::tick(&checker) {
                    break;
                }
            }
        });

        Arc::new(Self { inner })
    }

    /// Runs one check; returns true if the source is now cancelled (checker may stop).
    fn tick(inner: &Arc<GracefulInner>) -> bool {
        let now = Instant::now();
        let elapsed_since_start = now.saturating_duration_since(inner.started_at).as_millis() as u64;
        let last_progress = *inner.last_progress.lock().unwrap();
        let idle_for = now.saturating_duration_since(last_progress).as_millis() as u64;

        let near_deadline =
            elapsed_since_start + inner.config.wrapup_window_ms >= inner.config.hard_deadline_ms;
        let idle_too_long = idle_for >= inner.config.idle_threshold_ms;

        if (near_deadline || idle_too_long)
            && inner
                .wrapup_fired
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let cbs: Vec<Callback> = std::mem::take(&mut *inner.wrapup_callbacks.lock().unwrap());
            for cb in cbs {
                cb();
            }
        }

        if elapsed_since_start >= inner.config.hard_deadline_ms {
            inner.source.cancel(Some("hard deadline reached".to_string()));
            return true;
        }
        false
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.source.token()
    }

    /// Resets the idle clock. Call this whenever the agent makes progress.
    pub fn report_progress(&self) {
        *self.inner.last_progress.lock().unwrap() = Instant::now();
    }

    /// Registers a callback fired exactly once when wrap-up begins.
    pub fn on_wrapup_warning<F: FnOnce() + Send + 'static>(&self, callback: F) {
        if self.inner.wrapup_fired.load(Ordering::SeqCst) {
            callback();
            return;
        }
        let mut cbs = self.inner.wrapup_callbacks.lock().unwrap();
        if self.inner.wrapup_fired.load(Ordering::SeqCst) {
            drop(cbs);
            callback();
        } else {
            cbs.push(Box::new(callback));
        }
    }

    pub fn has_wrapup_fired(&self) -> bool {
        self.inner.wrapup_fired.load(Ordering::SeqCst)
    }

    pub fn cancel(&self, reason: Option<String>) {
        self.inner.source.cancel(reason);
    }

    pub fn dispose(&self) {
        self.inner.source.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn cancel_fires_callback_once() {
        let source = CancellationSource::new();
        let token = source.token();
        let count = Arc::new(AtomicU32::new(0));
        let c1 = count.clone();
        token.register(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        source.cancel(Some("test".into()));
        source.cancel(Some("test again".into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(token.is_cancellation_requested());
    }

    #[tokio::test]
    async fn register_after_cancel_fires_immediately() {
        let source = CancellationSource::new();
        let token = source.token();
        source.cancel(None);
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        token.register(move || f.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn throw_if_cancellation_requested() {
        let source = CancellationSource::new();
        let token = source.token();
        assert!(token.throw_if_cancellation_requested().is_ok());
        source.cancel(Some("boom".into()));
        assert!(token.throw_if_cancellation_requested().is_err());
    }

    #[tokio::test]
    async fn linked_source_cancels_on_any_parent() {
        let p1 = CancellationSource::new();
        let p2 = CancellationSource::new();
        let linked = LinkedSource::new(vec![p1.token(), p2.token()]);
        assert!(!linked.token().is_cancellation_requested());
        p1.cancel(Some("p1 down".into()));
        tokio::task::yield_now().await;
        assert!(linked.token().is_cancellation_requested());
    }

    #[tokio::test]
    async fn linked_source_precancelled_parent_cancels_immediately() {
        let p1 = CancellationSource::new();
        p1.cancel(Some("already gone".into()));
        let linked = LinkedSource::new(vec![p1.token()]);
        assert!(linked.token().is_cancellation_requested());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn graceful_timeout_fires_wrapup_once_then_hard_deadline() {
        let gt = GracefulTimeout::start(GracefulTimeoutConfig {
            hard_deadline_ms: 150,
            idle_threshold_ms: 10_000,
            wrapup_window_ms: 80,
            idle_check_interval_ms: 20,
        });
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        gt.on_wrapup_warning(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(gt.token().is_cancellation_requested());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn graceful_timeout_idle_triggers_wrapup() {
        let gt = GracefulTimeout::start(GracefulTimeoutConfig {
            hard_deadline_ms: 10_000,
            idle_threshold_ms: 50,
            wrapup_window_ms: 1,
            idle_check_interval_ms: 20,
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(gt.has_wrapup_fired());
        // Hard deadline is far away; cancellation should not have fired yet.
        assert!(!gt.token().is_cancellation_requested());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn graceful_timeout_report_progress_resets_idle_clock() {
        let gt = GracefulTimeout::start(GracefulTimeoutConfig {
            hard_deadline_ms: 10_000,
            idle_threshold_ms: 100,
            wrapup_window_ms: 1,
            idle_check_interval_ms: 20,
        });
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            gt.report_progress();
        }
        assert!(!gt.has_wrapup_fired());
    }
}
