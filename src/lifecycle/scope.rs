use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{
    lock, ActiveFlag, CleanupHandle, CleanupRegistry, EventEmitter, ResourceCounts, ResourceKind,
};

/// Owned resource list of one session. `close` stops every timer and
/// interval, removes every listener, runs every tracked unsubscribe and
/// cancels the session token.
pub struct ResourceScope {
    registry: CleanupRegistry,
    active: ActiveFlag,
    token: Mutex<CancellationToken>,
}

impl Default for ResourceScope {
    fn default() -> Self {
        Self {
            registry: CleanupRegistry::new(),
            active: ActiveFlag::new(),
            token: Mutex::new(CancellationToken::new()),
        }
    }
}

impl ResourceScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }

    pub fn active_flag(&self) -> ActiveFlag {
        self.active.clone()
    }

    pub fn register(&self, kind: ResourceKind, cleanup: impl FnOnce() + Send + 'static) -> CleanupHandle {
        self.registry.register(kind, cleanup)
    }

    // Internal helper that registers an abortable task under `kind`.
    fn register_task(&self, kind: ResourceKind) -> (CleanupHandle, Arc<Mutex<Option<AbortHandle>>>) {
        let slot: Arc<Mutex<Option<AbortHandle>>> = Arc::new(Mutex::new(None));
        let abort = slot.clone();
        let handle = self.registry.register(kind, move || {
            if let Some(task) = lock(&abort).take() {
                task.abort();
            }
        });
        (handle, slot)
    }

    // Internal helper that stores the task and aborts it if the cleanup
    // already ran in between.
    fn attach_task(handle: &CleanupHandle, slot: &Mutex<Option<AbortHandle>>, task: AbortHandle) {
        *lock(slot) = Some(task);
        if !handle.is_registered() {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }
    }

    /// Runs `callback` once after `delay`. The timer leaves the registry as
    /// soon as it fires; cancelling it (or closing the scope) before then
    /// means the callback never runs.
    pub fn set_timeout(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> CleanupHandle {
        let (handle, slot) = self.register_task(ResourceKind::Timer);
        let fired = handle.clone();
        let active = self.active.clone();

        let task = tokio::spawn(async move {
            sleep(delay).await;
            if fired.unregister() && active.is_active() {
                callback();
            }
        });
        Self::attach_task(&handle, &slot, task.abort_handle());
        handle
    }

    /// Runs `tick` every `period`, first after one full period. Each tick is
    /// awaited before the next one is scheduled; missed ticks are skipped.
    pub fn set_interval<F, Fut>(&self, period: Duration, mut tick: F) -> CleanupHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (handle, slot) = self.register_task(ResourceKind::Interval);
        let active = self.active.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !active.is_active() {
                    break;
                }
                tick().await;
            }
        });
        Self::attach_task(&handle, &slot, task.abort_handle());
        handle
    }

    pub fn add_listener<E: 'static>(
        &self,
        emitter: &EventEmitter<E>,
        listener: impl Fn(&E) + Send + Sync + 'static,
    ) -> CleanupHandle {
        let id = emitter.add(listener);
        let emitter = emitter.clone();
        self.registry
            .register(ResourceKind::Listener, move || {
                emitter.remove(id);
            })
    }

    pub fn track_subscription(&self, unsubscribe: impl FnOnce() + Send + 'static) -> CleanupHandle {
        self.registry.register(ResourceKind::Subscription, unsubscribe)
    }

    /// The session cancellation token. A cancelled token is replaced with a
    /// fresh one while the scope is still open.
    pub fn cancellation_token(&self) -> CancellationToken {
        let mut token = lock(&self.token);
        if token.is_cancelled() && self.is_active() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        self.registry.counts()
    }

    /// Deactivates the scope and tears down everything it owns. Safe to
    /// call more than once.
    pub fn close(&self) -> usize {
        self.active.deactivate();
        lock(&self.token).cancel();
        let failed = self.registry.run_all();
        if failed > 0 {
            tracing::warn!("{} cleanup callbacks failed while closing scope", failed);
        }
        failed
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if self.is_active() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hits() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        (hits.clone(), hits)
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once_and_leaves_registry() {
        let scope = ResourceScope::new();
        let (count, sink) = hits();
        scope.set_timeout(Duration::from_secs(5), move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scope.resource_counts().timers, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scope.resource_counts().timers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_scope_never_fires_timers() {
        let scope = ResourceScope::new();
        let (count, sink) = hits();
        scope.set_timeout(Duration::from_secs(5), move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        scope.close();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(scope.resource_counts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticks_until_close() {
        // Memastikan interval berhenti setelah scope ditutup
        let scope = ResourceScope::new();
        let (count, sink) = hits();
        scope.set_interval(Duration::from_secs(60), move || {
            let sink = sink.clone();
            async move {
                sink.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        scope.close();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scope.resource_counts().intervals, 0);
    }

    #[test]
    fn listeners_are_removed_on_close() {
        let scope = ResourceScope::new();
        let emitter = EventEmitter::<()>::new();
        scope.add_listener(&emitter, |_| {});
        scope.add_listener(&emitter, |_| {});
        assert_eq!(emitter.listener_count(), 2);
        assert_eq!(scope.resource_counts().listeners, 2);

        scope.close();
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn subscription_unsubscribes_exactly_once() {
        let scope = ResourceScope::new();
        let (count, sink) = hits();
        let handle = scope.track_subscription(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.run());
        scope.close();
        scope.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_token_is_reissued_while_open() {
        let scope = ResourceScope::new();
        let first = scope.cancellation_token();
        first.cancel();
        let second = scope.cancellation_token();
        assert!(!second.is_cancelled());

        scope.close();
        assert!(second.is_cancelled());
        assert!(scope.cancellation_token().is_cancelled());
    }
}
