use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::lock;

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Timer,
    Interval,
    Listener,
    Subscription,
    Custom,
}

/// Number of still-registered cleanups per resource kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceCounts {
    pub timers: usize,
    pub intervals: usize,
    pub listeners: usize,
    pub subscriptions: usize,
    pub other: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.timers + self.intervals + self.listeners + self.subscriptions + self.other
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

struct Entry {
    kind: ResourceKind,
    cleanup: Cleanup,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
    closed: bool,
}

/// Ordered set of teardown callbacks.
///
/// `run_all` closes the registry and runs every registered callback once,
/// newest first. A panicking callback is logged and does not stop the rest.
/// Callbacks registered after close run immediately.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: ResourceKind, cleanup: impl FnOnce() + Send + 'static) -> CleanupHandle {
        let mut inner = lock(&self.inner);
        if inner.closed {
            drop(inner);
            run_guarded(kind, Box::new(cleanup));
            return CleanupHandle::detached();
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                kind,
                cleanup: Box::new(cleanup),
            },
        );
        CleanupHandle {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Runs all registered cleanups and returns how many of them panicked.
    pub fn run_all(&self) -> usize {
        let entries = {
            let mut inner = lock(&self.inner);
            inner.closed = true;
            std::mem::take(&mut inner.entries)
        };

        entries
            .into_values()
            .rev()
            .map(|entry| run_guarded(entry.kind, entry.cleanup))
            .filter(|ok| !ok)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> ResourceCounts {
        let inner = lock(&self.inner);
        let mut counts = ResourceCounts::default();
        for entry in inner.entries.values() {
            match entry.kind {
                ResourceKind::Timer => counts.timers += 1,
                ResourceKind::Interval => counts.intervals += 1,
                ResourceKind::Listener => counts.listeners += 1,
                ResourceKind::Subscription => counts.subscriptions += 1,
                ResourceKind::Custom => counts.other += 1,
            }
        }
        counts
    }
}

// Internal helper that runs one cleanup, returning false when it panicked.
fn run_guarded(kind: ResourceKind, cleanup: Cleanup) -> bool {
    match catch_unwind(AssertUnwindSafe(cleanup)) {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Cleanup failed for {:?} resource: {}", kind, message);
            false
        }
    }
}

/// Handle to one registered cleanup.
#[derive(Clone)]
pub struct CleanupHandle {
    id: u64,
    registry: Weak<Mutex<RegistryInner>>,
}

impl CleanupHandle {
    fn detached() -> Self {
        Self {
            id: u64::MAX,
            registry: Weak::new(),
        }
    }

    fn take(&self) -> Option<Entry> {
        let registry = self.registry.upgrade()?;
        let mut inner = lock(&registry);
        inner.entries.remove(&self.id)
    }

    /// Removes the cleanup without running it. Returns false when it was
    /// already removed or run.
    pub fn unregister(&self) -> bool {
        self.take().is_some()
    }

    /// Removes the cleanup and runs it now.
    pub fn run(&self) -> bool {
        match self.take() {
            Some(entry) => run_guarded(entry.kind, entry.cleanup),
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| lock(&registry).entries.contains_key(&self.id))
            .unwrap_or(false)
    }
}

/// "Still active" flag checked by async work before applying its result.
#[derive(Debug, Clone)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl Default for ActiveFlag {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl ActiveFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let shared = hits.clone();
        (hits, move || {
            let hits = shared.clone();
            Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        })
    }

    #[test]
    fn run_all_runs_each_cleanup_once() {
        let registry = CleanupRegistry::new();
        let (hits, make) = counter();
        registry.register(ResourceKind::Custom, make());
        registry.register(ResourceKind::Timer, make());

        assert_eq!(registry.run_all(), 0);
        assert_eq!(registry.run_all(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_skips_cleanup() {
        let registry = CleanupRegistry::new();
        let (hits, make) = counter();
        let handle = registry.register(ResourceKind::Listener, make());
        assert!(handle.unregister());
        assert!(!handle.unregister());
        registry.run_all();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_cleanup_does_not_block_others() {
        // Memastikan satu cleanup yang panic tidak menghentikan cleanup lain
        let registry = CleanupRegistry::new();
        let (hits, make) = counter();
        registry.register(ResourceKind::Custom, make());
        registry.register(ResourceKind::Custom, || panic!("teardown exploded"));
        registry.register(ResourceKind::Custom, make());

        assert_eq!(registry.run_all(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn register_after_close_runs_immediately() {
        let registry = CleanupRegistry::new();
        registry.run_all();
        let (hits, make) = counter();
        let handle = registry.register(ResourceKind::Subscription, make());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handle.is_registered());
    }

    #[test]
    fn handle_run_executes_and_deregisters() {
        let registry = CleanupRegistry::new();
        let (hits, make) = counter();
        let handle = registry.register(ResourceKind::Subscription, make());
        assert_eq!(registry.counts().subscriptions, 1);
        assert!(handle.run());
        assert!(!handle.run());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.counts().is_empty());
    }

    #[test]
    fn active_flag_is_shared_between_clones() {
        let flag = ActiveFlag::new();
        let observer = flag.clone();
        assert!(observer.is_active());
        flag.deactivate();
        assert!(!observer.is_active());
    }
}
