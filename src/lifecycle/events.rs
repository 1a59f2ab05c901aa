use std::sync::{Arc, Mutex};

use super::lock;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct EmitterInner<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Minimal multi-listener event source. Listeners are called in
/// registration order, outside the internal lock.
pub struct EventEmitter<E> {
    inner: Arc<Mutex<EmitterInner<E>>>,
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EmitterInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        ListenerId(id)
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.listeners.len();
        inner.listeners.retain(|(listener_id, _)| *listener_id != id.0);
        inner.listeners.len() != before
    }

    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = lock(&self.inner)
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_listeners_until_removed() {
        let emitter = EventEmitter::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));
        let sink = total.clone();
        let id = emitter.add(move |value| {
            sink.fetch_add(*value as usize, Ordering::SeqCst);
        });

        emitter.emit(&3);
        assert!(emitter.remove(id));
        assert!(!emitter.remove(id));
        emitter.emit(&5);

        assert_eq!(total.load(Ordering::SeqCst), 3);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn listener_may_emit_reentrantly() {
        // Memastikan listener dipanggil di luar lock
        let emitter = EventEmitter::<u8>::new();
        let inner = emitter.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        emitter.add(move |depth| {
            counter.fetch_add(1, Ordering::SeqCst);
            if *depth == 0 {
                inner.emit(&1);
            }
        });
        emitter.emit(&0);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
