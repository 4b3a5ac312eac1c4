//! Observer registry with RAII subscriptions.
//!
//! Callbacks are snapshotted under the lock and invoked outside it, so a
//! callback may subscribe or unsubscribe without deadlocking.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

struct Registry<F: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Arc<F>)>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<F: ?Sized + Send + Sync> Detach for Mutex<Registry<F>> {
    fn detach(&self, id: u64) {
        let mut reg = self.lock().unwrap_or_else(|e| e.into_inner());
        reg.entries.retain(|(eid, _)| *eid != id);
    }
}

/// Set of callbacks of type `F`.
pub struct Observers<F: ?Sized> {
    inner: Arc<Mutex<Registry<F>>>,
}

impl<F: ?Sized> Default for Observers<F> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 1,
                entries: Vec::new(),
            })),
        }
    }
}

/// Clones share one registry.
impl<F: ?Sized> Clone for Observers<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ?Sized + Send + Sync + 'static> Observers<F> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry<F>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, callback: Arc<F>) -> Subscription {
        let mut reg = self.lock();
        let id = reg.next_id;
        reg.next_id += 1;
        reg.entries.push((id, callback));
        let registry: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            id,
            registry: Some(Arc::downgrade(&registry)),
        }
    }

    /// Callbacks registered right now.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.lock().entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

/// Handle returned by every `subscribe`/`register_*` call. Dropping it
/// unsubscribes; [`Subscription::detach`] keeps the callback registered for
/// the lifetime of its owner.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Option<Weak<dyn Detach>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn detach(mut self) {
        self.registry = None;
    }

    /// Unsubscribe now. Same as dropping.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(reg) = self.registry.take().and_then(|w| w.upgrade()) {
            reg.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.registry.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Cb = dyn Fn(usize) + Send + Sync;

    fn fire(obs: &Observers<Cb>, v: usize) {
        for cb in obs.snapshot() {
            cb(v);
        }
    }

    #[test]
    fn test_multiple_subscribers() {
        let obs: Observers<Cb> = Observers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let (h1, h2) = (hits.clone(), hits.clone());
        let _a = obs.subscribe(Arc::new(move |v: usize| {
            h1.fetch_add(v, Ordering::SeqCst);
        }));
        let _b = obs.subscribe(Arc::new(move |v: usize| {
            h2.fetch_add(v * 10, Ordering::SeqCst);
        }));
        fire(&obs, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let obs: Observers<Cb> = Observers::new();
        let sub = obs.subscribe(Arc::new(|_: usize| {}));
        assert_eq!(obs.len(), 1);
        drop(sub);
        assert!(obs.is_empty());
    }

    #[test]
    fn test_detach_keeps_callback() {
        let obs: Observers<Cb> = Observers::new();
        obs.subscribe(Arc::new(|_: usize| {})).detach();
        assert_eq!(obs.len(), 1);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let obs: Observers<Cb> = Observers::new();
        let sub = obs.subscribe(Arc::new(|_: usize| {}));
        drop(obs);
        drop(sub);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let obs: Arc<Observers<Cb>> = Arc::new(Observers::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let sub = obs.subscribe(Arc::new(move |_: usize| {
            inner.lock().unwrap().take();
        }));
        *slot.lock().unwrap() = Some(sub);
        fire(&obs, 0);
        assert!(obs.is_empty());
    }
}
