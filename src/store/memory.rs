//! Name-keyed in-memory store with change notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::lifecycle::Shutdown;
use crate::store::{StoreError, StoreObject};

/// Capacity of the notification buffer between writers and watchers.
const NOTIFY_BUFFER: usize = 10;

/// Receives a full, name-ordered snapshot whenever the store changes.
pub trait WatchHandler<T>: Send + Sync + 'static {
    fn on_update(&self, objects: &[T]);
}

impl<T, F> WatchHandler<T> for F
where
    F: Fn(&[T]) + Send + Sync + 'static,
{
    fn on_update(&self, objects: &[T]) {
        self(objects)
    }
}

struct Inner<T> {
    objects: DashMap<String, T>,
    updates: broadcast::Sender<()>,
    writes: AtomicU64,
}

/// A thread-safe map of named objects.
///
/// Readers and writers are serialised per key by the map's internal
/// read-write locks; the last completed write is what subsequent reads see.
pub struct MemoryStore<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: StoreObject> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StoreObject> MemoryStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(NOTIFY_BUFFER);
        Self {
            inner: Arc::new(Inner {
                objects: DashMap::new(),
                updates,
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Insert a new object. Fails if the name is taken.
    pub fn create(&self, obj: T) -> Result<T, StoreError> {
        match self.inner.objects.entry(obj.name().to_string()) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(obj.name().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(obj.clone());
            }
        }
        self.updated();
        Ok(obj)
    }

    /// Replace an existing object. Fails if the name is unknown.
    pub fn update(&self, obj: T) -> Result<T, StoreError> {
        match self.inner.objects.get_mut(obj.name()) {
            Some(mut existing) => *existing = obj.clone(),
            None => return Err(StoreError::NotFound(obj.name().to_string())),
        }
        self.updated();
        Ok(obj)
    }

    /// Remove an object by name.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        if self.inner.objects.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.updated();
        Ok(())
    }

    /// Fetch a copy of an object by name.
    pub fn get(&self, name: &str) -> Result<T, StoreError> {
        self.inner
            .objects
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// All objects, ordered by name.
    pub fn list(&self) -> Vec<T> {
        let mut objects: Vec<T> = self
            .inner
            .objects
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        objects.sort_by(|a, b| a.name().cmp(b.name()));
        objects
    }

    /// Number of successful writes (create, update, delete) since creation.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Build a watcher that calls `handlers` with a fresh snapshot after
    /// every change. Nothing is delivered until [`Watcher::run`] is polled.
    pub fn watch(&self, handlers: Vec<Box<dyn WatchHandler<T>>>) -> Watcher<T> {
        Watcher {
            store: self.clone(),
            updates: self.inner.updates.subscribe(),
            handlers,
        }
    }

    fn updated(&self) {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        // No receivers simply means nobody is watching yet.
        let _ = self.inner.updates.send(());
    }
}

/// A subscription to store changes.
pub struct Watcher<T> {
    store: MemoryStore<T>,
    updates: broadcast::Receiver<()>,
    handlers: Vec<Box<dyn WatchHandler<T>>>,
}

impl<T: StoreObject> Watcher<T> {
    /// Dispatch change notifications until shutdown.
    pub async fn run(mut self, shutdown: Shutdown) {
        loop {
            tokio::select! {
                received = self.updates.recv() => match received {
                    // A lagged receiver missed intermediate signals, but a
                    // fresh snapshot covers them all.
                    Ok(()) | Err(RecvError::Lagged(_)) => self.dispatch(),
                    Err(RecvError::Closed) => return,
                },
                _ = shutdown.cancelled() => return,
            }
        }
    }

    fn dispatch(&self) {
        let snapshot = self.store.list();
        for handler in &self.handlers {
            handler.on_update(&snapshot);
        }
    }
}
