//! Single-writer observable values.
//!
//! State pushed by the server is written only by the dispatch path, which
//! owns the [`Observable`]. Everything else (UI, status banners, tests) reads
//! through cloned [`Observer`] handles and can detect changes by comparing
//! revisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

struct Shared<T> {
    value: RwLock<T>,
    revision: AtomicU64,
}

/// The writable side of an observable value.
///
/// Not `Clone`: there is exactly one writer, and writing needs `&mut self`.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

/// A read-only handle to an [`Observable`].
pub struct Observer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                value: RwLock::new(value),
                revision: AtomicU64::new(0),
            }),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        read(&self.shared)
    }

    /// Replace the value and bump the revision.
    pub fn set(&mut self, value: T) {
        let mut guard = self
            .shared
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = value;
        self.shared.revision.fetch_add(1, Ordering::Release);
    }

    /// Replace the value only if it differs. Returns true if it changed.
    pub fn set_if_changed(&mut self, value: T) -> bool
    where
        T: PartialEq,
    {
        if self.get() == value {
            return false;
        }
        self.set(value);
        true
    }

    pub fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::Acquire)
    }

    /// Create a read-only handle.
    pub fn observer(&self) -> Observer<T> {
        Observer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> Observer<T> {
    pub fn get(&self) -> T {
        read(&self.shared)
    }

    /// Number of writes so far.
    pub fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::Acquire)
    }
}

fn read<T: Clone>(shared: &Shared<T>) -> T {
    shared
        .value
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

impl<T: Clone + std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.get())
            .field("revision", &self.revision())
            .finish()
    }
}
