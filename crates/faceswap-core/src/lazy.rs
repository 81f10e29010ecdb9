//! Lazily constructed, mutex-guarded model slot.
//!
//! ONNX sessions need `&mut` to run, so each model lives behind its own lock.
//! Construction happens on first use and is kept for the lifetime of the
//! slot. A failed construction is not memoized: the next caller retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct LazyModel<T> {
    name: &'static str,
    slot: Mutex<Option<T>>,
    // Readable without waiting for an in-flight inference to release `slot`.
    loaded: AtomicBool,
}

impl<T> LazyModel<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
            loaded: AtomicBool::new(false),
        }
    }

    /// Run `f` against the model, constructing it with `init` if needed.
    ///
    /// The lock is held for the whole of `f`.
    pub fn with<R, E>(
        &self,
        init: impl FnOnce() -> Result<T, E>,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E> {
        let mut slot = self.lock();
        let model = match &mut *slot {
            Some(model) => model,
            empty @ None => {
                tracing::debug!(model = self.name, "initializing model");
                let model = empty.insert(init()?);
                self.loaded.store(true, Ordering::Release);
                model
            }
        };
        f(model)
    }

    /// Construct the model now if it is not loaded yet.
    pub fn ensure<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<(), E> {
        self.with(init, |_| Ok(()))
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    // A panic inside inference leaves the session itself intact.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
