//! Shared access to a single allocator.
//!
//! The allocators themselves take `&mut self` and do no locking. `Locked`
//! serialises every operation behind one `parking_lot` mutex.

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct Locked<A> {
    inner: Mutex<A>,
}

impl<A> Locked<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    /// Runs `f` with exclusive access, blocking until the lock is free.
    pub fn with<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Like [`Locked::with`] but returns `None` instead of blocking.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut A) -> R) -> Option<R> {
        let mut guard = self.inner.try_lock()?;
        Some(f(&mut guard))
    }

    pub fn get_mut(&mut self) -> &mut A {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> A {
        self.inner.into_inner()
    }
}
