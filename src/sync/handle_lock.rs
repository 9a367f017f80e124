// ============================================================================
// src/sync/handle_lock.rs - Per-handle shared/exclusive lock
// ============================================================================
//!
//! Guards the driver state of one open handle.
//!
//! | mode      | operations                         |
//! |-----------|------------------------------------|
//! | shared    | read, seek, fstat, dup             |
//! | exclusive | write, ioctl, fcntl, ftruncate     |
//!
//! Seek is shared: it only moves a driver-private cursor, and concurrent
//! read+seek races are settled by the driver's own cursor semantics.

use spin::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared access to the guarded value.
pub type SharedGuard<'a, T> = RwLockReadGuard<'a, T>;

/// Exclusive access to the guarded value.
pub type ExclusiveGuard<'a, T> = RwLockWriteGuard<'a, T>;

/// Shared/exclusive handle lock.
pub struct HandleLock<T> {
    inner: RwLock<T>,
}

impl<T> HandleLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Acquire in shared mode. Blocks only while a writer holds the lock.
    pub fn shared(&self) -> SharedGuard<'_, T> {
        self.inner.read()
    }

    /// Acquire in exclusive mode. Blocks until all readers and writers leave.
    pub fn exclusive(&self) -> ExclusiveGuard<'_, T> {
        self.inner.write()
    }

    pub fn try_shared(&self) -> Option<SharedGuard<'_, T>> {
        self.inner.try_read()
    }

    pub fn try_exclusive(&self) -> Option<ExclusiveGuard<'_, T>> {
        self.inner.try_write()
    }

    /// Owning the lock proves nobody else can hold it.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
