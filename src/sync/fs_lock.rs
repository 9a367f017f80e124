// ============================================================================
// src/sync/fs_lock.rs - Per-filesystem exclusive lock
// ============================================================================
//!
//! One `FsLock` exists per mounted filesystem. It is held across path
//! resolution and the structural driver call that consumes the result
//! (open, mkdir, rmdir, unlink), so the two are atomic with respect to other
//! structural changes on the same filesystem.
//!
//! The lock is exclusive only. It never nests with a [`HandleLock`].
//!
//! [`HandleLock`]: super::HandleLock

use spin::{Mutex, MutexGuard};

/// Exclusive-only filesystem lock.
pub struct FsLock {
    inner: Mutex<()>,
}

/// Proof that the filesystem lock is held. Releases the lock on drop.
pub struct FsLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl FsLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    /// Block until the lock is acquired.
    pub fn lock(&self) -> FsLockGuard<'_> {
        FsLockGuard {
            _guard: self.inner.lock(),
        }
    }

    pub fn try_lock(&self) -> Option<FsLockGuard<'_>> {
        self.inner.try_lock().map(|guard| FsLockGuard { _guard: guard })
    }

    /// ロック状態を確認（デバッグ用）
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl Default for FsLock {
    fn default() -> Self {
        Self::new()
    }
}
