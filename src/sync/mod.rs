// ============================================================================
// src/sync/mod.rs - 同期プリミティブ
// VFSの2つのロックドメインとプリエンプション状態
// ============================================================================

/// Entry-point precondition: the caller must be able to block.
///
/// Not checked in unit tests, which run on host threads without a scheduler.
macro_rules! assert_preemptible {
    () => {
        #[cfg(not(test))]
        debug_assert!(
            $crate::sync::preempt::is_preemption_enabled(),
            "blocking VFS call with preemption disabled"
        );
    };
}

pub mod fs_lock;
pub mod handle_lock;
pub mod preempt;

pub use fs_lock::{FsLock, FsLockGuard};
pub use handle_lock::{ExclusiveGuard, HandleLock, SharedGuard};
pub use preempt::{PreemptGuard, disable_preemption, is_preemption_enabled};
