// ============================================================================
// src/fs/stats.rs - Dispatch-layer operation counters
// ============================================================================

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Operations exposed by the dispatch layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VfsOp {
    Open,
    Close,
    Dup,
    Read,
    Write,
    Seek,
    Ioctl,
    Fcntl,
    Mkdir,
    Rmdir,
    Unlink,
    Stat,
    Fstat,
    Ftruncate,
}

impl VfsOp {
    pub const COUNT: usize = 14;

    pub const ALL: [VfsOp; Self::COUNT] = [
        VfsOp::Open,
        VfsOp::Close,
        VfsOp::Dup,
        VfsOp::Read,
        VfsOp::Write,
        VfsOp::Seek,
        VfsOp::Ioctl,
        VfsOp::Fcntl,
        VfsOp::Mkdir,
        VfsOp::Rmdir,
        VfsOp::Unlink,
        VfsOp::Stat,
        VfsOp::Fstat,
        VfsOp::Ftruncate,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            VfsOp::Open => "open",
            VfsOp::Close => "close",
            VfsOp::Dup => "dup",
            VfsOp::Read => "read",
            VfsOp::Write => "write",
            VfsOp::Seek => "seek",
            VfsOp::Ioctl => "ioctl",
            VfsOp::Fcntl => "fcntl",
            VfsOp::Mkdir => "mkdir",
            VfsOp::Rmdir => "rmdir",
            VfsOp::Unlink => "unlink",
            VfsOp::Stat => "stat",
            VfsOp::Fstat => "fstat",
            VfsOp::Ftruncate => "ftruncate",
        }
    }
}

impl fmt::Display for VfsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Live counters
pub struct VfsStats {
    calls: [AtomicU64; VfsOp::COUNT],
    failures: [AtomicU64; VfsOp::COUNT],
}

impl VfsStats {
    pub const fn new() -> Self {
        Self {
            calls: [const { AtomicU64::new(0) }; VfsOp::COUNT],
            failures: [const { AtomicU64::new(0) }; VfsOp::COUNT],
        }
    }

    pub fn record(&self, op: VfsOp, ok: bool) {
        self.calls[op as usize].fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures[op as usize].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> VfsStatsSnapshot {
        VfsStatsSnapshot {
            calls: core::array::from_fn(|i| self.calls[i].load(Ordering::Relaxed)),
            failures: core::array::from_fn(|i| self.failures[i].load(Ordering::Relaxed)),
        }
    }
}

impl Default for VfsStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`VfsStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VfsStatsSnapshot {
    calls: [u64; VfsOp::COUNT],
    failures: [u64; VfsOp::COUNT],
}

impl VfsStatsSnapshot {
    pub fn calls(&self, op: VfsOp) -> u64 {
        self.calls[op as usize]
    }

    pub fn failures(&self, op: VfsOp) -> u64 {
        self.failures[op as usize]
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.iter().sum()
    }
}
