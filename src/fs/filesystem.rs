// ============================================================================
// src/fs/filesystem.rs - Mounted filesystem instance and reference counting
// ============================================================================
//!
//! A [`Filesystem`] is one mounted instance of a driver. Its lifetime as a
//! *mount* is governed by an explicit reference count that is only ever
//! touched through [`FsRef`]: creating an `FsRef` retains, dropping it
//! releases. Whoever drops the last `FsRef` runs the driver's teardown.
//!
//! The mount table owns one `FsRef` for as long as the filesystem is mounted,
//! every open handle owns one, and every in-flight path-based call owns one
//! for the duration of the call.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use super::flags::{FileMode, OpenFlags};
use super::handle::{FileOps, FileStat};
use super::path::{LockedFs, ResolvedPath};
use crate::error::{VfsError, VfsResult};
use crate::sync::FsLock;

// ============================================================================
// Device identifiers
// ============================================================================

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(0);

/// Hand out the next device id. Monotonic, never reused.
pub fn new_device_id() -> u32 {
    NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Flags and capabilities
// ============================================================================

bitflags! {
    /// Mount flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FsFlags: u32 {
        /// Mounted read-write
        const RW = 1 << 0;
    }
}

bitflags! {
    /// Optional structural operations a driver implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FsCaps: u32 {
        const MKDIR = 1 << 0;
        const RMDIR = 1 << 1;
        const UNLINK = 1 << 2;
    }
}

/// Inode number, meaningful only to the driver that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeId(pub u64);

/// File type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Character device
    CharDevice,
    /// Block device
    BlockDevice,
    /// Named pipe (FIFO)
    Fifo,
    /// Socket
    Socket,
}

/// One directory entry as seen by the resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub ino: InodeId,
    pub kind: EntryType,
}

impl Entry {
    pub const fn new(ino: InodeId, kind: EntryType) -> Self {
        Self { ino, kind }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryType::Directory
    }
}

// ============================================================================
// Driver operation table
// ============================================================================

/// Filesystem-level driver operations.
///
/// Structural operations receive a [`ResolvedPath`] by value; it can only be
/// produced while the filesystem lock is held, so every call below runs
/// inside that critical section. Optional operations are only invoked when
/// the matching [`FsCaps`] bit is advertised.
pub trait FsOps: Send + Sync {
    /// Driver name, e.g. "memfs"
    fn fs_type(&self) -> &str;

    /// Optional structural operations implemented by this driver.
    fn capabilities(&self) -> FsCaps {
        FsCaps::empty()
    }

    /// Root directory inode.
    fn root(&self) -> InodeId;

    /// Look `name` up in directory `dir`. `Ok(None)` if it does not exist.
    fn lookup(&self, dir: InodeId, name: &str) -> VfsResult<Option<Entry>>;

    /// Open (and possibly create) the resolved entry.
    fn open(
        &self,
        path: ResolvedPath<'_>,
        flags: OpenFlags,
        mode: FileMode,
    ) -> VfsResult<Box<dyn FileOps>>;

    /// Metadata of the resolved entry.
    fn stat(&self, path: ResolvedPath<'_>) -> VfsResult<FileStat>;

    fn mkdir(&self, _path: ResolvedPath<'_>, _mode: FileMode) -> VfsResult<()> {
        Err(VfsError::PermissionDenied)
    }

    fn rmdir(&self, _path: ResolvedPath<'_>) -> VfsResult<()> {
        Err(VfsError::PermissionDenied)
    }

    fn unlink(&self, _path: ResolvedPath<'_>) -> VfsResult<()> {
        Err(VfsError::ReadOnlyFilesystem)
    }

    /// Called exactly once, by whoever drops the last reference.
    fn teardown(&self) {}
}

// ============================================================================
// Filesystem instance
// ============================================================================

/// One mounted filesystem instance.
pub struct Filesystem {
    ops: Box<dyn FsOps>,
    flags: FsFlags,
    device_id: u32,
    ref_count: AtomicU32,
    lock: FsLock,
}

impl Filesystem {
    /// Wrap a driver. The new instance has a reference count of 0 until it
    /// is mounted or otherwise retained.
    pub fn new<O: FsOps + 'static>(ops: O, flags: FsFlags) -> Arc<Self> {
        Self::from_boxed(Box::new(ops), flags)
    }

    pub fn from_boxed(ops: Box<dyn FsOps>, flags: FsFlags) -> Arc<Self> {
        Arc::new(Self {
            ops,
            flags,
            device_id: new_device_id(),
            ref_count: AtomicU32::new(0),
            lock: FsLock::new(),
        })
    }

    pub fn fs_type(&self) -> &str {
        self.ops.fs_type()
    }

    pub fn flags(&self) -> FsFlags {
        self.flags
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(FsFlags::RW)
    }

    pub fn capabilities(&self) -> FsCaps {
        self.ops.capabilities()
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Current reference count (mount table + handles + in-flight calls).
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Take one reference.
    pub fn retain(self: &Arc<Self>) -> FsRef {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
        FsRef {
            fs: Arc::clone(self),
            released: false,
        }
    }

    /// Give back one reference and return the count this decrement left.
    ///
    /// The value comes from the decrement itself, so a concurrent unmount
    /// cannot change what the caller observes.
    fn put(&self) -> u32 {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "filesystem released more often than retained");

        if prev == 1 {
            log::info!(
                "vfs: last reference to {} (dev {}) dropped, tearing down",
                self.fs_type(),
                self.device_id
            );
            self.ops.teardown();
        }
        prev - 1
    }

    /// Acquire the filesystem lock. The returned witness is required to
    /// resolve paths and to reach structural driver operations.
    pub fn lock(&self) -> LockedFs<'_> {
        LockedFs::new(self, self.lock.lock())
    }

    pub(crate) fn ops(&self) -> &dyn FsOps {
        &*self.ops
    }
}

impl fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filesystem")
            .field("type", &self.fs_type())
            .field("device_id", &self.device_id)
            .field("flags", &self.flags)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

// ============================================================================
// FsRef - one unit of the reference count
// ============================================================================

/// Owned reference-count unit on a [`Filesystem`].
///
/// Cloning retains again; dropping releases. The drop that brings the count
/// to zero calls [`FsOps::teardown`].
pub struct FsRef {
    fs: Arc<Filesystem>,
    released: bool,
}

impl FsRef {
    pub fn filesystem(&self) -> &Arc<Filesystem> {
        &self.fs
    }

    /// Release explicitly, returning the count left by this release.
    pub fn release(mut self) -> u32 {
        self.released = true;
        self.fs.put()
    }
}

impl Clone for FsRef {
    fn clone(&self) -> Self {
        self.fs.retain()
    }
}

impl Deref for FsRef {
    type Target = Filesystem;

    fn deref(&self) -> &Filesystem {
        &self.fs
    }
}

impl Drop for FsRef {
    fn drop(&mut self) {
        if !self.released {
            self.fs.put();
        }
    }
}

impl fmt::Debug for FsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FsRef").field(&*self.fs).finish()
    }
}
