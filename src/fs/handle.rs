// ============================================================================
// src/fs/handle.rs - Open file handles
// ============================================================================
//!
//! A [`FileHandle`] is one open instance of a file-like object. It owns one
//! reference unit on its filesystem and the driver's per-handle state, the
//! latter behind the handle lock.
//!
//! Dropping a handle is closing it: mappings are detached, the driver's
//! close runs and the filesystem reference is released, on every path out
//! of scope (including unwinding).

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;

use super::filesystem::{EntryType, Filesystem, FsRef, InodeId};
use super::flags::{FdFlags, FileMode, OpenFlags, Whence};
use crate::error::{VfsError, VfsResult};
use crate::sync::HandleLock;

bitflags! {
    /// Optional data operations a handle supports.
    ///
    /// `close` and `dup` are always available.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HandleCaps: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const SEEK = 1 << 2;
        const IOCTL = 1 << 3;
        const FCNTL = 1 << 4;
        const TRUNCATE = 1 << 5;
    }
}

/// File metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    /// Device id of the owning filesystem
    pub dev: u32,
    /// Inode number
    pub ino: InodeId,
    /// File type
    pub kind: EntryType,
    /// File mode/permissions
    pub mode: FileMode,
    /// Number of hard links
    pub nlink: u32,
    /// File size in bytes
    pub size: u64,
    /// Block size for filesystem I/O
    pub blksize: u32,
    /// Number of 512-byte blocks
    pub blocks: u64,
    /// Device number (for special files)
    pub rdev: u64,
}

impl FileStat {
    pub fn new(ino: InodeId, kind: EntryType, mode: FileMode) -> Self {
        Self {
            dev: 0,
            ino,
            kind,
            mode,
            nlink: 1,
            size: 0,
            blksize: 4096,
            blocks: 0,
            rdev: 0,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self.blocks = size.div_ceil(512);
        self
    }
}

/// Per-handle driver operations and state.
///
/// Shared-mode operations take `&self`, exclusive-mode operations take
/// `&mut self`; the dispatch layer hands out the matching borrow from the
/// handle lock. Drivers only get called for operations advertised in
/// [`FileOps::capabilities`].
pub trait FileOps: Send + Sync {
    fn capabilities(&self) -> HandleCaps;

    fn read(&self, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::BadDescriptor)
    }

    fn write(&mut self, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::BadDescriptor)
    }

    /// Move the driver's cursor; returns the new absolute offset.
    fn seek(&self, _offset: i64, _whence: Whence) -> VfsResult<u64> {
        Err(VfsError::NotSeekable)
    }

    fn ioctl(&mut self, _request: usize, _arg: usize) -> VfsResult<usize> {
        Err(VfsError::DeviceControlNotSupported)
    }

    fn fcntl(&mut self, _cmd: i32, _arg: i32) -> VfsResult<i32> {
        Err(VfsError::InvalidArgument)
    }

    fn truncate(&mut self, _len: u64) -> VfsResult<()> {
        Err(VfsError::InvalidArgument)
    }

    fn stat(&self) -> VfsResult<FileStat> {
        Err(VfsError::BadDescriptor)
    }

    /// Create independent driver state for a duplicate handle.
    fn dup(&self) -> VfsResult<Box<dyn FileOps>>;

    /// Last call on this state. Errors are the driver's business.
    fn close(self: Box<Self>) {}
}

/// Unique identity of an open handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// External component holding memory mappings of handles.
///
/// The dispatch layer calls it before the driver's close so no mapping
/// survives its handle.
pub trait MappingTracker: Send + Sync {
    fn remove_all_mappings_of(&self, handle: HandleId);
}

/// Driver state left in a handle once the real state has been closed.
struct ClosedFile;

impl FileOps for ClosedFile {
    fn capabilities(&self) -> HandleCaps {
        HandleCaps::empty()
    }

    fn dup(&self) -> VfsResult<Box<dyn FileOps>> {
        Err(VfsError::BadDescriptor)
    }
}

/// An open file.
pub struct FileHandle {
    id: HandleId,
    fs: FsRef,
    caps: HandleCaps,
    open_flags: OpenFlags,
    fd_flags: AtomicU32,
    mappings: Option<Arc<dyn MappingTracker>>,
    ops: HandleLock<Box<dyn FileOps>>,
}

impl FileHandle {
    /// Takes ownership of the filesystem reference `fs`.
    pub(crate) fn new(
        fs: FsRef,
        ops: Box<dyn FileOps>,
        open_flags: OpenFlags,
        mappings: Option<Arc<dyn MappingTracker>>,
    ) -> Self {
        Self {
            id: HandleId::next(),
            fs,
            caps: ops.capabilities(),
            open_flags,
            fd_flags: AtomicU32::new(FdFlags::empty().bits()),
            mappings,
            ops: HandleLock::new(ops),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn filesystem(&self) -> &Filesystem {
        &self.fs
    }

    pub fn capabilities(&self) -> HandleCaps {
        self.caps
    }

    /// Flags given to open (copied by dup).
    pub fn open_flags(&self) -> OpenFlags {
        self.open_flags
    }

    pub fn fd_flags(&self) -> FdFlags {
        FdFlags::from_bits_retain(self.fd_flags.load(Ordering::Acquire))
    }

    pub fn set_fd_flags(&self, flags: FdFlags) {
        self.fd_flags.store(flags.bits(), Ordering::Release);
    }

    pub fn close_on_exec(&self) -> bool {
        self.fd_flags().contains(FdFlags::CLOEXEC)
    }

    pub fn set_close_on_exec(&self, on: bool) {
        if on {
            self.fd_flags.fetch_or(FdFlags::CLOEXEC.bits(), Ordering::AcqRel);
        } else {
            self.fd_flags.fetch_and(!FdFlags::CLOEXEC.bits(), Ordering::AcqRel);
        }
    }

    pub(crate) fn fs_ref(&self) -> &FsRef {
        &self.fs
    }

    pub(crate) fn ops(&self) -> &HandleLock<Box<dyn FileOps>> {
        &self.ops
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Some(mappings) = &self.mappings {
            mappings.remove_all_mappings_of(self.id);
        }
        // `&mut self` なのでロックは不要
        let closed: Box<dyn FileOps> = Box::new(ClosedFile);
        let ops = core::mem::replace(self.ops.get_mut(), closed);
        ops.close();
        // `fs` is released when the fields drop
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("id", &self.id)
            .field("fs", &self.fs.fs_type())
            .field("caps", &self.caps)
            .field("open_flags", &self.open_flags)
            .field("fd_flags", &self.fd_flags())
            .finish()
    }
}
