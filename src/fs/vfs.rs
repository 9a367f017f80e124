// ============================================================================
// src/fs/vfs.rs - VFS dispatch layer
// ============================================================================
//!
//! The operations kernel and process code use on files: validate flags,
//! take the right lock, delegate to the driver, report a uniform result.
//!
//! ## Lock discipline
//! - open / mkdir / rmdir / unlink / stat: filesystem lock (exclusive)
//!   around path resolution plus the driver call
//! - read / seek / fstat / dup: handle lock, shared
//! - write / ioctl / fcntl / ftruncate: handle lock, exclusive
//! - close: no lock; the handle is consumed
//!
//! No call path holds locks from both domains.
//!
//! ## References
//! Path-based calls hold an [`FsRef`] from the mount lookup until they
//! return. `open` and `dup` move one into the new handle; `close` drops it.

use alloc::sync::Arc;

use lazy_static::lazy_static;

use super::filesystem::{FsCaps, FsOps, FsRef};
use super::flags::{FdFlags, FileMode, OpenFlags, Whence};
use super::handle::{FileHandle, FileStat, HandleCaps, MappingTracker};
use super::mount::{MountRegistry, MountTable};
use super::path::{PathWalker, ResolvedPath, Resolver};
use super::stats::{VfsOp, VfsStats, VfsStatsSnapshot};
use crate::error::{Deferred, VfsError, VfsResult};

/// The dispatch layer.
pub struct Vfs<M: MountRegistry = MountTable, R: Resolver = PathWalker> {
    mounts: M,
    resolver: R,
    mappings: Option<Arc<dyn MappingTracker>>,
    stats: VfsStats,
}

impl Vfs {
    /// Empty mount table, component-walking resolver.
    pub fn new() -> Self {
        Self::with_parts(MountTable::new(), PathWalker)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MountRegistry, R: Resolver> Vfs<M, R> {
    pub fn with_parts(mounts: M, resolver: R) -> Self {
        Self {
            mounts,
            resolver,
            mappings: None,
            stats: VfsStats::new(),
        }
    }

    /// Detach mappings through `tracker` whenever a handle is closed.
    pub fn with_mapping_tracker(mut self, tracker: Arc<dyn MappingTracker>) -> Self {
        self.mappings = Some(tracker);
        self
    }

    pub fn mounts(&self) -> &M {
        &self.mounts
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn stats(&self) -> VfsStatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // Path-based operations
    // ========================================================================

    /// Open `path`.
    ///
    /// On success the handle carries `flags` and, for `O_CLOEXEC`, the
    /// close-on-exec descriptor flag.
    pub fn open(&self, path: &str, flags: OpenFlags, mode: FileMode) -> VfsResult<FileHandle> {
        assert_preemptible!();
        let result = self.do_open(path, flags, mode);
        self.finish(VfsOp::Open, path, result)
    }

    fn do_open(&self, path: &str, flags: OpenFlags, mode: FileMode) -> VfsResult<FileHandle> {
        assert_absolute(path);

        if flags.contains(OpenFlags::ASYNC) {
            return Err(Deferred::AsyncIo.into());
        }
        if flags.contains(OpenFlags::TMPFILE) {
            return Err(Deferred::TmpFile.into());
        }

        let (fs, fs_path) = self.lookup(path)?;
        let ops = self.locked(&fs, fs_path, |ops, p| ops.open(p, flags, mode))?;

        let handle = FileHandle::new(fs, ops, flags, self.mappings.clone());
        if flags.contains(OpenFlags::CLOEXEC) {
            handle.set_fd_flags(FdFlags::CLOEXEC);
        }
        Ok(handle)
    }

    pub fn mkdir(&self, path: &str, mode: FileMode) -> VfsResult<()> {
        assert_preemptible!();
        let result = self.structural(path, FsCaps::MKDIR, VfsError::PermissionDenied, |ops, p| {
            ops.mkdir(p, mode)
        });
        self.finish(VfsOp::Mkdir, path, result)
    }

    pub fn rmdir(&self, path: &str) -> VfsResult<()> {
        assert_preemptible!();
        let result = self.structural(path, FsCaps::RMDIR, VfsError::PermissionDenied, |ops, p| {
            ops.rmdir(p)
        });
        self.finish(VfsOp::Rmdir, path, result)
    }

    /// A driver without unlink reports `ReadOnlyFilesystem`, unlike
    /// mkdir/rmdir which report `PermissionDenied`. Existing callers rely
    /// on the distinction.
    pub fn unlink(&self, path: &str) -> VfsResult<()> {
        assert_preemptible!();
        let result = self.structural(path, FsCaps::UNLINK, VfsError::ReadOnlyFilesystem, |ops, p| {
            ops.unlink(p)
        });
        self.finish(VfsOp::Unlink, path, result)
    }

    /// Metadata of the entry at `path`.
    pub fn stat(&self, path: &str) -> VfsResult<FileStat> {
        assert_preemptible!();
        let result = self.do_stat(path);
        self.finish(VfsOp::Stat, path, result)
    }

    fn do_stat(&self, path: &str) -> VfsResult<FileStat> {
        assert_absolute(path);
        let (fs, fs_path) = self.lookup(path)?;
        let mut st = self.locked(&fs, fs_path, |ops, p| {
            if !p.exists() {
                return Err(VfsError::NotFound);
            }
            ops.stat(p)
        })?;
        st.dev = fs.device_id();
        Ok(st)
    }

    /// Shared body of mkdir / rmdir / unlink.
    fn structural(
        &self,
        path: &str,
        cap: FsCaps,
        missing_cap: VfsError,
        op: impl FnOnce(&dyn FsOps, ResolvedPath<'_>) -> VfsResult<()>,
    ) -> VfsResult<()> {
        assert_absolute(path);
        let (fs, fs_path) = self.lookup(path)?;

        if !fs.is_writable() {
            return Err(VfsError::ReadOnlyFilesystem);
        }
        if !fs.capabilities().contains(cap) {
            return Err(missing_cap);
        }

        self.locked(&fs, fs_path, op)
    }

    fn lookup<'p>(&self, path: &'p str) -> VfsResult<(FsRef, &'p str)> {
        self.mounts.lookup_and_retain(path).ok_or(VfsError::NotFound)
    }

    /// Resolve `fs_path` and run `op` on the result, all under the
    /// filesystem lock.
    fn locked<T>(
        &self,
        fs: &FsRef,
        fs_path: &str,
        op: impl FnOnce(&dyn FsOps, ResolvedPath<'_>) -> VfsResult<T>,
    ) -> VfsResult<T> {
        let locked = fs.lock();
        let resolved = self.resolver.resolve(&locked, fs_path)?;
        op(locked.ops(), resolved)
    }

    // ========================================================================
    // Handle-based operations
    // ========================================================================

    /// Close `handle`.
    ///
    /// Never fails: mappings are detached, the driver's close runs and the
    /// filesystem reference is released no matter what the driver does.
    /// Dropping a handle does the same; this entry point adds the stats and
    /// the mounted-filesystem check.
    pub fn close(&self, handle: FileHandle) {
        let fs = handle.fs_ref().clone();
        drop(handle);

        let remaining = fs.release();
        // while a filesystem is mounted the table keeps one reference
        debug_assert!(remaining > 0, "closed the last reference of a mounted filesystem");

        self.stats.record(VfsOp::Close, true);
    }

    /// Duplicate `handle`.
    ///
    /// The duplicate shares the filesystem (retained again) and copies the
    /// open flags; descriptor flags start out empty.
    pub fn dup(&self, handle: &FileHandle) -> VfsResult<FileHandle> {
        let result = handle.ops().shared().dup().map(|ops| {
            FileHandle::new(
                handle.fs_ref().clone(),
                ops,
                handle.open_flags(),
                self.mappings.clone(),
            )
        });
        self.record(VfsOp::Dup, result)
    }

    pub fn read(&self, handle: &FileHandle, buf: &mut [u8]) -> VfsResult<usize> {
        assert_preemptible!();
        let result = if !handle.capabilities().contains(HandleCaps::READ) {
            Err(VfsError::BadDescriptor)
        } else if !handle.open_flags().is_readable() {
            // not opened for reading
            Err(VfsError::BadDescriptor)
        } else {
            handle.ops().shared().read(buf)
        };
        self.record(VfsOp::Read, result)
    }

    pub fn write(&self, handle: &FileHandle, buf: &[u8]) -> VfsResult<usize> {
        assert_preemptible!();
        let result = if !handle.capabilities().contains(HandleCaps::WRITE) {
            Err(VfsError::BadDescriptor)
        } else if !handle.open_flags().is_writable() {
            // not opened for writing
            Err(VfsError::BadDescriptor)
        } else {
            handle.ops().exclusive().write(buf)
        };
        self.record(VfsOp::Write, result)
    }

    /// Reposition the handle's cursor. `whence` is the raw SEEK_* value;
    /// SEEK_DATA and SEEK_HOLE are rejected.
    pub fn seek(&self, handle: &FileHandle, offset: i64, whence: i32) -> VfsResult<u64> {
        assert_preemptible!();
        let result = Whence::try_from(whence).and_then(|whence| {
            if !handle.capabilities().contains(HandleCaps::SEEK) {
                return Err(VfsError::NotSeekable);
            }
            handle.ops().shared().seek(offset, whence)
        });
        self.record(VfsOp::Seek, result)
    }

    pub fn ioctl(&self, handle: &FileHandle, request: usize, arg: usize) -> VfsResult<usize> {
        assert_preemptible!();
        let result = if !handle.capabilities().contains(HandleCaps::IOCTL) {
            Err(VfsError::DeviceControlNotSupported)
        } else {
            handle.ops().exclusive().ioctl(request, arg)
        };
        self.record(VfsOp::Ioctl, result)
    }

    pub fn fcntl(&self, handle: &FileHandle, cmd: i32, arg: i32) -> VfsResult<i32> {
        assert_preemptible!();
        let result = if !handle.capabilities().contains(HandleCaps::FCNTL) {
            Err(VfsError::InvalidArgument)
        } else {
            handle.ops().exclusive().fcntl(cmd, arg)
        };
        self.record(VfsOp::Fcntl, result)
    }

    /// Metadata of an open handle, `dev` filled in from its filesystem.
    pub fn fstat(&self, handle: &FileHandle) -> VfsResult<FileStat> {
        assert_preemptible!();
        let result = handle.ops().shared().stat().map(|mut st| {
            st.dev = handle.filesystem().device_id();
            st
        });
        self.record(VfsOp::Fstat, result)
    }

    pub fn ftruncate(&self, handle: &FileHandle, len: u64) -> VfsResult<()> {
        assert_preemptible!();
        let result = if !handle.capabilities().contains(HandleCaps::TRUNCATE) {
            Err(VfsError::InvalidArgument)
        } else if !handle.open_flags().is_writable() {
            Err(VfsError::BadDescriptor)
        } else {
            handle.ops().exclusive().truncate(len)
        };
        self.record(VfsOp::Ftruncate, result)
    }

    // ========================================================================
    // Accounting
    // ========================================================================

    fn record<T>(&self, op: VfsOp, result: VfsResult<T>) -> VfsResult<T> {
        self.stats.record(op, result.is_ok());
        if let Err(e) = &result {
            log::debug!("vfs: {} failed: {}", op, e);
        }
        result
    }

    fn finish<T>(&self, op: VfsOp, path: &str, result: VfsResult<T>) -> VfsResult<T> {
        self.stats.record(op, result.is_ok());
        match &result {
            Ok(_) => log::trace!("vfs: {} {}", op, path),
            Err(e) => log::debug!("vfs: {} {} failed: {}", op, path, e),
        }
        result
    }
}

/// Relative paths are a caller bug, not a runtime error.
fn assert_absolute(path: &str) {
    assert!(path.starts_with('/'), "VFS works only with absolute paths: {:?}", path);
}

// ============================================================================
// Global instance
// ============================================================================

lazy_static! {
    static ref GLOBAL_VFS: Vfs = Vfs::new();
}

/// The kernel's VFS
pub fn vfs() -> &'static Vfs {
    &GLOBAL_VFS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::errno;
    use crate::fs::filesystem::{Entry, EntryType, Filesystem, FsFlags, InodeId};
    use crate::fs::handle::{FileOps, HandleId};
    use crate::fs::memfs::MemFs;
    use crate::fs::path::LockedFs;
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    // ===== Spy driver =====

    /// Shared counters observed by every spy handle.
    #[derive(Default)]
    struct Spy {
        readers_inside: AtomicUsize,
        writers_inside: AtomicUsize,
        max_readers: AtomicUsize,
        violations: AtomicUsize,
        writes: AtomicUsize,
        closes: AtomicUsize,
        structural: AtomicUsize,
        /// A read waits inside the driver until this many readers are in.
        rendezvous: AtomicUsize,
        /// A read also waits inside the driver while this is set.
        hold: AtomicBool,
    }

    struct SpyFs {
        spy: Arc<Spy>,
        caps: FsCaps,
        file_caps: HandleCaps,
    }

    const FILE_INO: InodeId = InodeId(2);

    impl FsOps for SpyFs {
        fn fs_type(&self) -> &str {
            "spy"
        }

        fn capabilities(&self) -> FsCaps {
            self.caps
        }

        fn root(&self) -> InodeId {
            InodeId(1)
        }

        fn lookup(&self, _dir: InodeId, name: &str) -> VfsResult<Option<Entry>> {
            Ok((name == "file").then(|| Entry::new(FILE_INO, EntryType::Regular)))
        }

        fn open(
            &self,
            path: ResolvedPath<'_>,
            flags: OpenFlags,
            _mode: FileMode,
        ) -> VfsResult<Box<dyn FileOps>> {
            if !path.exists() && !flags.create() {
                return Err(VfsError::NotFound);
            }
            Ok(Box::new(SpyFile {
                spy: self.spy.clone(),
                caps: self.file_caps,
            }))
        }

        fn stat(&self, path: ResolvedPath<'_>) -> VfsResult<FileStat> {
            let ino = path.inode().ok_or(VfsError::NotFound)?;
            Ok(FileStat::new(ino, EntryType::Regular, FileMode::DEFAULT_FILE))
        }

        fn mkdir(&self, _path: ResolvedPath<'_>, _mode: FileMode) -> VfsResult<()> {
            self.spy.structural.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rmdir(&self, _path: ResolvedPath<'_>) -> VfsResult<()> {
            self.spy.structural.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unlink(&self, _path: ResolvedPath<'_>) -> VfsResult<()> {
            self.spy.structural.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SpyFile {
        spy: Arc<Spy>,
        caps: HandleCaps,
    }

    impl FileOps for SpyFile {
        fn capabilities(&self) -> HandleCaps {
            self.caps
        }

        fn read(&self, _buf: &mut [u8]) -> VfsResult<usize> {
            let p = &self.spy;
            let inside = p.readers_inside.fetch_add(1, Ordering::SeqCst) + 1;
            p.max_readers.fetch_max(inside, Ordering::SeqCst);
            if p.writers_inside.load(Ordering::SeqCst) != 0 {
                p.violations.fetch_add(1, Ordering::SeqCst);
            }

            let deadline = Instant::now() + Duration::from_secs(2);
            while (p.readers_inside.load(Ordering::SeqCst) < p.rendezvous.load(Ordering::SeqCst)
                || p.hold.load(Ordering::SeqCst))
                && Instant::now() < deadline
            {
                thread::yield_now();
            }

            p.readers_inside.fetch_sub(1, Ordering::SeqCst);
            Ok(0)
        }

        fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
            let p = &self.spy;
            let prev = p.writers_inside.fetch_add(1, Ordering::SeqCst);
            if prev != 0 || p.readers_inside.load(Ordering::SeqCst) != 0 {
                p.violations.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(100));
            p.writes.fetch_add(1, Ordering::SeqCst);
            p.writers_inside.fetch_sub(1, Ordering::SeqCst);
            Ok(buf.len())
        }

        fn seek(&self, offset: i64, whence: Whence) -> VfsResult<u64> {
            whence.apply(offset, 0, 0)
        }

        fn ioctl(&mut self, request: usize, _arg: usize) -> VfsResult<usize> {
            Ok(request + 1)
        }

        fn stat(&self) -> VfsResult<FileStat> {
            Ok(FileStat::new(FILE_INO, EntryType::Regular, FileMode::DEFAULT_FILE))
        }

        fn dup(&self) -> VfsResult<Box<dyn FileOps>> {
            Ok(Box::new(SpyFile {
                spy: self.spy.clone(),
                caps: self.caps,
            }))
        }

        fn close(self: Box<Self>) {
            self.spy.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spy_fs(flags: FsFlags, caps: FsCaps, file_caps: HandleCaps) -> (Arc<Filesystem>, Arc<Spy>) {
        let spy = Arc::new(Spy::default());
        let fs = Filesystem::new(
            SpyFs {
                spy: spy.clone(),
                caps,
                file_caps,
            },
            flags,
        );
        (fs, spy)
    }

    // ===== Counting registry / resolver =====

    #[derive(Default)]
    struct CountingMounts {
        table: MountTable,
        lookups: AtomicUsize,
    }

    impl MountRegistry for CountingMounts {
        fn lookup_and_retain<'p>(&self, path: &'p str) -> Option<(FsRef, &'p str)> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.table.lookup_and_retain(path)
        }
    }

    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl Resolver for CountingResolver {
        fn resolve<'g>(&self, locked: &'g LockedFs<'_>, path: &str) -> VfsResult<ResolvedPath<'g>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PathWalker.resolve(locked, path)
        }
    }

    fn counting_vfs() -> Vfs<CountingMounts, CountingResolver> {
        Vfs::with_parts(CountingMounts::default(), CountingResolver::default())
    }

    fn all_file_caps() -> HandleCaps {
        HandleCaps::READ | HandleCaps::WRITE | HandleCaps::SEEK | HandleCaps::IOCTL
    }

    // ===== Tests =====

    #[test]
    fn test_open_missing_mount() {
        let vfs = Vfs::new();
        let err = vfs.open("/x", OpenFlags::RDONLY, FileMode::DEFAULT_FILE).unwrap_err();
        assert_eq!(err, VfsError::NotFound);
    }

    #[test]
    #[should_panic(expected = "absolute")]
    fn test_relative_path_panics() {
        let vfs = Vfs::new();
        let _ = vfs.open("etc/passwd", OpenFlags::RDONLY, FileMode::DEFAULT_FILE);
    }

    #[test]
    fn test_async_and_tmpfile_rejected_before_lookup() {
        let vfs = counting_vfs();
        let (fs, _) = spy_fs(FsFlags::RW, FsCaps::all(), all_file_caps());
        vfs.mounts().table.mount("/", &fs).unwrap();

        let err = vfs
            .open("/file", OpenFlags::RDWR | OpenFlags::ASYNC, FileMode::DEFAULT_FILE)
            .unwrap_err();
        assert_eq!(err, VfsError::NotSupportedYet(Deferred::AsyncIo));
        assert_eq!(err.errno(), -errno::EINVAL);

        let err = vfs
            .open("/file", OpenFlags::RDWR | OpenFlags::TMPFILE, FileMode::DEFAULT_FILE)
            .unwrap_err();
        assert_eq!(err, VfsError::NotSupportedYet(Deferred::TmpFile));

        assert_eq!(vfs.mounts().lookups.load(Ordering::SeqCst), 0);
        assert_eq!(vfs.resolver().calls.load(Ordering::SeqCst), 0);
        assert_eq!(fs.ref_count(), 1);

        // O_DIRECTORY alone is fine
        let h = vfs
            .open("/file", OpenFlags::DIRECTORY, FileMode::DEFAULT_FILE)
            .unwrap();
        vfs.close(h);
    }

    #[test]
    fn test_read_only_mount_rejects_structural_ops_without_resolving() {
        let vfs = counting_vfs();
        let (fs, spy) = spy_fs(FsFlags::empty(), FsCaps::all(), all_file_caps());
        vfs.mounts().table.mount("/ro", &fs).unwrap();

        assert_eq!(vfs.mkdir("/ro/d", FileMode::DEFAULT_DIR), Err(VfsError::ReadOnlyFilesystem));
        assert_eq!(vfs.rmdir("/ro/d"), Err(VfsError::ReadOnlyFilesystem));
        assert_eq!(vfs.unlink("/ro/file"), Err(VfsError::ReadOnlyFilesystem));

        assert_eq!(vfs.resolver().calls.load(Ordering::SeqCst), 0);
        assert_eq!(spy.structural.load(Ordering::SeqCst), 0);
        assert_eq!(fs.ref_count(), 1);
    }

    #[test]
    fn test_missing_structural_capabilities() {
        let vfs = counting_vfs();
        let (fs, spy) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().table.mount("/", &fs).unwrap();

        assert_eq!(vfs.mkdir("/d", FileMode::DEFAULT_DIR), Err(VfsError::PermissionDenied));
        assert_eq!(vfs.rmdir("/d"), Err(VfsError::PermissionDenied));
        assert_eq!(vfs.unlink("/file"), Err(VfsError::ReadOnlyFilesystem));

        assert_eq!(vfs.resolver().calls.load(Ordering::SeqCst), 0);
        assert_eq!(spy.structural.load(Ordering::SeqCst), 0);
        assert_eq!(fs.ref_count(), 1);
    }

    #[test]
    fn test_structural_ops_reach_driver() {
        let vfs = counting_vfs();
        let (fs, spy) = spy_fs(FsFlags::RW, FsCaps::all(), all_file_caps());
        vfs.mounts().table.mount("/", &fs).unwrap();

        vfs.mkdir("/d", FileMode::DEFAULT_DIR).unwrap();
        vfs.rmdir("/d").unwrap();
        vfs.unlink("/file").unwrap();

        assert_eq!(spy.structural.load(Ordering::SeqCst), 3);
        assert_eq!(vfs.resolver().calls.load(Ordering::SeqCst), 3);
        assert_eq!(fs.ref_count(), 1);
    }

    #[test]
    fn test_handle_capabilities() {
        let vfs = Vfs::new();
        let (fs, _) = spy_fs(FsFlags::RW, FsCaps::empty(), HandleCaps::READ);
        vfs.mounts().mount("/", &fs).unwrap();

        let h = vfs.open("/file", OpenFlags::RDWR, FileMode::DEFAULT_FILE).unwrap();
        assert_eq!(vfs.write(&h, b"x"), Err(VfsError::BadDescriptor));
        assert_eq!(vfs.seek(&h, 0, Whence::SEEK_SET), Err(VfsError::NotSeekable));
        assert_eq!(vfs.ioctl(&h, 1, 0), Err(VfsError::DeviceControlNotSupported));
        assert_eq!(vfs.fcntl(&h, 3, 0), Err(VfsError::InvalidArgument));
        assert_eq!(vfs.ftruncate(&h, 0), Err(VfsError::InvalidArgument));
        assert_eq!(vfs.read(&h, &mut [0; 4]), Ok(0));

        // whence is validated before the capability
        assert_eq!(vfs.seek(&h, 0, Whence::SEEK_HOLE), Err(VfsError::InvalidArgument));
        vfs.close(h);
    }

    #[test]
    fn test_access_mode_checks() {
        let vfs = Vfs::new();
        let (fs, spy) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().mount("/", &fs).unwrap();

        let ro = vfs.open("/file", OpenFlags::RDONLY, FileMode::DEFAULT_FILE).unwrap();
        assert_eq!(vfs.write(&ro, b"x"), Err(VfsError::BadDescriptor));
        assert_eq!(vfs.read(&ro, &mut [0; 1]), Ok(0));

        let wo = vfs.open("/file", OpenFlags::WRONLY, FileMode::DEFAULT_FILE).unwrap();
        assert_eq!(vfs.read(&wo, &mut [0; 1]), Err(VfsError::BadDescriptor));
        assert_eq!(vfs.write(&wo, b"abc"), Ok(3));
        assert_eq!(vfs.ioctl(&wo, 41, 0), Ok(42));
        assert_eq!(spy.writes.load(Ordering::SeqCst), 1);

        vfs.close(ro);
        vfs.close(wo);
    }

    #[test]
    fn test_refcount_conservation() {
        let vfs = Vfs::new();
        let fs = Filesystem::new(MemFs::new(), FsFlags::RW);
        vfs.mounts().mount("/", &fs).unwrap();
        assert_eq!(fs.ref_count(), 1);

        let a = vfs
            .open("/a", OpenFlags::CREAT | OpenFlags::RDWR, FileMode::DEFAULT_FILE)
            .unwrap();
        let b = vfs.dup(&a).unwrap();
        let c = vfs.dup(&b).unwrap();
        assert_eq!(fs.ref_count(), 4);

        // failed calls give their reference back
        assert!(vfs.open("/missing", OpenFlags::RDONLY, FileMode::DEFAULT_FILE).is_err());
        assert!(vfs.rmdir("/missing").is_err());
        assert!(vfs.stat("/missing").is_err());
        vfs.mkdir("/dir", FileMode::DEFAULT_DIR).unwrap();
        assert_eq!(fs.ref_count(), 4);

        vfs.close(b);
        vfs.close(a);
        assert_eq!(fs.ref_count(), 2);
        vfs.close(c);
        assert_eq!(fs.ref_count(), 1);
    }

    #[test]
    fn test_dup_descriptor_flags_are_independent() {
        let vfs = Vfs::new();
        let (fs, _) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().mount("/", &fs).unwrap();

        let h = vfs
            .open("/file", OpenFlags::RDWR | OpenFlags::CLOEXEC, FileMode::DEFAULT_FILE)
            .unwrap();
        assert!(h.close_on_exec());

        let d = vfs.dup(&h).unwrap();
        assert!(!d.close_on_exec());
        assert_eq!(d.open_flags(), h.open_flags());
        assert_ne!(d.id(), h.id());

        d.set_close_on_exec(true);
        h.set_close_on_exec(false);
        assert!(d.close_on_exec());
        assert!(!h.close_on_exec());

        vfs.close(h);
        vfs.close(d);
    }

    #[test]
    fn test_close_runs_driver_close_and_mapping_tracker() {
        #[derive(Default)]
        struct Mappings {
            removed: Mutex<Vec<HandleId>>,
        }

        impl MappingTracker for Mappings {
            fn remove_all_mappings_of(&self, handle: HandleId) {
                self.removed.lock().unwrap().push(handle);
            }
        }

        let mappings = Arc::new(Mappings::default());
        let vfs = Vfs::new().with_mapping_tracker(mappings.clone());
        let (fs, spy) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().mount("/", &fs).unwrap();

        let h = vfs.open("/file", OpenFlags::RDONLY, FileMode::DEFAULT_FILE).unwrap();
        let id = h.id();
        vfs.close(h);

        assert_eq!(*mappings.removed.lock().unwrap(), [id]);
        assert_eq!(spy.closes.load(Ordering::SeqCst), 1);
        assert_eq!(fs.ref_count(), 1);
    }

    #[test]
    fn test_stat_and_fstat_stamp_device_id() {
        let vfs = Vfs::new();
        let (fs, _) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().mount("/", &fs).unwrap();

        let st = vfs.stat("/file").unwrap();
        assert_eq!(st.dev, fs.device_id());
        assert_eq!(st.ino, FILE_INO);
        assert_eq!(vfs.stat("/nope"), Err(VfsError::NotFound));

        let h = vfs.open("/file", OpenFlags::RDONLY, FileMode::DEFAULT_FILE).unwrap();
        assert_eq!(vfs.fstat(&h).unwrap().dev, fs.device_id());
        vfs.close(h);
    }

    #[test]
    fn test_writes_are_mutually_exclusive() {
        let vfs = Vfs::new();
        let (fs, spy) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().mount("/", &fs).unwrap();
        let h = vfs.open("/file", OpenFlags::RDWR, FileMode::DEFAULT_FILE).unwrap();

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..25 {
                        assert_eq!(vfs.write(&h, b"data"), Ok(4));
                        vfs.read(&h, &mut [0; 4]).unwrap();
                    }
                });
            }
        });

        assert_eq!(spy.writes.load(Ordering::SeqCst), 100);
        assert_eq!(spy.violations.load(Ordering::SeqCst), 0);
        vfs.close(h);
    }

    #[test]
    fn test_reads_share_the_handle_lock() {
        let vfs = Vfs::new();
        let (fs, spy) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().mount("/", &fs).unwrap();
        let h = vfs.open("/file", OpenFlags::RDWR, FileMode::DEFAULT_FILE).unwrap();

        spy.rendezvous.store(2, Ordering::SeqCst);
        let start = Barrier::new(2);

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    start.wait();
                    vfs.read(&h, &mut [0; 1]).unwrap();
                });
            }
        });

        // both readers were inside the driver at the same time
        assert_eq!(spy.max_readers.load(Ordering::SeqCst), 2);

        // seek and fstat only need the shared lock as well
        let guard = h.ops().shared();
        assert_eq!(vfs.seek(&h, 7, Whence::SEEK_SET), Ok(7));
        assert!(vfs.fstat(&h).is_ok());
        assert!(h.ops().try_exclusive().is_none());
        drop(guard);

        vfs.close(h);
    }

    #[test]
    fn test_write_waits_for_in_flight_read() {
        let vfs = Vfs::new();
        let (fs, spy) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().mount("/", &fs).unwrap();
        let h = vfs.open("/file", OpenFlags::RDWR, FileMode::DEFAULT_FILE).unwrap();

        spy.hold.store(true, Ordering::SeqCst);
        let wrote = AtomicBool::new(false);

        thread::scope(|s| {
            let reader = s.spawn(|| vfs.read(&h, &mut [0; 1]));
            while spy.readers_inside.load(Ordering::SeqCst) == 0 {
                thread::yield_now();
            }

            let writer = s.spawn(|| {
                let n = vfs.write(&h, b"late");
                wrote.store(true, Ordering::SeqCst);
                n
            });

            thread::sleep(Duration::from_millis(50));
            // the writer is parked on the handle lock, not in the driver
            assert!(!wrote.load(Ordering::SeqCst));
            assert_eq!(spy.writes.load(Ordering::SeqCst), 0);
            // a seek still gets in next to the reader
            assert_eq!(vfs.seek(&h, 3, Whence::SEEK_SET), Ok(3));

            spy.hold.store(false, Ordering::SeqCst);
            assert_eq!(reader.join().unwrap(), Ok(0));
            assert_eq!(writer.join().unwrap(), Ok(4));
        });

        assert!(wrote.load(Ordering::SeqCst));
        assert_eq!(spy.writes.load(Ordering::SeqCst), 1);
        assert_eq!(spy.violations.load(Ordering::SeqCst), 0);
        vfs.close(h);
    }

    #[test]
    fn test_dropped_handle_is_closed() {
        #[derive(Default)]
        struct Mappings {
            removed: Mutex<Vec<HandleId>>,
        }

        impl MappingTracker for Mappings {
            fn remove_all_mappings_of(&self, handle: HandleId) {
                self.removed.lock().unwrap().push(handle);
            }
        }

        let mappings = Arc::new(Mappings::default());
        let vfs = Vfs::new().with_mapping_tracker(mappings.clone());
        let (fs, spy) = spy_fs(FsFlags::RW, FsCaps::empty(), all_file_caps());
        vfs.mounts().mount("/", &fs).unwrap();

        let h = vfs.open("/file", OpenFlags::RDONLY, FileMode::DEFAULT_FILE).unwrap();
        let d = vfs.dup(&h).unwrap();
        let ids = [h.id(), d.id()];
        assert_eq!(fs.ref_count(), 3);

        drop(h);
        drop(d);

        assert_eq!(*mappings.removed.lock().unwrap(), ids);
        assert_eq!(spy.closes.load(Ordering::SeqCst), 2);
        assert_eq!(fs.ref_count(), 1);
        // not counted as close calls
        assert_eq!(vfs.stats().calls(VfsOp::Close), 0);
    }

    #[test]
    fn test_stats_record_calls_and_failures() {
        let vfs = Vfs::new();
        let (fs, _) = spy_fs(FsFlags::RW, FsCaps::empty(), HandleCaps::READ);
        vfs.mounts().mount("/", &fs).unwrap();

        let h = vfs.open("/file", OpenFlags::RDONLY, FileMode::DEFAULT_FILE).unwrap();
        let _ = vfs.open("/nope", OpenFlags::RDONLY, FileMode::DEFAULT_FILE);
        let _ = vfs.write(&h, b"x");
        vfs.close(h);

        let snap = vfs.stats();
        assert_eq!(snap.calls(VfsOp::Open), 2);
        assert_eq!(snap.failures(VfsOp::Open), 1);
        assert_eq!(snap.failures(VfsOp::Write), 1);
        assert_eq!(snap.calls(VfsOp::Close), 1);
        assert_eq!(snap.failures(VfsOp::Close), 0);
    }

    #[test]
    fn test_global_instance() {
        assert!(core::ptr::eq(vfs(), vfs()));
    }
}
