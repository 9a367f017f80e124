// ============================================================================
// src/fs/flags.rs - Open flags, descriptor flags, modes, seek origins
// ============================================================================

use bitflags::bitflags;

use crate::error::{VfsError, VfsResult};

bitflags! {
    /// Open flags (Linux values).
    ///
    /// Read-only access is the empty access mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        /// Open for writing only
        const WRONLY = 0o1;
        /// Open for reading and writing
        const RDWR = 0o2;
        /// Create file if it does not exist
        const CREAT = 0o100;
        /// Fail if file exists (with CREAT)
        const EXCL = 0o200;
        /// Do not make the file the controlling terminal
        const NOCTTY = 0o400;
        /// Truncate file to zero length
        const TRUNC = 0o1000;
        /// Append to end of file
        const APPEND = 0o2000;
        /// Non-blocking mode
        const NONBLOCK = 0o4000;
        /// Synchronized data writes
        const DSYNC = 0o10000;
        /// Signal-driven I/O (not supported)
        const ASYNC = 0o20000;
        /// Bypass caches
        const DIRECT = 0o40000;
        const LARGEFILE = 0o100000;
        /// Fail unless the path names a directory
        const DIRECTORY = 0o200000;
        const NOFOLLOW = 0o400000;
        const NOATIME = 0o1000000;
        /// Close on exec
        const CLOEXEC = 0o2000000;
        /// Synchronous I/O
        const SYNC = 0o4010000;
        const PATH = 0o10000000;
        /// Unnamed temporary file (not supported). Includes DIRECTORY.
        const TMPFILE = 0o20000000 | Self::DIRECTORY.bits();
    }
}

impl OpenFlags {
    /// 読み取り専用アクセスモード
    pub const RDONLY: Self = Self::empty();

    /// The handle may be read from.
    ///
    /// Only a pure write-only open excludes reading.
    pub fn is_readable(&self) -> bool {
        !self.contains(Self::WRONLY) || self.contains(Self::RDWR)
    }

    /// The handle may be written to.
    pub fn is_writable(&self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR)
    }

    pub fn create(&self) -> bool {
        self.contains(Self::CREAT)
    }

    pub fn exclusive(&self) -> bool {
        self.contains(Self::CREAT | Self::EXCL)
    }

    pub fn truncate(&self) -> bool {
        self.contains(Self::TRUNC)
    }

    pub fn append(&self) -> bool {
        self.contains(Self::APPEND)
    }
}

bitflags! {
    /// Per-descriptor flags. Never shared between a handle and its duplicate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FdFlags: u32 {
        /// Close on exec
        const CLOEXEC = 1;
    }
}

/// File mode/permissions (UNIX-style)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileMode(pub u16);

impl FileMode {
    /// Owner read permission
    pub const S_IRUSR: u16 = 0o400;
    /// Owner write permission
    pub const S_IWUSR: u16 = 0o200;
    /// Owner execute permission
    pub const S_IXUSR: u16 = 0o100;

    /// Default file mode (rw-r--r--)
    pub const DEFAULT_FILE: FileMode = FileMode(0o644);
    /// Default directory mode (rwxr-xr-x)
    pub const DEFAULT_DIR: FileMode = FileMode(0o755);

    /// Permission bits only
    pub const fn permissions(&self) -> u16 {
        self.0 & 0o7777
    }

    pub fn owner_read(&self) -> bool {
        self.0 & Self::S_IRUSR != 0
    }

    pub fn owner_write(&self) -> bool {
        self.0 & Self::S_IWUSR != 0
    }

    pub fn owner_execute(&self) -> bool {
        self.0 & Self::S_IXUSR != 0
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self::DEFAULT_FILE
    }
}

/// Seek origin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    /// SEEK_SET
    Start,
    /// SEEK_CUR
    Current,
    /// SEEK_END
    End,
}

impl Whence {
    pub const SEEK_SET: i32 = 0;
    pub const SEEK_CUR: i32 = 1;
    pub const SEEK_END: i32 = 2;
    pub const SEEK_DATA: i32 = 3;
    pub const SEEK_HOLE: i32 = 4;

    /// Apply `offset` relative to this origin.
    ///
    /// Negative results are rejected with `InvalidArgument`.
    pub fn apply(self, offset: i64, current: u64, end: u64) -> VfsResult<u64> {
        let base = match self {
            Whence::Start => 0,
            Whence::Current => current,
            Whence::End => end,
        };
        base.checked_add_signed(offset).ok_or(VfsError::InvalidArgument)
    }
}

impl TryFrom<i32> for Whence {
    type Error = VfsError;

    /// SEEK_DATA and SEEK_HOLE are recognized but not supported.
    fn try_from(raw: i32) -> VfsResult<Self> {
        match raw {
            Self::SEEK_SET => Ok(Whence::Start),
            Self::SEEK_CUR => Ok(Whence::Current),
            Self::SEEK_END => Ok(Whence::End),
            _ => Err(VfsError::InvalidArgument),
        }
    }
}

/// fcntl commands (Linux values)
pub mod fcntl {
    pub const F_DUPFD: i32 = 0;
    pub const F_GETFD: i32 = 1;
    pub const F_SETFD: i32 = 2;
    pub const F_GETFL: i32 = 3;
    pub const F_SETFL: i32 = 4;
}
