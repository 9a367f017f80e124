//! 統一エラーハンドリングモジュール
//!
//! VFS全体で使用されるエラー型を定義し、
//! Linux互換のerrno値との相互変換を提供します。

use core::fmt;

/// 未対応のカーネル機能 (意図的に後回しにしているもの)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    /// 非同期I/O (O_ASYNC)
    AsyncIo,
    /// 一時ファイル (O_TMPFILE)
    TmpFile,
}

/// VFSエラー型
///
/// ドライバが返したエラーはディスパッチ層で再解釈されずにそのまま呼び出し元へ届く。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    /// マウントが見つからない、またはパス解決に失敗
    NotFound,
    /// 読み取り専用マウントへの変更操作
    ReadOnlyFilesystem,
    /// ドライバがこの操作を提供していない
    PermissionDenied,
    /// ハンドルが操作をサポートしない、またはオープンモード不一致
    BadDescriptor,
    /// 不正なフラグ / whence / リクエスト
    InvalidArgument,
    /// シーク不可能なハンドル
    NotSeekable,
    /// デバイス制御 (ioctl) 非対応
    DeviceControlNotSupported,
    /// 未実装のカーネル機能
    NotSupportedYet(Deferred),
    /// 既に存在する
    AlreadyExists,
    /// ディレクトリではない
    NotDirectory,
    /// ディレクトリである
    IsDirectory,
    /// ディレクトリが空でない
    NotEmpty,
    /// 空き容量なし
    NoSpace,
    /// 名前が長すぎる
    NameTooLong,
    /// 使用中
    Busy,
    /// I/Oエラー
    Io,
    /// メモリ不足
    OutOfMemory,
}

/// VFS操作の結果型
pub type VfsResult<T> = Result<T, VfsError>;

/// Linux errno values used by the VFS ABI.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOTTY: i32 = 25;
    pub const ENOSPC: i32 = 28;
    pub const ESPIPE: i32 = 29;
    pub const EROFS: i32 = 30;
    pub const ENAMETOOLONG: i32 = 36;
    pub const ENOTEMPTY: i32 = 39;
    pub const EOPNOTSUPP: i32 = 95;
}

impl VfsError {
    /// 負のerrno値に変換 (システムコール境界用)
    pub const fn errno(self) -> i32 {
        use errno::*;
        let code = match self {
            VfsError::NotFound => ENOENT,
            VfsError::ReadOnlyFilesystem => EROFS,
            VfsError::PermissionDenied => EPERM,
            VfsError::BadDescriptor => EBADF,
            VfsError::InvalidArgument => EINVAL,
            VfsError::NotSeekable => ESPIPE,
            VfsError::DeviceControlNotSupported => ENOTTY,
            // O_ASYNC has always been reported as EINVAL at the syscall boundary.
            VfsError::NotSupportedYet(Deferred::AsyncIo) => EINVAL,
            VfsError::NotSupportedYet(Deferred::TmpFile) => EOPNOTSUPP,
            VfsError::AlreadyExists => EEXIST,
            VfsError::NotDirectory => ENOTDIR,
            VfsError::IsDirectory => EISDIR,
            VfsError::NotEmpty => ENOTEMPTY,
            VfsError::NoSpace => ENOSPC,
            VfsError::NameTooLong => ENAMETOOLONG,
            VfsError::Busy => EBUSY,
            VfsError::Io => EIO,
            VfsError::OutOfMemory => ENOMEM,
        };
        -code
    }

    /// errno値 (正負どちらでも可) からエラーを復元
    ///
    /// `EINVAL` は常に `InvalidArgument` に戻る。
    pub const fn from_errno(code: i32) -> Option<Self> {
        use errno::*;
        let err = match code.wrapping_abs() {
            ENOENT => VfsError::NotFound,
            EROFS => VfsError::ReadOnlyFilesystem,
            EPERM => VfsError::PermissionDenied,
            EBADF => VfsError::BadDescriptor,
            EINVAL => VfsError::InvalidArgument,
            ESPIPE => VfsError::NotSeekable,
            ENOTTY => VfsError::DeviceControlNotSupported,
            EOPNOTSUPP => VfsError::NotSupportedYet(Deferred::TmpFile),
            EEXIST => VfsError::AlreadyExists,
            ENOTDIR => VfsError::NotDirectory,
            EISDIR => VfsError::IsDirectory,
            ENOTEMPTY => VfsError::NotEmpty,
            ENOSPC => VfsError::NoSpace,
            ENAMETOOLONG => VfsError::NameTooLong,
            EBUSY => VfsError::Busy,
            EIO => VfsError::Io,
            ENOMEM => VfsError::OutOfMemory,
            _ => return None,
        };
        Some(err)
    }
}

// ===== Display implementations =====

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::AsyncIo => write!(f, "asynchronous I/O"),
            Deferred::TmpFile => write!(f, "temporary files"),
        }
    }
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::NotFound => write!(f, "no such file or directory"),
            VfsError::ReadOnlyFilesystem => write!(f, "read-only filesystem"),
            VfsError::PermissionDenied => write!(f, "operation not permitted"),
            VfsError::BadDescriptor => write!(f, "bad file descriptor"),
            VfsError::InvalidArgument => write!(f, "invalid argument"),
            VfsError::NotSeekable => write!(f, "illegal seek"),
            VfsError::DeviceControlNotSupported => write!(f, "inappropriate ioctl for device"),
            VfsError::NotSupportedYet(what) => write!(f, "{} not supported yet", what),
            VfsError::AlreadyExists => write!(f, "file exists"),
            VfsError::NotDirectory => write!(f, "not a directory"),
            VfsError::IsDirectory => write!(f, "is a directory"),
            VfsError::NotEmpty => write!(f, "directory not empty"),
            VfsError::NoSpace => write!(f, "no space left on device"),
            VfsError::NameTooLong => write!(f, "file name too long"),
            VfsError::Busy => write!(f, "device or resource busy"),
            VfsError::Io => write!(f, "I/O error"),
            VfsError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

// ===== From implementations =====

impl From<Deferred> for VfsError {
    fn from(what: Deferred) -> Self {
        VfsError::NotSupportedYet(what)
    }
}

impl From<alloc::collections::TryReserveError> for VfsError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        VfsError::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_errno_is_negative() {
        assert_eq!(VfsError::NotFound.errno(), -2);
        assert_eq!(VfsError::ReadOnlyFilesystem.errno(), -30);
        assert_eq!(VfsError::DeviceControlNotSupported.errno(), -25);
        assert_eq!(VfsError::NotSeekable.errno(), -29);
    }

    #[test]
    fn test_deferred_features_keep_legacy_errno() {
        assert_eq!(VfsError::NotSupportedYet(Deferred::AsyncIo).errno(), -errno::EINVAL);
        assert_eq!(VfsError::NotSupportedYet(Deferred::TmpFile).errno(), -errno::EOPNOTSUPP);
    }

    #[test]
    fn test_from_errno() {
        assert_eq!(VfsError::from_errno(-9), Some(VfsError::BadDescriptor));
        assert_eq!(VfsError::from_errno(9), Some(VfsError::BadDescriptor));
        assert_eq!(VfsError::from_errno(-22), Some(VfsError::InvalidArgument));
        assert_eq!(VfsError::from_errno(-4242), None);

        let err = VfsError::NotEmpty;
        assert_eq!(VfsError::from_errno(err.errno()), Some(err));
    }

    #[test]
    fn test_display() {
        assert_eq!(VfsError::ReadOnlyFilesystem.to_string(), "read-only filesystem");
        assert_eq!(
            VfsError::from(Deferred::AsyncIo).to_string(),
            "asynchronous I/O not supported yet"
        );
    }
}
