// ============================================================================
// src/fs/mod.rs - Virtual Filesystem Layer
// ============================================================================
//!
//! # 仮想ファイルシステム層
//!
//! ## 構成
//! - `filesystem`: ドライバ操作テーブル (`FsOps`) とマウント済みインスタンス
//! - `mount`: マウントテーブル (最長一致プレフィックス検索)
//! - `path`: FSロック下でのパス解決
//! - `handle`: オープンハンドルとハンドル操作テーブル (`FileOps`)
//! - `vfs`: ディスパッチ層
//! - `memfs`, `devfs`: 組み込みドライバ

pub mod devfs;
pub mod filesystem;
pub mod flags;
pub mod handle;
pub mod memfs;
pub mod mount;
pub mod path;
pub mod stats;
pub mod vfs;

pub use devfs::{DevFs, DeviceNumber, DeviceOps, FullDevice, NullDevice, RandomDevice, ZeroDevice};
pub use filesystem::{Entry, EntryType, Filesystem, FsCaps, FsFlags, FsOps, FsRef, InodeId};
pub use flags::{FdFlags, FileMode, OpenFlags, Whence};
pub use handle::{FileHandle, FileOps, FileStat, HandleCaps, HandleId, MappingTracker};
pub use memfs::MemFs;
pub use mount::{MountRegistry, MountTable};
pub use path::{LockedFs, PathWalker, ResolvedPath, Resolver};
pub use stats::{VfsOp, VfsStatsSnapshot};
pub use vfs::{Vfs, vfs};
