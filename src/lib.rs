// ============================================================================
// src/lib.rs - ExoRust VFS crate root
// ============================================================================
//!
//! # 仮想ファイルシステム (VFS) ディスパッチ層
//!
//! 複数のファイルシステムドライバを同時にマウントし、
//! ハンドルベースの統一APIで扱うためのカーネル層。
//!
//! ## 構成
//! - [`fs::filesystem`]: マウント済みファイルシステムと参照カウント (`FsRef`)
//! - [`fs::mount`]: マウントテーブル
//! - [`fs::path`]: パス解決 (`Resolver`, `PathWalker`)
//! - [`fs::handle`]: オープンハンドル (`FileHandle`, `FileOps`)
//! - [`fs::vfs`]: ディスパッチ層 (`Vfs`)
//! - [`sync`]: FSロック / ハンドルロック / プリエンプション状態
//!
//! ## ロック規律
//! 1つの呼び出し経路が保持するロックドメインは常に1つだけ。
//! FSロック (排他) とハンドルロック (共有/排他) はネストしない。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod sync;

pub mod config;
pub mod error;
pub mod fs;
pub mod io;

pub use error::{Deferred, VfsError, VfsResult};
pub use fs::{
    FdFlags, FileHandle, FileMode, FileOps, FileStat, Filesystem, FsCaps, FsFlags, FsOps,
    FsRef, HandleCaps, MountRegistry, MountTable, OpenFlags, PathWalker, ResolvedPath,
    Resolver, Vfs, Whence, vfs,
};
