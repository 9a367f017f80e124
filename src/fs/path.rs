// ============================================================================
// src/fs/path.rs - Path resolution inside one mounted filesystem
// ============================================================================
//!
//! Resolution turns a filesystem-relative path into a [`ResolvedPath`]. Both
//! the resolution and the driver call that consumes its result run under the
//! filesystem lock: the only way to obtain a `ResolvedPath<'g>` is through a
//! [`LockedFs`] borrowed for `'g`, so the value cannot outlive the critical
//! section that produced it.

use alloc::string::String;
use alloc::vec::Vec;
use core::marker::PhantomData;

use super::filesystem::{Entry, EntryType, Filesystem, FsOps, InodeId};
use crate::config::{MAX_NAME_LEN, MAX_PATH};
use crate::error::{VfsError, VfsResult};
use crate::sync::FsLockGuard;

// ============================================================================
// Lock witness
// ============================================================================

/// A filesystem whose lock is held by the current context.
pub struct LockedFs<'a> {
    fs: &'a Filesystem,
    _guard: FsLockGuard<'a>,
}

impl<'a> LockedFs<'a> {
    pub(crate) fn new(fs: &'a Filesystem, guard: FsLockGuard<'a>) -> Self {
        Self { fs, _guard: guard }
    }

    pub fn filesystem(&self) -> &'a Filesystem {
        self.fs
    }

    /// Driver operations, reachable only with the lock held.
    pub fn ops(&self) -> &'a dyn FsOps {
        self.fs.ops()
    }
}

// ============================================================================
// Resolved path
// ============================================================================

/// Result of resolving a path: the located entry (if the last component
/// exists) and the directory that contains it.
///
/// Opaque to the dispatch layer, consumed by value by exactly one driver
/// operation.
#[derive(Debug)]
pub struct ResolvedPath<'g> {
    entry: Option<Entry>,
    dir_inode: InodeId,
    last_comp: String,
    must_be_dir: bool,
    _lock: PhantomData<&'g ()>,
}

impl<'g> ResolvedPath<'g> {
    /// Build a resolved path. Requires the lock witness of the filesystem
    /// the inodes belong to.
    pub fn new(
        _locked: &'g LockedFs<'_>,
        dir_inode: InodeId,
        entry: Option<Entry>,
        last_comp: String,
        must_be_dir: bool,
    ) -> Self {
        Self {
            entry,
            dir_inode,
            last_comp,
            must_be_dir,
            _lock: PhantomData,
        }
    }

    /// The located entry, `None` if the last component does not exist.
    pub fn entry(&self) -> Option<Entry> {
        self.entry
    }

    pub fn inode(&self) -> Option<InodeId> {
        self.entry.map(|e| e.ino)
    }

    pub fn exists(&self) -> bool {
        self.entry.is_some()
    }

    /// Directory containing the last component.
    pub fn dir_inode(&self) -> InodeId {
        self.dir_inode
    }

    /// Last path component; empty for the filesystem root.
    pub fn last_comp(&self) -> &str {
        &self.last_comp
    }

    /// The path ended with a slash.
    pub fn must_be_dir(&self) -> bool {
        self.must_be_dir
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Turns a filesystem-relative path into a [`ResolvedPath`].
pub trait Resolver: Send + Sync {
    fn resolve<'g>(&self, locked: &'g LockedFs<'_>, path: &str) -> VfsResult<ResolvedPath<'g>>;
}

/// Component-by-component resolver built on [`FsOps::lookup`].
///
/// - empty and `.` components are skipped
/// - `..` moves to the parent directory, and stays put at the root
/// - every component but the last must exist and be a directory
/// - the last component may be missing (creation paths need its parent)
/// - symlinks are not followed
#[derive(Clone, Copy, Debug, Default)]
pub struct PathWalker;

impl Resolver for PathWalker {
    fn resolve<'g>(&self, locked: &'g LockedFs<'_>, path: &str) -> VfsResult<ResolvedPath<'g>> {
        if path.len() > MAX_PATH {
            return Err(VfsError::NameTooLong);
        }

        let ops = locked.ops();
        let root = Entry::new(ops.root(), EntryType::Directory);
        let must_be_dir = path.ends_with('/');

        let components: Vec<&str> = path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();

        let Some((last, parents)) = components.split_last() else {
            return Ok(ResolvedPath::new(locked, root.ino, Some(root), String::new(), true));
        };

        // ancestors of `cur`, innermost last
        let mut ancestors: Vec<Entry> = Vec::new();
        let mut cur = root;

        for &name in parents {
            if name == ".." {
                if let Some(parent) = ancestors.pop() {
                    cur = parent;
                }
                continue;
            }
            check_name(name)?;

            let entry = ops.lookup(cur.ino, name)?.ok_or(VfsError::NotFound)?;
            if !entry.is_dir() {
                return Err(VfsError::NotDirectory);
            }
            ancestors.push(cur);
            cur = entry;
        }

        if *last == ".." {
            let target = ancestors.pop().unwrap_or(cur);
            let dir = ancestors.last().copied().unwrap_or(target);
            return Ok(ResolvedPath::new(
                locked,
                dir.ino,
                Some(target),
                String::from(".."),
                must_be_dir,
            ));
        }
        check_name(last)?;

        let entry = ops.lookup(cur.ino, last)?;
        if must_be_dir && entry.is_some_and(|e| !e.is_dir()) {
            return Err(VfsError::NotDirectory);
        }

        Ok(ResolvedPath::new(
            locked,
            cur.ino,
            entry,
            String::from(*last),
            must_be_dir,
        ))
    }
}

fn check_name(name: &str) -> VfsResult<()> {
    if name.len() > MAX_NAME_LEN {
        Err(VfsError::NameTooLong)
    } else {
        Ok(())
    }
}
