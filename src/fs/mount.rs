// ============================================================================
// src/fs/mount.rs - Mount registry
// ============================================================================
//!
//! Maps absolute mount points to mounted filesystems. A lookup returns the
//! filesystem with the longest mount point that is a whole-component prefix
//! of the path, already retained, together with the remaining path inside
//! that filesystem.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;
use spin::RwLock;

use super::filesystem::{Filesystem, FsRef};
use crate::config::MAX_MOUNTS;
use crate::error::{VfsError, VfsResult};

/// Source of mounted filesystems for the dispatch layer.
pub trait MountRegistry: Send + Sync {
    /// Find the filesystem serving `path` and retain it in the same step.
    ///
    /// The remaining path is either empty (the mount point itself) or starts
    /// with `/`. The caller owns the returned reference.
    fn lookup_and_retain<'p>(&self, path: &'p str) -> Option<(FsRef, &'p str)>;
}

/// Global mount table
pub struct MountTable {
    mounts: RwLock<HashMap<String, FsRef>>,
}

impl MountTable {
    /// Create a new mount table
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(HashMap::new()),
        }
    }

    /// Mount `fs` at `path`. The table takes one reference.
    pub fn mount(&self, path: &str, fs: &Arc<Filesystem>) -> VfsResult<()> {
        let key = normalize(path)?;
        let mut mounts = self.mounts.write();

        if mounts.contains_key(key) {
            return Err(VfsError::AlreadyExists);
        }
        if mounts.len() >= MAX_MOUNTS {
            return Err(VfsError::NoSpace);
        }

        mounts.insert(String::from(key), fs.retain());
        log::info!(
            "vfs: mounted {} (dev {}, {}) at {}",
            fs.fs_type(),
            fs.device_id(),
            if fs.is_writable() { "rw" } else { "ro" },
            key
        );
        Ok(())
    }

    /// Unmount the filesystem at `path`.
    ///
    /// Fails with `Busy` while handles or in-flight calls still hold it. On
    /// success the table's reference is dropped, which tears the filesystem
    /// down.
    pub fn unmount(&self, path: &str) -> VfsResult<()> {
        let key = normalize(path)?;

        let removed = {
            let mut mounts = self.mounts.write();
            let fs = mounts.get(key).ok_or(VfsError::NotFound)?;

            // New references come from lookups (blocked by the write lock)
            // or from existing holders, so a count of 1 is stable here.
            if fs.ref_count() > 1 {
                log::debug!("vfs: unmount {} refused, {} references", key, fs.ref_count());
                return Err(VfsError::Busy);
            }
            mounts.remove(key)
        };

        log::info!("vfs: unmounted {}", key);
        drop(removed);
        Ok(())
    }

    /// Mounted filesystem at exactly `path`, retained.
    pub fn get(&self, path: &str) -> Option<FsRef> {
        let key = normalize(path).ok()?;
        self.mounts.read().get(key).cloned()
    }

    /// All mount points, sorted.
    pub fn mount_points(&self) -> Vec<String> {
        let mut points: Vec<String> = self.mounts.read().keys().cloned().collect();
        points.sort();
        points
    }

    pub fn len(&self) -> usize {
        self.mounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountRegistry for MountTable {
    fn lookup_and_retain<'p>(&self, path: &'p str) -> Option<(FsRef, &'p str)> {
        let mounts = self.mounts.read();

        // Walk ancestors from the longest candidate to "/".
        let mut end = path.len();
        loop {
            let key = if end == 0 { "/" } else { &path[..end] };
            if let Some(fs) = mounts.get(key) {
                let rest = if end == 0 { path } else { &path[end..] };
                return Some((fs.clone(), rest));
            }
            if end == 0 {
                return None;
            }
            end = path[..end].rfind('/')?;
        }
    }
}

/// Strip trailing slashes; "/" stays "/".
fn normalize(path: &str) -> VfsResult<&str> {
    if !path.starts_with('/') {
        return Err(VfsError::InvalidArgument);
    }
    let trimmed = path.trim_end_matches('/');
    Ok(if trimmed.is_empty() { "/" } else { trimmed })
}
