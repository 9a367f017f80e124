//! memfs - Memory-based Filesystem
//!
//! 実際のストレージバックエンドなしで動作するインメモリファイルシステム。
//! すべての構造操作 (mkdir / rmdir / unlink) を提供するため、
//! ディスパッチ層の検証用ドライバとしても使われる。
//!
//! inodeはノード表 (`InodeId` -> `MemInode`) に保持される。オープン中のハンドルは
//! inodeへの `Arc` を持つので、unlink後も閉じるまで内容を読み書きできる。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use super::filesystem::{Entry, EntryType, FsCaps, FsOps, InodeId};
use super::flags::{FileMode, OpenFlags, Whence, fcntl};
use super::handle::{FileOps, FileStat, HandleCaps};
use super::path::ResolvedPath;
use crate::config::PATH_SEPARATOR;
use crate::error::{VfsError, VfsResult};

/// ルートinode番号
const ROOT_INO: InodeId = InodeId(1);

/// F_SETFL で変更可能なステータスフラグ
const SETFL_MASK: OpenFlags = OpenFlags::APPEND.union(OpenFlags::NONBLOCK);

// ============================================================================
// MemFs Filesystem
// ============================================================================

/// メモリベースのファイルシステム
pub struct MemFs {
    /// inode表
    nodes: RwLock<BTreeMap<InodeId, Arc<MemInode>>>,
    /// 次のinode番号
    next_ino: AtomicU64,
}

impl MemFs {
    /// 空のルートディレクトリだけを持つMemFsを作成
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT_INO,
            Arc::new(MemInode::new(ROOT_INO, EntryType::Directory, FileMode::DEFAULT_DIR)),
        );
        Self {
            nodes: RwLock::new(nodes),
            next_ino: AtomicU64::new(ROOT_INO.0 + 1),
        }
    }

    /// 次のinode番号を取得
    fn alloc_ino(&self) -> InodeId {
        InodeId(self.next_ino.fetch_add(1, Ordering::SeqCst))
    }

    fn node(&self, ino: InodeId) -> VfsResult<Arc<MemInode>> {
        self.nodes.read().get(&ino).cloned().ok_or(VfsError::NotFound)
    }

    /// 現在のinode数 (ルートを含む)
    pub fn inode_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// `dir` の下に `name` を作成
    fn insert_child(
        &self,
        dir: &MemInode,
        name: &str,
        kind: EntryType,
        mode: FileMode,
    ) -> VfsResult<Arc<MemInode>> {
        if dir.kind != EntryType::Directory {
            return Err(VfsError::NotDirectory);
        }

        let mut data = dir.data.write();
        if data.children.contains_key(name) {
            return Err(VfsError::AlreadyExists);
        }

        let ino = self.alloc_ino();
        let inode = Arc::new(MemInode::new(ino, kind, mode));
        data.children.insert(String::from(name), ino);
        self.nodes.write().insert(ino, inode.clone());

        log::trace!("memfs: created {:?} {} as {:?}", kind, name, ino);
        Ok(inode)
    }

    /// `dir` から `name` を外し、inode表からも削除
    fn remove_child(&self, dir: &MemInode, name: &str, ino: InodeId) {
        dir.data.write().children.remove(name);
        self.nodes.write().remove(&ino);
    }

    /// ルートから辿ってディレクトリを作成（パス全体）
    pub fn create_dir_all(&self, path: &str) -> VfsResult<()> {
        let mut current = self.node(ROOT_INO)?;

        for component in components(path) {
            let child = current.child(component);
            current = match child {
                Some(ino) => self.node(ino)?,
                None => self.insert_child(&current, component, EntryType::Directory, FileMode::DEFAULT_DIR)?,
            };
            if current.kind != EntryType::Directory {
                return Err(VfsError::NotDirectory);
            }
        }

        Ok(())
    }

    /// ファイルを作成して内容を書き込む。既存ファイルは上書き。
    ///
    /// 親ディレクトリは存在している必要がある。
    pub fn create_file(&self, path: &str, content: &[u8]) -> VfsResult<InodeId> {
        let parts: Vec<&str> = components(path).collect();
        let (name, parents) = parts.split_last().ok_or(VfsError::IsDirectory)?;

        let mut dir = self.node(ROOT_INO)?;
        for component in parents {
            let ino = dir.child(component).ok_or(VfsError::NotFound)?;
            dir = self.node(ino)?;
        }

        let file = match dir.child(name) {
            Some(ino) => self.node(ino)?,
            None => self.insert_child(&dir, name, EntryType::Regular, FileMode::DEFAULT_FILE)?,
        };
        if file.kind != EntryType::Regular {
            return Err(VfsError::IsDirectory);
        }

        let mut data = file.data.write();
        data.content.clear();
        data.content.try_reserve(content.len())?;
        data.content.extend_from_slice(content);
        Ok(file.ino)
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEPARATOR).filter(|c| !c.is_empty() && *c != ".")
}

impl FsOps for MemFs {
    fn fs_type(&self) -> &str {
        "memfs"
    }

    fn capabilities(&self) -> FsCaps {
        FsCaps::MKDIR | FsCaps::RMDIR | FsCaps::UNLINK
    }

    fn root(&self) -> InodeId {
        ROOT_INO
    }

    fn lookup(&self, dir: InodeId, name: &str) -> VfsResult<Option<Entry>> {
        let dir = self.node(dir)?;
        if dir.kind != EntryType::Directory {
            return Err(VfsError::NotDirectory);
        }

        let Some(ino) = dir.child(name) else {
            return Ok(None);
        };
        let child = self.node(ino)?;
        Ok(Some(Entry::new(ino, child.kind)))
    }

    fn open(
        &self,
        path: ResolvedPath<'_>,
        flags: OpenFlags,
        mode: FileMode,
    ) -> VfsResult<Box<dyn FileOps>> {
        let node = match path.inode() {
            Some(ino) => {
                if flags.exclusive() {
                    return Err(VfsError::AlreadyExists);
                }
                self.node(ino)?
            }
            None => {
                if !flags.create() {
                    return Err(VfsError::NotFound);
                }
                // O_CREAT cannot make directories
                if path.must_be_dir() || flags.contains(OpenFlags::DIRECTORY) {
                    return Err(VfsError::IsDirectory);
                }
                let dir = self.node(path.dir_inode())?;
                self.insert_child(&dir, path.last_comp(), EntryType::Regular, mode)?
            }
        };

        if node.kind == EntryType::Directory {
            if flags.is_writable() {
                return Err(VfsError::IsDirectory);
            }
            return Ok(Box::new(MemDir { node }));
        }

        if flags.contains(OpenFlags::DIRECTORY) {
            return Err(VfsError::NotDirectory);
        }
        if flags.truncate() && flags.is_writable() {
            node.data.write().content.clear();
        }

        Ok(Box::new(MemFile {
            node,
            pos: Mutex::new(0),
            status: flags,
        }))
    }

    fn stat(&self, path: ResolvedPath<'_>) -> VfsResult<FileStat> {
        let ino = path.inode().ok_or(VfsError::NotFound)?;
        Ok(self.node(ino)?.stat())
    }

    fn mkdir(&self, path: ResolvedPath<'_>, mode: FileMode) -> VfsResult<()> {
        if path.exists() {
            return Err(VfsError::AlreadyExists);
        }
        let dir = self.node(path.dir_inode())?;
        self.insert_child(&dir, path.last_comp(), EntryType::Directory, mode)?;
        Ok(())
    }

    fn rmdir(&self, path: ResolvedPath<'_>) -> VfsResult<()> {
        let entry = path.entry().ok_or(VfsError::NotFound)?;
        if !entry.is_dir() {
            return Err(VfsError::NotDirectory);
        }
        if entry.ino == ROOT_INO {
            return Err(VfsError::Busy);
        }
        if path.last_comp() == ".." {
            return Err(VfsError::NotEmpty);
        }

        let node = self.node(entry.ino)?;
        // ディレクトリが空か確認
        if !node.data.read().children.is_empty() {
            return Err(VfsError::NotEmpty);
        }

        let dir = self.node(path.dir_inode())?;
        self.remove_child(&dir, path.last_comp(), entry.ino);
        Ok(())
    }

    fn unlink(&self, path: ResolvedPath<'_>) -> VfsResult<()> {
        let entry = path.entry().ok_or(VfsError::NotFound)?;
        if entry.is_dir() {
            return Err(VfsError::IsDirectory);
        }

        let dir = self.node(path.dir_inode())?;
        self.remove_child(&dir, path.last_comp(), entry.ino);
        Ok(())
    }

    fn teardown(&self) {
        let root = {
            let mut nodes = self.nodes.write();
            log::debug!("memfs: releasing {} inodes", nodes.len());
            nodes.retain(|ino, _| *ino == ROOT_INO);
            nodes.get(&ROOT_INO).cloned()
        };
        if let Some(root) = root {
            root.data.write().children.clear();
        }
    }
}

// ============================================================================
// MemInode
// ============================================================================

/// メモリinode内部データ
#[derive(Default)]
struct MemInodeData {
    /// ファイル内容（ファイルの場合）
    content: Vec<u8>,
    /// 子エントリ（ディレクトリの場合）
    children: BTreeMap<String, InodeId>,
}

/// メモリベースのinode
struct MemInode {
    ino: InodeId,
    kind: EntryType,
    mode: FileMode,
    data: RwLock<MemInodeData>,
}

impl MemInode {
    fn new(ino: InodeId, kind: EntryType, mode: FileMode) -> Self {
        Self {
            ino,
            kind,
            mode,
            data: RwLock::new(MemInodeData::default()),
        }
    }

    fn child(&self, name: &str) -> Option<InodeId> {
        self.data.read().children.get(name).copied()
    }

    fn len(&self) -> u64 {
        self.data.read().content.len() as u64
    }

    fn stat(&self) -> FileStat {
        let mut st = FileStat::new(self.ino, self.kind, self.mode).with_size(self.len());
        if self.kind == EntryType::Directory {
            st.nlink = 2;
        }
        st
    }
}

// ============================================================================
// Handles
// ============================================================================

/// 通常ファイルのハンドル
struct MemFile {
    node: Arc<MemInode>,
    /// ファイル位置
    pos: Mutex<u64>,
    /// O_APPEND / O_NONBLOCK などのステータスフラグ
    status: OpenFlags,
}

impl FileOps for MemFile {
    fn capabilities(&self) -> HandleCaps {
        HandleCaps::READ
            | HandleCaps::WRITE
            | HandleCaps::SEEK
            | HandleCaps::FCNTL
            | HandleCaps::TRUNCATE
    }

    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        let mut pos = self.pos.lock();
        let data = self.node.data.read();
        let content = &data.content;

        let Ok(start) = usize::try_from(*pos) else {
            return Ok(0);
        };
        if start >= content.len() {
            return Ok(0);
        }

        let end = core::cmp::min(start + buf.len(), content.len());
        let len = end - start;
        buf[..len].copy_from_slice(&content[start..end]);
        *pos += len as u64;
        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        let mut data = self.node.data.write();
        let content = &mut data.content;

        let pos = self.pos.get_mut();
        if self.status.append() {
            *pos = content.len() as u64;
        }

        let offset = usize::try_from(*pos).map_err(|_| VfsError::NoSpace)?;
        let end = offset.checked_add(buf.len()).ok_or(VfsError::NoSpace)?;

        // 必要に応じてコンテンツを拡張
        if end > content.len() {
            content.try_reserve(end - content.len())?;
            content.resize(end, 0);
        }

        content[offset..end].copy_from_slice(buf);
        *pos = end as u64;
        Ok(buf.len())
    }

    fn seek(&self, offset: i64, whence: Whence) -> VfsResult<u64> {
        let mut pos = self.pos.lock();
        let new_pos = whence.apply(offset, *pos, self.node.len())?;
        *pos = new_pos;
        Ok(new_pos)
    }

    fn fcntl(&mut self, cmd: i32, arg: i32) -> VfsResult<i32> {
        match cmd {
            fcntl::F_GETFL => Ok(self.status.bits() as i32),
            fcntl::F_SETFL => {
                let requested = OpenFlags::from_bits_retain(arg as u32) & SETFL_MASK;
                self.status = (self.status - SETFL_MASK) | requested;
                Ok(0)
            }
            _ => Err(VfsError::InvalidArgument),
        }
    }

    fn truncate(&mut self, len: u64) -> VfsResult<()> {
        let len = usize::try_from(len).map_err(|_| VfsError::NoSpace)?;
        let mut data = self.node.data.write();
        if len > data.content.len() {
            let extra = len - data.content.len();
            data.content.try_reserve(extra)?;
        }
        data.content.resize(len, 0);
        Ok(())
    }

    fn stat(&self) -> VfsResult<FileStat> {
        Ok(self.node.stat())
    }

    /// 複製はファイル位置を引き継ぐ
    fn dup(&self) -> VfsResult<Box<dyn FileOps>> {
        Ok(Box::new(MemFile {
            node: self.node.clone(),
            pos: Mutex::new(*self.pos.lock()),
            status: self.status,
        }))
    }
}

/// ディレクトリのハンドル (読み取り専用オープンのみ)
struct MemDir {
    node: Arc<MemInode>,
}

impl FileOps for MemDir {
    fn capabilities(&self) -> HandleCaps {
        HandleCaps::READ
    }

    fn read(&self, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::IsDirectory)
    }

    fn stat(&self) -> VfsResult<FileStat> {
        Ok(self.node.stat())
    }

    fn dup(&self) -> VfsResult<Box<dyn FileOps>> {
        Ok(Box::new(MemDir {
            node: self.node.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::filesystem::{Filesystem, FsFlags};
    use crate::fs::path::{PathWalker, Resolver};

    fn open(fs: &Filesystem, path: &str, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        let locked = fs.lock();
        let resolved = PathWalker.resolve(&locked, path)?;
        locked.ops().open(resolved, flags, FileMode::DEFAULT_FILE)
    }

    fn sample() -> alloc::sync::Arc<Filesystem> {
        let memfs = MemFs::new();
        memfs.create_dir_all("/etc").unwrap();
        memfs.create_file("/etc/hostname", b"ranyos\n").unwrap();
        Filesystem::new(memfs, FsFlags::RW)
    }

    #[test]
    fn test_create_helpers() {
        let memfs = MemFs::new();
        memfs.create_dir_all("/a/b/c").unwrap();
        memfs.create_dir_all("/a/b").unwrap();
        assert_eq!(memfs.inode_count(), 4);

        let ino = memfs.create_file("/a/b/f", b"one").unwrap();
        assert_eq!(memfs.create_file("/a/b/f", b"two").unwrap(), ino);
        assert_eq!(memfs.create_file("/missing/f", b""), Err(VfsError::NotFound));
        assert_eq!(memfs.create_file("/a/b/c", b""), Err(VfsError::IsDirectory));
        assert_eq!(memfs.create_dir_all("/a/b/f/g"), Err(VfsError::NotDirectory));
    }

    #[test]
    fn test_read_write_seek() {
        let fs = sample();
        let mut file = open(&fs, "/etc/hostname", OpenFlags::RDWR).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf).unwrap(), 7);
        assert_eq!(&buf[..7], b"ranyos\n");
        assert_eq!(file.read(&mut buf).unwrap(), 0);

        assert_eq!(file.seek(0, Whence::Start).unwrap(), 0);
        assert_eq!(file.write(b"exo").unwrap(), 3);
        assert_eq!(file.seek(-3, Whence::End).unwrap(), 4);
        assert_eq!(file.seek(-5, Whence::Current), Err(VfsError::InvalidArgument));

        file.seek(0, Whence::Start).unwrap();
        let n = file.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"exoyos\n");
    }

    #[test]
    fn test_write_past_end_fills_with_zeros() {
        let fs = sample();
        let mut file = open(&fs, "/etc/new", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();

        file.seek(4, Whence::Start).unwrap();
        file.write(b"x").unwrap();
        assert_eq!(file.stat().unwrap().size, 5);

        file.seek(0, Whence::Start).unwrap();
        let mut buf = [0xffu8; 8];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"\0\0\0\0x");
    }

    #[test]
    fn test_open_flags() {
        let fs = sample();

        assert_eq!(
            open(&fs, "/etc/missing", OpenFlags::RDONLY).err(),
            Some(VfsError::NotFound)
        );
        assert_eq!(
            open(&fs, "/etc/hostname", OpenFlags::CREAT | OpenFlags::EXCL).err(),
            Some(VfsError::AlreadyExists)
        );
        assert_eq!(
            open(&fs, "/etc", OpenFlags::WRONLY).err(),
            Some(VfsError::IsDirectory)
        );
        assert_eq!(
            open(&fs, "/etc/hostname", OpenFlags::DIRECTORY).err(),
            Some(VfsError::NotDirectory)
        );
        assert_eq!(
            open(&fs, "/etc/newdir/", OpenFlags::CREAT).err(),
            Some(VfsError::IsDirectory)
        );

        let file = open(&fs, "/etc/hostname", OpenFlags::WRONLY | OpenFlags::TRUNC).unwrap();
        assert_eq!(file.stat().unwrap().size, 0);

        let dir = open(&fs, "/etc", OpenFlags::DIRECTORY).unwrap();
        assert_eq!(dir.read(&mut [0u8; 4]), Err(VfsError::IsDirectory));
        assert_eq!(dir.stat().unwrap().kind, EntryType::Directory);
    }

    #[test]
    fn test_append_and_fcntl() {
        let fs = sample();
        let mut file = open(&fs, "/etc/hostname", OpenFlags::WRONLY | OpenFlags::APPEND).unwrap();

        file.seek(0, Whence::Start).unwrap();
        file.write(b"x").unwrap();
        assert_eq!(file.stat().unwrap().size, 8);

        let fl = file.fcntl(fcntl::F_GETFL, 0).unwrap();
        assert_ne!(fl as u32 & OpenFlags::APPEND.bits(), 0);

        // clearing O_APPEND keeps the access mode
        file.fcntl(fcntl::F_SETFL, 0).unwrap();
        let fl = file.fcntl(fcntl::F_GETFL, 0).unwrap();
        assert_eq!(fl as u32 & OpenFlags::APPEND.bits(), 0);
        assert_ne!(fl as u32 & OpenFlags::WRONLY.bits(), 0);

        file.seek(0, Whence::Start).unwrap();
        file.write(b"R").unwrap();
        assert_eq!(file.stat().unwrap().size, 8);

        assert_eq!(file.fcntl(99, 0), Err(VfsError::InvalidArgument));
    }

    #[test]
    fn test_dup_copies_position() {
        let fs = sample();
        let file = open(&fs, "/etc/hostname", OpenFlags::RDONLY).unwrap();
        file.seek(3, Whence::Start).unwrap();

        let copy = file.dup().unwrap();
        let mut buf = [0u8; 2];
        copy.read(&mut buf).unwrap();
        assert_eq!(&buf, b"yo");

        // cursors are independent afterwards
        assert_eq!(file.seek(0, Whence::Current).unwrap(), 3);
    }

    #[test]
    fn test_structural_operations() {
        let fs = sample();
        let locked = fs.lock();
        let ops = locked.ops();

        ops.mkdir(PathWalker.resolve(&locked, "/tmp").unwrap(), FileMode::DEFAULT_DIR)
            .unwrap();
        assert_eq!(
            ops.mkdir(PathWalker.resolve(&locked, "/tmp").unwrap(), FileMode::DEFAULT_DIR),
            Err(VfsError::AlreadyExists)
        );
        assert_eq!(
            ops.rmdir(PathWalker.resolve(&locked, "/etc").unwrap()),
            Err(VfsError::NotEmpty)
        );
        assert_eq!(
            ops.rmdir(PathWalker.resolve(&locked, "/etc/hostname").unwrap()),
            Err(VfsError::NotDirectory)
        );
        assert_eq!(
            ops.rmdir(PathWalker.resolve(&locked, "/").unwrap()),
            Err(VfsError::Busy)
        );
        assert_eq!(
            ops.unlink(PathWalker.resolve(&locked, "/tmp").unwrap()),
            Err(VfsError::IsDirectory)
        );
        assert_eq!(
            ops.unlink(PathWalker.resolve(&locked, "/nope").unwrap()),
            Err(VfsError::NotFound)
        );

        ops.rmdir(PathWalker.resolve(&locked, "/tmp").unwrap()).unwrap();
        ops.unlink(PathWalker.resolve(&locked, "/etc/hostname").unwrap())
            .unwrap();
        assert!(!PathWalker.resolve(&locked, "/etc/hostname").unwrap().exists());
        ops.rmdir(PathWalker.resolve(&locked, "/etc").unwrap()).unwrap();
    }

    #[test]
    fn test_unlinked_file_stays_readable() {
        let fs = sample();
        let file = open(&fs, "/etc/hostname", OpenFlags::RDONLY).unwrap();

        {
            let locked = fs.lock();
            let path = PathWalker.resolve(&locked, "/etc/hostname").unwrap();
            locked.ops().unlink(path).unwrap();
        }

        let mut buf = [0u8; 6];
        assert_eq!(file.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"ranyos");
    }
}
