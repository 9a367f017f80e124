//! devfs - Device Filesystem
//!
//! /dev ファイルシステムの実装
//! デバイスノードを仮想ファイルとして公開する。構造はフラットで、
//! ルートディレクトリ直下にキャラクタデバイスが並ぶ。
//!
//! 構造操作 (mkdir / rmdir / unlink) は提供しない。デバイスの追加・削除は
//! [`DevFs::register`] / [`DevFs::unregister`] でのみ行う。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use super::filesystem::{Entry, EntryType, FsOps, InodeId};
use super::flags::{FileMode, OpenFlags};
use super::handle::{FileOps, FileStat, HandleCaps};
use super::path::ResolvedPath;
use crate::error::{VfsError, VfsResult};

/// デバイス番号 (Newtype)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct DeviceNumber {
    major: u16,
    minor: u16,
}

impl DeviceNumber {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub const fn major(&self) -> u16 {
        self.major
    }

    pub const fn minor(&self) -> u16 {
        self.minor
    }

    pub const fn to_dev_t(&self) -> u32 {
        ((self.major as u32) << 16) | (self.minor as u32)
    }

    pub const fn from_dev_t(dev: u32) -> Self {
        Self {
            major: (dev >> 16) as u16,
            minor: dev as u16,
        }
    }

    // 標準デバイス番号
    pub const NULL: Self = Self::new(1, 3);
    pub const ZERO: Self = Self::new(1, 5);
    pub const FULL: Self = Self::new(1, 7);
    pub const RANDOM: Self = Self::new(1, 8);
    pub const URANDOM: Self = Self::new(1, 9);
}

/// デバイス操作トレイト
///
/// キャラクタデバイスはファイル位置を持たないので、read/write にオフセットはない。
pub trait DeviceOps: Send + Sync {
    /// ハンドルごとに呼ばれる (dup 含む)
    fn open(&self) -> VfsResult<()> {
        Ok(())
    }

    fn close(&self) {}

    fn read(&self, buf: &mut [u8]) -> VfsResult<usize>;

    fn write(&self, buf: &[u8]) -> VfsResult<usize>;

    fn ioctl(&self, _request: usize, _arg: usize) -> VfsResult<usize> {
        Err(VfsError::DeviceControlNotSupported)
    }
}

// --- 標準デバイス実装 ---

/// /dev/null デバイス
pub struct NullDevice;

impl DeviceOps for NullDevice {
    fn read(&self, _buf: &mut [u8]) -> VfsResult<usize> {
        Ok(0) // EOF
    }

    fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        Ok(buf.len()) // 全て捨てる
    }
}

/// /dev/zero デバイス
pub struct ZeroDevice;

impl DeviceOps for ZeroDevice {
    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        Ok(buf.len())
    }
}

/// /dev/full デバイス
pub struct FullDevice;

impl DeviceOps for FullDevice {
    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::NoSpace)
    }
}

/// /dev/random, /dev/urandom デバイス
pub struct RandomDevice {
    /// エントロピープール (簡易実装)
    state: AtomicU64,
}

impl RandomDevice {
    pub const fn new() -> Self {
        Self {
            state: AtomicU64::new(0x5DEECE66D_u64),
        }
    }

    /// 簡易乱数生成
    fn next_random(&self) -> u64 {
        let mut state = self.state.load(Ordering::Relaxed);
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state.store(state, Ordering::Relaxed);
        state
    }
}

impl Default for RandomDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceOps for RandomDevice {
    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        for chunk in buf.chunks_mut(8) {
            let bytes = self.next_random().to_le_bytes();
            let len = chunk.len();
            chunk.copy_from_slice(&bytes[..len]);
        }
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        // エントロピーを追加
        for chunk in buf.chunks(8) {
            let mut bytes = [0u8; 8];
            bytes[..chunk.len()].copy_from_slice(chunk);
            self.state.fetch_xor(u64::from_le_bytes(bytes), Ordering::Relaxed);
        }
        Ok(buf.len())
    }
}

// ============================================================================
// DevFs
// ============================================================================

const ROOT_INO: InodeId = InodeId(1);

/// デバイスノード
#[derive(Clone)]
struct DevNode {
    ino: InodeId,
    number: DeviceNumber,
    ops: Arc<dyn DeviceOps>,
}

impl DevNode {
    fn stat(&self) -> FileStat {
        let mut st = FileStat::new(self.ino, EntryType::CharDevice, FileMode(0o666));
        st.rdev = u64::from(self.number.to_dev_t());
        st
    }
}

/// devfs ファイルシステム
pub struct DevFs {
    devices: RwLock<BTreeMap<String, DevNode>>,
    /// 次のinode番号
    next_inode: AtomicU64,
}

impl DevFs {
    /// null / zero / full / random / urandom を登録済みのdevfsを作成
    pub fn new() -> Self {
        let fs = Self::empty();
        fs.init_standard_devices();
        fs
    }

    /// デバイスなしのdevfs
    pub fn empty() -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            next_inode: AtomicU64::new(ROOT_INO.0 + 1),
        }
    }

    /// 標準デバイスを初期化
    fn init_standard_devices(&self) {
        let standard: [(&str, DeviceNumber, Arc<dyn DeviceOps>); 5] = [
            ("null", DeviceNumber::NULL, Arc::new(NullDevice)),
            ("zero", DeviceNumber::ZERO, Arc::new(ZeroDevice)),
            ("full", DeviceNumber::FULL, Arc::new(FullDevice)),
            ("random", DeviceNumber::RANDOM, Arc::new(RandomDevice::new())),
            ("urandom", DeviceNumber::URANDOM, Arc::new(RandomDevice::new())),
        ];
        for (name, number, ops) in standard {
            if let Err(e) = self.register(name, number, ops) {
                log::warn!("devfs: failed to register /dev/{}: {}", name, e);
            }
        }
    }

    /// 次のinode番号を取得
    fn allocate_inode(&self) -> InodeId {
        InodeId(self.next_inode.fetch_add(1, Ordering::AcqRel))
    }

    /// キャラクタデバイスを登録
    pub fn register(
        &self,
        name: &str,
        number: DeviceNumber,
        ops: Arc<dyn DeviceOps>,
    ) -> VfsResult<InodeId> {
        if name.is_empty() || name.contains('/') {
            return Err(VfsError::InvalidArgument);
        }

        let mut devices = self.devices.write();
        if devices.contains_key(name) {
            return Err(VfsError::AlreadyExists);
        }

        let ino = self.allocate_inode();
        devices.insert(String::from(name), DevNode { ino, number, ops });
        log::debug!(
            "devfs: registered {} ({}:{})",
            name,
            number.major(),
            number.minor()
        );
        Ok(ino)
    }

    /// デバイスを登録解除。オープン中のハンドルはそのまま使える。
    pub fn unregister(&self, name: &str) -> VfsResult<()> {
        self.devices
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or(VfsError::NotFound)
    }

    /// 登録済みデバイス名の一覧
    pub fn device_names(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    fn node_by_ino(&self, ino: InodeId) -> VfsResult<DevNode> {
        self.devices
            .read()
            .values()
            .find(|n| n.ino == ino)
            .cloned()
            .ok_or(VfsError::NotFound)
    }

    fn root_stat() -> FileStat {
        let mut st = FileStat::new(ROOT_INO, EntryType::Directory, FileMode::DEFAULT_DIR);
        st.nlink = 2;
        st
    }
}

impl Default for DevFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FsOps for DevFs {
    fn fs_type(&self) -> &str {
        "devfs"
    }

    fn root(&self) -> InodeId {
        ROOT_INO
    }

    fn lookup(&self, dir: InodeId, name: &str) -> VfsResult<Option<Entry>> {
        if dir != ROOT_INO {
            return Err(VfsError::NotDirectory);
        }
        Ok(self
            .devices
            .read()
            .get(name)
            .map(|n| Entry::new(n.ino, EntryType::CharDevice)))
    }

    fn open(
        &self,
        path: ResolvedPath<'_>,
        flags: OpenFlags,
        _mode: FileMode,
    ) -> VfsResult<Box<dyn FileOps>> {
        let Some(entry) = path.entry() else {
            // デバイスノードは作成できない
            return Err(if flags.create() {
                VfsError::PermissionDenied
            } else {
                VfsError::NotFound
            });
        };
        if flags.exclusive() {
            return Err(VfsError::AlreadyExists);
        }

        if entry.ino == ROOT_INO {
            if flags.is_writable() {
                return Err(VfsError::IsDirectory);
            }
            return Ok(Box::new(DevRoot));
        }
        if flags.contains(OpenFlags::DIRECTORY) {
            return Err(VfsError::NotDirectory);
        }

        let node = self.node_by_ino(entry.ino)?;
        node.ops.open()?;
        Ok(Box::new(DevFile { node }))
    }

    fn stat(&self, path: ResolvedPath<'_>) -> VfsResult<FileStat> {
        match path.inode() {
            Some(ROOT_INO) => Ok(Self::root_stat()),
            Some(ino) => Ok(self.node_by_ino(ino)?.stat()),
            None => Err(VfsError::NotFound),
        }
    }

    fn teardown(&self) {
        self.devices.write().clear();
    }
}

// ============================================================================
// Handles
// ============================================================================

/// デバイスファイルハンドル
///
/// シーク不可、fcntl 非対応。
struct DevFile {
    node: DevNode,
}

impl FileOps for DevFile {
    fn capabilities(&self) -> HandleCaps {
        HandleCaps::READ | HandleCaps::WRITE | HandleCaps::IOCTL
    }

    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        self.node.ops.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        self.node.ops.write(buf)
    }

    fn ioctl(&mut self, request: usize, arg: usize) -> VfsResult<usize> {
        self.node.ops.ioctl(request, arg)
    }

    fn stat(&self) -> VfsResult<FileStat> {
        Ok(self.node.stat())
    }

    fn dup(&self) -> VfsResult<Box<dyn FileOps>> {
        self.node.ops.open()?;
        Ok(Box::new(DevFile {
            node: self.node.clone(),
        }))
    }

    fn close(self: Box<Self>) {
        self.node.ops.close();
    }
}

/// /dev ディレクトリ自体のハンドル
struct DevRoot;

impl FileOps for DevRoot {
    fn capabilities(&self) -> HandleCaps {
        HandleCaps::empty()
    }

    fn stat(&self) -> VfsResult<FileStat> {
        Ok(DevFs::root_stat())
    }

    fn dup(&self) -> VfsResult<Box<dyn FileOps>> {
        Ok(Box::new(DevRoot))
    }
}
