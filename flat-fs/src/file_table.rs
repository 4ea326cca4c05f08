//! # 打开文件表层
//!
//! 每次打开文件得到一个 [`FileTableEntry`] 句柄，记录读写位置与访问模式；
//! 打开文件表登记所有存活的句柄，并维护 inode 编号到共享 [`Inode`] 的映射。
//!
//! 表为空是格式化的前提。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::str::FromStr;

use block_dev::BlockDevice;
use enumflags2::{BitFlags, bitflags};
use spin::{Mutex, MutexGuard};

use crate::directory::Directory;
use crate::error::{FsError, Result};
use crate::inode::Inode;

pub type FileHandle = Arc<FileTableEntry>;

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    READ  = 0b01,
    WRITE = 0b10,
}

/// 打开模式，句柄创建后不再改变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// "r"
    Read,
    /// "w"：不存在则创建，存在则清空；独占 inode
    Write,
    /// "w+"：可读可写，不存在则创建，不清空
    WriteShared,
    /// "a"：从文件末尾开始写
    Append,
}

/// 打开的文件
#[derive(Debug)]
pub struct FileTableEntry {
    inode_id: u32,
    mode: Mode,
    inode: Arc<Mutex<Inode>>,
    inner: Mutex<EntryState>,
}

#[derive(Debug)]
pub(crate) struct EntryState {
    /// **文件**内的偏移量
    pub seek_ptr: usize,
    /// 共享此句柄的使用者个数，归零即已关闭
    pub count: u32,
}

#[derive(Debug)]
pub struct FileTable {
    block_device: Arc<dyn BlockDevice>,
    inner: Mutex<FileTableInner>,
}

#[derive(Debug, Default)]
struct FileTableInner {
    entries: Vec<FileHandle>,
    /// 每个被打开的 inode 在内存中唯一的一份
    inodes: BTreeMap<u32, Arc<Mutex<Inode>>>,
}

impl Mode {
    #[inline]
    pub fn access(self) -> BitFlags<Access> {
        match self {
            Self::Read => Access::READ.into(),
            Self::Write | Self::Append => Access::WRITE.into(),
            Self::WriteShared => Access::READ | Access::WRITE,
        }
    }

    #[inline]
    pub fn readable(self) -> bool {
        self.access().contains(Access::READ)
    }

    #[inline]
    pub fn writable(self) -> bool {
        self.access().contains(Access::WRITE)
    }

    /// 只有 [`Mode::Write`] 要求独占
    #[inline]
    pub fn is_exclusive(self) -> bool {
        self == Self::Write
    }
}

impl FromStr for Mode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "w+" => Ok(Self::WriteShared),
            "a" => Ok(Self::Append),
            _ => Err(FsError::InvalidArgument),
        }
    }
}

impl FileTableEntry {
    fn new(inode_id: u32, mode: Mode, inode: Arc<Mutex<Inode>>, seek_ptr: usize) -> Self {
        Self {
            inode_id,
            mode,
            inode,
            inner: Mutex::new(EntryState { seek_ptr, count: 1 }),
        }
    }

    #[inline]
    pub fn inode_id(&self) -> u32 {
        self.inode_id
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn seek_ptr(&self) -> usize {
        self.inner.lock().seek_ptr
    }

    #[inline]
    pub(crate) fn inode(&self) -> &Mutex<Inode> {
        &self.inode
    }

    /// 锁住尚未关闭的句柄
    pub(crate) fn lock_live(&self) -> Result<MutexGuard<'_, EntryState>> {
        let state = self.inner.lock();
        if state.count == 0 {
            return Err(FsError::InvalidArgument);
        }
        Ok(state)
    }

    /// 多一个使用者共享此句柄
    pub(crate) fn share(&self) -> Result<()> {
        self.lock_live()?.count += 1;
        Ok(())
    }
}

impl FileTable {
    pub fn new(block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            block_device,
            inner: Mutex::default(),
        }
    }

    /// 为文件名分配句柄。
    /// 以 [`Mode::Read`] 打开不存在的文件会失败，其余模式则创建文件。
    pub fn allocate(
        &self,
        name: &str,
        mode: Mode,
        directory: &Mutex<Directory>,
    ) -> Result<FileHandle> {
        let mut inner = self.inner.lock();
        let mut directory = directory.lock();

        let (inode_id, created) = match directory.namei(name) {
            Some(inode_id) => (inode_id, false),
            None if mode == Mode::Read => return Err(FsError::NotFound),
            None => (directory.ialloc(name).ok_or(FsError::DirectoryFull)?, true),
        };

        let inode = inner
            .inodes
            .entry(inode_id)
            .or_insert_with(|| {
                let inode = if created {
                    Inode::fresh(inode_id)
                } else {
                    let mut inode = Inode::load(inode_id, &self.block_device);
                    inode.reset_stale();
                    inode
                };
                Arc::new(Mutex::new(inode))
            })
            .clone();

        let mut guard = inode.lock();
        let opened = guard.open(mode);
        guard.store(&self.block_device);
        if let Err(err) = opened {
            if guard.ref_count() == 0 {
                inner.inodes.remove(&inode_id);
            }
            return Err(err);
        }

        let seek_ptr = if mode == Mode::Append {
            guard.length()
        } else {
            0
        };
        drop(guard);

        log::debug!("open {name:?} as inode {inode_id} in {mode:?}");
        let entry = Arc::new(FileTableEntry::new(inode_id, mode, inode, seek_ptr));
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    /// 从表中移除句柄，并释放它对 inode 的引用
    pub fn free(&self, entry: &FileHandle) -> bool {
        self.inner.lock().release(entry, &self.block_device)
    }

    /// 释放句柄，并在没有其它句柄指向该 inode 时从目录中删去文件名。
    /// 两步在表锁内完成，其间不会有新的打开。
    pub fn unlink(&self, entry: &FileHandle, directory: &Mutex<Directory>) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.release(entry, &self.block_device) {
            return Err(FsError::InvalidArgument);
        }
        if inner.inodes.contains_key(&entry.inode_id) {
            return Err(FsError::Busy);
        }

        if directory.lock().ifree(entry.inode_id) {
            Ok(())
        } else {
            Err(FsError::NotFound)
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// 等到所有句柄都被释放，然后在持有表锁时执行 `f`，期间不会有新的句柄
    pub fn drain<V>(&self, f: impl FnOnce() -> V) -> V {
        loop {
            let mut inner = self.inner.lock();
            if inner.entries.is_empty() {
                inner.inodes.clear();
                return f();
            }
            drop(inner);
            core::hint::spin_loop();
        }
    }

    /// 文件长度；已打开的文件读内存中的共享 inode
    pub fn length_of(&self, inode_id: u32) -> usize {
        let inner = self.inner.lock();
        match inner.inodes.get(&inode_id) {
            Some(inode) => inode.lock().length(),
            None => Inode::load(inode_id, &self.block_device).length(),
        }
    }
}

impl FileTableInner {
    fn release(&mut self, entry: &FileHandle, block_device: &Arc<dyn BlockDevice>) -> bool {
        let Some(index) = self.entries.iter().position(|e| Arc::ptr_eq(e, entry)) else {
            return false;
        };
        self.entries.swap_remove(index);

        let mut inode = entry.inode.lock();
        if inode.close(entry.mode) {
            self.inodes.remove(&entry.inode_id);
        }
        inode.store(block_device);

        log::debug!("close inode {} in {:?}", entry.inode_id, entry.mode);
        true
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use block_dev::BlockDevice;
    use spin::Mutex;

    use super::{Access, FileTable, Mode};
    use crate::directory::Directory;
    use crate::error::FsError;
    use crate::layout::InodeState;
    use crate::test_util::MemDisk;

    fn table() -> (FileTable, Mutex<Directory>) {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(16));
        (FileTable::new(dev), Mutex::new(Directory::new(16)))
    }

    #[test]
    fn modes() {
        assert_eq!("w+".parse::<Mode>(), Ok(Mode::WriteShared));
        assert_eq!("x".parse::<Mode>(), Err(FsError::InvalidArgument));
        assert_eq!(Mode::WriteShared.access(), Access::READ | Access::WRITE);
        assert!(!Mode::Append.readable());
        assert!(!Mode::Read.writable());
    }

    #[test]
    fn read_of_missing_file() {
        let (table, directory) = table();
        assert_eq!(
            table.allocate("a", Mode::Read, &directory).unwrap_err(),
            FsError::NotFound
        );
        assert!(table.is_empty());
        assert_eq!(directory.lock().namei("a"), None);
    }

    #[test]
    fn handles_share_one_inode() {
        let (table, directory) = table();
        let first = table.allocate("a", Mode::WriteShared, &directory).unwrap();
        let second = table.allocate("a", Mode::Read, &directory).unwrap();
        assert!(Arc::ptr_eq(&first.inode, &second.inode));
        assert_eq!(first.inode.lock().ref_count(), 2);

        assert!(table.free(&first));
        assert!(!table.free(&first));
        assert_eq!(second.inode.lock().state(), InodeState::UsedRead);
        assert!(table.free(&second));
        assert!(table.is_empty());
        assert_eq!(second.inode.lock().state(), InodeState::Unused);
    }

    #[test]
    fn refused_open_leaves_no_entry() {
        let (table, directory) = table();
        let reader = table.allocate("a", Mode::WriteShared, &directory).unwrap();
        assert_eq!(
            table.allocate("a", Mode::Write, &directory).unwrap_err(),
            FsError::Busy
        );
        assert!(table.free(&reader));
        assert!(table.is_empty());

        let writer = table.allocate("a", Mode::Write, &directory).unwrap();
        assert_eq!(writer.inode.lock().state(), InodeState::UsedWrite);
        table.free(&writer);
    }

    #[test]
    fn drain_runs_when_empty() {
        let (table, _) = table();
        assert_eq!(table.drain(|| 7), 7);
    }

    #[test]
    fn unlink_waits_for_last_handle() {
        let (table, directory) = table();
        let first = table.allocate("a", Mode::WriteShared, &directory).unwrap();
        let second = table.allocate("a", Mode::Read, &directory).unwrap();
        assert_eq!(table.unlink(&first, &directory), Err(FsError::Busy));
        assert_eq!(directory.lock().namei("a"), Some(first.inode_id()));
        assert_eq!(table.unlink(&first, &directory), Err(FsError::InvalidArgument));

        table.unlink(&second, &directory).unwrap();
        assert_eq!(directory.lock().namei("a"), None);
        assert!(table.is_empty());

        // 复用的 inode 编号拿到的是全新的 inode
        let reused = table.allocate("b", Mode::WriteShared, &directory).unwrap();
        assert_eq!(reused.inode_id(), second.inode_id());
        assert!(!Arc::ptr_eq(&reused.inode, &second.inode));
        table.free(&reused);
    }
}
