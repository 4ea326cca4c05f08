//! # 文件系统层
//!
//! 把超级块、目录与打开文件表组合在块设备之上，
//! 提供打开、关闭、读写、定位、删除、格式化与同步。
//!
//! 目录本身作为 0 号 inode（"/"）的内容保存：挂载时读出重建，同步时写回。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use block_dev::BlockDevice;
use spin::Mutex;

use crate::DataBlock;
use crate::block::Block;
use crate::directory::Directory;
use crate::error::{FsError, Result};
use crate::file_table::{FileHandle, FileTable, Mode};
use crate::inode::Inode;
use crate::layout::{DiskInode, DiskSuperBlock};
use crate::super_block::SuperBlock;
use crate::{BLOCK_SIZE, NAME_MAX_LEN, ROOT_NAME};

pub struct FileSystem {
    block_device: Arc<dyn BlockDevice>,
    super_block: Mutex<SuperBlock>,
    directory: Mutex<Directory>,
    file_table: FileTable,
    /// 正在等待的格式化请求个数，非零时拒绝新的打开
    pending_formats: AtomicUsize,
}

/// [`FileSystem::seek`] 的基准位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// [`FileSystem::list`] 列出的目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode: u32,
    /// 文件字节数
    pub size: usize,
}

impl FileSystem {
    /// 挂载卷，并从根目录伪文件重建目录。
    /// 卷至少要有4块，否则返回 [`FsError::InvalidArgument`]。
    pub fn mount(block_device: Arc<dyn BlockDevice>, total_blocks: u32) -> Result<Self> {
        let super_block = SuperBlock::mount(block_device.clone(), total_blocks)?;
        let directory = Directory::new(super_block.inode_count());

        let fs = Self {
            file_table: FileTable::new(block_device.clone()),
            block_device,
            super_block: Mutex::new(super_block),
            directory: Mutex::new(directory),
            pending_formats: AtomicUsize::new(0),
        };

        if let Err(err) = fs.load_directory() {
            log::warn!("failed to load directory: {err}");
        }
        Ok(fs)
    }

    pub fn open(&self, name: &str, mode: Mode) -> Result<FileHandle> {
        if name.is_empty() || name.len() > NAME_MAX_LEN || (name == ROOT_NAME && mode.writable()) {
            return Err(FsError::InvalidArgument);
        }
        if self.pending_formats.load(Ordering::Acquire) > 0 {
            return Err(FsError::Busy);
        }

        self.open_unchecked(name, mode)
    }

    /// 让另一个使用者共享同一个句柄，须多调用一次 [`FileSystem::close`]
    pub fn dup(&self, handle: &FileHandle) -> Result<FileHandle> {
        handle.share()?;
        Ok(handle.clone())
    }

    /// 句柄仍被共享时只减少计数，否则释放句柄
    pub fn close(&self, handle: &FileHandle) -> Result<()> {
        {
            let mut state = handle.lock_live()?;
            state.count -= 1;
            if state.count > 0 {
                return Ok(());
            }
        }

        if self.file_table.free(handle) {
            Ok(())
        } else {
            Err(FsError::InvalidArgument)
        }
    }

    pub fn size(&self, handle: &FileHandle) -> Result<usize> {
        let _state = handle.lock_live()?;
        Ok(handle.inode().lock().length())
    }

    /// 从读写位置读出数据填充`buf`，不会越过文件末尾
    pub fn read(&self, handle: &FileHandle, buf: &mut [u8]) -> Result<usize> {
        if !handle.mode().readable() {
            return Err(FsError::WriteOnly);
        }

        let mut state = handle.lock_live()?;
        let inode = handle.inode().lock();
        let length = inode.length();

        // 已读取多少字节
        let mut read_size = 0;
        while state.seek_ptr < length && read_size < buf.len() {
            let Some(block_id) = inode.block_for(state.seek_ptr, &self.block_device) else {
                break;
            };

            let block_offset = state.seek_ptr % BLOCK_SIZE;
            let block_read_size = (BLOCK_SIZE - block_offset)
                .min(length - state.seek_ptr)
                .min(buf.len() - read_size);
            let dest = &mut buf[read_size..read_size + block_read_size];

            Block::read(block_id as usize, &self.block_device).map(0, |data_block: &DataBlock| {
                dest.copy_from_slice(&data_block[block_offset..block_offset + block_read_size]);
            });

            state.seek_ptr += block_read_size;
            read_size += block_read_size;
        }

        Ok(read_size)
    }

    /// 从读写位置写入`buf`，按需分配数据块。
    /// 空间耗尽时返回已写入的字节数；一个字节都没写入则报错。
    pub fn write(&self, handle: &FileHandle, buf: &[u8]) -> Result<usize> {
        if !handle.mode().writable() {
            return Err(FsError::ReadOnly);
        }

        let mut state = handle.lock_live()?;
        let mut inode = handle.inode().lock();

        let mut written_size = 0;
        let mut error = None;
        while written_size < buf.len() {
            let block_id = match inode.block_for(state.seek_ptr, &self.block_device) {
                Some(block_id) => block_id,
                None => match self.expand(&mut inode, state.seek_ptr) {
                    Ok(block_id) => block_id,
                    Err(err) => {
                        error = Some(err);
                        break;
                    }
                },
            };

            let block_offset = state.seek_ptr % BLOCK_SIZE;
            let block_write_size = (BLOCK_SIZE - block_offset).min(buf.len() - written_size);
            let src = &buf[written_size..written_size + block_write_size];

            Block::read(block_id as usize, &self.block_device).map_mut(
                0,
                |data_block: &mut DataBlock| {
                    data_block[block_offset..block_offset + block_write_size].copy_from_slice(src);
                },
            );

            state.seek_ptr += block_write_size;
            written_size += block_write_size;
        }

        if state.seek_ptr > inode.length() {
            inode.set_length(state.seek_ptr);
            inode.store(&self.block_device);
        }

        match error {
            Some(err) if written_size == 0 => Err(err),
            Some(err) => {
                log::warn!("short write of {written_size}/{} bytes: {err}", buf.len());
                Ok(written_size)
            }
            None => Ok(written_size),
        }
    }

    /// 移动读写位置，结果总在 `[0, 文件长度]` 之内
    pub fn seek(&self, handle: &FileHandle, offset: isize, whence: Whence) -> Result<usize> {
        let mut state = handle.lock_live()?;
        let length = handle.inode().lock().length() as isize;

        let base = match whence {
            Whence::Start => 0,
            Whence::Current => state.seek_ptr as isize,
            Whence::End => length,
        };
        state.seek_ptr = base.saturating_add(offset).clamp(0, length) as usize;

        Ok(state.seek_ptr)
    }

    /// 删除文件并归还它的全部数据块；文件仍被打开时失败
    pub fn delete(&self, name: &str) -> Result<()> {
        if self.directory.lock().namei(name).is_none() {
            return Err(FsError::NotFound);
        }

        // 以写方式打开会清空文件
        let handle = self.open(name, Mode::Write)?;
        handle.lock_live()?.count -= 1;
        self.file_table.unlink(&handle, &self.directory)?;

        log::info!("deleted {name:?}");
        Ok(())
    }

    /// 等到所有句柄关闭后重新格式化；等待期间拒绝新的打开
    pub fn format(&self, inode_count: u32) -> Result<()> {
        let total_blocks = self.super_block.lock().total_blocks();
        if !DiskSuperBlock::fits(inode_count, total_blocks) {
            return Err(FsError::InvalidArgument);
        }

        self.pending_formats.fetch_add(1, Ordering::AcqRel);
        self.file_table.drain(|| {
            self.super_block.lock().format(inode_count);
            *self.directory.lock() = Directory::new(inode_count);
        });
        self.pending_formats.fetch_sub(1, Ordering::AcqRel);

        Ok(())
    }

    /// 把目录写回根目录伪文件，并持久化超级块
    pub fn sync(&self) -> Result<()> {
        let written = self.store_directory();
        self.super_block.lock().sync();
        written?;

        log::info!("file system synchronized");
        Ok(())
    }

    /// 列出除根目录外的所有文件
    pub fn list(&self) -> Vec<DirEntry> {
        let entries: Vec<(u32, String)> = self
            .directory
            .lock()
            .entries()
            .skip(1)
            .map(|(inode, name)| (inode, String::from_utf8_lossy(name).into_owned()))
            .collect();

        entries
            .into_iter()
            .map(|(inode, name)| DirEntry {
                size: self.file_table.length_of(inode),
                name,
                inode,
            })
            .collect()
    }

    /// 超级块，供上层查询卷的使用情况
    #[inline]
    pub fn super_block(&self) -> &Mutex<SuperBlock> {
        &self.super_block
    }
}

impl FileSystem {
    /// 不检查文件名与格式化请求，供内部操作根目录使用
    fn open_unchecked(&self, name: &str, mode: Mode) -> Result<FileHandle> {
        let handle = self.file_table.allocate(name, mode, &self.directory)?;

        if mode == Mode::Write {
            let mut inode = handle.inode().lock();
            if inode.length() > 0 || !inode.blocks(&self.block_device).is_empty() {
                self.dealloc_all(&mut inode);
            }
        }

        Ok(handle)
    }

    /// 为偏移所在的块分配并登记数据块，必要时先建立一级索引块
    fn expand(&self, inode: &mut Inode, offset: usize) -> Result<u32> {
        if !DiskInode::in_range(offset) {
            return Err(FsError::FileTooLarge);
        }

        let mut super_block = self.super_block.lock();
        if inode.needs_indirect(offset) {
            let indirect = super_block.alloc().ok_or(FsError::NoSpace)?;
            inode.set_indirect(indirect, &self.block_device);
            inode.store(&self.block_device);
        }

        let block_id = super_block.alloc().ok_or(FsError::NoSpace)?;
        if let Err(err) = inode.register_block(offset, block_id, &self.block_device) {
            super_block.dealloc(block_id);
            return Err(err.into());
        }
        inode.store(&self.block_device);

        Ok(block_id)
    }

    /// 归还 inode 的全部块，文件长度归零
    fn dealloc_all(&self, inode: &mut Inode) {
        let blocks = inode.clear(&self.block_device);
        let mut super_block = self.super_block.lock();
        for &block_id in &blocks {
            super_block.dealloc(block_id);
        }
        inode.store(&self.block_device);

        log::debug!("inode {} released {} blocks", inode.id(), blocks.len());
    }

    fn load_directory(&self) -> Result<()> {
        let root = self.open_unchecked(ROOT_NAME, Mode::Read)?;
        let size = self.size(&root)?;

        let result = if size > 0 {
            let mut data = vec![0; size];
            self.read(&root, &mut data).map(|read_size| {
                self.directory.lock().deserialize(&data[..read_size]);
            })
        } else {
            Ok(())
        };

        self.close(&root)?;
        result
    }

    /// 根目录以共享方式写回，不与读根目录的句柄冲突
    fn store_directory(&self) -> Result<()> {
        let root = self.open_unchecked(ROOT_NAME, Mode::WriteShared)?;
        let data = self.directory.lock().serialize();

        // 根目录伪文件比目录镜像长时先清空
        {
            let mut inode = root.inode().lock();
            if inode.length() > data.len() {
                self.dealloc_all(&mut inode);
            }
        }

        let written = self.write(&root, &data);
        self.close(&root)?;

        if written? < data.len() {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }
}

impl TryFrom<i32> for Whence {
    type Error = FsError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Start),
            1 => Ok(Self::Current),
            2 => Ok(Self::End),
            _ => Err(FsError::InvalidArgument),
        }
    }
}
