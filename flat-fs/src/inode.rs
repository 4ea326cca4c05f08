//! # 索引节点层
//!
//! 同一个 inode 编号在内存中只有一份 [`Inode`]，由打开文件表统一管理，
//! 所有指向该文件的句柄共享它；每次修改都立即写回它在 inode 区域中的槽位。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;

use crate::block::Block;
use crate::error::{FsError, RegisterError, Result};
use crate::file_table::Mode;
use crate::layout::{DiskInode, InodeState};
use crate::super_block::SuperBlock;

#[derive(Debug)]
pub struct Inode {
    id: u32,
    disk: DiskInode,
    /// 可写句柄的个数，不落盘
    writers: u32,
    /// 是否被 [`Mode::Write`] 句柄独占，不落盘
    exclusive: bool,
}

impl Inode {
    /// 从磁盘读出
    pub fn load(id: u32, block_device: &Arc<dyn BlockDevice>) -> Self {
        let (block_id, offset) = SuperBlock::inode_pos(id);
        let disk = Block::read(block_id as usize, block_device)
            .map(offset, |disk_inode: &DiskInode| *disk_inode);

        Self {
            id,
            disk,
            writers: 0,
            exclusive: false,
        }
    }

    /// 新建空文件时使用
    pub fn fresh(id: u32) -> Self {
        Self {
            id,
            disk: DiskInode::default(),
            writers: 0,
            exclusive: false,
        }
    }

    pub fn store(&self, block_device: &Arc<dyn BlockDevice>) {
        let (block_id, offset) = SuperBlock::inode_pos(self.id);
        Block::read(block_id as usize, block_device)
            .map_mut(offset, |disk_inode: &mut DiskInode| *disk_inode = self.disk);
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.disk.length()
    }

    #[inline]
    pub fn set_length(&mut self, length: usize) {
        self.disk.length = length as i32;
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.disk.ref_count as u32
    }

    #[inline]
    pub fn state(&self) -> InodeState {
        self.disk.state()
    }

    #[inline]
    pub fn block_for(&self, offset: usize, block_device: &Arc<dyn BlockDevice>) -> Option<u32> {
        self.disk.block_for(offset, block_device)
    }

    #[inline]
    pub fn register_block(
        &mut self,
        offset: usize,
        block_id: u32,
        block_device: &Arc<dyn BlockDevice>,
    ) -> core::result::Result<(), RegisterError> {
        self.disk.register_block(offset, block_id, block_device)
    }

    #[inline]
    pub fn needs_indirect(&self, offset: usize) -> bool {
        self.disk.needs_indirect(offset)
    }

    #[inline]
    pub fn set_indirect(&mut self, block_id: u32, block_device: &Arc<dyn BlockDevice>) {
        self.disk.set_indirect(block_id, block_device)
    }

    #[inline]
    pub fn blocks(&self, block_device: &Arc<dyn BlockDevice>) -> Vec<u32> {
        self.disk.blocks(block_device)
    }

    /// 截断为空文件，返回需要归还的块
    #[inline]
    pub fn clear(&mut self, block_device: &Arc<dyn BlockDevice>) -> Vec<u32> {
        self.disk.clear(block_device)
    }

    /// 载入时没有任何存活的句柄，磁盘上残留的计数来自未正常关闭的挂载
    pub fn reset_stale(&mut self) {
        if self.disk.ref_count != 0 || self.state().is_used() {
            log::warn!(
                "inode {} has stale count {}, resetting",
                self.id,
                self.disk.ref_count
            );
            self.disk.ref_count = 0;
            self.disk.set_state(self.state().release());
        }
    }

    /// 按访问策略接纳一个新句柄：
    /// - [`Mode::Write`] 独占 inode，要求当前没有任何句柄；
    /// - 其余模式可以共存，但不能与独占写者共存。
    ///
    /// 被拒绝的独占请求记为挂起状态。
    pub fn open(&mut self, mode: Mode) -> Result<()> {
        let state = self.state();

        if self.exclusive || (mode.is_exclusive() && self.disk.ref_count > 0) {
            if mode.is_exclusive() {
                self.disk.set_state(state.request_write());
            }
            log::warn!("inode {} busy, refusing {mode:?} open", self.id);
            return Err(FsError::Busy);
        }

        if mode.is_exclusive() {
            self.disk.set_state(state.acquire_exclusive());
            self.exclusive = true;
        } else {
            self.disk.set_state(state.acquire(mode.writable()));
        }

        if mode.writable() {
            self.writers += 1;
        }
        self.disk.ref_count += 1;
        Ok(())
    }

    /// 释放一个句柄，返回是否已无句柄指向此 inode
    pub fn close(&mut self, mode: Mode) -> bool {
        debug_assert!(self.disk.ref_count > 0);
        self.disk.ref_count -= 1;
        if mode.writable() {
            self.writers -= 1;
        }
        if mode.is_exclusive() {
            self.exclusive = false;
        }

        let state = self.state();
        if self.disk.ref_count == 0 {
            self.disk.set_state(state.release());
            true
        } else {
            if self.writers == 0 {
                self.disk.set_state(state.downgrade());
            }
            false
        }
    }
}
