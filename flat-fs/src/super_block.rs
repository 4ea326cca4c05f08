//! # 超级块层
//!
//! 挂载时读出 0 号块上的布局信息，并管理空闲块链表：
//! 每个空闲块的前4字节存放下一个空闲块的编号，表头记录在超级块中。

use alloc::sync::Arc;

use block_dev::BlockDevice;

use crate::block::Block;
use crate::error::{FsError, Result};
use crate::layout::{DiskInode, DiskSuperBlock, FreeBlock};
use crate::{DEFAULT_INODE_COUNT, INODE_SIZE, INODES_PER_BLOCK};

/// 2字节块指针能编址的块数
const ADDRESSABLE_BLOCKS: u32 = i16::MAX as u32 + 1;

#[derive(Debug)]
pub struct SuperBlock {
    block_device: Arc<dyn BlockDevice>,
    total_blocks: u32,
    inode_count: u32,
    /// 空闲块链表表头
    free_list: Option<u32>,
}

impl SuperBlock {
    /// 读出已有的超级块；记录与设备不符时，以默认 inode 数重新格式化。
    /// 卷不足4块时容纳不下任何布局，返回 [`FsError::InvalidArgument`]。
    pub fn mount(block_device: Arc<dyn BlockDevice>, total_blocks: u32) -> Result<Self> {
        if !DiskSuperBlock::fits(INODES_PER_BLOCK as u32, total_blocks) {
            log::error!("volume of {total_blocks} blocks is too small");
            return Err(FsError::InvalidArgument);
        }

        let disk = Block::read(0, &block_device).map(0, |super_block: &DiskSuperBlock| *super_block);

        let mut super_block = Self {
            block_device,
            total_blocks,
            inode_count: disk.inode_count.max(0) as u32,
            free_list: (disk.free_list >= 0).then_some(disk.free_list as u32),
        };

        if disk.is_valid(total_blocks) {
            log::info!(
                "mounted volume: {} blocks, {} inodes",
                total_blocks,
                super_block.inode_count
            );
        } else {
            // 极小的卷放不下默认个数的 inode
            let inode_count = [DEFAULT_INODE_COUNT, INODES_PER_BLOCK as u32]
                .into_iter()
                .find(|&count| DiskSuperBlock::fits(count, total_blocks))
                .ok_or(FsError::InvalidArgument)?;
            log::warn!("invalid superblock {disk:?}, formatting with {inode_count} inodes");
            super_block.format(inode_count);
        }

        Ok(super_block)
    }

    /// 重建 inode 区域与空闲块链表
    pub fn format(&mut self, inode_count: u32) {
        debug_assert!(DiskSuperBlock::fits(inode_count, self.total_blocks));
        self.inode_count = inode_count;

        for inode_id in 0..inode_count {
            let (block_id, offset) = Self::inode_pos(inode_id);
            Block::read(block_id as usize, &self.block_device)
                .map_mut(offset, |disk_inode: &mut DiskInode| *disk_inode = DiskInode::default());
        }

        let first = self.first_data_block();
        let end = self.total_blocks.min(ADDRESSABLE_BLOCKS);
        if end < self.total_blocks {
            log::warn!(
                "blocks {}..{} are beyond 2-byte block pointers and left unused",
                end,
                self.total_blocks
            );
        }

        for block_id in first..end {
            let next = if block_id + 1 < end {
                block_id as i32 + 1
            } else {
                -1
            };
            Block::zeroed(block_id as usize, &self.block_device)
                .map_mut(0, |free_block: &mut FreeBlock| free_block.next = next);
        }
        self.free_list = (first < end).then_some(first);

        self.sync();
        log::info!(
            "formatted volume: {} inodes, data blocks {}..{}",
            inode_count,
            first,
            end
        );
    }

    /// 取下空闲块链表的表头
    pub fn alloc(&mut self) -> Option<u32> {
        let block_id = self.free_list?;
        let next = Block::read(block_id as usize, &self.block_device)
            .map(0, |free_block: &FreeBlock| free_block.next);
        self.free_list = (next >= 0).then_some(next as u32);

        log::debug!("alloc block {block_id}");
        Some(block_id)
    }

    /// 把块放回空闲块链表的表头。
    /// 不检查该块是否已经在链表上。
    pub fn dealloc(&mut self, block_id: u32) -> bool {
        if !(self.first_data_block()..self.total_blocks.min(ADDRESSABLE_BLOCKS)).contains(&block_id)
        {
            log::warn!("refusing to free block {block_id} outside the data area");
            return false;
        }

        let next = self.free_list.map_or(-1, |id| id as i32);
        Block::zeroed(block_id as usize, &self.block_device)
            .map_mut(0, |free_block: &mut FreeBlock| free_block.next = next);
        self.free_list = Some(block_id);

        log::debug!("dealloc block {block_id}");
        true
    }

    pub fn sync(&self) {
        Block::read(0, &self.block_device).map_mut(0, |super_block: &mut DiskSuperBlock| {
            super_block.init(self.total_blocks, self.inode_count, self.free_list)
        });
        log::debug!("superblock synchronized");
    }

    /// 沿链表数出空闲块的个数
    pub fn free_blocks(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.free_list;
        while let Some(block_id) = cursor {
            count += 1;
            let next = Block::read(block_id as usize, &self.block_device)
                .map(0, |free_block: &FreeBlock| free_block.next);
            cursor = (next >= 0).then_some(next as u32);
        }
        count
    }

    #[inline]
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    #[inline]
    pub fn inode_count(&self) -> u32 {
        self.inode_count
    }

    #[inline]
    pub fn first_data_block(&self) -> u32 {
        DiskSuperBlock::first_data_block(self.inode_count)
    }

    /// 通过ID获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    #[inline]
    pub fn inode_pos(inode_id: u32) -> (u32, usize) {
        let block_id = 1 + inode_id / INODES_PER_BLOCK as u32;
        let block_offset = inode_id as usize % INODES_PER_BLOCK * INODE_SIZE;

        (block_id, block_offset)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    use block_dev::BlockDevice;

    use super::SuperBlock;
    use crate::DEFAULT_INODE_COUNT;
    use crate::block::Block;
    use crate::error::FsError;
    use crate::layout::DiskSuperBlock;
    use crate::test_util::MemDisk;

    fn corrupt(dev: &Arc<dyn BlockDevice>, f: impl FnOnce(&mut DiskSuperBlock)) {
        Block::read(0, dev).map_mut(0, f);
    }

    #[test]
    fn blank_device_is_formatted() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(100));
        let super_block = SuperBlock::mount(dev.clone(), 100).unwrap();

        assert_eq!(super_block.inode_count(), DEFAULT_INODE_COUNT);
        assert_eq!(super_block.first_data_block(), 6);
        assert_eq!(super_block.free_blocks(), 94);

        // 再次挂载读到的是同一份记录
        let again = SuperBlock::mount(dev, 100).unwrap();
        assert_eq!(again.free_list, Some(6));
    }

    #[test]
    fn size_mismatch_reformats() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(100));
        let mut super_block = SuperBlock::mount(dev.clone(), 100).unwrap();
        super_block.format(48);
        super_block.alloc();

        let remounted = SuperBlock::mount(dev, 80).unwrap();
        assert_eq!(remounted.inode_count(), DEFAULT_INODE_COUNT);
        assert_eq!(remounted.free_blocks(), 74);
    }

    #[test]
    fn alloc_then_dealloc() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(20));
        let mut super_block = SuperBlock::mount(dev, 20).unwrap();
        super_block.format(16);
        assert_eq!(super_block.first_data_block(), 3);

        let blocks: Vec<u32> = core::iter::from_fn(|| super_block.alloc()).collect();
        assert_eq!(blocks, (3..20).collect::<Vec<_>>());
        assert_eq!(super_block.alloc(), None);

        assert!(!super_block.dealloc(2));
        assert!(!super_block.dealloc(20));
        assert!(super_block.dealloc(7));
        assert!(super_block.dealloc(11));
        assert_eq!(super_block.free_blocks(), 2);
        assert_eq!(super_block.alloc(), Some(11));
        assert_eq!(super_block.alloc(), Some(7));
        assert_eq!(super_block.alloc(), None);
    }

    #[test]
    fn sync_persists_free_list() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(20));
        let mut super_block = SuperBlock::mount(dev.clone(), 20).unwrap();
        super_block.alloc();
        super_block.alloc();
        super_block.sync();

        let remounted = SuperBlock::mount(dev, 20).unwrap();
        assert_eq!(remounted.free_list, Some(super_block.first_data_block() + 2));
    }

    #[test]
    fn corrupt_records_reformat() {
        let cases: [fn(&mut DiskSuperBlock); 4] = [
            // 空闲块链表表头落在 inode 区域
            |super_block| super_block.free_list = 2,
            |super_block| super_block.free_list = 100,
            |super_block| super_block.inode_count = 0,
            |super_block| super_block.inode_count = i32::MAX,
        ];

        for case in cases {
            let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(100));
            let mut super_block = SuperBlock::mount(dev.clone(), 100).unwrap();
            super_block.format(32);
            super_block.alloc();
            corrupt(&dev, case);

            let remounted = SuperBlock::mount(dev, 100).unwrap();
            assert_eq!(remounted.inode_count(), DEFAULT_INODE_COUNT);
            assert_eq!(remounted.free_list, Some(6));
            assert_eq!(remounted.free_blocks(), 94);
        }
    }

    #[test]
    fn tiny_volume_is_rejected() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(4));
        assert_eq!(SuperBlock::mount(dev.clone(), 3).unwrap_err(), FsError::InvalidArgument);

        let super_block = SuperBlock::mount(dev, 4).unwrap();
        assert_eq!(super_block.inode_count(), 16);
        assert_eq!(super_block.free_blocks(), 1);
    }
}
