//! 磁盘上的 inode 与块索引
//!
//! - 直接索引：inode 内的 [`DIRECT_COUNT`] 个块编号，各指向一个**数据块**
//! - 一级索引：整个块连续存储 [`INDIRECT_COUNT`] 个2字节**块编号**，每个编号都指向一个**数据块**
//!
//! 文件只能在末尾增长：块按逻辑索引顺序登记，不存在空洞。
//!
//! ## 块索引编码
//!
//! - 字节偏移除以块大小，得到块的逻辑索引
//! - 逻辑索引小于 [`DIRECT_COUNT`] 时落在直接索引，否则减去 [`DIRECT_COUNT`] 即一级索引块内的位置

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;

use crate::block::Block;
use crate::error::RegisterError;
use crate::{BLOCK_SIZE, DIRECT_COUNT, INDIRECT_COUNT, NIL};

/// 一级索引块
type IndirectBlock = [i16; INDIRECT_COUNT];

/// 固定32字节的磁盘 inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DiskInode {
    /// 文件字节数
    pub length: i32,
    /// 指向此 inode 的打开句柄个数
    pub ref_count: i16,
    /// 访问状态，见 [`InodeState`]
    state: i16,
    direct: [i16; DIRECT_COUNT],
    /// 指向一个一级索引块
    indirect: i16,
}

/// inode 的访问状态
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InodeState {
    #[default]
    Unused = 0,
    /// 只有读者
    UsedRead = 1,
    /// 有写者
    UsedWrite = 2,
    /// 无人使用，但有排他写请求未被满足
    UnusedPendingWrite = 3,
    UsedReadPendingWrite = 4,
    UsedWritePendingWrite = 5,
}

impl Default for DiskInode {
    fn default() -> Self {
        Self {
            length: 0,
            ref_count: 0,
            state: InodeState::Unused as i16,
            direct: [NIL; DIRECT_COUNT],
            indirect: NIL,
        }
    }
}

impl DiskInode {
    #[inline]
    pub fn length(&self) -> usize {
        self.length as usize
    }

    pub fn state(&self) -> InodeState {
        InodeState::try_from(self.state).unwrap_or_else(|raw| {
            log::warn!("unknown inode state {raw}, treating as unused");
            InodeState::Unused
        })
    }

    #[inline]
    pub fn set_state(&mut self, state: InodeState) {
        self.state = state as i16;
    }

    /// 偏移所在的块是否需要先建立一级索引块
    #[inline]
    pub fn needs_indirect(&self, offset: usize) -> bool {
        Self::block_index(offset) >= DIRECT_COUNT && self.indirect == NIL
    }

    /// 偏移是否在 inode 可编址的范围之内
    #[inline]
    pub fn in_range(offset: usize) -> bool {
        Self::block_index(offset) < DIRECT_COUNT + INDIRECT_COUNT
    }

    /// 把字节偏移翻译为块编号；尚未登记时返回空
    pub fn block_for(&self, offset: usize, block_device: &Arc<dyn BlockDevice>) -> Option<u32> {
        let block_index = Self::block_index(offset);

        if block_index < DIRECT_COUNT {
            return to_block(self.direct[block_index]);
        }

        // 剔去直接索引的部分
        let index = block_index - DIRECT_COUNT;
        if self.indirect == NIL || index >= INDIRECT_COUNT {
            return None;
        }

        Block::read(self.indirect as usize, block_device)
            .map(0, |indirect_block: &IndirectBlock| to_block(indirect_block[index]))
    }

    /// 为偏移所在的块登记块编号。
    /// 一级索引块须由调用者先通过 [`DiskInode::set_indirect`] 建立。
    pub fn register_block(
        &mut self,
        offset: usize,
        block_id: u32,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<(), RegisterError> {
        debug_assert!(block_id <= i16::MAX as u32);
        let block_index = Self::block_index(offset);

        if block_index < DIRECT_COUNT {
            if self.direct[block_index] != NIL {
                return Err(RegisterError::AlreadyRegistered);
            }
            if block_index > 0 && self.direct[block_index - 1] == NIL {
                return Err(RegisterError::PrecedingUnused);
            }
            self.direct[block_index] = block_id as i16;
            return Ok(());
        }

        let index = block_index - DIRECT_COUNT;
        if index >= INDIRECT_COUNT {
            return Err(RegisterError::OutOfRange);
        }
        if self.indirect == NIL {
            return Err(RegisterError::IndirectUnset);
        }
        if index == 0 && self.direct[DIRECT_COUNT - 1] == NIL {
            return Err(RegisterError::PrecedingUnused);
        }

        Block::read(self.indirect as usize, block_device).map_mut(
            0,
            |indirect_block: &mut IndirectBlock| {
                if indirect_block[index] != NIL {
                    return Err(RegisterError::AlreadyRegistered);
                }
                if index > 0 && indirect_block[index - 1] == NIL {
                    return Err(RegisterError::PrecedingUnused);
                }
                indirect_block[index] = block_id as i16;
                Ok(())
            },
        )
    }

    /// 启用一级索引块：整块填充为 -1 后写回
    pub fn set_indirect(&mut self, block_id: u32, block_device: &Arc<dyn BlockDevice>) {
        debug_assert_eq!(self.indirect, NIL);
        Block::zeroed(block_id as usize, block_device)
            .map_mut(0, |indirect_block: &mut IndirectBlock| indirect_block.fill(NIL));
        self.indirect = block_id as i16;
    }

    /// 已登记的全部块：数据块在前，一级索引块本身在最后
    pub fn blocks(&self, block_device: &Arc<dyn BlockDevice>) -> Vec<u32> {
        let mut blocks: Vec<u32> = self.direct.iter().filter_map(|&id| to_block(id)).collect();

        if let Some(indirect) = to_block(self.indirect) {
            Block::read(indirect as usize, block_device).map(0, |indirect_block: &IndirectBlock| {
                blocks.extend(indirect_block.iter().map_while(|&id| to_block(id)));
            });
            blocks.push(indirect);
        }

        blocks
    }

    /// 清空文件，返回所有被释放的块（包括一级索引块）
    pub fn clear(&mut self, block_device: &Arc<dyn BlockDevice>) -> Vec<u32> {
        let blocks = self.blocks(block_device);
        self.length = 0;
        self.direct.fill(NIL);
        self.indirect = NIL;
        blocks
    }

    #[inline]
    fn block_index(offset: usize) -> usize {
        offset / BLOCK_SIZE
    }
}

#[inline]
fn to_block(raw: i16) -> Option<u32> {
    (raw >= 0).then_some(raw as u32)
}

impl TryFrom<i16> for InodeState {
    type Error = i16;

    fn try_from(raw: i16) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => Self::Unused,
            1 => Self::UsedRead,
            2 => Self::UsedWrite,
            3 => Self::UnusedPendingWrite,
            4 => Self::UsedReadPendingWrite,
            5 => Self::UsedWritePendingWrite,
            raw => return Err(raw),
        })
    }
}

impl InodeState {
    #[inline]
    pub fn is_used(self) -> bool {
        !matches!(self, Self::Unused | Self::UnusedPendingWrite)
    }

    #[inline]
    pub fn has_pending_write(self) -> bool {
        matches!(
            self,
            Self::UnusedPendingWrite | Self::UsedReadPendingWrite | Self::UsedWritePendingWrite
        )
    }

    /// 共享方式打开成功；挂起的排他写请求保持挂起
    pub fn acquire(self, writer: bool) -> Self {
        match (self.has_pending_write(), writer || self.has_writer()) {
            (false, false) => Self::UsedRead,
            (false, true) => Self::UsedWrite,
            (true, false) => Self::UsedReadPendingWrite,
            (true, true) => Self::UsedWritePendingWrite,
        }
    }

    /// 排他写者打开成功，满足了挂起的写请求
    #[inline]
    pub fn acquire_exclusive(self) -> Self {
        debug_assert!(!self.is_used());
        Self::UsedWrite
    }

    /// 排他写请求被拒绝，记为挂起
    pub fn request_write(self) -> Self {
        match self {
            Self::Unused => Self::UnusedPendingWrite,
            Self::UsedRead => Self::UsedReadPendingWrite,
            Self::UsedWrite => Self::UsedWritePendingWrite,
            state => state,
        }
    }

    /// 最后一个写者关闭，但仍有读者
    pub fn downgrade(self) -> Self {
        match self {
            Self::UsedWrite => Self::UsedRead,
            Self::UsedWritePendingWrite => Self::UsedReadPendingWrite,
            state => state,
        }
    }

    /// 最后一个句柄关闭
    pub fn release(self) -> Self {
        match self {
            Self::UsedRead | Self::UsedWrite => Self::Unused,
            Self::UsedReadPendingWrite | Self::UsedWritePendingWrite => Self::UnusedPendingWrite,
            state => state,
        }
    }

    #[inline]
    fn has_writer(self) -> bool {
        matches!(self, Self::UsedWrite | Self::UsedWritePendingWrite)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    use block_dev::BlockDevice;

    use super::{DiskInode, InodeState};
    use crate::error::RegisterError;
    use crate::test_util::MemDisk;
    use crate::{BLOCK_SIZE, DIRECT_COUNT, INDIRECT_COUNT};

    fn device() -> Arc<dyn BlockDevice> {
        Arc::new(MemDisk::new(512))
    }

    #[test]
    fn direct_blocks_are_contiguous() {
        let dev = device();
        let mut inode = DiskInode::default();

        assert_eq!(inode.block_for(0, &dev), None);
        assert_eq!(
            inode.register_block(BLOCK_SIZE, 20, &dev),
            Err(RegisterError::PrecedingUnused)
        );
        inode.register_block(0, 20, &dev).unwrap();
        assert_eq!(
            inode.register_block(10, 21, &dev),
            Err(RegisterError::AlreadyRegistered)
        );
        inode.register_block(BLOCK_SIZE, 21, &dev).unwrap();

        assert_eq!(inode.block_for(BLOCK_SIZE - 1, &dev), Some(20));
        assert_eq!(inode.block_for(BLOCK_SIZE, &dev), Some(21));
        assert_eq!(inode.block_for(2 * BLOCK_SIZE, &dev), None);
    }

    #[test]
    fn indirect_blocks() {
        let dev = device();
        let mut inode = DiskInode::default();
        for i in 0..DIRECT_COUNT {
            inode.register_block(i * BLOCK_SIZE, 100 + i as u32, &dev).unwrap();
        }

        let offset = DIRECT_COUNT * BLOCK_SIZE;
        assert!(inode.needs_indirect(offset));
        assert_eq!(inode.block_for(offset, &dev), None);
        assert_eq!(
            inode.register_block(offset, 200, &dev),
            Err(RegisterError::IndirectUnset)
        );

        inode.set_indirect(199, &dev);
        assert!(!inode.needs_indirect(offset));
        assert_eq!(inode.block_for(offset, &dev), None);
        assert_eq!(
            inode.register_block(offset + BLOCK_SIZE, 201, &dev),
            Err(RegisterError::PrecedingUnused)
        );
        inode.register_block(offset, 200, &dev).unwrap();
        inode.register_block(offset + BLOCK_SIZE, 201, &dev).unwrap();
        assert_eq!(inode.block_for(offset + BLOCK_SIZE + 3, &dev), Some(201));

        let end = (DIRECT_COUNT + INDIRECT_COUNT) * BLOCK_SIZE;
        assert!(!DiskInode::in_range(end));
        assert_eq!(inode.block_for(end, &dev), None);
        assert_eq!(
            inode.register_block(end, 300, &dev),
            Err(RegisterError::OutOfRange)
        );
    }

    #[test]
    fn clear_returns_every_block() {
        let dev = device();
        let mut inode = DiskInode::default();
        for i in 0..DIRECT_COUNT {
            inode.register_block(i * BLOCK_SIZE, 100 + i as u32, &dev).unwrap();
        }
        inode.set_indirect(150, &dev);
        inode.register_block(DIRECT_COUNT * BLOCK_SIZE, 151, &dev).unwrap();
        inode.length = ((DIRECT_COUNT + 1) * BLOCK_SIZE) as i32;

        let mut blocks = inode.clear(&dev);
        blocks.sort_unstable();
        let expected: Vec<u32> = (100..100 + DIRECT_COUNT as u32).chain([150, 151]).collect();
        assert_eq!(blocks, expected);
        assert_eq!(inode, DiskInode::default());
    }

    #[test]
    fn state_transitions() {
        use InodeState::*;

        assert_eq!(Unused.acquire(false), UsedRead);
        assert_eq!(UsedRead.acquire(true), UsedWrite);
        assert_eq!(UsedWrite.acquire(false), UsedWrite);
        assert_eq!(UnusedPendingWrite.acquire(false), UsedReadPendingWrite);
        assert_eq!(UnusedPendingWrite.acquire_exclusive(), UsedWrite);

        assert_eq!(UsedRead.request_write(), UsedReadPendingWrite);
        assert_eq!(UsedWrite.request_write(), UsedWritePendingWrite);
        assert_eq!(UsedWritePendingWrite.downgrade(), UsedReadPendingWrite);

        assert_eq!(UsedRead.release(), Unused);
        assert_eq!(UsedWrite.release(), Unused);
        assert_eq!(UsedReadPendingWrite.release(), UnusedPendingWrite);
        assert_eq!(UsedWritePendingWrite.release(), UnusedPendingWrite);
        assert_eq!(Unused.release(), Unused);

        assert_eq!(InodeState::try_from(6), Err(6));
    }
}
