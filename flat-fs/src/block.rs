//! # 块缓冲层
//!
//! 操作磁盘块前先将其复制到内存缓冲区，通过类型化的视图读写，
//! 修改过的缓冲区在同步或析构时写回块设备。
//!
//! 缓冲区只存活于一次操作之内，不跨操作缓存：
//! 每次修改都在所属操作返回前落盘。

use alloc::sync::Arc;
use core::mem;

use block_dev::BlockDevice;

use crate::{BLOCK_SIZE, DataBlock};

/// 按8字节对齐的块数据，保证磁盘结构的视图满足对齐要求
#[repr(C, align(8))]
struct AlignedBlock(DataBlock);

/// 内存中的磁盘块副本
pub struct Block {
    /// 缓冲的数据
    data: AlignedBlock,
    /// 对应的块ID
    block_id: usize,
    /// 底层块设备的引用
    block_device: Arc<dyn BlockDevice>,
    /// 是否为脏块
    modified: bool,
}

impl Block {
    /// 从设备读出一块
    pub fn read(block_id: usize, block_device: &Arc<dyn BlockDevice>) -> Self {
        let mut data = AlignedBlock([0; BLOCK_SIZE]);
        block_device.read_block(block_id, &mut data.0);

        Self {
            data,
            block_id,
            block_device: block_device.clone(),
            modified: false,
        }
    }

    /// 不读设备，直接得到一个全零的脏块；用于整块覆盖
    pub fn zeroed(block_id: usize, block_device: &Arc<dyn BlockDevice>) -> Self {
        Self {
            data: AlignedBlock([0; BLOCK_SIZE]),
            block_id,
            block_device: block_device.clone(),
            modified: true,
        }
    }

    pub fn sync(&mut self) {
        if self.modified {
            self.modified = false;
            self.block_device.write_block(self.block_id, &self.data.0);
        }
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        Self::check::<T>(offset);
        // 指针取自整个缓冲区，视图可以覆盖到块尾
        unsafe { &*self.data.0.as_ptr().add(offset).cast::<T>() }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        Self::check::<T>(offset);
        self.modified = true;
        unsafe { &mut *self.data.0.as_mut_ptr().add(offset).cast::<T>() }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }
}

impl Block {
    /// 视图不能越出块，也不能破坏对齐
    #[inline]
    fn check<T>(offset: usize) {
        assert!(mem::size_of::<T>() + offset <= BLOCK_SIZE);
        assert_eq!(offset % mem::align_of::<T>(), 0);
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.sync();
    }
}
