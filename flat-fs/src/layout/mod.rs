//! # 磁盘数据结构层
//!
//! flat-fs 的磁盘布局：
//! 超级块 | 索引节点区域 | 数据块区域(空闲块链表)
//!
//! 结构按 `#[repr(C)]` 直接映射到块上，字节序取本机字节序，
//! 一个镜像的整个生命周期内保持不变。

mod super_block;
pub use super_block::{DiskSuperBlock, FreeBlock};

mod inode;
pub use inode::{DiskInode, InodeState};

#[cfg(test)]
mod tests {
    use core::mem;

    use super::{DiskInode, DiskSuperBlock, FreeBlock};
    use crate::INODE_SIZE;

    #[test]
    fn layout() {
        assert_eq!(INODE_SIZE, mem::size_of::<DiskInode>());
        assert_eq!(12, mem::size_of::<DiskSuperBlock>());
        assert_eq!(4, mem::size_of::<FreeBlock>());
    }
}
