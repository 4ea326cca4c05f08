use crate::{BLOCK_SIZE, INODE_SIZE, INODES_PER_BLOCK, MAX_FILE_SIZE, NAME_MAX_LEN};

/// 超级块：
/// - 记录卷的大小与 inode 区域的大小；
/// - 记录空闲块链表的表头
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DiskSuperBlock {
    /// 卷占据块数
    pub total_blocks: i32,
    /// inode 个数
    pub inode_count: i32,
    /// 第一个空闲块，-1 表示没有
    pub free_list: i32,
}

/// 空闲块：前4字节存放链表上下一个空闲块的编号
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FreeBlock {
    pub next: i32,
}

impl DiskSuperBlock {
    #[inline]
    pub fn init(&mut self, total_blocks: u32, inode_count: u32, free_list: Option<u32>) {
        *self = Self {
            total_blocks: total_blocks as i32,
            inode_count: inode_count as i32,
            free_list: free_list.map_or(-1, |block| block as i32),
        };
    }

    /// 数据区的起始块
    #[inline]
    pub fn first_data_block(inode_count: u32) -> u32 {
        (2 + inode_count as u64 * INODE_SIZE as u64 / BLOCK_SIZE as u64) as u32
    }

    /// `inode_count` 个 inode 放进 `total_blocks` 块的卷后，是否还剩下数据块；
    /// 同时序列化后的目录必须放得进根目录伪文件
    pub fn fits(inode_count: u32, total_blocks: u32) -> bool {
        inode_count > 0
            && inode_count as u64 * (4 + NAME_MAX_LEN) as u64 <= MAX_FILE_SIZE as u64
            && (inode_count as u64) < total_blocks as u64 * INODES_PER_BLOCK as u64
            && Self::first_data_block(inode_count) < total_blocks
    }

    /// 检查记录是否属于一个大小为 `total_blocks` 的卷
    pub fn is_valid(&self, total_blocks: u32) -> bool {
        if self.total_blocks as u32 != total_blocks
            || !Self::fits(self.inode_count as u32, total_blocks)
        {
            return false;
        }

        let first_data_block = Self::first_data_block(self.inode_count as u32);

        self.free_list == -1
            || (first_data_block as i32..total_blocks as i32).contains(&self.free_list)
    }
}

#[cfg(test)]
mod tests {
    use super::DiskSuperBlock;
    use crate::{MAX_FILE_SIZE, NAME_MAX_LEN};

    #[test]
    fn directory_image_must_fit_root_file() {
        let max = (MAX_FILE_SIZE / (4 + NAME_MAX_LEN)) as u32;
        assert!(DiskSuperBlock::fits(max, 8192));
        assert!(!DiskSuperBlock::fits(max + 1, 8192));
        assert!(!DiskSuperBlock::fits(5000, 8192));
    }

    #[test]
    fn inode_region_must_leave_data_blocks() {
        assert!(!DiskSuperBlock::fits(0, 100));
        assert!(DiskSuperBlock::fits(16, 4));
        assert!(!DiskSuperBlock::fits(32, 4));
    }
}
