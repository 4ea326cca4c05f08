#![no_std]

extern crate alloc;

/* flat-fs 的整体架构，自上而下 */

// 文件系统层：打开、读写、定位、删除、格式化、同步
mod fs;

// 打开文件表层：句柄的生命周期与共享 inode 表
mod file_table;

// 目录层：文件名与 inode 编号的互相转换
mod directory;

// 索引节点层：内存中共享的 inode
mod inode;

// 超级块层：布局信息与空闲块链表
mod super_block;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 块缓冲层：一次操作内的磁盘块副本
mod block;

mod error;

pub use self::{
    directory::Directory,
    error::{FsError, RegisterError, Result},
    file_table::{Access, FileHandle, FileTableEntry, Mode},
    fs::{DirEntry, FileSystem, Whence},
    inode::Inode,
    layout::{DiskInode, InodeState},
    super_block::SuperBlock,
};
pub use block_dev::BlockDevice;

pub const BLOCK_SIZE: usize = 512;
/// 直接索引的个数
pub const DIRECT_COUNT: usize = 11;
/// 一级索引块能容纳的块编号个数
pub const INDIRECT_COUNT: usize = BLOCK_SIZE / 2;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = (DIRECT_COUNT + INDIRECT_COUNT) * BLOCK_SIZE;
pub const INODE_SIZE: usize = 32;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
pub const DEFAULT_INODE_COUNT: u32 = 64;
/// 文件名的最大字节数
pub const NAME_MAX_LEN: usize = 30;
/// 根目录固定占用 0 号 inode
pub const ROOT_INODE: u32 = 0;
pub const ROOT_NAME: &str = "/";

/// 磁盘上表示“无”的块编号
const NIL: i16 = -1;

type DataBlock = [u8; BLOCK_SIZE];

#[cfg(test)]
mod test_util;
