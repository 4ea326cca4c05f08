//! # 目录层
//!
//! 单层目录：按 inode 编号索引的两张定长表，分别存放文件名长度与文件名。
//! 长度为0的槽位空闲；0 号槽位永远是根目录 "/"。
//!
//! 目录整体序列化后作为根目录伪文件的内容保存：
//! 先是全部长度(各4字节，大端)，再是全部文件名缓冲区(各 [`NAME_MAX_LEN`] 字节)。

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::{NAME_MAX_LEN, ROOT_INODE, ROOT_NAME};

type Name = [u8; NAME_MAX_LEN];

#[derive(Debug, Clone)]
pub struct Directory {
    /// 各槽位实际存放的文件名长度
    sizes: Box<[u32]>,
    names: Box<[Name]>,
}

impl Directory {
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0);
        let mut directory = Self {
            sizes: vec![0; capacity as usize].into_boxed_slice(),
            names: vec![[0; NAME_MAX_LEN]; capacity as usize].into_boxed_slice(),
        };
        directory.set_root();
        directory
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.sizes.len() as u32
    }

    /// 序列化后的字节数
    #[inline]
    pub fn image_size(&self) -> usize {
        self.sizes.len() * (4 + NAME_MAX_LEN)
    }

    /// 通过文件名获取 inode 编号
    pub fn namei(&self, name: &str) -> Option<u32> {
        let name = name.as_bytes();
        (0..self.capacity()).find(|&id| self.name(id) == Some(name))
    }

    /// 为新文件分配 inode 编号；过长的文件名被截断
    pub fn ialloc(&mut self, name: &str) -> Option<u32> {
        let id = (1..self.capacity()).find(|&id| self.sizes[id as usize] == 0)?;

        let bytes = &name.as_bytes()[..name.len().min(NAME_MAX_LEN)];
        self.names[id as usize][..bytes.len()].copy_from_slice(bytes);
        self.sizes[id as usize] = bytes.len() as u32;

        log::debug!("ialloc {id} for {name:?}");
        Some(id)
    }

    /// 释放 inode 编号，对应文件随之从目录中消失
    pub fn ifree(&mut self, id: u32) -> bool {
        if id == ROOT_INODE || id >= self.capacity() || self.sizes[id as usize] == 0 {
            return false;
        }

        self.sizes[id as usize] = 0;
        self.names[id as usize].fill(0);
        log::debug!("ifree {id}");
        true
    }

    pub fn name(&self, id: u32) -> Option<&[u8]> {
        let size = *self.sizes.get(id as usize)? as usize;
        (size > 0).then(|| &self.names[id as usize][..size])
    }

    /// 所有已占用的槽位，包括根目录
    pub fn entries(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        (0..self.capacity()).filter_map(|id| self.name(id).map(|name| (id, name)))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.image_size());
        for size in self.sizes.iter() {
            data.extend_from_slice(&size.to_be_bytes());
        }
        for name in self.names.iter() {
            data.extend_from_slice(name);
        }
        data
    }

    /// 从镜像重建目录。
    /// 镜像短于当前容量时，缺失的槽位保持空闲；多余的部分被忽略。
    pub fn deserialize(&mut self, data: &[u8]) {
        if data.len() != self.image_size() {
            log::warn!(
                "directory image is {} bytes, expected {}",
                data.len(),
                self.image_size()
            );
        }

        let capacity = self.sizes.len();
        let names_start = capacity * 4;
        self.sizes.fill(0);
        self.names.iter_mut().for_each(|name| name.fill(0));

        for (id, chunk) in data[..names_start.min(data.len())].chunks_exact(4).enumerate() {
            let size = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.sizes[id] = size.min(NAME_MAX_LEN as u32);
        }

        for id in 0..capacity {
            let start = names_start + id * NAME_MAX_LEN;
            let size = self.sizes[id] as usize;
            match data.get(start..start + size) {
                Some(name) => self.names[id][..size].copy_from_slice(name),
                None => self.sizes[id] = 0,
            }
        }

        self.set_root();
    }
}

impl Directory {
    fn set_root(&mut self) {
        let root = ROOT_NAME.as_bytes();
        self.names[ROOT_INODE as usize].fill(0);
        self.names[ROOT_INODE as usize][..root.len()].copy_from_slice(root);
        self.sizes[ROOT_INODE as usize] = root.len() as u32;
    }
}
