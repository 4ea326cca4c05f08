
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::BlockDevice;
use flat_fs::BLOCK_SIZE;

/// 以宿主机文件作为块设备
#[derive(Debug)]
pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete block!");
    }

    fn handle_irq(&self) {}
}

/// 内存中的块设备
#[derive(Debug)]
pub struct RamDisk(Mutex<Vec<u8>>);

impl RamDisk {
    pub fn new(blocks: usize) -> Self {
        Self(Mutex::new(vec![0; blocks * BLOCK_SIZE]))
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let start = block_id * BLOCK_SIZE;
        buf.copy_from_slice(&self.0.lock().unwrap()[start..start + BLOCK_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let start = block_id * BLOCK_SIZE;
        self.0.lock().unwrap()[start..start + BLOCK_SIZE].copy_from_slice(buf);
    }

    fn handle_irq(&self) {}
}
