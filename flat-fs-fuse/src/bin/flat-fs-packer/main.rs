mod cli;

use std::fs::{self, OpenOptions};
use std::io;
use std::sync::{Arc, Mutex};

use clap::Parser;
use cli::Cli;
use flat_fs::{BLOCK_SIZE, BlockDevice, FileSystem, Mode};
use flat_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("image={:?}\nblocks={}", cli.image, cli.blocks);

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&cli.image)?;
    fd.set_len(cli.blocks as u64 * BLOCK_SIZE as u64)?;

    let block_file: Arc<dyn BlockDevice> = Arc::new(BlockFile(Mutex::new(fd)));
    let fs = FileSystem::mount(block_file, cli.blocks).map_err(io::Error::other)?;
    fs.format(cli.inodes).map_err(io::Error::other)?;

    if let Some(source) = &cli.source {
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                log::warn!("skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };

            let data = fs::read(entry.path())?;
            let handle = fs.open(&name, Mode::Write).map_err(io::Error::other)?;
            let written = fs.write(&handle, &data);
            fs.close(&handle).map_err(io::Error::other)?;

            let written = written.map_err(io::Error::other)?;
            if written < data.len() {
                log::warn!("{name}: only {written} of {} bytes fit", data.len());
            }
            println!("file: {name:?}");
        }
    }

    fs.sync().map_err(io::Error::other)?;

    for entry in fs.list() {
        println!("{:>4} {:>8} {}", entry.inode, entry.size, entry.name);
    }
    println!("free blocks: {}", fs.super_block().lock().free_blocks());

    Ok(())
}
