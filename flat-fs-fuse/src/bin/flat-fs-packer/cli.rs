use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Image file to create
    #[arg(long, short)]
    pub image: PathBuf,

    /// Volume size in blocks
    #[arg(long, short, default_value_t = 4096)]
    pub blocks: u32,

    /// Number of inode slots
    #[arg(long, short = 'n', default_value_t = flat_fs::DEFAULT_INODE_COUNT)]
    pub inodes: u32,

    /// Directory whose regular files are copied into the image
    #[arg(long, short)]
    pub source: Option<PathBuf>,
}
