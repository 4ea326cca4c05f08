use derive_more::Display;

pub type Result<T> = core::result::Result<T, FsError>;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 以只读方式打开不存在的文件
    #[display(fmt = "no such file")]
    NotFound,
    /// 对只读句柄写
    #[display(fmt = "handle is read-only")]
    ReadOnly,
    /// 对只写或追加句柄读
    #[display(fmt = "handle is write-only")]
    WriteOnly,
    /// 空闲块耗尽
    #[display(fmt = "no free block left")]
    NoSpace,
    /// 超出直接索引与一级索引的总容量
    #[display(fmt = "file exceeds maximum size")]
    FileTooLarge,
    /// 目录或 inode 表已满
    #[display(fmt = "directory is full")]
    DirectoryFull,
    #[display(fmt = "invalid argument")]
    InvalidArgument,
    /// 与其它句柄冲突，或正在等待格式化
    #[display(fmt = "resource busy")]
    Busy,
}

/// 向 inode 登记数据块失败的原因
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    #[display(fmt = "block slot already registered")]
    AlreadyRegistered,
    /// 前一个槽位尚未使用，登记会留下空洞
    #[display(fmt = "preceding block slot unused")]
    PrecedingUnused,
    #[display(fmt = "indirect block not allocated")]
    IndirectUnset,
    #[display(fmt = "block index beyond indirect capacity")]
    OutOfRange,
}

impl From<RegisterError> for FsError {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::OutOfRange => Self::FileTooLarge,
            _ => Self::InvalidArgument,
        }
    }
}

impl core::error::Error for FsError {}
