use core::fmt;

/// 文件系统操作的失败种类。
///
/// 门面操作对外只返回布尔值或 `Option`，内部则以 `Result` 携带种类，
/// 在转换处记入日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 名字不在目录中
    NotFound,
    /// 目录中已有同名项
    AlreadyExists,
    /// 空闲扇区耗尽
    NoSpace,
    /// 目录表项用尽
    DirectoryFull,
    /// 目录非空，不能删除
    DirectoryNotEmpty,
    /// 路径为空或含空段
    InvalidPath,
    /// 描述符无效
    BadDescriptor,
    /// 文件名超长
    NameTooLong,
    /// 下层设备错误
    IoError,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::NoSpace => "no free sectors",
            Self::DirectoryFull => "directory full",
            Self::DirectoryNotEmpty => "directory not empty",
            Self::InvalidPath => "invalid path",
            Self::BadDescriptor => "bad descriptor",
            Self::NameTooLong => "name too long",
            Self::IoError => "i/o error",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}

pub(crate) type Result<T> = core::result::Result<T, FsError>;
