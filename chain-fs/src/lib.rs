/* chain-fs 的整体架构，自上而下 */

// 文件系统门面：创建、打开、删除、目录切换与一致性检查
mod cfs;
pub use cfs::ChainFileSystem;
pub use cfs::CheckViolation;

// 打开文件层：每次打开对应一个游标，读写走读者-写者协议
mod open_file;
pub use open_file::OpenFile;

// 进程级共享表：打开文件表与线程工作目录表
mod dir_table;
mod file_table;

// 磁盘数据结构层：空闲扇区位图、文件头链、目录表
mod layout;

// 路径解析：相对路径依调用线程的工作目录补全
mod path;

// 错误种类
mod error;
pub use error::FsError;

// 扇区设备接口层
mod block_dev;
pub use block_dev::BlockDevice;

/// 扇区大小（字节）
pub const SECTOR_SIZE: usize = 128;
/// 磁盘扇区总数；空闲位图恰好占满一个扇区
pub const NUM_SECTORS: usize = 1024;

/// 文件头内的扇区指针槽数，令 RawFileHeader 恰为一个扇区；
/// 最后一槽存放下一个文件头的扇区号，0 表示链到此为止
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 2 * core::mem::size_of::<u32>())
    / core::mem::size_of::<u32>();

/// 单个文件头所辖的数据容量（字节）
pub const HEADER_CAPACITY: usize = (NUM_DIRECT - 1) * SECTOR_SIZE;

/// 文件名长度上限（不含结尾 NUL）
pub const FILE_NAME_MAX_LEN: usize = 25;
/// 目录表项数上限；目录不支持扩容
pub const NUM_DIR_ENTRIES: usize = 10;

/// 空闲位图文件头所在扇区
pub const FREE_MAP_SECTOR: usize = 0;
/// 根目录文件头所在扇区
pub const DIRECTORY_SECTOR: usize = 1;

pub(crate) const FREE_MAP_FILE_SIZE: usize = NUM_SECTORS / 8;
pub(crate) const DIRECTORY_FILE_SIZE: usize =
    layout::DirectoryEntry::SIZE * NUM_DIR_ENTRIES;

/// 位图文件在打开文件表中的保留名；不属于任何目录
pub(crate) const FREE_MAP_NAME: &str = "FREE_MAP_SECTOR";
pub(crate) const ROOT_NAME: &str = "/";
