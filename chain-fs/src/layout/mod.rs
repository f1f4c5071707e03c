//! # 磁盘数据结构层
//!
//! chain-fs 的磁盘布局：
//! 扇区 0 为空闲位图文件头，扇区 1 为根目录文件头，其余扇区按需分配。
//! 位图和根目录本身都以普通文件的形式持久化。

mod bitmap;
pub(crate) use bitmap::Bitmap;

mod file_header;
pub(crate) use file_header::FileHeader;

mod directory;
pub(crate) use directory::{Directory, DirectoryEntry};
