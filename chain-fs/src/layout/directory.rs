use core::{ptr, slice};

use std::sync::Arc;

use super::FileHeader;
use crate::error::Result;
use crate::open_file::OpenFile;
use crate::BlockDevice;
use crate::FsError;
use crate::{DIRECTORY_FILE_SIZE, FILE_NAME_MAX_LEN, NUM_DIR_ENTRIES, SECTOR_SIZE};

/// 目录表项。
///
/// `sector` 指向该项的文件头；`is_dir` 置位时文件内容本身又是一张目录表。
#[repr(C)]
#[derive(Debug, Clone)]
pub(crate) struct DirectoryEntry {
    in_use: u8,
    is_dir: u8,
    // 最后一字节留给 \0
    name: [u8; FILE_NAME_MAX_LEN + 1],
    sector: u32,
}

impl DirectoryEntry {
    /// 表项大小恒为32字节
    pub const SIZE: usize = 32;

    fn vacant() -> Self {
        Self {
            in_use: 0,
            is_dir: 0,
            name: [0; FILE_NAME_MAX_LEN + 1],
            sector: 0,
        }
    }

    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    #[inline]
    pub fn sector(&self) -> u32 {
        self.sector
    }
}

const _: () = assert!(core::mem::size_of::<DirectoryEntry>() == DirectoryEntry::SIZE);

/// 定长目录表，持久化为一个普通文件。
///
/// 在用表项的名字互不重复；目录不支持超出 [`NUM_DIR_ENTRIES`] 的扩容。
pub(crate) struct Directory {
    table: [DirectoryEntry; NUM_DIR_ENTRIES],
}

impl Directory {
    pub fn new() -> Self {
        Self {
            table: core::array::from_fn(|_| DirectoryEntry::vacant()),
        }
    }

    pub fn fetch_from(&mut self, file: &OpenFile) {
        let n = file.read_at(0, self.as_bytes_mut());
        debug_assert_eq!(n, DIRECTORY_FILE_SIZE);
    }

    pub fn write_back(&self, file: &OpenFile) {
        let n = file.write_at(0, self.as_bytes());
        debug_assert_eq!(n, DIRECTORY_FILE_SIZE);
    }

    /// 绕过打开文件层直接按文件头链取内容，供离线检查使用
    pub fn fetch_from_header(&mut self, device: &Arc<dyn BlockDevice>, header: &FileHeader) {
        let mut sector_buf = [0u8; SECTOR_SIZE];
        for (i, chunk) in self.as_bytes_mut().chunks_mut(SECTOR_SIZE).enumerate() {
            let sector = header.byte_to_sector(i * SECTOR_SIZE);
            device.read_sector(sector as usize, &mut sector_buf);
            chunk.copy_from_slice(&sector_buf[..chunk.len()]);
        }
    }

    /// 按名字查表，返回 (文件头扇区, 是否目录)
    pub fn find(&self, name: &str) -> Option<(u32, bool)> {
        self.table
            .iter()
            .find(|e| e.in_use() && e.name() == name)
            .map(|e| (e.sector, e.is_dir()))
    }

    pub fn add(&mut self, name: &str, sector: u32, is_dir: bool) -> Result<()> {
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        if self.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let slot = self
            .table
            .iter_mut()
            .find(|e| !e.in_use())
            .ok_or(FsError::DirectoryFull)?;

        slot.in_use = 1;
        slot.is_dir = is_dir as u8;
        slot.name = [0; FILE_NAME_MAX_LEN + 1];
        slot.name[..name.len()].copy_from_slice(name.as_bytes());
        slot.sector = sector;

        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        let slot = self
            .table
            .iter_mut()
            .find(|e| e.in_use() && e.name() == name)
            .ok_or(FsError::NotFound)?;
        *slot = DirectoryEntry::vacant();
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.table.iter().all(|e| !e.in_use())
    }

    pub fn names(&self) -> Vec<String> {
        self.table
            .iter()
            .filter(|e| e.in_use())
            .map(|e| e.name().to_owned())
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.table.iter().filter(|e| e.in_use())
    }
}

impl Directory {
    fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(&self.table).cast(), DIRECTORY_FILE_SIZE) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(ptr::from_mut(&mut self.table).cast(), DIRECTORY_FILE_SIZE)
        }
    }
}
