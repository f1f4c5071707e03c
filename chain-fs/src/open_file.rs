//! # 打开文件层
//!
//! 一次打开对应一个 [`OpenFile`]：持有内存中的文件头链、一个游标，
//! 以及与打开文件表会合用的绝对路径名。
//!
//! 读写都以扇区为粒度落盘：读把覆盖区间整扇区取回再截取；
//! 写先把首末两个未对齐扇区读回，拼好后整扇区写出。
//! 越过文件尾的写会先就地扩展链尾，容量用尽则再挂一个文件头。

use std::sync::{Arc, Mutex};

use log::debug;

use crate::cfs::FsCore;
use crate::file_table::OpenFileEntry;
use crate::layout::FileHeader;
use crate::SECTOR_SIZE;

pub struct OpenFile {
    core: Arc<FsCore>,
    entry: Arc<OpenFileEntry>,
    /// 内存中的文件头链；链首的扇区号也记在里面
    header: Mutex<FileHeader>,
    /// 绝对路径，兼作打开文件表的键
    name: String,
    seek: usize,
}

impl OpenFile {
    /// 打开 `sector` 上的文件头链并在打开文件表登记；
    /// 该路径已标墓碑时返回 `None`
    pub(crate) fn new(core: &Arc<FsCore>, sector: u32, name: &str) -> Option<Self> {
        let entry = core.open_files.add(name)?;
        debug!("open {name} (header sector {sector})");

        Some(Self {
            core: Arc::clone(core),
            entry,
            header: Mutex::new(FileHeader::fetch_from(&core.device, sector)),
            name: name.to_owned(),
            seek: 0,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 文件总字节数
    pub fn length(&self) -> usize {
        self.header.lock().unwrap().file_length()
    }

    /// 文件头链的节数
    pub fn chain_links(&self) -> usize {
        self.header.lock().unwrap().link_count()
    }

    /// 移动游标；允许指向文件尾之后，届时读写返回 0
    pub fn seek(&mut self, position: usize) {
        self.seek = position;
    }

    /// 自游标处读，游标随实读字节数前移
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.read_at(self.seek, buf);
        self.seek += n;
        n
    }

    /// 自游标处写，游标随实写字节数前移
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.write_at(self.seek, buf);
        self.seek += n;
        n
    }

    /// 从 `offset` 读至多 `buf.len()` 字节，返回实读数；不动游标。
    ///
    /// 同一文件的读者可以并行；有写者在场时在表项上等它退出。
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        // 写者临界区内的嵌套读（补取首末扇区）不进协议
        let nested = self.entry.is_held_by_current_thread();
        if !nested {
            self.entry.begin_read();
        }
        let n = self.read_at_inner(offset, buf);
        if !nested {
            self.entry.end_read();
        }
        n
    }

    /// 从 `offset` 写 `buf`，返回实写字节数；不动游标。
    ///
    /// 越过文件尾的部分触发扩展；扩展失败整个写返回 0。
    /// `offset` 超过文件尾时写不进任何字节。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.entry.begin_write();
        let n = self.write_at_inner(offset, buf);
        self.entry.end_write();
        n
    }
}

impl OpenFile {
    fn read_at_inner(&self, offset: usize, buf: &mut [u8]) -> usize {
        let (n, first, sectors) = {
            let header = self.header.lock().unwrap();
            let file_length = header.file_length();
            if buf.is_empty() || offset >= file_length {
                return 0;
            }

            let n = buf.len().min(file_length - offset);
            let first = offset / SECTOR_SIZE;
            let last = (offset + n - 1) / SECTOR_SIZE;
            let sectors: Vec<u32> = (first..=last)
                .map(|i| header.byte_to_sector(i * SECTOR_SIZE))
                .collect();
            (n, first, sectors)
        };

        // 覆盖区间整扇区取回，再截出所要的片段
        let mut scratch = vec![0u8; sectors.len() * SECTOR_SIZE];
        for (i, &sector) in sectors.iter().enumerate() {
            self.core
                .device
                .read_sector(sector as usize, &mut scratch[i * SECTOR_SIZE..][..SECTOR_SIZE]);
        }

        let start = offset - first * SECTOR_SIZE;
        buf[..n].copy_from_slice(&scratch[start..start + n]);
        n
    }

    fn write_at_inner(&self, offset: usize, buf: &[u8]) -> usize {
        let file_length = self.header.lock().unwrap().file_length();
        if buf.is_empty() || offset > file_length {
            return 0;
        }

        let n = buf.len();
        let first = offset / SECTOR_SIZE;
        let last = (offset + n - 1) / SECTOR_SIZE;

        if offset + n > file_length && !self.extend(offset + n - file_length) {
            return 0;
        }

        let mut scratch = vec![0u8; (last - first + 1) * SECTOR_SIZE];
        let first_aligned = offset == first * SECTOR_SIZE;
        let last_aligned = offset + n == (last + 1) * SECTOR_SIZE;

        // 首末扇区若被部分改写，先读回原有内容
        if !first_aligned {
            self.read_at(first * SECTOR_SIZE, &mut scratch[..SECTOR_SIZE]);
        }
        if !last_aligned && (first != last || first_aligned) {
            let off = (last - first) * SECTOR_SIZE;
            self.read_at(last * SECTOR_SIZE, &mut scratch[off..off + SECTOR_SIZE]);
        }

        scratch[offset - first * SECTOR_SIZE..][..n].copy_from_slice(buf);

        let sectors: Vec<u32> = {
            let header = self.header.lock().unwrap();
            (first..=last)
                .map(|i| header.byte_to_sector(i * SECTOR_SIZE))
                .collect()
        };
        for (i, &sector) in sectors.iter().enumerate() {
            self.core
                .device
                .write_sector(sector as usize, &scratch[i * SECTOR_SIZE..][..SECTOR_SIZE]);
        }

        n
    }

    /// 文件尾扩展 `grow` 字节：先填满链尾头，余量另起新头接上。
    /// 成功后链尾头与位图都已落盘。
    fn extend(&self, grow: usize) -> bool {
        let _map_guard = self.core.free_map_lock.lock().unwrap();
        let mut map = FsCore::load_free_map(&self.core);

        let mut header = self.header.lock().unwrap();
        let tail = header.tail_mut();
        // 失败时位图不落盘，链尾头也要退回原样，内存才与磁盘一致
        let saved = tail.raw().clone();

        if tail.update_raw(&mut map, grow).is_err() {
            debug!("extend {}: no free sectors", self.name);
            return false;
        }

        let grown = (tail.raw().num_bytes - saved.num_bytes) as usize;
        let leftover = grow - grown;
        if leftover > 0 {
            let Some(next_sector) = map.find() else {
                debug!("extend {}: no sector for next header", self.name);
                tail.restore_raw(saved);
                return false;
            };
            let mut next = Box::new(FileHeader::new(next_sector as u32));
            if next.allocate(&mut map, leftover).is_err() {
                debug!("extend {}: no free sectors for chained header", self.name);
                tail.restore_raw(saved);
                return false;
            }
            tail.set_next(next);
        }

        tail.write_back(&self.core.device);
        drop(header);

        FsCore::flush_free_map(&self.core, &map);
        true
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        debug!("close {}", self.name);
        let deferred = self.core.open_files.remove(&self.name);
        if deferred {
            // 最后一个句柄撞上墓碑：在这里完成推迟的删除
            FsCore::finish_deferred_remove(&self.core, &self.name);
        }
    }
}
