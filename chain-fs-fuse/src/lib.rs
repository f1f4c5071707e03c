#[cfg(test)]
mod tests;

mod syscall;
pub use syscall::Syscalls;

use std::fs::File;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::sync::Mutex;

use chain_fs::BlockDevice;
use chain_fs::{NUM_SECTORS, SECTOR_SIZE};

pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(file.read(buf).unwrap(), SECTOR_SIZE, "not a complete sector!");
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.write(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }
}

pub struct MemDisk(Mutex<Vec<u8>>);

impl MemDisk {
    pub fn new() -> Self {
        Self(Mutex::new(vec![0; NUM_SECTORS * SECTOR_SIZE]))
    }

    pub fn image(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Default for MemDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let data = self.0.lock().unwrap();
        buf.copy_from_slice(&data[sector * SECTOR_SIZE..][..SECTOR_SIZE]);
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        let mut data = self.0.lock().unwrap();
        data[sector * SECTOR_SIZE..][..SECTOR_SIZE].copy_from_slice(buf);
    }
}
