//! System-call shaped wrapper over the file system: descriptors in,
//! `0`/`fd`/byte counts out, `-1` on any error.

use std::sync::Mutex;

use chain_fs::{ChainFileSystem, FsError, OpenFile};
use log::debug;

pub struct Syscalls {
    fs: ChainFileSystem,
    files: Mutex<Vec<Option<OpenFile>>>,
}

impl Syscalls {
    pub fn new(fs: ChainFileSystem) -> Self {
        Self {
            fs,
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn fs(&self) -> &ChainFileSystem {
        &self.fs
    }

    pub fn create(&self, name: &str, size: usize) -> isize {
        if self.fs.create(name, size) {
            0
        } else {
            -1
        }
    }

    pub fn open(&self, name: &str) -> isize {
        let Some(file) = self.fs.open(name) else {
            return -1;
        };

        let mut files = self.files.lock().unwrap();
        match files.iter().position(Option::is_none) {
            Some(fd) => {
                files[fd] = Some(file);
                fd as isize
            }
            None => {
                files.push(Some(file));
                (files.len() - 1) as isize
            }
        }
    }

    pub fn close(&self, fd: isize) -> isize {
        let mut files = self.files.lock().unwrap();
        match usize::try_from(fd).ok().and_then(|fd| {
            files.get_mut(fd).and_then(Option::take)
        }) {
            Some(_file) => 0,
            None => {
                debug!("close {fd}: {}", FsError::BadDescriptor);
                -1
            }
        }
    }

    pub fn read(&self, fd: isize, buf: &mut [u8]) -> isize {
        let mut files = self.files.lock().unwrap();
        match usize::try_from(fd)
            .ok()
            .and_then(|fd| files.get_mut(fd))
            .and_then(Option::as_mut)
        {
            Some(file) => file.read(buf) as isize,
            None => {
                debug!("read {fd}: {}", FsError::BadDescriptor);
                -1
            }
        }
    }

    pub fn write(&self, fd: isize, buf: &[u8]) -> isize {
        let mut files = self.files.lock().unwrap();
        match usize::try_from(fd)
            .ok()
            .and_then(|fd| files.get_mut(fd))
            .and_then(Option::as_mut)
        {
            Some(file) => file.write(buf) as isize,
            None => {
                debug!("write {fd}: {}", FsError::BadDescriptor);
                -1
            }
        }
    }

    pub fn remove(&self, name: &str) -> isize {
        if self.fs.remove(name) {
            0
        } else {
            -1
        }
    }

    pub fn create_dir(&self, name: &str) -> isize {
        if self.fs.create_dir(name) {
            0
        } else {
            -1
        }
    }

    pub fn change_dir(&self, path: &str) -> isize {
        if self.fs.change_dir(path) {
            0
        } else {
            -1
        }
    }

    pub fn remove_dir(&self, name: &str) -> isize {
        if self.fs.remove_dir(name) {
            0
        } else {
            -1
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.fs.list()
    }
}
