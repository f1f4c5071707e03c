//! # 工作目录表
//!
//! 进程级列表，记录每个活动线程的当前工作目录。
//! 同一目录的所有使用线程共享一个表项：一份打开的目录文件，
//! 加一把序列化目录内容改动的目录锁。
//!
//! 线程首次发起文件操作时隐式落户根目录；表项在最后一个线程
//! 离开时销毁，目录文件随之关闭。

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crate::cfs::FsCore;
use crate::error::Result;
use crate::open_file::OpenFile;
use crate::FsError;
use crate::{DIRECTORY_SECTOR, ROOT_NAME};

pub(crate) struct DirectoryUseTable {
    entries: Mutex<Vec<Arc<DirectoryUseEntry>>>,
}

pub(crate) struct DirectoryUseEntry {
    /// 以此目录为工作目录的线程
    threads: Mutex<Vec<ThreadId>>,
    dir_file: OpenFile,
    dir_lock: Mutex<()>,
}

impl DirectoryUseTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// 保证调用线程有工作目录；没有则落户根目录。幂等。
    pub fn ensure(&self, core: &Arc<FsCore>) -> Result<()> {
        let tid = thread::current().id();
        if self.get(tid).is_some() {
            return Ok(());
        }
        self.add(core, tid, DIRECTORY_SECTOR as u32, ROOT_NAME)
    }

    /// 线程 `tid` 的工作目录表项
    pub fn get(&self, tid: ThreadId) -> Option<Arc<DirectoryUseEntry>> {
        let entries = self.entries.lock().unwrap();
        entries.iter().find(|e| e.has(tid)).cloned()
    }

    /// 把 `tid` 挂到绝对路径 `name` 的目录表项上；没有就开目录建项
    pub fn add(&self, core: &Arc<FsCore>, tid: ThreadId, sector: u32, name: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        debug_assert!(!entries.iter().any(|e| e.has(tid)));

        if let Some(entry) = entries.iter().find(|e| e.dir_file.name() == name) {
            entry.append(tid);
            return Ok(());
        }

        let dir_file = OpenFile::new(core, sector, name).ok_or(FsError::NotFound)?;
        entries.push(Arc::new(DirectoryUseEntry {
            threads: Mutex::new(vec![tid]),
            dir_file,
            dir_lock: Mutex::new(()),
        }));
        Ok(())
    }

    /// 把 `tid` 从其表项摘下；最后一个线程离开时销毁表项
    pub fn remove(&self, tid: ThreadId) {
        let orphan;
        {
            let mut entries = self.entries.lock().unwrap();
            let Some(pos) = entries.iter().position(|e| e.has(tid)) else {
                return;
            };
            if !entries[pos].detach(tid) {
                return;
            }
            orphan = entries.swap_remove(pos);
        }
        // 目录文件在表锁之外关闭：它可能背着墓碑，关闭会触发推迟删除
        drop(orphan);
    }

    /// 把 `tid` 迁到绝对路径 `name` 的目录表项上。
    /// 先做可能失败的开目录一步，开不成（目标刚被标墓碑）时
    /// 原依附原样保留；成功后才摘旧挂新。
    pub fn reattach(
        &self,
        core: &Arc<FsCore>,
        tid: ThreadId,
        sector: u32,
        name: &str,
    ) -> Result<()> {
        let orphan;
        {
            let mut entries = self.entries.lock().unwrap();

            let opened = if entries.iter().any(|e| e.dir_file.name() == name) {
                None
            } else {
                Some(OpenFile::new(core, sector, name).ok_or(FsError::NotFound)?)
            };

            let mut old = None;
            if let Some(pos) = entries.iter().position(|e| e.has(tid)) {
                if entries[pos].detach(tid) {
                    old = Some(entries.swap_remove(pos));
                }
            }

            match opened {
                Some(dir_file) => entries.push(Arc::new(DirectoryUseEntry {
                    threads: Mutex::new(vec![tid]),
                    dir_file,
                    dir_lock: Mutex::new(()),
                })),
                None => {
                    let entry = entries
                        .iter()
                        .find(|e| e.dir_file.name() == name)
                        .expect("reattach target vanished under the list lock");
                    entry.append(tid);
                }
            }

            orphan = old;
        }
        // 旧目录文件在表锁之外关闭：它可能背着墓碑，关闭会触发推迟删除
        drop(orphan);
        Ok(())
    }

    /// 按绝对路径找目录锁（遍历全表）。
    /// 没有线程以该目录为工作目录时返回 `None`，调用者退回表锁。
    pub fn lock_for_path(&self, name: &str) -> Option<Arc<DirectoryUseEntry>> {
        let entries = self.entries.lock().unwrap();
        entries.iter().find(|e| e.dir_file.name() == name).cloned()
    }

    /// 借表锁掩护做一次短暂的目录读取，供没有表项的目录用
    pub fn with_list_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _entries = self.entries.lock().unwrap();
        f()
    }

    /// 清空全表（门面析构时调用），目录文件逐个在锁外关闭
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain(..).collect()
        };
        drop(drained);
    }

    pub fn debug_dump(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .map(|e| {
                let threads = e.threads.lock().unwrap();
                format!("{}: {} thread(s)", e.dir_file.name(), threads.len())
            })
            .collect()
    }
}

impl DirectoryUseEntry {
    #[inline]
    pub fn dir_file(&self) -> &OpenFile {
        &self.dir_file
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.dir_file.name()
    }

    /// 目录内容改动要在这把锁内进行
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.dir_lock.lock().unwrap()
    }

    fn has(&self, tid: ThreadId) -> bool {
        self.threads.lock().unwrap().contains(&tid)
    }

    fn append(&self, tid: ThreadId) {
        self.threads.lock().unwrap().push(tid);
    }

    /// 摘下 `tid`，返回表项是否已无人使用
    fn detach(&self, tid: ThreadId) -> bool {
        let mut threads = self.threads.lock().unwrap();
        threads.retain(|&t| t != tid);
        threads.is_empty()
    }
}
