//! # 打开文件表
//!
//! 进程级注册表，以**绝对路径**为键。每个表项记录在读、在写的线程数，
//! 并持有一把可查询持有者的表项锁和 `can_read` 条件变量，
//! 读写协议（见 `open_file`）全靠它们会合。
//!
//! 表项还承载 `deleted` 墓碑：文件在打开期间被删除时，名字先在这里
//! 标记，物理释放推迟到最后一个句柄关闭。

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

pub(crate) struct OpenFileTable {
    entries: Mutex<Vec<Arc<OpenFileEntry>>>,
}

pub(crate) struct OpenFileEntry {
    name: String,
    state: Mutex<EntryState>,
    /// 表项锁的让渡队列
    lock_free: Condvar,
    /// 写者在此等读者退净
    can_read: Condvar,
}

#[derive(Default)]
struct EntryState {
    /// 表项锁当前持有者；写者在整个临界区内持有
    holder: Option<ThreadId>,
    /// 指向本表项的存活句柄数
    ref_count: u32,
    readers: u32,
    writers: u32,
    waiting_readers: u32,
    waiting_writers: u32,
    /// 墓碑：已请求删除，等最后一次关闭
    deleted: bool,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// 登记一次打开；路径已标墓碑时拒绝
    pub fn add(&self, name: &str) -> Option<Arc<OpenFileEntry>> {
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.iter().find(|e| e.name == name) {
            let mut st = entry.state.lock().unwrap();
            if st.deleted {
                return None;
            }
            st.ref_count += 1;
            return Some(Arc::clone(entry));
        }

        let entry = Arc::new(OpenFileEntry {
            name: name.to_owned(),
            state: Mutex::new(EntryState {
                ref_count: 1,
                ..EntryState::default()
            }),
            lock_free: Condvar::new(),
            can_read: Condvar::new(),
        });
        entries.push(Arc::clone(&entry));
        Some(entry)
    }

    pub fn find(&self, name: &str) -> Option<Arc<OpenFileEntry>> {
        let entries = self.entries.lock().unwrap();
        entries.iter().find(|e| e.name == name).cloned()
    }

    /// 注销一次打开。引用数归零时表项消失；
    /// 若其上有墓碑，返回 `true`，调用者须随即完成物理删除。
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();

        let Some(pos) = entries.iter().position(|e| e.name == name) else {
            debug_assert!(false, "closing unregistered file {name}");
            return false;
        };

        let mut st = entries[pos].state.lock().unwrap();
        debug_assert!(st.ref_count >= 1);
        st.ref_count -= 1;
        if st.ref_count > 0 {
            return false;
        }
        let deleted = st.deleted;
        drop(st);

        entries.swap_remove(pos);
        deleted
    }

    /// 给已打开的路径标墓碑；无表项时返回 `false`
    pub fn mark_deleted(&self, name: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.iter().find(|e| e.name == name) {
            Some(entry) => {
                entry.state.lock().unwrap().deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn debug_dump(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .map(|e| {
                let st = e.state.lock().unwrap();
                format!(
                    "{}: refs={} readers={} writers={} waiting={}r/{}w{}",
                    e.name,
                    st.ref_count,
                    st.readers,
                    st.writers,
                    st.waiting_readers,
                    st.waiting_writers,
                    if st.deleted { " deleted" } else { "" },
                )
            })
            .collect()
    }
}

impl OpenFileEntry {
    pub fn is_deleted(&self) -> bool {
        self.state.lock().unwrap().deleted
    }

    /// 表项锁是否已被当前线程持有。
    /// 写者临界区内发起的嵌套读靠它识别自己，跳过读者协议。
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().unwrap().holder == Some(thread::current().id())
    }

    /// 读者入场：表项锁掩护下把在读数加一，随即放锁。
    /// 调用者须先用 [`is_held_by_current_thread`](Self::is_held_by_current_thread)
    /// 识别写中嵌套读，那种读不进协议。
    pub fn begin_read(&self) {
        let mut st = self.state.lock().unwrap();
        debug_assert_ne!(st.holder, Some(thread::current().id()));

        st.waiting_readers += 1;
        while st.holder.is_some() {
            st = self.lock_free.wait(st).unwrap();
        }
        st.waiting_readers -= 1;

        debug_assert_eq!(st.writers, 0);
        st.readers += 1;
        self.lock_free.notify_one();
    }

    /// 读者退场：在读数归零时叫醒等待的写者
    pub fn end_read(&self) {
        let mut st = self.state.lock().unwrap();

        while st.holder.is_some() {
            st = self.lock_free.wait(st).unwrap();
        }
        st.readers -= 1;
        if st.readers == 0 {
            self.can_read.notify_all();
        }
        self.lock_free.notify_one();
    }

    /// 写者入场：拿下表项锁并等在读者退净；
    /// 返回后当前线程独占该文件直到 [`end_write`](Self::end_write)。
    pub fn begin_write(&self) {
        let me = thread::current().id();
        let mut st = self.state.lock().unwrap();
        debug_assert_ne!(st.holder, Some(me), "nested write on {}", self.name);

        st.waiting_writers += 1;
        while st.holder.is_some() {
            st = self.lock_free.wait(st).unwrap();
        }
        st.holder = Some(me);

        while st.readers > 0 {
            // 放开表项锁等读者退净，醒来后重新竞争
            st.holder = None;
            self.lock_free.notify_one();
            st = self.can_read.wait(st).unwrap();
            while st.holder.is_some() {
                st = self.lock_free.wait(st).unwrap();
            }
            st.holder = Some(me);
        }
        st.waiting_writers -= 1;

        debug_assert_eq!(st.writers, 0);
        st.writers = 1;
    }

    /// 写者退场
    pub fn end_write(&self) {
        let mut st = self.state.lock().unwrap();
        debug_assert_eq!(st.holder, Some(thread::current().id()));
        debug_assert_eq!(st.writers, 1);

        st.writers = 0;
        st.holder = None;
        self.can_read.notify_one();
        self.lock_free.notify_one();
    }
}
