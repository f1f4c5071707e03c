//! # 文件系统门面
//!
//! 所有用户操作从这里进入：先保证调用线程有工作目录，再按
//! 目录锁 → 位图锁 → 文件表项锁的次序推进。位图锁横跨
//! find 与依赖它的文件头写回，两个并发创建不会分到同一扇区。
//!
//! 对外只报布尔或 `Option`；失败原因在转换处记日志。
//! 注意 `remove` 对打开中的文件报 `false`：名字已标墓碑，
//! 物理删除推迟到最后一次关闭，调用者应把这种 `false` 当作逻辑成功。

use std::sync::{Arc, Mutex};
use std::thread;

use enumflags2::{bitflags, BitFlags};
use log::{debug, info};

use crate::dir_table::DirectoryUseTable;
use crate::error::Result;
use crate::file_table::OpenFileTable;
use crate::layout::{Bitmap, Directory, FileHeader};
use crate::open_file::OpenFile;
use crate::path;
use crate::BlockDevice;
use crate::FsError;
use crate::{
    DIRECTORY_FILE_SIZE, DIRECTORY_SECTOR, FILE_NAME_MAX_LEN, FREE_MAP_FILE_SIZE, FREE_MAP_NAME,
    FREE_MAP_SECTOR, NUM_DIRECT, NUM_SECTORS, ROOT_NAME, SECTOR_SIZE,
};

/// 进程级共享核心：设备、两张表和位图锁。
///
/// 句柄各自持有一个 `Arc`，门面析构后尚存的句柄仍能完成收尾
/// （包括推迟的删除）。
pub(crate) struct FsCore {
    pub device: Arc<dyn BlockDevice>,
    pub open_files: OpenFileTable,
    pub dir_table: DirectoryUseTable,
    pub free_map_lock: Mutex<()>,
    /// 常驻的位图文件句柄；门面析构时取走以拆开引用环
    free_map_file: Mutex<Option<OpenFile>>,
}

/// `remove` 的两种成功收场
enum RemoveOutcome {
    /// 扇区已释放、目录项已摘除
    Removed,
    /// 文件还开着：墓碑已立，等最后一次关闭
    Deferred,
}

/// `check` 查出的各类不一致
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckViolation {
    /// 扇区号越界
    SectorOutOfRange,
    /// 同一扇区被标记两次
    SectorDoubleUsed,
    /// 同目录下名字重复
    RepeatedName,
    /// 文件名超长
    NameTooLong,
    /// 单头声称的扇区数超出直接槽
    TooManySectors,
    /// 位图文件头与固定布局不符
    BadMapHeader,
    /// 持久位图与可达集不一致
    BitmapMismatch,
}

pub struct ChainFileSystem {
    core: Arc<FsCore>,
}

impl ChainFileSystem {
    /// 格式化：写入空位图（扇区 0、1 预占）、空根目录及两者的文件头
    pub fn format(device: Arc<dyn BlockDevice>) -> Self {
        info!("formatting file system");
        let core = FsCore::new(device);

        let mut map = Bitmap::new();
        map.mark(FREE_MAP_SECTOR);
        map.mark(DIRECTORY_SECTOR);

        let mut map_header = FileHeader::new(FREE_MAP_SECTOR as u32);
        map_header
            .allocate(&mut map, FREE_MAP_FILE_SIZE)
            .expect("formatting: no room for free map");
        let mut root_header = FileHeader::new(DIRECTORY_SECTOR as u32);
        root_header
            .allocate(&mut map, DIRECTORY_FILE_SIZE)
            .expect("formatting: no room for root directory");

        // 先落头，随后的打开要从盘上取它们
        map_header.write_back(&core.device);
        root_header.write_back(&core.device);

        let map_file = OpenFile::new(&core, FREE_MAP_SECTOR as u32, FREE_MAP_NAME)
            .expect("free map cannot be tombstoned");
        map.write_back(&map_file);
        *core.free_map_file.lock().unwrap() = Some(map_file);

        let root = OpenFile::new(&core, DIRECTORY_SECTOR as u32, ROOT_NAME)
            .expect("root cannot be tombstoned");
        Directory::new().write_back(&root);
        drop(root);

        Self { core }
    }

    /// 挂载已格式化的磁盘：只需把位图文件重新打开
    pub fn mount(device: Arc<dyn BlockDevice>) -> Self {
        info!("mounting file system");
        let core = FsCore::new(device);

        let map_file = OpenFile::new(&core, FREE_MAP_SECTOR as u32, FREE_MAP_NAME)
            .expect("free map cannot be tombstoned");
        *core.free_map_file.lock().unwrap() = Some(map_file);

        Self { core }
    }

    /// 在工作目录下建文件，预留 `initial_size` 字节
    pub fn create(&self, name: &str, initial_size: usize) -> bool {
        match self.try_create(name, initial_size, false) {
            Ok(()) => true,
            Err(e) => {
                debug!("create {name}: {e}");
                false
            }
        }
    }

    /// 在工作目录下建子目录
    pub fn create_dir(&self, name: &str) -> bool {
        match self.try_create(name, DIRECTORY_FILE_SIZE, true) {
            Ok(()) => true,
            Err(e) => {
                debug!("create dir {name}: {e}");
                false
            }
        }
    }

    /// 打开工作目录下的名字；不存在或已标墓碑时返回 `None`
    pub fn open(&self, name: &str) -> Option<OpenFile> {
        match self.try_open(name) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!("open {name}: {e}");
                None
            }
        }
    }

    /// 删除工作目录下的文件。
    ///
    /// 文件尚有句柄时只立墓碑并返回 `false`；
    /// 名字随即对 `open` 不可见，扇区在最后一次关闭时释放。
    pub fn remove(&self, name: &str) -> bool {
        match self.try_remove(name) {
            Ok(RemoveOutcome::Removed) => true,
            Ok(RemoveOutcome::Deferred) => {
                debug!("remove {name}: still open, deferred to last close");
                false
            }
            Err(e) => {
                debug!("remove {name}: {e}");
                false
            }
        }
    }

    /// 删除工作目录下的空子目录
    pub fn remove_dir(&self, name: &str) -> bool {
        match self.try_remove_dir(name) {
            Ok(RemoveOutcome::Removed) => true,
            Ok(RemoveOutcome::Deferred) => {
                debug!("remove dir {name}: still open, deferred to last close");
                false
            }
            Err(e) => {
                debug!("remove dir {name}: {e}");
                false
            }
        }
    }

    /// 切换调用线程的工作目录；`path` 可为相对或绝对
    pub fn change_dir(&self, path: &str) -> bool {
        match self.try_change_dir(path) {
            Ok(()) => true,
            Err(e) => {
                debug!("change dir {path}: {e}");
                false
            }
        }
    }

    /// 列出工作目录下的名字
    pub fn list(&self) -> Vec<String> {
        let Some(cwd) = self.current_dir_entry() else {
            return Vec::new();
        };
        let _dir_guard = cwd.lock();
        let mut dir = Directory::new();
        dir.fetch_from(cwd.dir_file());
        dir.names()
    }

    /// 调用线程当前工作目录的绝对路径
    pub fn current_dir(&self) -> String {
        self.current_dir_entry()
            .map(|e| e.name().to_owned())
            .unwrap_or_else(|| ROOT_NAME.to_owned())
    }

    /// 调试：把两张表与空闲扇区数倒进日志
    pub fn print(&self) {
        for line in self.core.open_files.debug_dump() {
            debug!("open file  | {line}");
        }
        for line in self.core.dir_table.debug_dump() {
            debug!("dir in use | {line}");
        }
        debug!("free sectors: {}", self.free_sectors());
    }

    /// 当前空闲扇区数
    pub fn free_sectors(&self) -> usize {
        let _map_guard = self.core.free_map_lock.lock().unwrap();
        FsCore::load_free_map(&self.core).count_clear()
    }

    /// 调用线程放弃工作目录。线程退出前应当调用，
    /// 否则它的目录表项要等进程结束才消失。
    pub fn release_thread(&self) {
        self.core.dir_table.remove(thread::current().id());
    }

    /// 一致性检查通过与否；细节见 [`check_report`](Self::check_report)
    pub fn check(&self) -> bool {
        let report = self.check_report();
        if report.is_empty() {
            info!("file system check passed");
            true
        } else {
            info!("file system check failed: {report:?}");
            false
        }
    }

    /// 离线一致性检查：从根目录出发重建影子位图，
    /// 与持久位图逐位对照。应在无并发操作时调用。
    pub fn check_report(&self) -> BitFlags<CheckViolation> {
        let mut errs = BitFlags::empty();
        let mut shadow = Bitmap::new();
        shadow.mark(FREE_MAP_SECTOR);
        shadow.mark(DIRECTORY_SECTOR);

        let map_header = FileHeader::fetch_from(&self.core.device, FREE_MAP_SECTOR as u32);
        let raw = map_header.raw();
        if raw.num_bytes as usize != FREE_MAP_FILE_SIZE
            || raw.num_sectors as usize != FREE_MAP_FILE_SIZE.div_ceil(SECTOR_SIZE)
        {
            errs |= CheckViolation::BadMapHeader;
        }
        check_chain(&map_header, &mut shadow, &mut errs);

        let root_header = FileHeader::fetch_from(&self.core.device, DIRECTORY_SECTOR as u32);
        check_chain(&root_header, &mut shadow, &mut errs);

        self.check_directory(&root_header, &mut shadow, &mut errs);

        let _map_guard = self.core.free_map_lock.lock().unwrap();
        let map = FsCore::load_free_map(&self.core);
        for sector in 0..NUM_SECTORS {
            if map.test(sector) != shadow.test(sector) {
                debug!(
                    "check: sector {sector} marked={} reachable={}",
                    map.test(sector),
                    shadow.test(sector),
                );
                errs |= CheckViolation::BitmapMismatch;
            }
        }

        errs
    }
}

impl ChainFileSystem {
    fn current_dir_entry(&self) -> Option<Arc<crate::dir_table::DirectoryUseEntry>> {
        if self.core.dir_table.ensure(&self.core).is_err() {
            return None;
        }
        self.core.dir_table.get(thread::current().id())
    }

    fn try_create(&self, name: &str, size: usize, is_dir: bool) -> Result<()> {
        path::validate_name(name)?;
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        self.core.dir_table.ensure(&self.core)?;
        let cwd = self
            .core
            .dir_table
            .get(thread::current().id())
            .ok_or(FsError::NotFound)?;

        let _dir_guard = cwd.lock();
        debug!("create {} in {}, size {size}", name, cwd.name());

        let mut dir = Directory::new();
        dir.fetch_from(cwd.dir_file());
        if dir.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let sector = {
            let _map_guard = self.core.free_map_lock.lock().unwrap();
            let mut map = FsCore::load_free_map(&self.core);

            let sector = map.find().ok_or(FsError::NoSpace)? as u32;
            dir.add(name, sector, is_dir)?;

            let mut header = FileHeader::new(sector);
            if let Err(e) = header.allocate(&mut map, size) {
                // 撤销：把占到一半的链就地放回位图；此前没刷过盘，无需补偿
                header.deallocate(&mut map);
                return Err(e);
            }

            header.write_back(&self.core.device);
            FsCore::flush_free_map(&self.core, &map);
            sector
        };

        if is_dir {
            // 新目录先得到一张空表
            let abs = path::absolutize(cwd.name(), name)?;
            let new_dir = OpenFile::new(&self.core, sector, &abs).ok_or(FsError::NotFound)?;
            Directory::new().write_back(&new_dir);
        }

        dir.write_back(cwd.dir_file());
        Ok(())
    }

    fn try_open(&self, name: &str) -> Result<OpenFile> {
        path::validate_name(name)?;
        self.core.dir_table.ensure(&self.core)?;
        let cwd = self
            .core
            .dir_table
            .get(thread::current().id())
            .ok_or(FsError::NotFound)?;

        let (sector, _is_dir) = {
            let _dir_guard = cwd.lock();
            let mut dir = Directory::new();
            dir.fetch_from(cwd.dir_file());
            dir.find(name).ok_or(FsError::NotFound)?
        };

        let abs = path::absolutize(cwd.name(), name)?;
        // 墓碑在登记处拦下，视同不存在
        OpenFile::new(&self.core, sector, &abs).ok_or(FsError::NotFound)
    }

    fn try_remove(&self, name: &str) -> Result<RemoveOutcome> {
        path::validate_name(name)?;
        self.core.dir_table.ensure(&self.core)?;
        let cwd = self
            .core
            .dir_table
            .get(thread::current().id())
            .ok_or(FsError::NotFound)?;

        let _dir_guard = cwd.lock();
        let mut dir = Directory::new();
        dir.fetch_from(cwd.dir_file());
        let (sector, _is_dir) = dir.find(name).ok_or(FsError::NotFound)?;

        let abs = path::absolutize(cwd.name(), name)?;
        if self.core.open_files.mark_deleted(&abs) {
            return Ok(RemoveOutcome::Deferred);
        }

        debug!("remove {abs} from {}", cwd.name());
        FsCore::deallocate_file(&self.core, sector);
        dir.remove(name)?;
        dir.write_back(cwd.dir_file());
        Ok(RemoveOutcome::Removed)
    }

    fn try_remove_dir(&self, name: &str) -> Result<RemoveOutcome> {
        path::validate_name(name)?;
        self.core.dir_table.ensure(&self.core)?;
        let cwd = self
            .core
            .dir_table
            .get(thread::current().id())
            .ok_or(FsError::NotFound)?;

        {
            let _dir_guard = cwd.lock();
            let mut dir = Directory::new();
            dir.fetch_from(cwd.dir_file());

            let (sector, is_dir) = dir.find(name).ok_or(FsError::NotFound)?;
            if !is_dir {
                return Err(FsError::NotFound);
            }

            let abs = path::absolutize(cwd.name(), name)?;
            let target = OpenFile::new(&self.core, sector, &abs).ok_or(FsError::NotFound)?;
            let mut contents = Directory::new();
            contents.fetch_from(&target);
            if !contents.is_empty() {
                return Err(FsError::DirectoryNotEmpty);
            }
        }

        // 空目录核验过了，余下与删文件一样
        self.try_remove(name)
    }

    fn try_change_dir(&self, path_str: &str) -> Result<()> {
        self.core.dir_table.ensure(&self.core)?;
        let tid = thread::current().id();
        let cwd = self.core.dir_table.get(tid).ok_or(FsError::NotFound)?;

        let abs = path::absolutize(cwd.name(), path_str)?;
        if cwd.name() == abs {
            return Ok(());
        }
        drop(cwd);

        let (sector, is_dir) = FsCore::walk(&self.core, &abs)?;
        if !is_dir {
            return Err(FsError::NotFound);
        }

        debug!("change dir to {abs}");
        // 先挂新再摘旧：目标在行走后才被标墓碑的话，原工作目录不动
        self.core.dir_table.reattach(&self.core, tid, sector, &abs)
    }

    fn check_directory(
        &self,
        header: &FileHeader,
        shadow: &mut Bitmap,
        errs: &mut BitFlags<CheckViolation>,
    ) {
        let mut dir = Directory::new();
        dir.fetch_from_header(&self.core.device, header);

        let mut seen: Vec<String> = Vec::new();
        for entry in dir.entries() {
            let name = entry.name();
            if name.len() > FILE_NAME_MAX_LEN {
                *errs |= CheckViolation::NameTooLong;
            }
            if seen.iter().any(|n| n == name) {
                *errs |= CheckViolation::RepeatedName;
            } else {
                seen.push(name.to_owned());
            }

            // 自身扇区查重；撞上回环就不再深入
            if !check_sector(entry.sector() as usize, shadow, errs) {
                continue;
            }
            let child = FileHeader::fetch_from(&self.core.device, entry.sector());
            check_chain(&child, shadow, errs);
            if entry.is_dir() {
                self.check_directory(&child, shadow, errs);
            }
        }
    }
}

impl Drop for ChainFileSystem {
    fn drop(&mut self) {
        // 先清目录表再放位图句柄，拆掉经由常驻句柄的引用环
        self.core.dir_table.clear();
        let map_file = self.core.free_map_file.lock().unwrap().take();
        drop(map_file);
    }
}

impl FsCore {
    fn new(device: Arc<dyn BlockDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            open_files: OpenFileTable::new(),
            dir_table: DirectoryUseTable::new(),
            free_map_lock: Mutex::new(()),
            free_map_file: Mutex::new(None),
        })
    }

    /// 取持久位图。调用者须已持有位图锁。
    pub(crate) fn load_free_map(core: &Arc<FsCore>) -> Bitmap {
        let mut map = Bitmap::new();
        FsCore::with_free_map_file(core, |file| map.fetch_from(file));
        map
    }

    /// 把位图刷回盘。调用者须已持有位图锁。
    pub(crate) fn flush_free_map(core: &Arc<FsCore>, map: &Bitmap) {
        FsCore::with_free_map_file(core, |file| map.write_back(file));
    }

    fn with_free_map_file<R>(core: &Arc<FsCore>, f: impl FnOnce(&OpenFile) -> R) -> R {
        let guard = core.free_map_file.lock().unwrap();
        if let Some(file) = guard.as_ref() {
            return f(file);
        }
        drop(guard);

        // 门面已析构，句柄的收尾还在进行：临时补开一个
        let file = OpenFile::new(core, FREE_MAP_SECTOR as u32, FREE_MAP_NAME)
            .expect("free map cannot be tombstoned");
        f(&file)
    }

    /// 释放 `sector` 上整条文件头链及链首扇区本身
    pub(crate) fn deallocate_file(core: &Arc<FsCore>, sector: u32) {
        let _map_guard = core.free_map_lock.lock().unwrap();
        let mut map = FsCore::load_free_map(core);

        let mut header = FileHeader::fetch_from(&core.device, sector);
        header.deallocate(&mut map);
        map.clear(sector as usize);

        FsCore::flush_free_map(core, &map);
    }

    /// 从根出发逐段行走绝对路径，返回末段的（文件头扇区, 是否目录）。
    /// 每段父目录的内容按其在用目录锁取，没有在用表项时退回表锁。
    pub(crate) fn walk(core: &Arc<FsCore>, abs: &str) -> Result<(u32, bool)> {
        let mut sector = DIRECTORY_SECTOR as u32;
        let mut is_dir = true;
        let mut walked = String::from(ROOT_NAME);

        for seg in path::segments(abs)? {
            if !is_dir {
                return Err(FsError::NotFound);
            }

            let dir_file = OpenFile::new(core, sector, &walked).ok_or(FsError::NotFound)?;
            let mut dir = Directory::new();
            match core.dir_table.lock_for_path(&walked) {
                Some(entry) => {
                    let _dir_guard = entry.lock();
                    dir.fetch_from(&dir_file);
                }
                None => core.dir_table.with_list_lock(|| dir.fetch_from(&dir_file)),
            }
            drop(dir_file);

            let (next_sector, next_is_dir) = dir.find(seg).ok_or(FsError::NotFound)?;
            let child = if walked == ROOT_NAME {
                format!("/{seg}")
            } else {
                format!("{walked}/{seg}")
            };
            // 途中撞上墓碑视同不存在
            if core
                .open_files
                .find(&child)
                .is_some_and(|e| e.is_deleted())
            {
                return Err(FsError::NotFound);
            }

            sector = next_sector;
            is_dir = next_is_dir;
            walked = child;
        }

        Ok((sector, is_dir))
    }

    /// 最后一个句柄关闭时兑现墓碑：按绝对路径完成物理删除
    pub(crate) fn finish_deferred_remove(core: &Arc<FsCore>, abs: &str) {
        debug!("deferred remove {abs}");
        if let Err(e) = FsCore::remove_absolute(core, abs) {
            debug!("deferred remove {abs}: {e}");
        }
    }

    fn remove_absolute(core: &Arc<FsCore>, abs: &str) -> Result<()> {
        let (parent, name) = path::split_parent(abs)?;

        // 关闭与重开赛跑：名字又被打开的话，重新立墓碑再等下一次关闭
        if core.open_files.mark_deleted(abs) {
            return Ok(());
        }

        if let Some(entry) = core.dir_table.lock_for_path(parent) {
            let _dir_guard = entry.lock();
            let mut dir = Directory::new();
            dir.fetch_from(entry.dir_file());

            let (sector, _is_dir) = dir.find(name).ok_or(FsError::NotFound)?;
            FsCore::deallocate_file(core, sector);
            dir.remove(name)?;
            dir.write_back(entry.dir_file());
            return Ok(());
        }

        // 父目录无人使用：行走定位后在表锁内完成目录改动
        let (parent_sector, parent_is_dir) = FsCore::walk(core, parent)?;
        if !parent_is_dir {
            return Err(FsError::NotFound);
        }
        let parent_file = OpenFile::new(core, parent_sector, parent).ok_or(FsError::NotFound)?;

        let mut dir = Directory::new();
        let sector = core.dir_table.with_list_lock(|| -> Result<u32> {
            dir.fetch_from(&parent_file);
            let (sector, _is_dir) = dir.find(name).ok_or(FsError::NotFound)?;
            dir.remove(name)?;
            dir.write_back(&parent_file);
            Ok(sector)
        })?;

        FsCore::deallocate_file(core, sector);
        drop(parent_file);
        Ok(())
    }
}

/// 影子位图标记一个扇区；越界或重复标记记为不一致。
/// 返回该扇区此前是否未被标记。
fn check_sector(sector: usize, shadow: &mut Bitmap, errs: &mut BitFlags<CheckViolation>) -> bool {
    if sector >= NUM_SECTORS {
        *errs |= CheckViolation::SectorOutOfRange;
        return false;
    }
    if shadow.test(sector) {
        *errs |= CheckViolation::SectorDoubleUsed;
        return false;
    }
    shadow.mark(sector);
    true
}

/// 沿链检查一个文件：各头的数据扇区与后继头扇区逐个进影子位图
fn check_chain(header: &FileHeader, shadow: &mut Bitmap, errs: &mut BitFlags<CheckViolation>) {
    let mut link = Some(header);
    let mut first = true;
    while let Some(l) = link {
        if !first {
            check_sector(l.sector() as usize, shadow, errs);
        }
        first = false;

        let raw = l.raw();
        if raw.num_sectors as usize > NUM_DIRECT - 1 {
            *errs |= CheckViolation::TooManySectors;
        } else {
            for i in 0..raw.num_sectors as usize {
                check_sector(raw.data_sectors[i] as usize, shadow, errs);
            }
        }
        link = l.next();
    }
}
