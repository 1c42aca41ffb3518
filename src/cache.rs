use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, warn};

/// 目录列表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// 文件系统中的真实名称，用于拼接链接
    pub file_name: String,
    /// 页面上显示的名称。目录为大写加 `/`，文件保持原样
    pub label: String,
    pub is_dir: bool,
}

pub type Listing = Arc<Vec<ListingEntry>>;

/// 目录列表缓存：绝对目录路径 -> 排好序的条目列表。
///
/// 条目在第一次被请求时填充，此后不会自动刷新，只能通过 `invalidate`/`clear` 显式清除。
/// 读操作共享读锁。每个目录有自己的填充锁，同一目录同一时刻只有一个线程在扫描并写入，
/// 因此两个线程同时请求同一个未缓存目录时只会扫描一次，读到的总是完整的列表；
/// 不同目录的首次扫描互不等待。
#[derive(Default)]
pub struct DirectoryCache {
    entries: RwLock<HashMap<PathBuf, Listing>>,
    fill_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    // 查询缓存
    pub fn find(&self, dir: &Path) -> Option<Listing> {
        let entries = match self.entries.read() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("目录缓存读锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        };
        entries.get(dir).cloned()
    }

    /// 返回目录列表，未命中时扫描目录并写入缓存。
    pub fn get_or_scan(&self, dir: &Path) -> io::Result<Listing> {
        if let Some(listing) = self.find(dir) {
            debug!("目录缓存命中：{}", dir.display());
            return Ok(listing);
        }

        let lock = self.fill_lock_for(dir);
        let result = self.fill(dir, &lock);
        self.release_fill_lock(dir, &lock);
        result
    }

    fn fill(&self, dir: &Path, lock: &Mutex<()>) -> io::Result<Listing> {
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("目录缓存填充锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        };
        // 等锁期间可能已经有其他线程填充完毕
        if let Some(listing) = self.find(dir) {
            return Ok(listing);
        }

        debug!("目录缓存未命中，扫描目录：{}", dir.display());
        let listing: Listing = Arc::new(scan_dir(dir)?);
        let mut entries = match self.entries.write() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("目录缓存写锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        };
        entries.insert(dir.to_path_buf(), Arc::clone(&listing));
        Ok(listing)
    }

    fn fill_locks(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Mutex<()>>>> {
        match self.fill_locks.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fill_lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.fill_locks().entry(dir.to_path_buf()).or_default())
    }

    // 没有其他线程在等待这个目录时移除它的填充锁
    fn release_fill_lock(&self, dir: &Path, lock: &Arc<Mutex<()>>) {
        let mut locks = self.fill_locks();
        let idle = locks
            .get(dir)
            .map_or(false, |current| Arc::ptr_eq(current, lock) && Arc::strong_count(current) <= 2);
        if idle {
            locks.remove(dir);
        }
    }

    /// 丢弃某个目录的缓存条目，返回该条目之前是否存在
    pub fn invalidate(&self, dir: &Path) -> bool {
        match self.entries.write() {
            Ok(mut lock) => lock.remove(dir).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(dir).is_some(),
        }
    }

    pub fn clear(&self) {
        match self.entries.write() {
            Ok(mut lock) => lock.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(lock) => lock.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 读取目录：目录在前（名称转大写并以 `/` 结尾），文件在后，两组各自按字母序排序。
fn scan_dir(dir: &Path) -> io::Result<Vec<ListingEntry>> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        // 跟随符号链接判断类型，与直接访问该路径时的分类保持一致
        let is_dir = entry.path().is_dir();
        if is_dir {
            dirs.push(ListingEntry {
                label: format!("{}/", file_name.to_uppercase()),
                file_name,
                is_dir,
            });
        } else {
            files.push(ListingEntry {
                label: file_name.clone(),
                file_name,
                is_dir,
            });
        }
    }
    dirs.sort_by(|a, b| a.label.cmp(&b.label));
    files.sort_by(|a, b| a.label.cmp(&b.label));
    dirs.extend(files);
    Ok(dirs)
}
