// 锁管理模块
//
// 两个粗粒度锁域：结构锁（创建、删除、激活、引用）和值锁（资源内容）。
// 获取顺序固定为先结构后值，释放顺序相反。

use crate::storage::ResourceGraph;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// 锁模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// 读锁（共享锁）
    Read,
    /// 写锁（排他锁）
    Write,
}

impl LockMode {
    pub fn from_write(write: bool) -> Self {
        if write {
            LockMode::Write
        } else {
            LockMode::Read
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "READ"),
            LockMode::Write => write!(f, "WRITE"),
        }
    }
}

/// 单个锁域的守卫，离开作用域时释放
pub enum DomainGuard<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

impl DomainGuard<'_> {
    pub fn mode(&self) -> LockMode {
        match self {
            DomainGuard::Read(_) => LockMode::Read,
            DomainGuard::Write(_) => LockMode::Write,
        }
    }
}

impl fmt::Debug for DomainGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainGuard({})", self.mode())
    }
}

/// 同时持有的两个锁域
///
/// 字段按声明顺序析构：先释放值锁，再释放结构锁。
#[derive(Debug)]
pub struct LockedDomains<'a> {
    value: DomainGuard<'a>,
    structure: DomainGuard<'a>,
}

impl LockedDomains<'_> {
    pub fn structure_mode(&self) -> LockMode {
        self.structure.mode()
    }

    pub fn value_mode(&self) -> LockMode {
        self.value.mode()
    }
}

/// 写括号
///
/// 打开时调用资源图的 `start_transaction`，析构时调用 `finish_transaction`
pub struct WriteBracket<'a> {
    graph: &'a dyn ResourceGraph,
}

impl Drop for WriteBracket<'_> {
    fn drop(&mut self) {
        self.graph.finish_transaction();
        trace!("write bracket closed");
    }
}

#[derive(Debug, Default)]
struct LockCounters {
    structure_read: AtomicU64,
    structure_write: AtomicU64,
    value_read: AtomicU64,
    value_write: AtomicU64,
    brackets: AtomicU64,
}

/// 锁统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    pub structure_read: u64,
    pub structure_write: u64,
    pub value_read: u64,
    pub value_write: u64,
    pub brackets: u64,
}

/// 锁管理器
///
/// 整个资源图只有两把锁，没有超时：持锁者阻塞时，
/// 需要同一锁域的事务也会一直等待。
#[derive(Debug, Default)]
pub struct GraphLocks {
    structure: RwLock<()>,
    value: RwLock<()>,
    counters: LockCounters,
}

impl GraphLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_structure(&self, mode: LockMode) -> DomainGuard<'_> {
        trace!(%mode, "acquiring structure lock");
        match mode {
            LockMode::Read => {
                let guard = self.structure.read();
                self.counters.structure_read.fetch_add(1, Ordering::Relaxed);
                DomainGuard::Read(guard)
            }
            LockMode::Write => {
                let guard = self.structure.write();
                self.counters.structure_write.fetch_add(1, Ordering::Relaxed);
                DomainGuard::Write(guard)
            }
        }
    }

    pub fn lock_value(&self, mode: LockMode) -> DomainGuard<'_> {
        trace!(%mode, "acquiring value lock");
        match mode {
            LockMode::Read => {
                let guard = self.value.read();
                self.counters.value_read.fetch_add(1, Ordering::Relaxed);
                DomainGuard::Read(guard)
            }
            LockMode::Write => {
                let guard = self.value.write();
                self.counters.value_write.fetch_add(1, Ordering::Relaxed);
                DomainGuard::Write(guard)
            }
        }
    }

    /// 按固定顺序获取两个锁域
    pub fn lock_domains(&self, structure: LockMode, value: LockMode) -> LockedDomains<'_> {
        let structure = self.lock_structure(structure);
        let value = self.lock_value(value);
        LockedDomains { value, structure }
    }

    pub fn write_bracket<'a>(&self, graph: &'a dyn ResourceGraph) -> WriteBracket<'a> {
        graph.start_transaction();
        self.counters.brackets.fetch_add(1, Ordering::Relaxed);
        trace!("write bracket opened");
        WriteBracket { graph }
    }

    pub fn is_structure_write_locked(&self) -> bool {
        self.structure.is_locked_exclusive()
    }

    pub fn is_value_write_locked(&self) -> bool {
        self.value.is_locked_exclusive()
    }

    pub fn is_locked(&self) -> bool {
        self.structure.is_locked() || self.value.is_locked()
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            structure_read: self.counters.structure_read.load(Ordering::Relaxed),
            structure_write: self.counters.structure_write.load(Ordering::Relaxed),
            value_read: self.counters.value_read.load(Ordering::Relaxed),
            value_write: self.counters.value_write.load(Ordering::Relaxed),
            brackets: self.counters.brackets.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.structure_read.store(0, Ordering::Relaxed);
        self.counters.structure_write.store(0, Ordering::Relaxed);
        self.counters.value_read.store(0, Ordering::Relaxed);
        self.counters.value_write.store(0, Ordering::Relaxed);
        self.counters.brackets.store(0, Ordering::Relaxed);
    }
}
