// 资源事务模块
//
// 提供两种事务引擎：
// - 动作队列事务：按顺序提交原子动作，失败时逆序回滚
// - 批量快照事务：预先登记资源，整体读取/写入/激活
//
// 两者共用同一个锁管理器和资源类型分类。

pub mod action;
pub mod classifier;
pub mod error;
pub mod future;
pub mod locks;
pub mod schedule;
pub mod snapshot;
pub mod transaction;

pub use action::{ActionKind, ActionState, AtomicAction, Operation};
pub use classifier::{classify, Bucket};
pub use error::{
    OperationFailure, RollbackEntry, RollbackReport, RollbackStatus, TransactionError, TransactionResult,
};
pub use future::{FutureValue, ReadOutcome, TransactionFuture};
pub use locks::{DomainGuard, GraphLocks, LockMode, LockStats, LockedDomains, WriteBracket};
pub use snapshot::{BatchTransaction, RwPair};
pub use transaction::{ResourceTransaction, TransactionState};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// 写入配置：目标资源为虚拟或未激活时如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteConfiguration {
    /// 资源不存在或未激活时事务失败
    Fail,
    /// 资源不存在或未激活时跳过该动作
    Ignore,
    /// 资源不存在时创建，不改变激活状态
    Create,
    /// 资源不存在时创建，写入后激活
    CreateAndActivate,
}

impl WriteConfiguration {
    /// 该配置是否可能改变图结构
    pub fn may_change_structure(&self) -> bool {
        matches!(self, WriteConfiguration::Create | WriteConfiguration::CreateAndActivate)
    }
}

impl Default for WriteConfiguration {
    fn default() -> Self {
        Self::CreateAndActivate
    }
}

/// 读取配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadConfiguration {
    /// 资源不存在或未激活时事务失败
    Fail,
    /// 资源不存在或未激活时返回空值
    ReturnNull,
    /// 未激活的资源照常读取，不存在时返回空值
    Ignore,
}

impl Default for ReadConfiguration {
    fn default() -> Self {
        Self::Fail
    }
}

/// 事务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// 未显式指定时使用的写入配置
    pub default_write: WriteConfiguration,
    /// 未显式指定时使用的读取配置
    pub default_read: ReadConfiguration,
    /// 是否逐个记录执行的动作
    pub log_actions: bool,
    /// 提交写操作时是否打开写括号（合并变更通知）
    pub write_bracket: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_write: WriteConfiguration::default(),
            default_read: ReadConfiguration::default(),
            log_actions: true,
            write_bracket: true,
        }
    }
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_write(mut self, config: WriteConfiguration) -> Self {
        self.default_write = config;
        self
    }

    pub fn with_default_read(mut self, config: ReadConfiguration) -> Self {
        self.default_read = config;
        self
    }

    pub fn with_action_logging(mut self, enable: bool) -> Self {
        self.log_actions = enable;
        self
    }

    pub fn with_write_bracket(mut self, enable: bool) -> Self {
        self.write_bracket = enable;
        self
    }

    pub fn from_json_str(json: &str) -> TransactionResult<Self> {
        serde_json::from_str(json).map_err(|e| TransactionError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> TransactionResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| TransactionError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> TransactionResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| TransactionError::Config(e.to_string()))
    }
}
