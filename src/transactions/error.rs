// 事务错误类型
//
// 包括提交失败时附带的回滚报告

use super::action::ActionKind;
use crate::graph::model::{PathError, ResourcePath, ResourceType};
use crate::storage::GraphError;
use crate::values::ValueKind;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransactionError {
    /// 批量事务中访问了未登记的资源
    #[error("resource {0} has not been registered with the transaction")]
    NoSuchResource(ResourcePath),
    /// 资源不存在
    #[error("resource {0} is virtual")]
    VirtualResource(ResourcePath),
    #[error("resource {0} is inactive")]
    InactiveResource(ResourcePath),
    #[error("transaction has been committed already")]
    AlreadyCommitted,
    #[error("cannot handle resource type {0}")]
    UnsupportedType(ResourceType),
    #[error("cannot determine element type of schedule {path}: {reason}")]
    ScheduleTypeInference { path: ResourcePath, reason: String },
    #[error("type mismatch at {path}: expected {expected}, found {actual}")]
    TypeMismatch {
        path: ResourcePath,
        expected: String,
        actual: String,
    },
    #[error("access mode {requested:?} on {path} was not granted")]
    AccessModeRejected {
        path: ResourcePath,
        requested: crate::graph::model::AccessMode,
    },
    /// 结果句柄对应的动作尚未执行
    #[error("transaction result is not available: action has not been executed")]
    NotExecuted,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    OperationFailed(Box<OperationFailure>),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl TransactionError {
    pub(crate) fn type_mismatch(path: &ResourcePath, expected: ValueKind, actual: impl fmt::Display) -> Self {
        TransactionError::TypeMismatch {
            path: path.clone(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// 提交失败时的详细信息
    pub fn operation_failure(&self) -> Option<&OperationFailure> {
        match self {
            TransactionError::OperationFailed(failure) => Some(failure.as_ref()),
            _ => None,
        }
    }
}

pub type TransactionResult<T> = Result<T, TransactionError>;

/// 单个动作的回滚结果
#[derive(Debug)]
pub struct RollbackEntry {
    /// 动作在队列中的位置
    pub index: usize,
    pub kind: ActionKind,
    pub resource: ResourcePath,
    pub error: Option<TransactionError>,
}

impl RollbackEntry {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// 回滚完成程度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStatus {
    Full,
    Partial,
    NotAchieved,
}

/// 回滚报告
///
/// 回滚是尽力而为的：失败的步骤被记录后继续处理下一个动作。
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// 按处理顺序（即队列逆序）排列
    pub entries: Vec<RollbackEntry>,
    /// 失败动作撤销自身部分效果时的错误
    pub compensation_error: Option<TransactionError>,
}

impl RollbackReport {
    pub fn status(&self) -> RollbackStatus {
        let failed = self.entries.iter().filter(|e| !e.succeeded()).count()
            + usize::from(self.compensation_error.is_some());
        let total = self.entries.len() + 1;
        if failed == 0 {
            RollbackStatus::Full
        } else if failed == total {
            RollbackStatus::NotAchieved
        } else {
            RollbackStatus::Partial
        }
    }

    /// 已回滚动作的队列位置
    pub fn rolled_back_indices(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.index).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RollbackEntry> + '_ {
        self.entries.iter().filter(|e| !e.succeeded())
    }
}

/// 提交失败
#[derive(Debug)]
pub struct OperationFailure {
    /// 失败动作的类型
    pub kind: ActionKind,
    /// 失败动作的目标资源
    pub resource: ResourcePath,
    pub cause: TransactionError,
    pub rollback: RollbackReport,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transaction failed at {} on {}: {} (rollback {:?})",
            self.kind,
            self.resource,
            self.cause,
            self.rollback.status()
        )
    }
}

impl std::error::Error for OperationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
