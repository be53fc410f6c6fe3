// 事务结果句柄
//
// 读类动作在入队时返回句柄，提交执行后句柄中才有结果

use super::error::{TransactionError, TransactionResult};
use crate::graph::model::{AccessMode, AccessPriority};
use crate::values::{ResourceValue, Value};
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// 读类动作的执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// 资源值，资源不可读时为 None
    Value(Option<Value>),
    /// 存在性、激活状态、访问模式请求是否被满足
    Flag(bool),
    AccessMode(AccessMode),
    AccessPriority(AccessPriority),
}

pub(crate) type ResultSlot = Arc<Mutex<Option<ReadOutcome>>>;

pub(crate) fn new_slot() -> ResultSlot {
    Arc::new(Mutex::new(None))
}

pub(crate) fn resolve(slot: &ResultSlot, outcome: ReadOutcome) {
    *slot.lock() = Some(outcome);
}

/// 可以从执行结果中取出的类型
pub trait FutureValue: Sized {
    fn from_outcome(outcome: ReadOutcome) -> Option<Self>;
}

impl<V: ResourceValue> FutureValue for Option<V> {
    fn from_outcome(outcome: ReadOutcome) -> Option<Self> {
        match outcome {
            ReadOutcome::Value(None) => Some(None),
            ReadOutcome::Value(Some(value)) => V::from_value(value).map(Some),
            _ => None,
        }
    }
}

impl FutureValue for bool {
    fn from_outcome(outcome: ReadOutcome) -> Option<Self> {
        match outcome {
            ReadOutcome::Flag(flag) => Some(flag),
            _ => None,
        }
    }
}

impl FutureValue for AccessMode {
    fn from_outcome(outcome: ReadOutcome) -> Option<Self> {
        match outcome {
            ReadOutcome::AccessMode(mode) => Some(mode),
            _ => None,
        }
    }
}

impl FutureValue for AccessPriority {
    fn from_outcome(outcome: ReadOutcome) -> Option<Self> {
        match outcome {
            ReadOutcome::AccessPriority(priority) => Some(priority),
            _ => None,
        }
    }
}

/// 事务结果句柄
///
/// 提交前或对应动作未被执行时，`value()` 返回 `NotExecuted`
pub struct TransactionFuture<T> {
    slot: ResultSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FutureValue> TransactionFuture<T> {
    pub(crate) fn new(slot: ResultSlot) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// 对应动作是否已经执行
    pub fn is_done(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn value(&self) -> TransactionResult<T> {
        let outcome = self.slot.lock().clone().ok_or(TransactionError::NotExecuted)?;
        let description = format!("{:?}", outcome);
        T::from_outcome(outcome)
            .ok_or_else(|| TransactionError::InvalidState(format!("unexpected transaction result {}", description)))
    }
}

impl<T> Clone for TransactionFuture<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TransactionFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionFuture").field("result", &*self.slot.lock()).finish()
    }
}
