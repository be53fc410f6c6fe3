// 资源类型分类
//
// 把资源的运行时类型映射到批量事务使用的类型桶：
// 5 个标量桶、6 个数组桶、1 个时间序列桶，其余为复合资源

use super::error::{TransactionError, TransactionResult};
use crate::graph::model::ResourceType;
use crate::values::ValueKind;
use std::fmt;

/// 类型桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// 携带值的资源，按值类型区分
    Value(ValueKind),
    /// 复合资源，只登记路径
    Complex,
}

impl Bucket {
    /// 该桶能否存放给定类型的值
    pub fn accepts(&self, kind: ValueKind) -> bool {
        matches!(self, Bucket::Value(k) if *k == kind)
    }

    pub fn value_kind(&self) -> Option<ValueKind> {
        match self {
            Bucket::Value(kind) => Some(*kind),
            Bucket::Complex => None,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Bucket::Complex)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Value(kind) => write!(f, "{}", kind),
            Bucket::Complex => write!(f, "Complex"),
        }
    }
}

/// 分类资源类型
///
/// 未识别的标量或数组子类型是分类失败，不会被当作复合资源静默接受
pub fn classify(resource_type: &ResourceType) -> TransactionResult<Bucket> {
    match resource_type {
        ResourceType::Complex(_) => Ok(Bucket::Complex),
        ResourceType::OtherSimple(_) | ResourceType::OtherArray(_) => {
            Err(TransactionError::UnsupportedType(resource_type.clone()))
        }
        other => other
            .value_kind()
            .map(Bucket::Value)
            .ok_or_else(|| TransactionError::UnsupportedType(other.clone())),
    }
}
