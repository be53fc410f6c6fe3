// 时间序列子协议
//
// schedule 资源本身不带元素类型，元素类型由父资源的标量类型决定

use super::error::{TransactionError, TransactionResult};
use crate::graph::model::ResourcePath;
use crate::storage::ResourceGraph;
use crate::values::{SampledValue, TimeSeries, Value, ValueKind};

/// 无下界
pub const UNBOUNDED_START: i64 = i64::MIN;
/// 无上界
pub const UNBOUNDED_END: i64 = i64::MAX;

/// 由父资源推断 schedule 的元素类型
///
/// 父资源缺失、为虚拟资源或不是简单标量类型时推断失败
pub fn infer_value_kind(graph: &dyn ResourceGraph, schedule: &ResourcePath) -> TransactionResult<ValueKind> {
    let inference_error = |reason: String| TransactionError::ScheduleTypeInference {
        path: schedule.clone(),
        reason,
    };
    let parent = schedule
        .parent()
        .ok_or_else(|| inference_error("schedule has no parent resource".to_string()))?;
    let parent_type = graph
        .resource_type(&parent)
        .ok_or_else(|| inference_error(format!("parent resource {} does not exist", parent)))?;
    match parent_type.value_kind() {
        Some(kind) if kind.is_scalar() => Ok(kind),
        _ => Err(inference_error(format!(
            "parent type {} is not a simple scalar type",
            parent_type
        ))),
    }
}

/// 检查采样值类型是否与元素类型一致
pub fn validate_samples<'a>(
    schedule: &ResourcePath,
    kind: ValueKind,
    samples: impl IntoIterator<Item = &'a SampledValue>,
) -> TransactionResult<()> {
    for sample in samples {
        if sample.value.kind() != kind {
            return Err(TransactionError::type_mismatch(schedule, kind, sample.value.kind()));
        }
    }
    Ok(())
}

/// 推断元素类型并检查采样
pub fn check_samples<'a>(
    graph: &dyn ResourceGraph,
    schedule: &ResourcePath,
    samples: impl IntoIterator<Item = &'a SampledValue>,
) -> TransactionResult<ValueKind> {
    let kind = infer_value_kind(graph, schedule)?;
    validate_samples(schedule, kind, samples)?;
    Ok(kind)
}

/// 读取 schedule 的当前内容
pub fn read_series(graph: &dyn ResourceGraph, schedule: &ResourcePath) -> TransactionResult<TimeSeries> {
    match graph.get_value(schedule)? {
        Value::Schedule(series) => Ok(series),
        other => Err(TransactionError::type_mismatch(schedule, ValueKind::Schedule, other.kind())),
    }
}
