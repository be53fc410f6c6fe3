// 动作队列事务
//
// 按加入顺序收集原子动作，提交时一次性获取锁并依次执行；
// 任一动作失败时，以系统权限逆序回滚已执行的动作。

use super::action::{AtomicAction, Operation};
use super::classifier::classify;
use super::error::{OperationFailure, RollbackEntry, RollbackReport, TransactionError, TransactionResult};
use super::future::{new_slot, FutureValue, ResultSlot, TransactionFuture};
use super::locks::{GraphLocks, LockMode};
use super::schedule::{UNBOUNDED_END, UNBOUNDED_START};
use super::{ReadConfiguration, TransactionConfig, WriteConfiguration};
use crate::graph::model::{AccessMode, AccessPriority, ResourceRef};
use crate::storage::{Authority, ResourceGraph};
use crate::values::{ResourceValue, SampledValue, TimeSeries, ValueKind};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// 事务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 正在加入动作
    Building,
    /// 提交中
    Committing,
    /// 全部动作执行成功
    Committed,
    /// 有动作失败，已回滚
    RolledBack,
}

/// 动作队列事务
///
/// 由单个调用者构建，`commit()` 只能调用一次。
pub struct ResourceTransaction {
    graph: Arc<dyn ResourceGraph>,
    locks: Arc<GraphLocks>,
    authority: Authority,
    config: TransactionConfig,
    pending: VecDeque<AtomicAction>,
    needs_structure_write: bool,
    needs_value_write: bool,
    state: TransactionState,
}

macro_rules! typed_accessors {
    ($($ty:ty => $set:ident, $set_with:ident, $get:ident, $get_with:ident;)*) => {
        $(
            pub fn $set(&mut self, resource: &ResourceRef, value: $ty) -> TransactionResult<()> {
                let config = self.config.default_write;
                self.set(resource, value, config)
            }

            pub fn $set_with(
                &mut self,
                resource: &ResourceRef,
                value: $ty,
                config: WriteConfiguration,
            ) -> TransactionResult<()> {
                self.set(resource, value, config)
            }

            pub fn $get(&mut self, resource: &ResourceRef) -> TransactionResult<TransactionFuture<Option<$ty>>> {
                let config = self.config.default_read;
                self.get(resource, config)
            }

            pub fn $get_with(
                &mut self,
                resource: &ResourceRef,
                config: ReadConfiguration,
            ) -> TransactionResult<TransactionFuture<Option<$ty>>> {
                self.get(resource, config)
            }
        )*
    };
}

impl ResourceTransaction {
    pub fn new(
        graph: Arc<dyn ResourceGraph>,
        locks: Arc<GraphLocks>,
        app_id: &str,
        config: TransactionConfig,
    ) -> Self {
        Self {
            graph,
            locks,
            authority: Authority::application(app_id),
            config,
            pending: VecDeque::new(),
            needs_structure_write: false,
            needs_value_write: false,
            state: TransactionState::Building,
        }
    }

    pub fn app_id(&self) -> &str {
        self.authority.app_id().unwrap_or_default()
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 提交时需要的 (结构锁, 值锁) 模式
    pub fn requires_locks(&self) -> (LockMode, LockMode) {
        (
            LockMode::from_write(self.needs_structure_write),
            LockMode::from_write(self.needs_value_write),
        )
    }

    fn ensure_building(&self) -> TransactionResult<()> {
        if self.state == TransactionState::Building {
            Ok(())
        } else {
            Err(TransactionError::AlreadyCommitted)
        }
    }

    fn push(&mut self, resource: &ResourceRef, op: Operation) -> TransactionResult<()> {
        self.ensure_building()?;
        let action = AtomicAction::new(resource.clone(), op);
        self.needs_structure_write |= action.requires_structure_write();
        self.needs_value_write |= action.requires_value_write();
        self.pending.push_back(action);
        Ok(())
    }

    fn push_query<T>(
        &mut self,
        resource: &ResourceRef,
        op: impl FnOnce(ResultSlot) -> Operation,
    ) -> TransactionResult<TransactionFuture<T>>
    where
        T: FutureValue,
    {
        let slot = new_slot();
        self.push(resource, op(Arc::clone(&slot)))?;
        Ok(TransactionFuture::new(slot))
    }

    /// 资源声明的类型必须能存放该类型的值
    fn check_value_type(resource: &ResourceRef, kind: ValueKind) -> TransactionResult<()> {
        let bucket = classify(&resource.resource_type)?;
        if bucket.accepts(kind) {
            Ok(())
        } else {
            Err(TransactionError::type_mismatch(&resource.path, kind, &resource.resource_type))
        }
    }

    // ========== 值读写 ==========

    pub fn set<T: ResourceValue>(
        &mut self,
        resource: &ResourceRef,
        value: T,
        config: WriteConfiguration,
    ) -> TransactionResult<()> {
        self.ensure_building()?;
        Self::check_value_type(resource, T::KIND)?;
        self.push(
            resource,
            Operation::Write {
                value: value.into_value(),
                config,
            },
        )
    }

    pub fn get<T: ResourceValue>(
        &mut self,
        resource: &ResourceRef,
        config: ReadConfiguration,
    ) -> TransactionResult<TransactionFuture<Option<T>>> {
        self.ensure_building()?;
        Self::check_value_type(resource, T::KIND)?;
        self.push_query(resource, |slot| Operation::Read { config, slot })
    }

    typed_accessors! {
        bool => set_boolean, set_boolean_with, get_boolean, get_boolean_with;
        f32 => set_float, set_float_with, get_float, get_float_with;
        i32 => set_integer, set_integer_with, get_integer, get_integer_with;
        String => set_string, set_string_with, get_string, get_string_with;
        i64 => set_time, set_time_with, get_time, get_time_with;
        Vec<u8> => set_byte_array, set_byte_array_with, get_byte_array, get_byte_array_with;
        Vec<bool> => set_boolean_array, set_boolean_array_with, get_boolean_array, get_boolean_array_with;
        Vec<f32> => set_float_array, set_float_array_with, get_float_array, get_float_array_with;
        Vec<i32> => set_integer_array, set_integer_array_with, get_integer_array, get_integer_array_with;
        Vec<String> => set_string_array, set_string_array_with, get_string_array, get_string_array_with;
        Vec<i64> => set_time_array, set_time_array_with, get_time_array, get_time_array_with;
    }

    // ========== 时间序列 ==========

    /// 用给定采样替换整个序列
    pub fn set_schedule(&mut self, resource: &ResourceRef, values: Vec<SampledValue>) -> TransactionResult<()> {
        let config = self.config.default_write;
        self.set_schedule_with(resource, values, config)
    }

    pub fn set_schedule_with(
        &mut self,
        resource: &ResourceRef,
        values: Vec<SampledValue>,
        config: WriteConfiguration,
    ) -> TransactionResult<()> {
        self.set(resource, TimeSeries::from_values(values), config)
    }

    /// 合并采样，同时间戳覆盖
    pub fn add_schedule_values(&mut self, resource: &ResourceRef, values: Vec<SampledValue>) -> TransactionResult<()> {
        let config = self.config.default_write;
        self.add_schedule_values_with(resource, values, config)
    }

    pub fn add_schedule_values_with(
        &mut self,
        resource: &ResourceRef,
        values: Vec<SampledValue>,
        config: WriteConfiguration,
    ) -> TransactionResult<()> {
        self.ensure_building()?;
        Self::check_value_type(resource, ValueKind::Schedule)?;
        self.push(resource, Operation::ScheduleAdd { values, config })
    }

    /// 清空 `[start, end]` 后写入给定采样
    pub fn replace_schedule_values(
        &mut self,
        resource: &ResourceRef,
        start: i64,
        end: i64,
        values: Vec<SampledValue>,
    ) -> TransactionResult<()> {
        let config = self.config.default_write;
        self.replace_schedule_values_with(resource, start, end, values, config)
    }

    pub fn replace_schedule_values_with(
        &mut self,
        resource: &ResourceRef,
        start: i64,
        end: i64,
        values: Vec<SampledValue>,
        config: WriteConfiguration,
    ) -> TransactionResult<()> {
        self.ensure_building()?;
        Self::check_value_type(resource, ValueKind::Schedule)?;
        self.push(
            resource,
            Operation::ScheduleReplace {
                values,
                start,
                end,
                config,
            },
        )
    }

    pub fn get_schedule(&mut self, resource: &ResourceRef) -> TransactionResult<TransactionFuture<Option<TimeSeries>>> {
        let config = self.config.default_read;
        self.get_schedule_range(resource, UNBOUNDED_START, UNBOUNDED_END, config)
    }

    pub fn get_schedule_range(
        &mut self,
        resource: &ResourceRef,
        start: i64,
        end: i64,
        config: ReadConfiguration,
    ) -> TransactionResult<TransactionFuture<Option<TimeSeries>>> {
        self.ensure_building()?;
        Self::check_value_type(resource, ValueKind::Schedule)?;
        self.push_query(resource, |slot| Operation::ScheduleRead {
            start,
            end,
            config,
            slot,
        })
    }

    // ========== 结构操作 ==========

    pub fn create(&mut self, resource: &ResourceRef) -> TransactionResult<()> {
        self.push(resource, Operation::Create)
    }

    pub fn delete(&mut self, resource: &ResourceRef) -> TransactionResult<()> {
        self.push(resource, Operation::Delete)
    }

    pub fn activate(&mut self, resource: &ResourceRef, recursive: bool, create_if_missing: bool) -> TransactionResult<()> {
        self.push(
            resource,
            Operation::Activate {
                recursive,
                create_if_missing,
            },
        )
    }

    pub fn deactivate(&mut self, resource: &ResourceRef, recursive: bool) -> TransactionResult<()> {
        self.push(resource, Operation::Deactivate { recursive })
    }

    /// 把 resource 设为指向 target 的引用，两者声明的类型必须一致
    pub fn set_as_reference(&mut self, resource: &ResourceRef, target: &ResourceRef) -> TransactionResult<()> {
        self.ensure_building()?;
        if resource.resource_type != target.resource_type {
            return Err(TransactionError::TypeMismatch {
                path: resource.path.clone(),
                expected: resource.resource_type.to_string(),
                actual: target.resource_type.to_string(),
            });
        }
        self.push(
            resource,
            Operation::SetReference {
                target: target.path.clone(),
            },
        )
    }

    // ========== 访问模式与状态查询 ==========

    /// 返回的句柄表示请求的模式是否被满足
    pub fn request_access_mode(
        &mut self,
        resource: &ResourceRef,
        mode: AccessMode,
        priority: AccessPriority,
        fail_on_reject: bool,
    ) -> TransactionResult<TransactionFuture<bool>> {
        self.push_query(resource, |slot| Operation::RequestAccessMode {
            mode,
            priority,
            fail_on_reject,
            slot,
        })
    }

    pub fn get_access_mode(&mut self, resource: &ResourceRef) -> TransactionResult<TransactionFuture<AccessMode>> {
        self.push_query(resource, |slot| Operation::ReadAccessMode { slot })
    }

    pub fn get_access_priority(&mut self, resource: &ResourceRef) -> TransactionResult<TransactionFuture<AccessPriority>> {
        self.push_query(resource, |slot| Operation::ReadAccessPriority { slot })
    }

    pub fn is_active(&mut self, resource: &ResourceRef) -> TransactionResult<TransactionFuture<bool>> {
        self.push_query(resource, |slot| Operation::ReadActive { slot })
    }

    pub fn exists(&mut self, resource: &ResourceRef) -> TransactionResult<TransactionFuture<bool>> {
        self.push_query(resource, |slot| Operation::ReadExists { slot })
    }

    // ========== 提交 ==========

    /// 提交事务
    ///
    /// 先获取结构锁再获取值锁，按加入顺序执行动作。第一个失败的动作
    /// 先撤销自身的部分效果，随后已执行的动作以系统权限逆序回滚；
    /// 回滚步骤失败只记录日志并继续。返回的 `OperationFailed` 附带回滚报告。
    pub fn commit(&mut self) -> TransactionResult<()> {
        self.ensure_building()?;
        self.state = TransactionState::Committing;

        let (structure, value) = self.requires_locks();
        let locks = Arc::clone(&self.locks);
        let graph = Arc::clone(&self.graph);
        let _held = locks.lock_domains(structure, value);
        let writes = structure == LockMode::Write || value == LockMode::Write;
        let _bracket = (writes && self.config.write_bracket).then(|| locks.write_bracket(graph.as_ref()));

        debug!(
            app = %self.authority,
            actions = self.pending.len(),
            %structure,
            %value,
            "committing transaction"
        );

        let mut done: Vec<(usize, AtomicAction)> = Vec::with_capacity(self.pending.len());
        let mut index = 0;
        while let Some(mut action) = self.pending.pop_front() {
            match action.execute(graph.as_ref(), &self.authority) {
                Ok(()) => {
                    if self.config.log_actions {
                        debug!(index, kind = %action.kind(), resource = %action.resource().path, "executed");
                    }
                    done.push((index, action));
                }
                Err(cause) => {
                    warn!(
                        app = %self.authority,
                        index,
                        kind = %action.kind(),
                        resource = %action.resource().path,
                        error = %cause,
                        "action failed, rolling back transaction"
                    );
                    let failure = Self::roll_back(graph.as_ref(), action, cause, done);
                    self.pending.clear();
                    self.state = TransactionState::RolledBack;
                    return Err(TransactionError::OperationFailed(Box::new(failure)));
                }
            }
            index += 1;
        }

        self.state = TransactionState::Committed;
        Ok(())
    }

    fn roll_back(
        graph: &dyn ResourceGraph,
        mut failed: AtomicAction,
        cause: TransactionError,
        done: Vec<(usize, AtomicAction)>,
    ) -> OperationFailure {
        let mut report = RollbackReport::default();
        if let Err(e) = failed.compensate(graph) {
            warn!(
                kind = %failed.kind(),
                resource = %failed.resource().path,
                error = %e,
                "could not undo partial effects of failed action"
            );
            report.compensation_error = Some(e);
        }

        for (index, mut action) in done.into_iter().rev() {
            let error = action.rollback(graph).err();
            match &error {
                Some(e) => warn!(
                    index,
                    kind = %action.kind(),
                    resource = %action.resource().path,
                    error = %e,
                    "rollback failed, continuing with the next action"
                ),
                None => debug!(index, kind = %action.kind(), resource = %action.resource().path, "rolled back"),
            }
            report.entries.push(RollbackEntry {
                index,
                kind: action.kind(),
                resource: action.resource().path.clone(),
                error,
            });
        }

        OperationFailure {
            kind: failed.kind(),
            resource: failed.resource().path.clone(),
            cause,
            rollback: report,
        }
    }
}

impl std::fmt::Debug for ResourceTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTransaction")
            .field("authority", &self.authority)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("needs_structure_write", &self.needs_structure_write)
            .field("needs_value_write", &self.needs_value_write)
            .finish()
    }
}
