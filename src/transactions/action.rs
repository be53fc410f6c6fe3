// 原子动作
//
// 事务队列中的最小工作单元：一个操作作用于一个资源。
// 执行过程中逐步记录撤销日志，回滚时逆序重放。

use super::error::{TransactionError, TransactionResult};
use super::future::{resolve, ReadOutcome, ResultSlot};
use super::schedule;
use super::{ReadConfiguration, WriteConfiguration};
use crate::graph::model::{AccessMode, AccessPriority, ResourcePath, ResourceRef};
use crate::storage::{AccessGrant, Authority, ResourceGraph, SubtreeSnapshot};
use crate::values::{SampledValue, Value};
use std::fmt;
use tracing::trace;

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Read,
    Write,
    Create,
    Delete,
    Activate,
    Deactivate,
    SetReference,
    RequestAccessMode,
    ReadAccessMode,
    ReadAccessPriority,
    ReadActive,
    ReadExists,
    ScheduleAdd,
    ScheduleReplace,
    ScheduleRead,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 动作的操作及其参数
pub enum Operation {
    Read {
        config: ReadConfiguration,
        slot: ResultSlot,
    },
    Write {
        value: Value,
        config: WriteConfiguration,
    },
    Create,
    Delete,
    Activate {
        recursive: bool,
        create_if_missing: bool,
    },
    Deactivate {
        recursive: bool,
    },
    SetReference {
        target: ResourcePath,
    },
    RequestAccessMode {
        mode: AccessMode,
        priority: AccessPriority,
        fail_on_reject: bool,
        slot: ResultSlot,
    },
    ReadAccessMode {
        slot: ResultSlot,
    },
    ReadAccessPriority {
        slot: ResultSlot,
    },
    ReadActive {
        slot: ResultSlot,
    },
    ReadExists {
        slot: ResultSlot,
    },
    ScheduleAdd {
        values: Vec<SampledValue>,
        config: WriteConfiguration,
    },
    ScheduleReplace {
        values: Vec<SampledValue>,
        start: i64,
        end: i64,
        config: WriteConfiguration,
    },
    ScheduleRead {
        start: i64,
        end: i64,
        config: ReadConfiguration,
        slot: ResultSlot,
    },
}

impl Operation {
    pub fn kind(&self) -> ActionKind {
        match self {
            Operation::Read { .. } => ActionKind::Read,
            Operation::Write { .. } => ActionKind::Write,
            Operation::Create => ActionKind::Create,
            Operation::Delete => ActionKind::Delete,
            Operation::Activate { .. } => ActionKind::Activate,
            Operation::Deactivate { .. } => ActionKind::Deactivate,
            Operation::SetReference { .. } => ActionKind::SetReference,
            Operation::RequestAccessMode { .. } => ActionKind::RequestAccessMode,
            Operation::ReadAccessMode { .. } => ActionKind::ReadAccessMode,
            Operation::ReadAccessPriority { .. } => ActionKind::ReadAccessPriority,
            Operation::ReadActive { .. } => ActionKind::ReadActive,
            Operation::ReadExists { .. } => ActionKind::ReadExists,
            Operation::ScheduleAdd { .. } => ActionKind::ScheduleAdd,
            Operation::ScheduleReplace { .. } => ActionKind::ScheduleReplace,
            Operation::ScheduleRead { .. } => ActionKind::ScheduleRead,
        }
    }

    /// 提交时是否需要结构写锁
    pub fn requires_structure_write(&self) -> bool {
        match self {
            Operation::Write { config, .. }
            | Operation::ScheduleAdd { config, .. }
            | Operation::ScheduleReplace { config, .. } => config.may_change_structure(),
            Operation::Create
            | Operation::Delete
            | Operation::Activate { .. }
            | Operation::Deactivate { .. }
            | Operation::SetReference { .. } => true,
            _ => false,
        }
    }

    /// 提交时是否需要值写锁
    pub fn requires_value_write(&self) -> bool {
        matches!(
            self,
            Operation::Write { .. }
                | Operation::ScheduleAdd { .. }
                | Operation::ScheduleReplace { .. }
                | Operation::Delete
                | Operation::RequestAccessMode { .. }
        )
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write { value, config } => f
                .debug_struct("Write")
                .field("kind", &value.kind())
                .field("config", config)
                .finish(),
            Operation::Activate {
                recursive,
                create_if_missing,
            } => f
                .debug_struct("Activate")
                .field("recursive", recursive)
                .field("create_if_missing", create_if_missing)
                .finish(),
            Operation::SetReference { target } => f.debug_struct("SetReference").field("target", target).finish(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// 动作状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    Executed,
    Failed,
    RolledBack,
}

/// 撤销日志条目
#[derive(Debug)]
enum Undo {
    /// 恢复旧值
    RestoreValue { path: ResourcePath, value: Value },
    /// 删除新建的资源或引用
    Remove(ResourcePath),
    /// 恢复被删除的子树
    Restore(SubtreeSnapshot),
    /// 恢复被改变的激活状态
    SetActive(Vec<(ResourcePath, bool)>),
    /// 恢复应用原先的访问请求
    RestoreGrant {
        path: ResourcePath,
        app: String,
        grant: Option<AccessGrant>,
    },
}

impl Undo {
    fn apply(self, graph: &dyn ResourceGraph, auth: &Authority) -> TransactionResult<()> {
        match self {
            Undo::RestoreValue { path, value } => graph.set_value(&path, value, auth)?,
            Undo::Remove(path) => {
                if graph.exists(&path) {
                    graph.delete(&path, auth)?;
                }
            }
            Undo::Restore(snapshot) => graph.restore_subtree(&snapshot, auth)?,
            Undo::SetActive(flags) => {
                for (path, active) in flags {
                    if active {
                        graph.activate(&path, false, auth)?;
                    } else {
                        graph.deactivate(&path, false, auth)?;
                    }
                }
            }
            Undo::RestoreGrant { path, app, grant } => graph.set_access_grant(&path, &app, grant, auth)?,
        }
        Ok(())
    }
}

/// 原子动作
///
/// `execute` 至多调用一次；`rollback` 至多调用一次，且只能在执行成功之后。
/// 执行失败的动作由 `compensate` 撤销自身已产生的部分效果。
#[derive(Debug)]
pub struct AtomicAction {
    resource: ResourceRef,
    op: Operation,
    state: ActionState,
    undo: Vec<Undo>,
}

impl AtomicAction {
    pub fn new(resource: ResourceRef, op: Operation) -> Self {
        Self {
            resource,
            op,
            state: ActionState::Pending,
            undo: Vec::new(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.op.kind()
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn operation(&self) -> &Operation {
        &self.op
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn requires_structure_write(&self) -> bool {
        self.op.requires_structure_write()
    }

    pub fn requires_value_write(&self) -> bool {
        self.op.requires_value_write()
    }

    /// 以给定权限执行
    pub fn execute(&mut self, graph: &dyn ResourceGraph, auth: &Authority) -> TransactionResult<()> {
        if self.state != ActionState::Pending {
            return Err(TransactionError::InvalidState(format!(
                "{} on {} cannot be executed in state {:?}",
                self.kind(),
                self.resource.path,
                self.state
            )));
        }
        let result = self.run(graph, auth);
        self.state = if result.is_ok() {
            ActionState::Executed
        } else {
            ActionState::Failed
        };
        result
    }

    /// 以系统权限撤销已执行的动作
    pub fn rollback(&mut self, graph: &dyn ResourceGraph) -> TransactionResult<()> {
        if self.state != ActionState::Executed {
            return Err(TransactionError::InvalidState(format!(
                "{} on {} cannot be rolled back in state {:?}",
                self.kind(),
                self.resource.path,
                self.state
            )));
        }
        self.state = ActionState::RolledBack;
        self.replay_undo(graph)
    }

    /// 撤销执行失败的动作已产生的部分效果
    pub fn compensate(&mut self, graph: &dyn ResourceGraph) -> TransactionResult<()> {
        if self.state != ActionState::Failed {
            return Err(TransactionError::InvalidState(format!(
                "{} on {} has not failed",
                self.kind(),
                self.resource.path
            )));
        }
        self.replay_undo(graph)
    }

    /// 逆序重放撤销日志，单步失败不中断，返回第一个错误
    fn replay_undo(&mut self, graph: &dyn ResourceGraph) -> TransactionResult<()> {
        let mut first_error = None;
        for step in std::mem::take(&mut self.undo).into_iter().rev() {
            trace!(resource = %self.resource.path, step = ?step, "undo");
            if let Err(e) = step.apply(graph, &Authority::System) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn run(&mut self, graph: &dyn ResourceGraph, auth: &Authority) -> TransactionResult<()> {
        let Self { resource, op, undo, .. } = self;
        let path = &resource.path;
        match op {
            Operation::Read { config, slot } => {
                let value = if readable(graph, path, *config)? {
                    Some(graph.get_value(path)?)
                } else {
                    None
                };
                resolve(slot, ReadOutcome::Value(value));
            }
            Operation::Write { value, config } => {
                if let Value::Schedule(series) = value {
                    schedule::check_samples(graph, path, series.values())?;
                }
                if prepare_write(graph, resource, *config, auth, undo)? {
                    let previous = graph.get_value(path)?;
                    graph.set_value(path, value.clone(), auth)?;
                    undo.push(Undo::RestoreValue {
                        path: path.clone(),
                        value: previous,
                    });
                    finish_write(graph, path, *config, auth, undo)?;
                }
            }
            Operation::ScheduleAdd { values, config } => {
                schedule::check_samples(graph, path, values.iter())?;
                if prepare_write(graph, resource, *config, auth, undo)? {
                    let previous = schedule::read_series(graph, path)?;
                    let mut series = previous.clone();
                    series.add_values(values.iter().cloned());
                    graph.set_value(path, Value::Schedule(series), auth)?;
                    undo.push(Undo::RestoreValue {
                        path: path.clone(),
                        value: Value::Schedule(previous),
                    });
                    finish_write(graph, path, *config, auth, undo)?;
                }
            }
            Operation::ScheduleReplace {
                values,
                start,
                end,
                config,
            } => {
                schedule::check_samples(graph, path, values.iter())?;
                if prepare_write(graph, resource, *config, auth, undo)? {
                    let previous = schedule::read_series(graph, path)?;
                    let mut series = previous.clone();
                    series.replace_values(*start, *end, values.iter().cloned());
                    graph.set_value(path, Value::Schedule(series), auth)?;
                    undo.push(Undo::RestoreValue {
                        path: path.clone(),
                        value: Value::Schedule(previous),
                    });
                    finish_write(graph, path, *config, auth, undo)?;
                }
            }
            Operation::ScheduleRead {
                start,
                end,
                config,
                slot,
            } => {
                schedule::infer_value_kind(graph, path)?;
                let value = if readable(graph, path, *config)? {
                    let series = schedule::read_series(graph, path)?;
                    Some(Value::Schedule(series.slice(*start, *end)))
                } else {
                    None
                };
                resolve(slot, ReadOutcome::Value(value));
            }
            Operation::Create => {
                if graph.create(path, &resource.resource_type, auth)? {
                    undo.push(Undo::Remove(path.clone()));
                }
            }
            Operation::Delete => {
                // 删除虚拟资源是空操作
                if graph.exists(path) {
                    let snapshot = graph.snapshot_subtree(path)?;
                    graph.delete(path, auth)?;
                    undo.push(Undo::Restore(snapshot));
                }
            }
            Operation::Activate {
                recursive,
                create_if_missing,
            } => {
                if !graph.exists(path) {
                    if !*create_if_missing {
                        return Err(TransactionError::VirtualResource(path.clone()));
                    }
                    if graph.create(path, &resource.resource_type, auth)? {
                        undo.push(Undo::Remove(path.clone()));
                    }
                }
                set_active(graph, path, true, *recursive, auth, undo)?;
            }
            Operation::Deactivate { recursive } => {
                if graph.exists(path) {
                    set_active(graph, path, false, *recursive, auth, undo)?;
                }
            }
            Operation::SetReference { target } => {
                if !graph.exists(target) {
                    return Err(TransactionError::VirtualResource(target.clone()));
                }
                let replaced = if graph.exists(path) {
                    Some(graph.snapshot_subtree(path)?)
                } else {
                    None
                };
                graph.set_as_reference(path, target, auth)?;
                if let Some(snapshot) = replaced {
                    undo.push(Undo::Restore(snapshot));
                }
                undo.push(Undo::Remove(path.clone()));
            }
            Operation::RequestAccessMode {
                mode,
                priority,
                fail_on_reject,
                slot,
            } => {
                let previous = match auth.app_id() {
                    Some(app) => Some((app.to_string(), graph.access_grant(path, app)?)),
                    None => None,
                };
                let granted = graph.request_access_mode(path, *mode, *priority, auth)?;
                if let Some((app, grant)) = previous {
                    undo.push(Undo::RestoreGrant {
                        path: path.clone(),
                        app,
                        grant,
                    });
                }
                let satisfied = granted == *mode;
                resolve(slot, ReadOutcome::Flag(satisfied));
                if !satisfied && *fail_on_reject {
                    return Err(TransactionError::AccessModeRejected {
                        path: path.clone(),
                        requested: *mode,
                    });
                }
            }
            Operation::ReadAccessMode { slot } => {
                let mode = graph.access_mode(path, auth.app_id().unwrap_or_default())?;
                resolve(slot, ReadOutcome::AccessMode(mode));
            }
            Operation::ReadAccessPriority { slot } => {
                let priority = graph.access_priority(path, auth.app_id().unwrap_or_default())?;
                resolve(slot, ReadOutcome::AccessPriority(priority));
            }
            Operation::ReadActive { slot } => {
                let active = graph.exists(path) && graph.is_active(path)?;
                resolve(slot, ReadOutcome::Flag(active));
            }
            Operation::ReadExists { slot } => {
                resolve(slot, ReadOutcome::Flag(graph.exists(path)));
            }
        }
        Ok(())
    }
}

/// 按读取配置判断资源是否可读；不可读且配置允许时返回 false
fn readable(graph: &dyn ResourceGraph, path: &ResourcePath, config: ReadConfiguration) -> TransactionResult<bool> {
    if !graph.exists(path) {
        return match config {
            ReadConfiguration::Fail => Err(TransactionError::VirtualResource(path.clone())),
            ReadConfiguration::ReturnNull | ReadConfiguration::Ignore => Ok(false),
        };
    }
    if !graph.is_active(path)? {
        return match config {
            ReadConfiguration::Fail => Err(TransactionError::InactiveResource(path.clone())),
            ReadConfiguration::ReturnNull => Ok(false),
            ReadConfiguration::Ignore => Ok(true),
        };
    }
    Ok(true)
}

/// 写入前按写入配置处理虚拟或未激活的资源；返回 false 表示跳过写入
fn prepare_write(
    graph: &dyn ResourceGraph,
    resource: &ResourceRef,
    config: WriteConfiguration,
    auth: &Authority,
    undo: &mut Vec<Undo>,
) -> TransactionResult<bool> {
    let path = &resource.path;
    if !graph.exists(path) {
        return match config {
            WriteConfiguration::Fail => Err(TransactionError::VirtualResource(path.clone())),
            WriteConfiguration::Ignore => Ok(false),
            WriteConfiguration::Create | WriteConfiguration::CreateAndActivate => {
                if graph.create(path, &resource.resource_type, auth)? {
                    undo.push(Undo::Remove(path.clone()));
                }
                Ok(true)
            }
        };
    }
    if !graph.is_active(path)? {
        return match config {
            WriteConfiguration::Fail => Err(TransactionError::InactiveResource(path.clone())),
            WriteConfiguration::Ignore => Ok(false),
            WriteConfiguration::Create | WriteConfiguration::CreateAndActivate => Ok(true),
        };
    }
    Ok(true)
}

fn finish_write(
    graph: &dyn ResourceGraph,
    path: &ResourcePath,
    config: WriteConfiguration,
    auth: &Authority,
    undo: &mut Vec<Undo>,
) -> TransactionResult<()> {
    if config == WriteConfiguration::CreateAndActivate {
        set_active(graph, path, true, false, auth, undo)?;
    }
    Ok(())
}

/// 改变激活状态，并记录实际发生变化的资源
fn set_active(
    graph: &dyn ResourceGraph,
    path: &ResourcePath,
    active: bool,
    recursive: bool,
    auth: &Authority,
    undo: &mut Vec<Undo>,
) -> TransactionResult<()> {
    let mut targets = vec![path.clone()];
    if recursive {
        targets.extend(graph.direct_sub_resources(path, true)?.into_iter().map(|r| r.path));
    }
    let mut changed = Vec::new();
    for target in targets {
        if graph.is_active(&target)? != active {
            changed.push((target, !active));
        }
    }
    if changed.is_empty() {
        return Ok(());
    }
    if active {
        graph.activate(path, recursive, auth)?;
    } else {
        graph.deactivate(path, recursive, auth)?;
    }
    undo.push(Undo::SetActive(changed));
    Ok(())
}
