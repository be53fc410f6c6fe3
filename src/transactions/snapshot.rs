// 批量快照事务
//
// 预先登记一组资源，随后整体读取、写入、激活或停用。
// 每个登记的路径对应一个读写槽位，复合资源只登记路径。

use super::classifier::{classify, Bucket};
use super::error::{TransactionError, TransactionResult};
use super::locks::{GraphLocks, LockMode};
use super::schedule;
use super::TransactionConfig;
use crate::graph::model::{ResourcePath, ResourceRef};
use crate::storage::{Authority, ResourceGraph};
use crate::values::{ResourceValue, SampledValue, TimeSeries, Value, ValueKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 读写槽位
///
/// `read` 是最近一次从资源图读到的值，`write` 是待写入的值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RwPair {
    pub read: Option<Value>,
    pub write: Option<Value>,
}

#[derive(Debug, Clone)]
struct Registration {
    resource: ResourceRef,
    bucket: Bucket,
    pair: RwPair,
}

/// 批量快照事务
///
/// `write()` 成功后不能再次调用；`read()`、`activate()`、`deactivate()` 可以重复调用。
/// `write()` 没有回滚：中途失败时已写入的资源保持写入状态。
pub struct BatchTransaction {
    graph: Arc<dyn ResourceGraph>,
    locks: Arc<GraphLocks>,
    authority: Authority,
    config: TransactionConfig,
    /// 按登记顺序排列
    entries: Vec<Registration>,
    index: HashMap<ResourcePath, usize>,
    committed: bool,
}

macro_rules! typed_slots {
    ($($ty:ty => $get:ident, $set:ident;)*) => {
        $(
            pub fn $get(&self, resource: &ResourceRef) -> TransactionResult<Option<$ty>> {
                self.get(resource)
            }

            pub fn $set(&mut self, resource: &ResourceRef, value: $ty) -> TransactionResult<()> {
                self.set(resource, value)
            }
        )*
    };
}

impl BatchTransaction {
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
            entries: Vec::new(),
            index: HashMap::new(),
            committed: false,
        }
    }

    // ========== 登记 ==========

    fn register(&mut self, resource: ResourceRef, bucket: Bucket) {
        let registration = Registration {
            resource,
            bucket,
            pair: RwPair::default(),
        };
        match self.index.get(&registration.resource.path) {
            Some(&i) => self.entries[i] = registration,
            None => {
                self.index.insert(registration.resource.path.clone(), self.entries.len());
                self.entries.push(registration);
            }
        }
    }

    /// 登记资源；同一路径重复登记时重置其槽位
    pub fn add_resource(&mut self, resource: &ResourceRef) -> TransactionResult<()> {
        let bucket = classify(&resource.resource_type)?;
        self.register(resource.clone(), bucket);
        Ok(())
    }

    /// 全部分类成功后才登记
    pub fn add_resources(&mut self, resources: &[ResourceRef]) -> TransactionResult<()> {
        let classified = resources
            .iter()
            .map(|r| classify(&r.resource_type).map(|bucket| (r.clone(), bucket)))
            .collect::<TransactionResult<Vec<_>>>()?;
        for (resource, bucket) in classified {
            self.register(resource, bucket);
        }
        Ok(())
    }

    /// 登记根资源及其全部子资源
    ///
    /// `follow_references` 为 false 时只沿自有子资源展开
    pub fn add_tree(&mut self, root: &ResourceRef, follow_references: bool) -> TransactionResult<()> {
        let mut resources = vec![root.clone()];
        {
            let _held = self.locks.lock_domains(LockMode::Read, LockMode::Read);
            if !self.graph.exists(&root.path) {
                return Err(TransactionError::VirtualResource(root.path.clone()));
            }
            let subtree = if follow_references {
                self.graph.sub_resources(&root.path, true)?
            } else {
                self.graph.direct_sub_resources(&root.path, true)?
            };
            resources.extend(subtree);
        }
        self.add_resources(&resources)
    }

    fn remove_where(&mut self, doomed: impl Fn(&Registration) -> bool) {
        self.entries.retain(|e| !doomed(e));
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.resource.path.clone(), i))
            .collect();
    }

    /// 按路径相等取消登记
    pub fn remove_resources(&mut self, resources: &[ResourceRef]) {
        self.remove_where(|e| resources.iter().any(|r| r.equals_path(&e.resource)));
    }

    /// 按位置相等取消登记（经由引用到达同一节点的路径也会被移除）
    pub fn remove_resources_by_location(&mut self, resources: &[ResourceRef]) {
        let graph = Arc::clone(&self.graph);
        self.remove_where(|e| {
            resources
                .iter()
                .any(|r| graph.equals_location(&r.path, &e.resource.path))
        });
    }

    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.index.contains_key(&resource.path)
    }

    pub fn resources(&self) -> Vec<ResourceRef> {
        self.entries.iter().map(|e| e.resource.clone()).collect()
    }

    pub fn resources_of(&self, bucket: Bucket) -> Vec<ResourceRef> {
        self.entries
            .iter()
            .filter(|e| e.bucket == bucket)
            .map(|e| e.resource.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn pair(&self, resource: &ResourceRef) -> Option<&RwPair> {
        self.index.get(&resource.path).map(|&i| &self.entries[i].pair)
    }

    // ========== 槽位读写 ==========

    fn entry(&self, resource: &ResourceRef, kind: ValueKind) -> TransactionResult<&Registration> {
        let entry = self
            .index
            .get(&resource.path)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| TransactionError::NoSuchResource(resource.path.clone()))?;
        if !entry.bucket.accepts(kind) {
            return Err(TransactionError::type_mismatch(&resource.path, kind, entry.bucket));
        }
        Ok(entry)
    }

    /// 最近一次 `read()`/`write()` 得到的值，尚未读取时为 None
    pub fn get<T: ResourceValue>(&self, resource: &ResourceRef) -> TransactionResult<Option<T>> {
        let entry = self.entry(resource, T::KIND)?;
        Ok(entry.pair.read.clone().and_then(T::from_value))
    }

    /// 暂存待写入的值，此时不检查资源是否存在；成功 `write()` 之后不再接受
    pub fn set<T: ResourceValue>(&mut self, resource: &ResourceRef, value: T) -> TransactionResult<()> {
        if self.committed {
            return Err(TransactionError::AlreadyCommitted);
        }
        self.entry(resource, T::KIND)?;
        if let Some(&i) = self.index.get(&resource.path) {
            self.entries[i].pair.write = Some(value.into_value());
        }
        Ok(())
    }

    typed_slots! {
        bool => get_boolean, set_boolean;
        f32 => get_float, set_float;
        i32 => get_integer, set_integer;
        String => get_string, set_string;
        i64 => get_time, set_time;
        Vec<u8> => get_byte_array, set_byte_array;
        Vec<bool> => get_boolean_array, set_boolean_array;
        Vec<f32> => get_float_array, set_float_array;
        Vec<i32> => get_integer_array, set_integer_array;
        Vec<String> => get_string_array, set_string_array;
        Vec<i64> => get_time_array, set_time_array;
    }

    pub fn get_schedule(&self, resource: &ResourceRef) -> TransactionResult<Option<TimeSeries>> {
        self.get(resource)
    }

    /// 暂存整个序列
    pub fn set_schedule(&mut self, resource: &ResourceRef, values: Vec<SampledValue>) -> TransactionResult<()> {
        self.set(resource, TimeSeries::from_values(values))
    }

    // ========== 批量操作 ==========

    /// 读取全部登记资源的当前值，虚拟资源读为 None
    pub fn read(&mut self) -> TransactionResult<()> {
        let locks = Arc::clone(&self.locks);
        let graph = Arc::clone(&self.graph);
        let _held = locks.lock_domains(LockMode::Read, LockMode::Read);

        for entry in self.entries.iter_mut().filter(|e| !e.bucket.is_complex()) {
            entry.pair.read = if graph.exists(&entry.resource.path) {
                Some(graph.get_value(&entry.resource.path)?)
            } else {
                None
            };
        }
        debug!(app = %self.authority, resources = self.entries.len(), "batch read");
        Ok(())
    }

    /// 写入全部暂存值
    ///
    /// 先确认所有登记资源（含复合资源）都存在，任何一个缺失都在修改之前
    /// 以 `VirtualResource` 失败。之后逐个处理：期间消失的资源读为 None，
    /// 没有暂存值的资源只刷新读值，其余写入后刷新读值。
    pub fn write(&mut self) -> TransactionResult<()> {
        if self.committed {
            return Err(TransactionError::AlreadyCommitted);
        }
        let locks = Arc::clone(&self.locks);
        let graph = Arc::clone(&self.graph);
        let _held = locks.lock_domains(LockMode::Read, LockMode::Write);
        let _bracket = self.config.write_bracket.then(|| locks.write_bracket(graph.as_ref()));

        for entry in &self.entries {
            let path = &entry.resource.path;
            if !graph.exists(path) {
                return Err(TransactionError::VirtualResource(path.clone()));
            }
            if let Some(Value::Schedule(series)) = &entry.pair.write {
                schedule::check_samples(graph.as_ref(), path, series.values())?;
            }
        }

        let mut written = 0usize;
        for entry in self.entries.iter_mut().filter(|e| !e.bucket.is_complex()) {
            let path = &entry.resource.path;
            if !graph.exists(path) {
                entry.pair.read = None;
                continue;
            }
            if let Some(value) = &entry.pair.write {
                graph.set_value(path, value.clone(), &self.authority)?;
                entry.pair.write = None;
                written += 1;
            }
            entry.pair.read = Some(graph.get_value(path)?);
        }

        self.committed = true;
        debug!(app = %self.authority, resources = self.entries.len(), written, "batch write");
        Ok(())
    }

    /// 按登记顺序非递归激活全部存在的资源
    pub fn activate(&mut self) -> TransactionResult<()> {
        self.set_active(true)
    }

    /// 按登记顺序非递归停用全部存在的资源
    pub fn deactivate(&mut self) -> TransactionResult<()> {
        self.set_active(false)
    }

    fn set_active(&mut self, active: bool) -> TransactionResult<()> {
        let locks = Arc::clone(&self.locks);
        let graph = Arc::clone(&self.graph);
        let _held = locks.lock_domains(LockMode::Write, LockMode::Read);
        let _bracket = self.config.write_bracket.then(|| locks.write_bracket(graph.as_ref()));

        for entry in &self.entries {
            let path = &entry.resource.path;
            if !graph.exists(path) {
                continue;
            }
            if active {
                graph.activate(path, false, &self.authority)?;
            } else {
                graph.deactivate(path, false, &self.authority)?;
            }
        }
        debug!(app = %self.authority, resources = self.entries.len(), active, "batch activation");
        Ok(())
    }
}

impl std::fmt::Debug for BatchTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTransaction")
            .field("authority", &self.authority)
            .field("resources", &self.entries.len())
            .field("committed", &self.committed)
            .finish()
    }
}
