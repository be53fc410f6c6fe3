use crate::graph::model::{ResourcePath, ResourceRef};
use crate::storage::mem_store::MemGraph;
use crate::storage::{Authority, ResourceGraph};
use crate::transactions::{
    BatchTransaction, GraphLocks, LockMode, ResourceTransaction, TransactionConfig, TransactionResult,
};
use crate::values::Value;
use std::sync::Arc;

/// 资源数据库
///
/// 持有进程内共享的资源图和锁管理器，负责创建事务：
/// - 动作队列事务（`resource_transaction`）
/// - 批量快照事务（`batch_transaction`）
///
/// 也提供不经过事务的单步访问，同样遵守两个锁域的加锁顺序。
pub struct ResourceDatabase {
    graph: Arc<dyn ResourceGraph>,
    locks: Arc<GraphLocks>,
    config: TransactionConfig,
}

impl ResourceDatabase {
    pub fn new_in_memory() -> Self {
        Self::from_graph(Arc::new(MemGraph::new()))
    }

    pub fn from_graph(graph: Arc<dyn ResourceGraph>) -> Self {
        Self {
            graph,
            locks: Arc::new(GraphLocks::new()),
            config: TransactionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    /// 共享同一资源图和锁管理器的句柄
    pub fn clone_handle(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            locks: Arc::clone(&self.locks),
            config: self.config.clone(),
        }
    }

    pub fn graph(&self) -> &Arc<dyn ResourceGraph> {
        &self.graph
    }

    pub fn locks(&self) -> &Arc<GraphLocks> {
        &self.locks
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn resource_transaction(&self, app_id: &str) -> ResourceTransaction {
        ResourceTransaction::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.locks),
            app_id,
            self.config.clone(),
        )
    }

    pub fn batch_transaction(&self, app_id: &str) -> BatchTransaction {
        BatchTransaction::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.locks),
            app_id,
            self.config.clone(),
        )
    }

    // ========== 单步读操作 ==========

    pub fn exists(&self, path: &ResourcePath) -> bool {
        let _held = self.locks.lock_domains(LockMode::Read, LockMode::Read);
        self.graph.exists(path)
    }

    pub fn read_value(&self, path: &ResourcePath) -> TransactionResult<Value> {
        let _held = self.locks.lock_domains(LockMode::Read, LockMode::Read);
        Ok(self.graph.get_value(path)?)
    }

    // ========== 单步写操作 ==========

    pub fn write_value(&self, path: &ResourcePath, value: Value, app_id: &str) -> TransactionResult<()> {
        let _held = self.locks.lock_domains(LockMode::Read, LockMode::Write);
        let _bracket = self.locks.write_bracket(self.graph.as_ref());
        Ok(self.graph.set_value(path, value, &Authority::application(app_id))?)
    }

    /// 已存在且类型一致时返回 false
    pub fn create_resource(&self, resource: &ResourceRef, app_id: &str) -> TransactionResult<bool> {
        let _held = self.locks.lock_domains(LockMode::Write, LockMode::Read);
        let _bracket = self.locks.write_bracket(self.graph.as_ref());
        Ok(self
            .graph
            .create(&resource.path, &resource.resource_type, &Authority::application(app_id))?)
    }

    pub fn delete_resource(&self, path: &ResourcePath, app_id: &str) -> TransactionResult<()> {
        let _held = self.locks.lock_domains(LockMode::Write, LockMode::Write);
        let _bracket = self.locks.write_bracket(self.graph.as_ref());
        Ok(self.graph.delete(path, &Authority::application(app_id))?)
    }
}

impl Default for ResourceDatabase {
    fn default() -> Self {
        Self::new_in_memory()
    }
}
