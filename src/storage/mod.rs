pub mod mem_store;

use crate::graph::model::{AccessMode, AccessPriority, ResourcePath, ResourceRef, ResourceType};
use crate::values::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 节点在存储中的位置标识（同一位置可经由多个引用路径到达）
pub type NodeId = u64;

/// 执行图操作时使用的权限
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Authority {
    /// 以某个应用的身份执行，受权限策略约束
    Application(String),
    /// 系统权限，跳过权限检查（用于回滚）
    System,
}

impl Authority {
    pub fn application(id: &str) -> Self {
        Authority::Application(id.to_string())
    }

    pub fn app_id(&self) -> Option<&str> {
        match self {
            Authority::Application(id) => Some(id),
            Authority::System => None,
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authority::Application(id) => write!(f, "app:{}", id),
            Authority::System => write!(f, "system"),
        }
    }
}

/// 需要权限的图操作类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphOp {
    Read,
    Write,
    Create,
    Delete,
    Activate,
    Reference,
    AccessMode,
}

impl fmt::Display for GraphOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("resource {0} does not exist")]
    NotFound(ResourcePath),
    #[error("cannot create {0}: parent resource does not exist")]
    ParentMissing(ResourcePath),
    #[error("type mismatch at {path}: expected {expected}, found {actual}")]
    TypeMismatch {
        path: ResourcePath,
        expected: String,
        actual: String,
    },
    #[error("resource {0} carries no value")]
    NotAValueResource(ResourcePath),
    #[error("{app} is not permitted to {op} {path}")]
    PermissionDenied {
        app: String,
        op: GraphOp,
        path: ResourcePath,
    },
    #[error("no write access to {0}")]
    WriteAccessDenied(ResourcePath),
    #[error("injected failure for {op} on {path}")]
    InjectedFailure { op: GraphOp, path: ResourcePath },
    #[error("invalid reference {path} -> {target}: {reason}")]
    InvalidReference {
        path: ResourcePath,
        target: ResourcePath,
        reason: String,
    },
    #[error("cannot restore {path}: {reason}")]
    RestoreConflict { path: ResourcePath, reason: String },
}

pub type GraphResult<T> = Result<T, GraphError>;

/// 子节点链接：自有子资源或指向其它位置的引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    Owned(NodeId),
    Reference(NodeId),
}

impl Link {
    pub fn target(&self) -> NodeId {
        match self {
            Link::Owned(id) | Link::Reference(id) => *id,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Link::Reference(_))
    }
}

/// 应用对某个资源的访问请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub mode: AccessMode,
    pub priority: AccessPriority,
    /// 请求顺序，同优先级时先到先得
    pub seq: u64,
}

/// 快照中的节点数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: NodeId,
    pub location: ResourcePath,
    pub resource_type: ResourceType,
    pub active: bool,
    pub value: Option<Value>,
    pub children: Vec<(String, Link)>,
    pub access: Vec<(String, AccessGrant)>,
}

/// 快照中的引用链接（删除时一并被移除的外部引用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLink {
    pub parent: NodeId,
    pub name: String,
    pub link: Link,
}

/// 子树快照
///
/// 记录删除一个路径时会被移除的全部内容，用于回滚时恢复
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtreeSnapshot {
    /// 被删除的路径
    pub path: ResourcePath,
    /// 路径所在的父节点，顶层资源为 None
    pub parent: Option<NodeId>,
    /// 路径本身的链接
    pub link: Link,
    /// 被删除的节点（路径本身是引用时为空）
    pub nodes: Vec<SnapshotNode>,
    /// 指向被删除节点的其它引用
    pub references: Vec<SnapshotLink>,
}

/// 资源图接口
///
/// 事务引擎只通过这个接口访问资源图。所有方法都是 `&self`，
/// 实现自行处理内部同步；粗粒度的结构锁和值锁由 `GraphLocks` 负责。
pub trait ResourceGraph: Send + Sync {
    fn exists(&self, path: &ResourcePath) -> bool;

    /// 实际存储的资源类型，虚拟资源返回 None
    fn resource_type(&self, path: &ResourcePath) -> Option<ResourceType>;

    fn is_active(&self, path: &ResourcePath) -> GraphResult<bool>;

    /// 路径解析后的实际位置（引用会被展开）
    fn location(&self, path: &ResourcePath) -> Option<ResourcePath>;

    fn get_value(&self, path: &ResourcePath) -> GraphResult<Value>;

    fn set_value(&self, path: &ResourcePath, value: Value, auth: &Authority) -> GraphResult<()>;

    /// 创建资源，父资源必须存在；已存在且类型一致时返回 `Ok(false)`
    fn create(&self, path: &ResourcePath, resource_type: &ResourceType, auth: &Authority) -> GraphResult<bool>;

    /// 删除资源。路径本身是引用时只移除引用
    fn delete(&self, path: &ResourcePath, auth: &Authority) -> GraphResult<()>;

    /// 激活资源，递归时只沿自有子资源传播
    fn activate(&self, path: &ResourcePath, recursive: bool, auth: &Authority) -> GraphResult<()>;

    fn deactivate(&self, path: &ResourcePath, recursive: bool, auth: &Authority) -> GraphResult<()>;

    /// 把 path 设为指向 target 的引用，原有子树会被删除
    fn set_as_reference(&self, path: &ResourcePath, target: &ResourcePath, auth: &Authority) -> GraphResult<()>;

    /// 子资源（包含引用），递归时每个位置只访问一次
    fn sub_resources(&self, path: &ResourcePath, recursive: bool) -> GraphResult<Vec<ResourceRef>>;

    /// 自有子资源（不包含引用）
    fn direct_sub_resources(&self, path: &ResourcePath, recursive: bool) -> GraphResult<Vec<ResourceRef>>;

    /// 请求访问模式，返回实际获得的模式
    fn request_access_mode(
        &self,
        path: &ResourcePath,
        mode: AccessMode,
        priority: AccessPriority,
        auth: &Authority,
    ) -> GraphResult<AccessMode>;

    fn access_mode(&self, path: &ResourcePath, app: &str) -> GraphResult<AccessMode>;

    fn access_priority(&self, path: &ResourcePath, app: &str) -> GraphResult<AccessPriority>;

    fn access_grant(&self, path: &ResourcePath, app: &str) -> GraphResult<Option<AccessGrant>>;

    fn set_access_grant(
        &self,
        path: &ResourcePath,
        app: &str,
        grant: Option<AccessGrant>,
        auth: &Authority,
    ) -> GraphResult<()>;

    /// 记录删除 path 时会被移除的全部内容
    fn snapshot_subtree(&self, path: &ResourcePath) -> GraphResult<SubtreeSnapshot>;

    fn restore_subtree(&self, snapshot: &SubtreeSnapshot, auth: &Authority) -> GraphResult<()>;

    /// 写操作括号开始，变更通知在括号结束时合并发出
    fn start_transaction(&self) {}

    fn finish_transaction(&self) {}

    /// 位置相等（经由不同路径或引用到达同一节点）
    fn equals_location(&self, a: &ResourcePath, b: &ResourcePath) -> bool {
        match (self.location(a), self.location(b)) {
            (Some(la), Some(lb)) => la == lb,
            _ => false,
        }
    }
}
