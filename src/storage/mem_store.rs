use super::{
    AccessGrant, Authority, GraphError, GraphOp, GraphResult, Link, NodeId, ResourceGraph, SnapshotLink,
    SnapshotNode, SubtreeSnapshot,
};
use crate::graph::model::{AccessMode, AccessPriority, ResourcePath, ResourceRef, ResourceType};
use crate::values::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::trace;

#[derive(Debug, Clone)]
struct StoredResource {
    location: ResourcePath,
    resource_type: ResourceType,
    active: bool,
    value: Option<Value>,
    children: BTreeMap<String, Link>,
    access: HashMap<String, AccessGrant>,
}

impl StoredResource {
    fn effective_mode(&self, app: &str) -> AccessMode {
        if let Some(grant) = self.access.get(app) {
            if grant.mode == AccessMode::ReadOnly {
                return AccessMode::ReadOnly;
            }
        }
        let winner = self
            .access
            .iter()
            .filter(|(_, g)| g.mode == AccessMode::Exclusive)
            .min_by_key(|(_, g)| (g.priority, g.seq))
            .map(|(a, _)| a.as_str());
        match winner {
            Some(w) if w == app => AccessMode::Exclusive,
            Some(_) => AccessMode::ReadOnly,
            None => self.access.get(app).map(|g| g.mode).unwrap_or(AccessMode::Shared),
        }
    }
}

#[derive(Debug, Clone)]
struct Denial {
    app: String,
    prefix: ResourcePath,
    op: GraphOp,
}

#[derive(Debug, Default)]
struct GraphState {
    next_id: NodeId,
    next_seq: u64,
    nodes: HashMap<NodeId, StoredResource>,
    roots: BTreeMap<String, NodeId>,
    denials: Vec<Denial>,
    faults: HashSet<(ResourcePath, GraphOp)>,
    bracket_depth: usize,
    pending_changes: Vec<ResourcePath>,
    change_batches: Vec<Vec<ResourcePath>>,
}

impl GraphState {
    fn resolve(&self, path: &ResourcePath) -> Option<NodeId> {
        let mut segments = path.segments();
        let mut current = *self.roots.get(segments.next()?)?;
        for segment in segments {
            current = self.nodes.get(&current)?.children.get(segment)?.target();
        }
        Some(current)
    }

    /// 路径最后一段的链接及其父节点
    fn lookup_link(&self, path: &ResourcePath) -> Option<(Option<NodeId>, Link)> {
        match path.parent() {
            None => self.roots.get(path.name()).map(|id| (None, Link::Owned(*id))),
            Some(parent) => {
                let parent_id = self.resolve(&parent)?;
                let link = *self.nodes.get(&parent_id)?.children.get(path.name())?;
                Some((Some(parent_id), link))
            }
        }
    }

    fn node(&self, path: &ResourcePath) -> GraphResult<&StoredResource> {
        self.resolve(path)
            .and_then(|id| self.nodes.get(&id))
            .ok_or_else(|| GraphError::NotFound(path.clone()))
    }

    fn node_mut(&mut self, path: &ResourcePath) -> GraphResult<&mut StoredResource> {
        let id = self.resolve(path).ok_or_else(|| GraphError::NotFound(path.clone()))?;
        self.nodes.get_mut(&id).ok_or_else(|| GraphError::NotFound(path.clone()))
    }

    /// 故障注入对所有权限生效，权限策略只约束应用
    fn check(&self, auth: &Authority, op: GraphOp, path: &ResourcePath) -> GraphResult<()> {
        if self.faults.contains(&(path.clone(), op)) {
            return Err(GraphError::InjectedFailure { op, path: path.clone() });
        }
        if let Authority::Application(app) = auth {
            let denied = self
                .denials
                .iter()
                .any(|d| &d.app == app && d.op == op && d.prefix.is_ancestor_of(path));
            if denied {
                return Err(GraphError::PermissionDenied {
                    app: app.clone(),
                    op,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    fn record_change(&mut self, path: ResourcePath) {
        if self.bracket_depth > 0 {
            self.pending_changes.push(path);
        } else {
            self.change_batches.push(vec![path]);
        }
    }

    /// 自有子树中的全部节点（含根）
    fn owned_subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            result.push(id);
            if let Some(node) = self.nodes.get(&id) {
                for link in node.children.values() {
                    if let Link::Owned(child) = link {
                        stack.push(*child);
                    }
                }
            }
        }
        result
    }

    /// 指向给定节点集合的外部引用
    fn inbound_references(&self, doomed: &HashSet<NodeId>) -> Vec<SnapshotLink> {
        let mut result = Vec::new();
        for (id, node) in &self.nodes {
            if doomed.contains(id) {
                continue;
            }
            for (name, link) in &node.children {
                if let Link::Reference(target) = link {
                    if doomed.contains(target) {
                        result.push(SnapshotLink {
                            parent: *id,
                            name: name.clone(),
                            link: *link,
                        });
                    }
                }
            }
        }
        result
    }

    fn detach(&mut self, parent: Option<NodeId>, name: &str) {
        match parent {
            Some(pid) => {
                if let Some(node) = self.nodes.get_mut(&pid) {
                    node.children.remove(name);
                }
            }
            None => {
                self.roots.remove(name);
            }
        }
    }

    /// 删除路径：引用只移除链接，自有节点连同子树和指向它们的引用一起移除
    fn remove_path(&mut self, path: &ResourcePath) -> GraphResult<()> {
        let (parent, link) = self
            .lookup_link(path)
            .ok_or_else(|| GraphError::NotFound(path.clone()))?;
        self.detach(parent, path.name());
        if let Link::Owned(id) = link {
            let doomed: HashSet<NodeId> = self.owned_subtree(id).into_iter().collect();
            for id in &doomed {
                self.nodes.remove(id);
            }
            for node in self.nodes.values_mut() {
                node.children
                    .retain(|_, l| !matches!(l, Link::Reference(t) if doomed.contains(t)));
            }
            trace!(path = %path, removed = doomed.len(), "deleted subtree");
        }
        self.record_change(path.clone());
        Ok(())
    }

    fn set_active(&mut self, path: &ResourcePath, active: bool, recursive: bool) -> GraphResult<()> {
        let id = self.resolve(path).ok_or_else(|| GraphError::NotFound(path.clone()))?;
        let targets = if recursive { self.owned_subtree(id) } else { vec![id] };
        let mut changed = Vec::new();
        for target in targets {
            if let Some(node) = self.nodes.get_mut(&target) {
                if node.active != active {
                    node.active = active;
                    changed.push(node.location.clone());
                }
            }
        }
        for location in changed {
            self.record_change(location);
        }
        Ok(())
    }

    fn collect_sub_resources(&self, path: &ResourcePath, recursive: bool, follow_references: bool) -> GraphResult<Vec<ResourceRef>> {
        let root = self.resolve(path).ok_or_else(|| GraphError::NotFound(path.clone()))?;
        let mut result = Vec::new();
        let mut visited = HashSet::from([root]);
        let mut stack = vec![(root, path.clone())];
        while let Some((id, current)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else { continue };
            for (name, link) in &node.children {
                if link.is_reference() && !follow_references {
                    continue;
                }
                let Some(child) = self.nodes.get(&link.target()) else { continue };
                let child_path = current.with_name(name);
                result.push(ResourceRef::from_path(child_path.clone(), child.resource_type.clone()));
                if recursive && visited.insert(link.target()) {
                    stack.push((link.target(), child_path));
                }
            }
        }
        Ok(result)
    }
}

/// 内存资源图
///
/// 资源按位置（`NodeId`）存储，路径通过自有链接和引用链接解析。
/// 附带简单的权限策略、故障注入和变更通知合并，便于驱动事务引擎。
#[derive(Debug, Default)]
pub struct MemGraph {
    state: RwLock<GraphState>,
}

impl MemGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 禁止应用对某个前缀下的路径执行某类操作
    pub fn deny(&self, app: &str, prefix: &ResourcePath, op: GraphOp) {
        self.state.write().denials.push(Denial {
            app: app.to_string(),
            prefix: prefix.clone(),
            op,
        });
    }

    pub fn clear_denials(&self) {
        self.state.write().denials.clear();
    }

    /// 让某个路径上的某类操作失败，对系统权限同样生效
    pub fn inject_failure(&self, path: &ResourcePath, op: GraphOp) {
        self.state.write().faults.insert((path.clone(), op));
    }

    pub fn clear_failures(&self) {
        self.state.write().faults.clear();
    }

    /// 已发出的变更通知批次
    pub fn change_batches(&self) -> Vec<Vec<ResourcePath>> {
        self.state.read().change_batches.clone()
    }

    pub fn take_change_batches(&self) -> Vec<Vec<ResourcePath>> {
        std::mem::take(&mut self.state.write().change_batches)
    }

    /// 存储中的节点数量（按位置计）
    pub fn resource_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn top_level_resources(&self) -> Vec<ResourceRef> {
        let state = self.state.read();
        state
            .roots
            .values()
            .filter_map(|id| state.nodes.get(id))
            .map(|n| ResourceRef::from_path(n.location.clone(), n.resource_type.clone()))
            .collect()
    }
}

impl ResourceGraph for MemGraph {
    fn exists(&self, path: &ResourcePath) -> bool {
        self.state.read().resolve(path).is_some()
    }

    fn resource_type(&self, path: &ResourcePath) -> Option<ResourceType> {
        self.state.read().node(path).ok().map(|n| n.resource_type.clone())
    }

    fn is_active(&self, path: &ResourcePath) -> GraphResult<bool> {
        Ok(self.state.read().node(path)?.active)
    }

    fn location(&self, path: &ResourcePath) -> Option<ResourcePath> {
        self.state.read().node(path).ok().map(|n| n.location.clone())
    }

    fn get_value(&self, path: &ResourcePath) -> GraphResult<Value> {
        let state = self.state.read();
        if state.faults.contains(&(path.clone(), GraphOp::Read)) {
            return Err(GraphError::InjectedFailure {
                op: GraphOp::Read,
                path: path.clone(),
            });
        }
        state
            .node(path)?
            .value
            .clone()
            .ok_or_else(|| GraphError::NotAValueResource(path.clone()))
    }

    fn set_value(&self, path: &ResourcePath, value: Value, auth: &Authority) -> GraphResult<()> {
        let mut state = self.state.write();
        state.check(auth, GraphOp::Write, path)?;
        let node = state.node_mut(path)?;
        if let Some(app) = auth.app_id() {
            if node.effective_mode(app) == AccessMode::ReadOnly {
                return Err(GraphError::WriteAccessDenied(path.clone()));
            }
        }
        match node.resource_type.value_kind() {
            None => return Err(GraphError::NotAValueResource(path.clone())),
            Some(kind) if kind != value.kind() => {
                return Err(GraphError::TypeMismatch {
                    path: path.clone(),
                    expected: kind.to_string(),
                    actual: value.kind().to_string(),
                })
            }
            Some(_) => {}
        }
        node.value = Some(value);
        let location = node.location.clone();
        state.record_change(location);
        Ok(())
    }

    fn create(&self, path: &ResourcePath, resource_type: &ResourceType, auth: &Authority) -> GraphResult<bool> {
        let mut state = self.state.write();
        state.check(auth, GraphOp::Create, path)?;
        if let Ok(existing) = state.node(path) {
            if &existing.resource_type == resource_type {
                return Ok(false);
            }
            return Err(GraphError::TypeMismatch {
                path: path.clone(),
                expected: resource_type.to_string(),
                actual: existing.resource_type.to_string(),
            });
        }

        let (parent_id, location) = match path.parent() {
            None => (None, path.clone()),
            Some(parent) => {
                let pid = state
                    .resolve(&parent)
                    .ok_or_else(|| GraphError::ParentMissing(path.clone()))?;
                let parent_location = state
                    .nodes
                    .get(&pid)
                    .map(|n| n.location.clone())
                    .ok_or_else(|| GraphError::ParentMissing(path.clone()))?;
                (Some(pid), parent_location.with_name(path.name()))
            }
        };

        let id = state.next_id;
        state.next_id += 1;
        state.nodes.insert(
            id,
            StoredResource {
                location: location.clone(),
                resource_type: resource_type.clone(),
                active: false,
                value: resource_type.value_kind().map(|k| k.default_value()),
                children: BTreeMap::new(),
                access: HashMap::new(),
            },
        );
        match parent_id {
            Some(pid) => {
                if let Some(parent) = state.nodes.get_mut(&pid) {
                    parent.children.insert(path.name().to_string(), Link::Owned(id));
                }
            }
            None => {
                state.roots.insert(path.name().to_string(), id);
            }
        }
        state.record_change(location);
        Ok(true)
    }

    fn delete(&self, path: &ResourcePath, auth: &Authority) -> GraphResult<()> {
        let mut state = self.state.write();
        state.check(auth, GraphOp::Delete, path)?;
        state.remove_path(path)
    }

    fn activate(&self, path: &ResourcePath, recursive: bool, auth: &Authority) -> GraphResult<()> {
        let mut state = self.state.write();
        state.check(auth, GraphOp::Activate, path)?;
        state.set_active(path, true, recursive)
    }

    fn deactivate(&self, path: &ResourcePath, recursive: bool, auth: &Authority) -> GraphResult<()> {
        let mut state = self.state.write();
        state.check(auth, GraphOp::Activate, path)?;
        state.set_active(path, false, recursive)
    }

    fn set_as_reference(&self, path: &ResourcePath, target: &ResourcePath, auth: &Authority) -> GraphResult<()> {
        let mut state = self.state.write();
        state.check(auth, GraphOp::Reference, path)?;
        let invalid = |reason: &str| GraphError::InvalidReference {
            path: path.clone(),
            target: target.clone(),
            reason: reason.to_string(),
        };

        let target_id = state.resolve(target).ok_or_else(|| GraphError::NotFound(target.clone()))?;
        let parent = path.parent().ok_or_else(|| invalid("top-level resources cannot be references"))?;
        let parent_id = state.resolve(&parent).ok_or_else(|| GraphError::ParentMissing(path.clone()))?;

        if let Some((_, link)) = state.lookup_link(path) {
            if let Some(existing) = state.nodes.get(&link.target()) {
                let target_type = state.nodes.get(&target_id).map(|n| &n.resource_type);
                if Some(&existing.resource_type) != target_type {
                    return Err(invalid("target type differs from the existing resource"));
                }
            }
            if let Link::Owned(id) = link {
                if state.owned_subtree(id).contains(&target_id) {
                    return Err(invalid("target would be deleted by replacing the resource"));
                }
            }
            state.remove_path(path)?;
        }

        if let Some(node) = state.nodes.get_mut(&parent_id) {
            node.children.insert(path.name().to_string(), Link::Reference(target_id));
        }
        state.record_change(path.clone());
        Ok(())
    }

    fn sub_resources(&self, path: &ResourcePath, recursive: bool) -> GraphResult<Vec<ResourceRef>> {
        self.state.read().collect_sub_resources(path, recursive, true)
    }

    fn direct_sub_resources(&self, path: &ResourcePath, recursive: bool) -> GraphResult<Vec<ResourceRef>> {
        self.state.read().collect_sub_resources(path, recursive, false)
    }

    fn request_access_mode(
        &self,
        path: &ResourcePath,
        mode: AccessMode,
        priority: AccessPriority,
        auth: &Authority,
    ) -> GraphResult<AccessMode> {
        let mut state = self.state.write();
        state.check(auth, GraphOp::AccessMode, path)?;
        let Some(app) = auth.app_id() else {
            // 系统权限不参与访问模式协商
            state.node(path)?;
            return Ok(mode);
        };
        let seq = state.next_seq;
        state.next_seq += 1;
        let node = state.node_mut(path)?;
        node.access.insert(app.to_string(), AccessGrant { mode, priority, seq });
        Ok(node.effective_mode(app))
    }

    fn access_mode(&self, path: &ResourcePath, app: &str) -> GraphResult<AccessMode> {
        Ok(self.state.read().node(path)?.effective_mode(app))
    }

    fn access_priority(&self, path: &ResourcePath, app: &str) -> GraphResult<AccessPriority> {
        Ok(self
            .state
            .read()
            .node(path)?
            .access
            .get(app)
            .map(|g| g.priority)
            .unwrap_or(AccessPriority::Lowest))
    }

    fn access_grant(&self, path: &ResourcePath, app: &str) -> GraphResult<Option<AccessGrant>> {
        Ok(self.state.read().node(path)?.access.get(app).copied())
    }

    fn set_access_grant(
        &self,
        path: &ResourcePath,
        app: &str,
        grant: Option<AccessGrant>,
        auth: &Authority,
    ) -> GraphResult<()> {
        let mut state = self.state.write();
        state.check(auth, GraphOp::AccessMode, path)?;
        let node = state.node_mut(path)?;
        match grant {
            Some(g) => node.access.insert(app.to_string(), g),
            None => node.access.remove(app),
        };
        Ok(())
    }

    fn snapshot_subtree(&self, path: &ResourcePath) -> GraphResult<SubtreeSnapshot> {
        let state = self.state.read();
        let (parent, link) = state
            .lookup_link(path)
            .ok_or_else(|| GraphError::NotFound(path.clone()))?;
        let mut snapshot = SubtreeSnapshot {
            path: path.clone(),
            parent,
            link,
            nodes: Vec::new(),
            references: Vec::new(),
        };
        if let Link::Owned(id) = link {
            let ids = state.owned_subtree(id);
            for node_id in &ids {
                if let Some(node) = state.nodes.get(node_id) {
                    snapshot.nodes.push(SnapshotNode {
                        id: *node_id,
                        location: node.location.clone(),
                        resource_type: node.resource_type.clone(),
                        active: node.active,
                        value: node.value.clone(),
                        children: node.children.iter().map(|(n, l)| (n.clone(), *l)).collect(),
                        access: node.access.iter().map(|(a, g)| (a.clone(), *g)).collect(),
                    });
                }
            }
            let doomed: HashSet<NodeId> = ids.into_iter().collect();
            snapshot.references = state.inbound_references(&doomed);
        }
        Ok(snapshot)
    }

    fn restore_subtree(&self, snapshot: &SubtreeSnapshot, auth: &Authority) -> GraphResult<()> {
        let mut state = self.state.write();
        let path = &snapshot.path;
        state.check(auth, GraphOp::Create, path)?;
        let conflict = |reason: &str| GraphError::RestoreConflict {
            path: path.clone(),
            reason: reason.to_string(),
        };

        let name = path.name();
        match snapshot.parent {
            Some(pid) => {
                let parent = state.nodes.get(&pid).ok_or_else(|| conflict("parent no longer exists"))?;
                if parent.children.contains_key(name) {
                    return Err(conflict("path is occupied"));
                }
            }
            None => {
                if state.roots.contains_key(name) {
                    return Err(conflict("path is occupied"));
                }
            }
        }
        if snapshot.nodes.iter().any(|n| state.nodes.contains_key(&n.id)) {
            return Err(conflict("node already present"));
        }
        if let Link::Reference(target) = snapshot.link {
            if !state.nodes.contains_key(&target) {
                return Err(conflict("reference target no longer exists"));
            }
        }

        let restored: HashSet<NodeId> = snapshot.nodes.iter().map(|n| n.id).collect();
        for node in &snapshot.nodes {
            let children = node
                .children
                .iter()
                .filter(|(_, l)| restored.contains(&l.target()) || state.nodes.contains_key(&l.target()))
                .cloned()
                .collect();
            state.nodes.insert(
                node.id,
                StoredResource {
                    location: node.location.clone(),
                    resource_type: node.resource_type.clone(),
                    active: node.active,
                    value: node.value.clone(),
                    children,
                    access: node.access.iter().cloned().collect(),
                },
            );
        }
        match snapshot.parent {
            Some(pid) => {
                if let Some(parent) = state.nodes.get_mut(&pid) {
                    parent.children.insert(name.to_string(), snapshot.link);
                }
            }
            None => {
                state.roots.insert(name.to_string(), snapshot.link.target());
            }
        }
        for reference in &snapshot.references {
            let target_alive = state.nodes.contains_key(&reference.link.target());
            match state.nodes.get_mut(&reference.parent) {
                Some(parent) if target_alive && !parent.children.contains_key(&reference.name) => {
                    parent.children.insert(reference.name.clone(), reference.link);
                }
                _ => trace!(path = %path, name = %reference.name, "skipped stale reference on restore"),
            }
        }
        state.record_change(path.clone());
        Ok(())
    }

    fn start_transaction(&self) {
        self.state.write().bracket_depth += 1;
    }

    fn finish_transaction(&self) {
        let mut state = self.state.write();
        state.bracket_depth = state.bracket_depth.saturating_sub(1);
        if state.bracket_depth == 0 && !state.pending_changes.is_empty() {
            let batch = std::mem::take(&mut state.pending_changes);
            state.change_batches.push(batch);
        }
    }
}
