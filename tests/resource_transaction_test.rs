// 动作队列事务测试
// 测试读写、结构操作、写入/读取配置、访问模式和提交语义

use rs_resourcedb::storage::GraphOp;
use rs_resourcedb::transactions::{LockMode, TransactionError, TransactionState};
use rs_resourcedb::{
    AccessMode, AccessPriority, Authority, MemGraph, ReadConfiguration, ResourceDatabase, ResourceGraph,
    ResourcePath, ResourceRef, ResourceType, Value, WriteConfiguration,
};
use std::sync::Arc;

// 辅助函数：创建带一个房间的数据库
fn setup() -> (Arc<MemGraph>, ResourceDatabase) {
    let graph = Arc::new(MemGraph::new());
    graph
        .create(&path("room"), &ResourceType::complex("Room"), &Authority::System)
        .unwrap();
    let db = ResourceDatabase::from_graph(graph.clone());
    (graph, db)
}

// 辅助函数：解析路径
fn path(p: &str) -> ResourcePath {
    ResourcePath::parse(p).unwrap()
}

// 辅助函数：创建资源句柄
fn res(p: &str, t: ResourceType) -> ResourceRef {
    ResourceRef::new(p, t).unwrap()
}

#[test]
fn test_float_round_trip_between_transactions() {
    let (_graph, db) = setup();
    let temp = res("room.temp", ResourceType::Float);

    let mut tx = db.resource_transaction("app");
    tx.set_float(&temp, 5.0).unwrap();
    tx.commit().unwrap();

    let mut tx = db.resource_transaction("app");
    let value = tx.get_float(&temp).unwrap();
    tx.commit().unwrap();
    assert_eq!(value.value().unwrap(), Some(5.0));
}

#[test]
fn test_create_activate_write_end_to_end() {
    let (graph, db) = setup();
    let r = res("room.setpoint", ResourceType::Integer);

    let mut tx = db.resource_transaction("app");
    tx.create(&r).unwrap();
    tx.activate(&r, false, false).unwrap();
    tx.set_integer_with(&r, 42, WriteConfiguration::Fail).unwrap();
    tx.commit().unwrap();

    assert!(graph.exists(&r.path));
    assert!(graph.is_active(&r.path).unwrap());
    assert_eq!(graph.get_value(&r.path).unwrap(), Value::Integer(42));
}

#[test]
fn test_failing_write_rolls_back_create() {
    let (graph, db) = setup();
    let r = res("room.setpoint", ResourceType::Integer);
    let bad = res("nowhere.setpoint", ResourceType::Integer);

    let mut tx = db.resource_transaction("app");
    tx.create(&r).unwrap();
    tx.set_integer(&r, 42).unwrap();
    tx.set_integer(&bad, 7).unwrap();

    let err = tx.commit().unwrap_err();
    let failure = err.operation_failure().expect("operation failure");
    assert_eq!(failure.kind.to_string(), "Write");
    assert_eq!(failure.resource, bad.path);
    assert!(!graph.exists(&r.path));
    assert_eq!(tx.state(), TransactionState::RolledBack);
}

#[test]
fn test_commit_twice_fails_without_mutation() {
    let (graph, db) = setup();
    let r = res("room.count", ResourceType::Integer);

    let mut tx = db.resource_transaction("app");
    tx.set_integer(&r, 1).unwrap();
    tx.commit().unwrap();

    // 外部修改后再次提交不能覆盖
    graph.set_value(&r.path, Value::Integer(9), &Authority::System).unwrap();
    assert!(matches!(tx.commit(), Err(TransactionError::AlreadyCommitted)));
    assert_eq!(graph.get_value(&r.path).unwrap(), Value::Integer(9));
    assert!(matches!(tx.exists(&r), Err(TransactionError::AlreadyCommitted)));
}

#[test]
fn test_read_only_queue_takes_read_locks() {
    let (graph, db) = setup();
    graph
        .create(&path("room.temp"), &ResourceType::Float, &Authority::System)
        .unwrap();
    graph.activate(&path("room.temp"), false, &Authority::System).unwrap();
    let temp = res("room.temp", ResourceType::Float);

    let mut tx = db.resource_transaction("app");
    tx.get_float(&temp).unwrap();
    tx.exists(&temp).unwrap();
    tx.is_active(&temp).unwrap();
    assert_eq!(tx.requires_locks(), (LockMode::Read, LockMode::Read));
    tx.commit().unwrap();

    let stats = db.locks().stats();
    assert_eq!((stats.structure_read, stats.value_read), (1, 1));
    assert_eq!((stats.structure_write, stats.value_write), (0, 0));
    assert_eq!(stats.brackets, 0);

    db.locks().reset_stats();
    let mut tx = db.resource_transaction("app");
    tx.get_float(&temp).unwrap();
    tx.delete(&temp).unwrap();
    tx.commit().unwrap();
    let stats = db.locks().stats();
    assert_eq!((stats.structure_write, stats.value_write), (1, 1));
    assert_eq!(stats.brackets, 1);
}

#[test]
fn test_write_configurations() {
    let (graph, db) = setup();
    let missing = res("room.missing", ResourceType::Float);

    // Ignore：虚拟资源跳过
    let mut tx = db.resource_transaction("app");
    tx.set_float_with(&missing, 1.0, WriteConfiguration::Ignore).unwrap();
    tx.commit().unwrap();
    assert!(!graph.exists(&missing.path));

    // Create：创建但不激活
    let mut tx = db.resource_transaction("app");
    tx.set_float_with(&missing, 2.0, WriteConfiguration::Create).unwrap();
    tx.commit().unwrap();
    assert_eq!(graph.get_value(&missing.path).unwrap(), Value::Float(2.0));
    assert!(!graph.is_active(&missing.path).unwrap());

    // Fail：未激活的资源写入失败
    let mut tx = db.resource_transaction("app");
    tx.set_float_with(&missing, 3.0, WriteConfiguration::Fail).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err.operation_failure().map(|f| &f.cause),
        Some(TransactionError::InactiveResource(_))
    ));
    assert_eq!(graph.get_value(&missing.path).unwrap(), Value::Float(2.0));

    // CreateAndActivate：写入后激活
    let mut tx = db.resource_transaction("app");
    tx.set_float_with(&missing, 4.0, WriteConfiguration::CreateAndActivate)
        .unwrap();
    tx.commit().unwrap();
    assert!(graph.is_active(&missing.path).unwrap());
}

#[test]
fn test_read_configurations() {
    let (graph, db) = setup();
    graph
        .create(&path("room.temp"), &ResourceType::Float, &Authority::System)
        .unwrap();
    let inactive = res("room.temp", ResourceType::Float);
    let virtual_res = res("room.ghost", ResourceType::Float);

    let mut tx = db.resource_transaction("app");
    let null = tx.get_float_with(&inactive, ReadConfiguration::ReturnNull).unwrap();
    let ignored = tx.get_float_with(&inactive, ReadConfiguration::Ignore).unwrap();
    let ghost = tx.get_float_with(&virtual_res, ReadConfiguration::Ignore).unwrap();
    tx.commit().unwrap();
    assert_eq!(null.value().unwrap(), None);
    assert_eq!(ignored.value().unwrap(), Some(0.0));
    assert_eq!(ghost.value().unwrap(), None);

    let mut tx = db.resource_transaction("app");
    tx.get_float(&virtual_res).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err.operation_failure().map(|f| &f.cause),
        Some(TransactionError::VirtualResource(_))
    ));
}

#[test]
fn test_array_and_string_values() {
    let (_graph, db) = setup();
    let names = res("room.names", ResourceType::StringArray);
    let blob = res("room.blob", ResourceType::ByteArray);
    let label = res("room.label", ResourceType::String);

    let mut tx = db.resource_transaction("app");
    tx.set_string_array(&names, vec!["a".into(), "b".into()]).unwrap();
    tx.set_byte_array(&blob, vec![1, 2, 3]).unwrap();
    tx.set_string(&label, "lobby".to_string()).unwrap();
    tx.commit().unwrap();

    let mut tx = db.resource_transaction("app");
    let names_f = tx.get_string_array(&names).unwrap();
    let blob_f = tx.get_byte_array(&blob).unwrap();
    let label_f = tx.get_string(&label).unwrap();
    tx.commit().unwrap();
    assert_eq!(names_f.value().unwrap(), Some(vec!["a".to_string(), "b".to_string()]));
    assert_eq!(blob_f.value().unwrap(), Some(vec![1u8, 2, 3]));
    assert_eq!(label_f.value().unwrap(), Some("lobby".to_string()));
}

#[test]
fn test_delete_is_restored_on_rollback() {
    let (graph, db) = setup();
    let sys = Authority::System;
    graph.create(&path("room.temp"), &ResourceType::Float, &sys).unwrap();
    graph.set_value(&path("room.temp"), Value::Float(18.0), &sys).unwrap();
    graph.activate(&path("room"), true, &sys).unwrap();

    let room = res("room", ResourceType::complex("Room"));
    let before = graph.resource_count();
    let mut tx = db.resource_transaction("app");
    tx.delete(&room).unwrap();
    tx.set_float_with(&res("room.temp", ResourceType::Float), 1.0, WriteConfiguration::Fail)
        .unwrap();
    assert!(tx.commit().is_err());

    assert!(graph.exists(&path("room.temp")));
    assert!(graph.is_active(&path("room.temp")).unwrap());
    assert_eq!(graph.get_value(&path("room.temp")).unwrap(), Value::Float(18.0));
    assert_eq!(graph.resource_count(), before);
}

#[test]
fn test_set_as_reference_and_rollback() {
    let (graph, db) = setup();
    let sys = Authority::System;
    graph.create(&path("outside"), &ResourceType::complex("Sensor"), &sys).unwrap();
    graph.create(&path("outside.temp"), &ResourceType::Float, &sys).unwrap();
    graph.set_value(&path("outside.temp"), Value::Float(-3.0), &sys).unwrap();
    graph.create(&path("room.temp"), &ResourceType::Float, &sys).unwrap();
    graph.set_value(&path("room.temp"), Value::Float(20.0), &sys).unwrap();

    let local = res("room.temp", ResourceType::Float);
    let remote = res("outside.temp", ResourceType::Float);

    let mut tx = db.resource_transaction("app");
    tx.set_as_reference(&local, &remote).unwrap();
    tx.commit().unwrap();
    assert!(graph.equals_location(&local.path, &remote.path));
    assert_eq!(graph.get_value(&local.path).unwrap(), Value::Float(-3.0));

    // 回滚时恢复被替换的资源
    graph.delete(&local.path, &sys).unwrap();
    graph.create(&path("room.temp"), &ResourceType::Float, &sys).unwrap();
    graph.set_value(&path("room.temp"), Value::Float(20.0), &sys).unwrap();
    let mut tx = db.resource_transaction("app");
    tx.set_as_reference(&local, &remote).unwrap();
    tx.create(&res("gone.child", ResourceType::Float)).unwrap();
    assert!(tx.commit().is_err());
    assert!(!graph.equals_location(&local.path, &remote.path));
    assert_eq!(graph.get_value(&local.path).unwrap(), Value::Float(20.0));
}

#[test]
fn test_set_as_reference_requires_same_type() {
    let (_graph, db) = setup();
    let mut tx = db.resource_transaction("app");
    let err = tx
        .set_as_reference(
            &res("room.temp", ResourceType::Float),
            &res("room.count", ResourceType::Integer),
        )
        .unwrap_err();
    assert!(matches!(err, TransactionError::TypeMismatch { .. }));
}

#[test]
fn test_access_mode_requests() {
    let (graph, db) = setup();
    graph
        .create(&path("room.valve"), &ResourceType::Float, &Authority::System)
        .unwrap();
    let valve = res("room.valve", ResourceType::Float);

    let mut tx = db.resource_transaction("controller");
    let granted = tx
        .request_access_mode(&valve, AccessMode::Exclusive, AccessPriority::DeviceSpecific, true)
        .unwrap();
    let mode = tx.get_access_mode(&valve).unwrap();
    let priority = tx.get_access_priority(&valve).unwrap();
    tx.commit().unwrap();
    assert!(granted.value().unwrap());
    assert_eq!(mode.value().unwrap(), AccessMode::Exclusive);
    assert_eq!(priority.value().unwrap(), AccessPriority::DeviceSpecific);

    // 低优先级的独占请求被拒绝，失败时回滚恢复原先的请求
    let mut tx = db.resource_transaction("logger");
    tx.request_access_mode(&valve, AccessMode::Exclusive, AccessPriority::Lowest, true)
        .unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err.operation_failure().map(|f| &f.cause),
        Some(TransactionError::AccessModeRejected { .. })
    ));
    assert_eq!(graph.access_grant(&valve.path, "logger").unwrap(), None);

    // 不要求必须满足时只返回结果
    let mut tx = db.resource_transaction("logger");
    let result = tx
        .request_access_mode(&valve, AccessMode::Exclusive, AccessPriority::Lowest, false)
        .unwrap();
    tx.commit().unwrap();
    assert!(!result.value().unwrap());
    assert_eq!(graph.access_mode(&valve.path, "logger").unwrap(), AccessMode::ReadOnly);
}

#[test]
fn test_exists_and_is_active_queries() {
    let (graph, db) = setup();
    let room = res("room", ResourceType::complex("Room"));
    let ghost = res("room.ghost", ResourceType::Float);

    let mut tx = db.resource_transaction("app");
    let room_exists = tx.exists(&room).unwrap();
    let ghost_exists = tx.exists(&ghost).unwrap();
    let ghost_active = tx.is_active(&ghost).unwrap();
    tx.activate(&room, false, false).unwrap();
    let room_active = tx.is_active(&room).unwrap();
    assert!(matches!(room_exists.value(), Err(TransactionError::NotExecuted)));
    tx.commit().unwrap();

    assert!(room_exists.value().unwrap());
    assert!(!ghost_exists.value().unwrap());
    assert!(!ghost_active.value().unwrap());
    assert!(room_active.value().unwrap());
    assert!(graph.is_active(&room.path).unwrap());
}

#[test]
fn test_activate_virtual_resource() {
    let (graph, db) = setup();
    let lamp = res("room.lamp", ResourceType::Boolean);

    let mut tx = db.resource_transaction("app");
    tx.activate(&lamp, false, false).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err.operation_failure().map(|f| &f.cause),
        Some(TransactionError::VirtualResource(_))
    ));

    let mut tx = db.resource_transaction("app");
    tx.activate(&lamp, false, true).unwrap();
    tx.commit().unwrap();
    assert!(graph.is_active(&lamp.path).unwrap());
}

#[test]
fn test_deactivate_recursive() {
    let (graph, db) = setup();
    let sys = Authority::System;
    graph.create(&path("room.temp"), &ResourceType::Float, &sys).unwrap();
    graph.activate(&path("room"), true, &sys).unwrap();

    let mut tx = db.resource_transaction("app");
    tx.deactivate(&res("room", ResourceType::complex("Room")), true).unwrap();
    tx.commit().unwrap();
    assert!(!graph.is_active(&path("room")).unwrap());
    assert!(!graph.is_active(&path("room.temp")).unwrap());
}

#[test]
fn test_rollback_runs_with_system_authority() {
    let (graph, db) = setup();
    let sys = Authority::System;
    graph.create(&path("room.temp"), &ResourceType::Float, &sys).unwrap();
    graph.activate(&path("room.temp"), false, &sys).unwrap();
    // 应用既不能写也不能删除
    graph.deny("app", &path("room"), GraphOp::Write);
    graph.deny("app", &path("room"), GraphOp::Delete);

    let extra = res("room.extra", ResourceType::Boolean);
    let mut tx = db.resource_transaction("app");
    tx.create(&extra).unwrap();
    tx.set_float_with(&res("room.temp", ResourceType::Float), 2.0, WriteConfiguration::Fail)
        .unwrap();
    let err = tx.commit().unwrap_err();

    let failure = err.operation_failure().unwrap();
    assert!(matches!(failure.cause, TransactionError::Graph(_)));
    assert!(failure.rollback.failures().next().is_none());
    assert!(!graph.exists(&extra.path));
}
