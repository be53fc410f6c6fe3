// 回滚测试
// 测试失败动作之前的动作按逆序回滚、回滚步骤失败后继续、回滚报告状态

use rs_resourcedb::storage::GraphOp;
use rs_resourcedb::transactions::{RollbackStatus, TransactionError};
use rs_resourcedb::{
    Authority, MemGraph, ResourceDatabase, ResourceGraph, ResourcePath, ResourceRef, ResourceType, Value,
    WriteConfiguration,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// 辅助函数：按 RUST_LOG 输出日志
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// 辅助函数：房间 room 下有两个已激活的 Float 资源 a=1.0、b=2.0
fn setup() -> (Arc<MemGraph>, ResourceDatabase) {
    init_logging();
    let graph = Arc::new(MemGraph::new());
    let sys = Authority::System;
    graph.create(&path("room"), &ResourceType::complex("Room"), &sys).unwrap();
    for (name, value) in [("room.a", 1.0), ("room.b", 2.0)] {
        graph.create(&path(name), &ResourceType::Float, &sys).unwrap();
        graph.set_value(&path(name), Value::Float(value), &sys).unwrap();
        graph.activate(&path(name), false, &sys).unwrap();
    }
    let db = ResourceDatabase::from_graph(graph.clone());
    (graph, db)
}

fn path(p: &str) -> ResourcePath {
    ResourcePath::parse(p).unwrap()
}

fn float(p: &str) -> ResourceRef {
    ResourceRef::new(p, ResourceType::Float).unwrap()
}

#[test]
fn test_rollback_in_descending_order() {
    let (graph, db) = setup();
    let mut tx = db.resource_transaction("app");
    tx.set_float_with(&float("room.a"), 10.0, WriteConfiguration::Fail).unwrap();
    tx.set_float_with(&float("room.b"), 20.0, WriteConfiguration::Fail).unwrap();
    tx.create(&ResourceRef::new("room.flag", ResourceType::Boolean).unwrap())
        .unwrap();
    tx.set_float_with(&float("room.missing"), 1.0, WriteConfiguration::Fail)
        .unwrap();
    tx.set_float_with(&float("room.a"), 99.0, WriteConfiguration::Fail).unwrap();

    let err = tx.commit().unwrap_err();
    let failure = err.operation_failure().unwrap();
    assert_eq!(failure.resource, path("room.missing"));
    assert!(matches!(failure.cause, TransactionError::VirtualResource(_)));

    // 失败动作（序号 3）本身不回滚，其后的动作从未执行
    assert_eq!(failure.rollback.rolled_back_indices(), vec![2, 1, 0]);
    assert_eq!(failure.rollback.status(), RollbackStatus::Full);

    assert_eq!(graph.get_value(&path("room.a")).unwrap(), Value::Float(1.0));
    assert_eq!(graph.get_value(&path("room.b")).unwrap(), Value::Float(2.0));
    assert!(!graph.exists(&path("room.flag")));
}

#[test]
fn test_failed_rollback_step_does_not_stop_rollback() {
    let (graph, db) = setup();
    // 中间动作的回滚（删除新建资源）会失败
    graph.inject_failure(&path("room.x"), GraphOp::Delete);

    let mut tx = db.resource_transaction("app");
    tx.set_float_with(&float("room.a"), 10.0, WriteConfiguration::Fail).unwrap();
    tx.create(&ResourceRef::new("room.x", ResourceType::Boolean).unwrap())
        .unwrap();
    tx.set_float_with(&float("room.b"), 20.0, WriteConfiguration::Fail).unwrap();
    tx.set_float_with(&float("room.missing"), 1.0, WriteConfiguration::Fail)
        .unwrap();

    let err = tx.commit().unwrap_err();
    let report = &err.operation_failure().unwrap().rollback;
    assert_eq!(report.rolled_back_indices(), vec![2, 1, 0]);
    let failed: Vec<usize> = report.failures().map(|e| e.index).collect();
    assert_eq!(failed, vec![1]);
    assert_eq!(report.status(), RollbackStatus::Partial);

    // 两侧的动作都已回滚
    assert_eq!(graph.get_value(&path("room.a")).unwrap(), Value::Float(1.0));
    assert_eq!(graph.get_value(&path("room.b")).unwrap(), Value::Float(2.0));
    assert!(graph.exists(&path("room.x")));

    // 故障清除后可以删除残留的资源
    graph.clear_failures();
    let mut tx = db.resource_transaction("app");
    tx.delete(&ResourceRef::new("room.x", ResourceType::Boolean).unwrap())
        .unwrap();
    tx.commit().unwrap();
    assert!(!graph.exists(&path("room.x")));
}

#[test]
fn test_rollback_not_achieved() {
    let (graph, db) = setup();
    graph.inject_failure(&path("room.x"), GraphOp::Delete);
    graph.inject_failure(&path("room.y"), GraphOp::Write);
    graph.inject_failure(&path("room.y"), GraphOp::Delete);

    let mut tx = db.resource_transaction("app");
    tx.create(&ResourceRef::new("room.x", ResourceType::Boolean).unwrap())
        .unwrap();
    // 创建成功但写入失败，失败动作自身的撤销也失败
    tx.set_float_with(&float("room.y"), 1.0, WriteConfiguration::Create).unwrap();

    let err = tx.commit().unwrap_err();
    let failure = err.operation_failure().unwrap();
    assert!(failure.rollback.compensation_error.is_some());
    assert_eq!(failure.rollback.status(), RollbackStatus::NotAchieved);
    assert!(graph.exists(&path("room.x")));
    assert!(graph.exists(&path("room.y")));
}

#[test]
fn test_failing_action_partial_effects_are_undone() {
    let (graph, db) = setup();
    graph.inject_failure(&path("room.y"), GraphOp::Write);

    let mut tx = db.resource_transaction("app");
    tx.set_float_with(&float("room.y"), 1.0, WriteConfiguration::CreateAndActivate)
        .unwrap();
    let err = tx.commit().unwrap_err();
    let failure = err.operation_failure().unwrap();
    assert!(failure.rollback.entries.is_empty());
    assert_eq!(failure.rollback.status(), RollbackStatus::Full);
    assert!(!graph.exists(&path("room.y")));
}

#[test]
fn test_reads_after_failure_are_not_executed() {
    let (_graph, db) = setup();
    let mut tx = db.resource_transaction("app");
    let before = tx.get_float(&float("room.a")).unwrap();
    tx.set_float_with(&float("room.missing"), 1.0, WriteConfiguration::Fail)
        .unwrap();
    let after = tx.get_float(&float("room.b")).unwrap();

    assert!(tx.commit().is_err());
    assert_eq!(before.value().unwrap(), Some(1.0));
    assert!(matches!(after.value(), Err(TransactionError::NotExecuted)));
    assert!(tx.is_empty());
}

#[test]
fn test_failure_message_names_action_and_resource() {
    let (_graph, db) = setup();
    let mut tx = db.resource_transaction("app");
    tx.set_float_with(&float("room.missing"), 1.0, WriteConfiguration::Fail)
        .unwrap();
    let err = tx.commit().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Write"));
    assert!(message.contains("room.missing"));
}
