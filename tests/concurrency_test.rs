// 并发测试
// 测试多个线程同时提交事务时的可见性与锁互斥

use rand::Rng;
use rs_resourcedb::transactions::LockMode;
use rs_resourcedb::{
    Authority, MemGraph, ResourceDatabase, ResourceGraph, ResourcePath, ResourceRef, ResourceType,
    WriteConfiguration,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// 辅助函数：pair 下两个已激活的 Integer 资源 left、right
fn setup() -> ResourceDatabase {
    let graph = Arc::new(MemGraph::new());
    let sys = Authority::System;
    graph.create(&path("pair"), &ResourceType::complex("Pair"), &sys).unwrap();
    graph.create(&path("pair.left"), &ResourceType::Integer, &sys).unwrap();
    graph.create(&path("pair.right"), &ResourceType::Integer, &sys).unwrap();
    graph.activate(&path("pair"), true, &sys).unwrap();
    ResourceDatabase::from_graph(graph)
}

fn path(p: &str) -> ResourcePath {
    ResourcePath::parse(p).unwrap()
}

fn int(p: &str) -> ResourceRef {
    ResourceRef::new(p, ResourceType::Integer).unwrap()
}

#[test]
fn test_readers_never_see_half_written_pairs() {
    let db = Arc::new(setup());
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..200 {
                    let value: i32 = rng.gen_range(0..1_000_000);
                    let mut tx = db.resource_transaction(&format!("writer{}", i));
                    tx.set_integer_with(&int("pair.left"), value, WriteConfiguration::Fail)
                        .unwrap();
                    tx.set_integer_with(&int("pair.right"), value, WriteConfiguration::Fail)
                        .unwrap();
                    tx.commit().unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut checked = 0usize;
                while !stop.load(Ordering::Relaxed) || checked == 0 {
                    let mut tx = db.resource_transaction("reader");
                    let left = tx.get_integer(&int("pair.left")).unwrap();
                    let right = tx.get_integer(&int("pair.right")).unwrap();
                    tx.commit().unwrap();
                    assert_eq!(left.value().unwrap(), right.value().unwrap());

                    let mut batch = db.batch_transaction("reader");
                    batch.add_resources(&[int("pair.left"), int("pair.right")]).unwrap();
                    batch.read().unwrap();
                    assert_eq!(
                        batch.get_integer(&int("pair.left")).unwrap(),
                        batch.get_integer(&int("pair.right")).unwrap()
                    );
                    checked += 1;
                }
                checked
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }
}

#[test]
fn test_concurrent_batch_writes_are_linearized() {
    let db = Arc::new(setup());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for round in 0..50 {
                    let value = i * 1000 + round;
                    let mut batch = db.batch_transaction("batch");
                    batch.add_resources(&[int("pair.left"), int("pair.right")]).unwrap();
                    batch.set_integer(&int("pair.left"), value).unwrap();
                    batch.set_integer(&int("pair.right"), value).unwrap();
                    batch.write().unwrap();
                    // 写入后刷新的读值来自同一临界区
                    assert_eq!(
                        batch.get_integer(&int("pair.left")).unwrap(),
                        batch.get_integer(&int("pair.right")).unwrap()
                    );
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(
        db.read_value(&path("pair.left")).unwrap(),
        db.read_value(&path("pair.right")).unwrap()
    );
}

#[test]
fn test_commit_blocks_while_structure_lock_is_held() {
    let db = Arc::new(setup());
    let guard = db.locks().lock_structure(LockMode::Write);

    let worker_db = Arc::clone(&db);
    let worker = thread::spawn(move || {
        let mut tx = worker_db.resource_transaction("app");
        tx.exists(&int("pair.left")).unwrap();
        tx.commit().unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!worker.is_finished());
    drop(guard);
    worker.join().unwrap();
}

#[test]
fn test_value_readers_run_alongside_each_other() {
    let db = Arc::new(setup());
    let _value_read = db.locks().lock_value(LockMode::Read);
    let _structure_read = db.locks().lock_structure(LockMode::Read);

    // 另一个只读事务不受影响
    let worker_db = Arc::clone(&db);
    let reader = thread::spawn(move || {
        let mut tx = worker_db.resource_transaction("app");
        let left = tx.get_integer(&int("pair.left")).unwrap();
        tx.commit().unwrap();
        left.value().unwrap()
    });
    assert_eq!(reader.join().unwrap(), Some(0));
}
