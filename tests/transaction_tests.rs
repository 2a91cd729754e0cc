mod common;

use common::*;
use fstxn::TxnError;
use fstxn::config::EngineConfig;
use fstxn::fs::{OperationSpec, Outcome, Phase, TransactionManager, TransactionState};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

#[test]
fn test_failed_delete_rolls_back_create_and_write() {
    let (_temp, root) = workspace();
    let manager = manager(&root);

    let report = manager
        .execute_transaction(
            &[
                OperationSpec::create("a/x.txt", "hi"),
                OperationSpec::write("a/x.txt", "bye"),
                OperationSpec::delete("a/missing.txt"),
            ],
            true,
        )
        .unwrap();

    assert_eq!(report.status, TransactionState::RolledBack);
    assert_eq!(report.indexes_with(Outcome::Undone), vec![0, 1]);
    assert_eq!(report.indexes_with(Outcome::Failed), vec![2]);
    let summary = report.rollback.as_ref().unwrap();
    assert_eq!(summary.rolled_back, vec![1, 0]);
    assert!(summary.failed.is_empty());

    assert!(!root.join("a/x.txt").exists());
    assert!(!root.join("a").exists());
}

#[test]
fn test_chained_moves_commit() {
    let (_temp, root) = workspace();
    fs::write(root.join("a"), "payload").unwrap();

    let report = manager(&root)
        .execute_transaction(
            &[OperationSpec::r#move("a", "b"), OperationSpec::r#move("b", "c")],
            true,
        )
        .unwrap();

    assert!(report.is_committed());
    assert!(!root.join("a").exists());
    assert!(!root.join("b").exists());
    assert_eq!(fs::read_to_string(root.join("c")).unwrap(), "payload");
}

#[test]
fn test_chained_moves_roll_back_to_source() {
    let (_temp, root) = workspace();
    fs::write(root.join("a"), "payload").unwrap();
    let platform = FaultyFs::new().failing(Primitive::Rename, root.join("c"));

    let report = manager(&root)
        .with_platform(Arc::new(platform))
        .execute_transaction(
            &[OperationSpec::r#move("a", "b"), OperationSpec::r#move("b", "c")],
            true,
        )
        .unwrap();

    assert_eq!(report.status, TransactionState::RolledBack);
    assert_eq!(fs::read_to_string(root.join("a")).unwrap(), "payload");
    assert!(!root.join("b").exists());
    assert!(!root.join("c").exists());
}

#[test]
fn test_failed_partial_leaves_applied_operations() {
    let (_temp, root) = workspace();

    let report = manager(&root)
        .execute_transaction(
            &[
                OperationSpec::create("first.txt", "1"),
                OperationSpec::create("second.txt", "2"),
                OperationSpec::delete("missing.txt"),
                OperationSpec::create("never.txt", "3"),
            ],
            false,
        )
        .unwrap();

    assert_eq!(report.status, TransactionState::FailedPartial);
    assert_eq!(report.indexes_with(Outcome::Applied), vec![0, 1]);
    assert_eq!(report.indexes_with(Outcome::Failed), vec![2]);
    assert_eq!(report.indexes_with(Outcome::Pending), vec![3]);
    assert!(root.join("first.txt").exists());
    assert!(root.join("second.txt").exists());
    assert!(!root.join("never.txt").exists());
}

#[test]
fn test_failed_undo_gives_partial_rollback() {
    let (_temp, root) = workspace();
    let stuck = root.join("stuck.txt");
    let platform = FaultyFs::new().failing(Primitive::RemoveFile, &stuck);

    let report = manager(&root)
        .with_platform(Arc::new(platform))
        .execute_transaction(
            &[
                OperationSpec::create("free.txt", "a"),
                OperationSpec::create("stuck.txt", "b"),
                OperationSpec::delete("missing.txt"),
            ],
            true,
        )
        .unwrap();

    assert_eq!(report.status, TransactionState::PartiallyRolledBack);
    assert_eq!(report.operations[0].outcome, Outcome::Undone);
    assert_eq!(report.operations[1].outcome, Outcome::UndoFailed);
    assert!(report.operations[1].undo_error.is_some());
    assert_eq!(report.operations[2].outcome, Outcome::Failed);

    let summary = report.rollback.as_ref().unwrap();
    assert_eq!(summary.rolled_back, vec![0]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].index, 1);

    assert!(!root.join("free.txt").exists());
    assert!(stuck.exists());
}

#[test]
fn test_mid_run_write_failure_restores_prior_content() {
    let (_temp, root) = workspace();
    fs::write(root.join("config.txt"), "original").unwrap();
    let platform = FaultyFs::new().failing(Primitive::Write, root.join("locked.txt"));

    let report = manager(&root)
        .with_platform(Arc::new(platform))
        .execute_transaction(
            &[
                OperationSpec::write("config.txt", "changed"),
                OperationSpec::write("locked.txt", "x"),
            ],
            true,
        )
        .unwrap();

    assert_eq!(report.status, TransactionState::RolledBack);
    assert!(report.failure().unwrap().error.as_ref().unwrap().contains("injected"));
    assert_eq!(fs::read_to_string(root.join("config.txt")).unwrap(), "original");
    assert!(!root.join("locked.txt").exists());
}

#[test]
fn test_deleted_directory_is_restored() {
    let (_temp, root) = workspace();
    let dir = root.join("tree");
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("top.txt"), "top").unwrap();
    fs::write(dir.join("nested/deep.txt"), "deep").unwrap();

    let report = manager(&root)
        .execute_transaction(
            &[OperationSpec::delete("tree"), OperationSpec::delete("missing")],
            true,
        )
        .unwrap();

    assert_eq!(report.status, TransactionState::RolledBack);
    assert_eq!(fs::read_to_string(dir.join("top.txt")).unwrap(), "top");
    assert_eq!(fs::read_to_string(dir.join("nested/deep.txt")).unwrap(), "deep");
}

#[test]
fn test_copy_over_existing_is_restored() {
    let (_temp, root) = workspace();
    fs::write(root.join("src.txt"), "new").unwrap();
    fs::write(root.join("dst.txt"), "old").unwrap();

    let report = manager(&root)
        .execute_transaction(
            &[
                OperationSpec::copy("src.txt", "dst.txt"),
                OperationSpec::delete("missing"),
            ],
            true,
        )
        .unwrap();

    assert_eq!(report.status, TransactionState::RolledBack);
    assert_eq!(fs::read_to_string(root.join("dst.txt")).unwrap(), "old");
    assert_eq!(fs::read_to_string(root.join("src.txt")).unwrap(), "new");
}

#[cfg(unix)]
#[test]
fn test_chmod_is_reverted() {
    use std::os::unix::fs::PermissionsExt;

    let (_temp, root) = workspace();
    let file = root.join("script.sh");
    fs::write(&file, "#!/bin/sh").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

    let report = manager(&root)
        .execute_transaction(
            &[
                OperationSpec::chmod("script.sh", 0o700),
                OperationSpec::delete("missing"),
            ],
            true,
        )
        .unwrap();

    assert_eq!(report.status, TransactionState::RolledBack);
    let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode, 0o644);
}

#[test]
fn test_cache_invalidated_once_per_touched_path() {
    let (_temp, root) = workspace();
    let cache = Arc::new(RecordingCache::default());
    let manager = manager(&root).with_cache(cache.clone());

    manager
        .execute_transaction(
            &[
                OperationSpec::create("x.txt", "1"),
                OperationSpec::write("x.txt", "2"),
                OperationSpec::delete("missing.txt"),
            ],
            true,
        )
        .unwrap();

    let mut invalidated = cache.paths();
    invalidated.sort();
    assert_eq!(invalidated, vec![root.join("missing.txt"), root.join("x.txt")]);
}

#[test]
fn test_cache_not_invalidated_when_validation_fails() {
    let (_temp, root) = workspace();
    let cache = Arc::new(RecordingCache::default());
    let manager = manager(&root).with_cache(cache.clone());

    let result = manager.execute_transaction(&[OperationSpec::copy("d", "d/inner")], true);

    assert!(matches!(result, Err(TxnError::Validation(_))));
    assert!(cache.paths().is_empty());
}

#[test]
fn test_monitor_sees_every_apply_and_undo() {
    let (_temp, root) = workspace();
    let monitor = Arc::new(RecordingMonitor::default());

    let report = manager(&root)
        .with_monitor(monitor.clone())
        .execute_transaction(
            &[
                OperationSpec::create("x.txt", "hi"),
                OperationSpec::write("x.txt", "bye!"),
                OperationSpec::delete("missing.txt"),
            ],
            true,
        )
        .unwrap();

    let records = monitor.records();
    let steps: Vec<_> = records.iter().map(|r| (r.phase, r.index, r.success)).collect();
    assert_eq!(
        steps,
        vec![
            (Phase::Apply, 0, true),
            (Phase::Apply, 1, true),
            (Phase::Apply, 2, false),
            (Phase::Undo, 1, true),
            (Phase::Undo, 0, true),
        ]
    );

    assert!(records.iter().all(|r| r.transaction_id == report.transaction_id));
    assert_eq!(records[0].size, Some(2));
    assert_eq!(records[1].size, Some(4));
    assert!(records[2].error.is_some());
    assert_eq!(records[2].path, root.join("missing.txt"));
}

#[test]
fn test_monitor_reports_size_of_deleted_content() {
    let (_temp, root) = workspace();
    fs::create_dir(root.join("dir")).unwrap();
    fs::write(root.join("dir/a.txt"), "hello").unwrap();
    fs::write(root.join("dir/b.txt"), "world!").unwrap();
    let monitor = Arc::new(RecordingMonitor::default());

    let report = manager(&root)
        .with_monitor(monitor.clone())
        .execute_transaction(&[OperationSpec::delete("dir")], true)
        .unwrap();

    assert!(report.is_committed());
    assert_eq!(monitor.records()[0].size, Some(11));
}

#[test]
fn test_lock_timeout_mutates_nothing() {
    let (_temp, root) = workspace();
    let manager = TransactionManager::new(
        EngineConfig::default()
            .with_base_dir(&root)
            .with_lock_timeout(Duration::from_millis(50)),
    );

    let _held = manager
        .lock_manager()
        .acquire(Uuid::new_v4(), [root.join("x.txt")], Duration::ZERO)
        .unwrap();

    let err = manager
        .execute_transaction(&[OperationSpec::create("x.txt", "hi")], true)
        .unwrap_err();

    assert!(matches!(err, TxnError::LockTimeout { .. }));
    assert!(err.is_side_effect_free());
    assert!(!root.join("x.txt").exists());
    assert_eq!(manager.in_flight(), 0);
}

#[test]
fn test_locked_ancestor_blocks_descendant() {
    let (_temp, root) = workspace();
    let manager = TransactionManager::new(
        EngineConfig::default()
            .with_base_dir(&root)
            .with_lock_timeout(Duration::from_millis(20)),
    );

    let _held = manager
        .lock_manager()
        .acquire(Uuid::new_v4(), [root.join("dir")], Duration::ZERO)
        .unwrap();

    let result = manager.execute_transaction(&[OperationSpec::create("dir/f.txt", "")], true);
    assert!(matches!(result, Err(TxnError::LockTimeout { .. })));
}

#[test]
fn test_disjoint_paths_do_not_wait() {
    let (_temp, root) = workspace();
    let manager = TransactionManager::new(
        EngineConfig::default()
            .with_base_dir(&root)
            .with_lock_timeout(Duration::ZERO),
    );

    let _held = manager
        .lock_manager()
        .acquire(Uuid::new_v4(), [root.join("a.txt")], Duration::ZERO)
        .unwrap();

    let report = manager
        .execute_transaction(&[OperationSpec::create("b.txt", "")], true)
        .unwrap();
    assert!(report.is_committed());
}

#[test]
fn test_overlapping_transactions_never_interleave() {
    let (_temp, root) = workspace();
    let monitor = Arc::new(RecordingMonitor::default());
    let manager = Arc::new(
        manager(&root)
            .with_platform(Arc::new(
                FaultyFs::new().with_write_delay(Duration::from_millis(5)),
            ))
            .with_monitor(monitor.clone()),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager
                    .execute_transaction(
                        &[
                            OperationSpec::write("shared.txt", format!("{}-1", i)),
                            OperationSpec::write("shared.txt", format!("{}-2", i)),
                            OperationSpec::write(format!("own-{}.txt", i), "x"),
                        ],
                        true,
                    )
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_committed());
    }

    let records = monitor.records();
    assert_eq!(records.len(), 12);
    for run in records.chunks(3) {
        assert!(run.iter().all(|r| r.transaction_id == run[0].transaction_id));
    }

    let last = fs::read_to_string(root.join("shared.txt")).unwrap();
    assert!(last.ends_with("-2"));
}

#[test]
fn test_strict_mode_rejects_before_any_mutation() {
    let (_temp, root) = workspace();
    let manager = TransactionManager::new(
        EngineConfig::default()
            .with_base_dir(&root)
            .with_strict_preflight(true),
    );

    let err = manager
        .execute_transaction(
            &[
                OperationSpec::create("a/x.txt", "hi"),
                OperationSpec::write("a/x.txt", "bye"),
                OperationSpec::delete("a/missing.txt"),
            ],
            true,
        )
        .unwrap_err();

    match err {
        TxnError::Validation(e) => assert_eq!(e.index(), Some(2)),
        other => panic!("expected validation error, got {other}"),
    }
    assert!(!root.join("a").exists());
    assert_eq!(manager.lock_manager().held_count(), 0);
}

#[test]
fn test_invalid_descriptors_are_rejected_at_submit() {
    let (_temp, root) = workspace();
    let manager = manager(&root);

    let missing_content = OperationSpec {
        content: None,
        ..OperationSpec::write("x.txt", "")
    };
    let err = manager.submit(&[missing_content], true).unwrap_err();
    assert!(matches!(err, TxnError::Validation(_)));

    let err = manager
        .submit(&[OperationSpec::create("../../../../../../../../..", "")], true)
        .unwrap_err();
    assert!(matches!(err, TxnError::Validation(_)));
    assert_eq!(manager.in_flight(), 0);
}

#[test]
fn test_created_parent_is_locked_until_rollback() {
    let (_temp, root) = workspace();
    let manager = Arc::new(manager(&root).with_platform(Arc::new(
        FaultyFs::new().with_write_delay(Duration::from_millis(50)),
    )));

    let first = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            manager
                .execute_transaction(
                    &[
                        OperationSpec::create("a/x.txt", "x"),
                        OperationSpec::create("z.txt", "z"),
                        OperationSpec::delete("missing.txt"),
                    ],
                    true,
                )
                .unwrap()
        })
    };

    while !root.join("a").exists() {
        thread::yield_now();
    }

    let second = manager
        .execute_transaction(&[OperationSpec::create("a/y.txt", "y")], true)
        .unwrap();

    assert_eq!(first.join().unwrap().status, TransactionState::RolledBack);
    assert!(second.is_committed());
    assert_eq!(fs::read_to_string(root.join("a/y.txt")).unwrap(), "y");
    assert!(!root.join("a/x.txt").exists());
    assert!(!root.join("z.txt").exists());
}

#[test]
fn test_drain_waits_for_running_transaction() {
    let (_temp, root) = workspace();
    let manager = Arc::new(manager(&root).with_platform(Arc::new(
        FaultyFs::new().with_write_delay(Duration::from_millis(100)),
    )));

    let id = manager
        .submit(&[OperationSpec::create("slow.txt", "x")], true)
        .unwrap();
    let worker = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.run(id).unwrap())
    };

    while manager.status(id) == Some(TransactionState::Pending) {
        thread::yield_now();
    }

    assert!(manager.drain(Duration::from_secs(5)));
    assert_eq!(manager.in_flight(), 0);
    assert!(root.join("slow.txt").exists());
    assert!(worker.join().unwrap().is_committed());
}

#[test]
fn test_report_serializes_for_callers() {
    let (_temp, root) = workspace();
    let report = manager(&root)
        .execute_transaction(&[OperationSpec::create("x.txt", "hi")], true)
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["status"], "COMMITTED");
    assert_eq!(json["transactionId"], report.transaction_id.to_string());
    assert_eq!(json["operations"][0]["kind"], "create");
    assert_eq!(json["operations"][0]["outcome"], "applied");
    assert!(json["completedAt"].is_string());
}
