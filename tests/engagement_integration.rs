//! Integration tests for the toggle ledger and counter projection
//!
//! File-backed databases are used where concurrency matters so that separate
//! connections contend for the SQLite write lock.

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use engagement_ledger::db::{counters, ledger, reference};
use engagement_ledger::{
    ActionKind, Config, EngagementDb, GroupBy, LedgerError, LifecycleState, SeedData, Services,
    StatisticsScope,
};
use tempfile::TempDir;

const SEED: &str = r#"{
    "colleges": [{"id": 2, "name": "Engineering"}],
    "departments": [{"id": 5, "collegeId": 2, "name": "Computer Science"}],
    "users": [
        {"id": 1, "name": "U1", "departmentId": 5},
        {"id": 2, "name": "U2", "departmentId": 5},
        {"id": 3, "name": "U3", "departmentId": 5},
        {"id": 4, "name": "U4"}
    ],
    "projects": [
        {"id": 100, "title": "T1", "ownerId": 1},
        {"id": 101, "title": "T2", "ownerId": 2}
    ]
}"#;

fn in_memory_services() -> Services {
    let db = Arc::new(EngagementDb::open_in_memory().unwrap());
    SeedData::from_json(SEED).unwrap().apply(&db).unwrap();
    Services::new(db, &Config::default())
}

fn open_file_db(temp: &TempDir) -> Arc<EngagementDb> {
    Arc::new(
        EngagementDb::open(&temp.path().join("engagement.db"), Duration::from_secs(5)).unwrap(),
    )
}

fn assert_conserved(db: &EngagementDb, target_id: i64) {
    db.with_conn(|conn| {
        let projected = counters::read(conn, target_id)?;
        for kind in ActionKind::ALL {
            let on_rows = ledger::count_on(conn, target_id, kind)?;
            assert_eq!(projected.get(kind), on_rows, "counter vs ledger for {}", kind);
            assert_eq!(
                counters::replay(conn, target_id, kind)?,
                on_rows,
                "delta log vs ledger for {}",
                kind
            );
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_end_to_end_like_sequence() {
    let services = in_memory_services();
    let engagement = &services.engagement;

    let t = engagement.toggle_on(1, 100, ActionKind::Like).unwrap();
    assert_eq!(t.counters.like_count, 1);

    let t = engagement.toggle_on(2, 100, ActionKind::Like).unwrap();
    assert_eq!(t.counters.like_count, 2);

    let t = engagement.toggle_off(1, 100, ActionKind::Like).unwrap();
    assert!(t.changed);
    assert_eq!(t.counters.like_count, 1);

    let rows = services
        .statistics
        .aggregate(&Default::default(), engagement_ledger::GroupBy::Total)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].metric_totals.like_count, 1);
    assert_eq!(rows[0].metric_totals.project_count, 2);

    assert_conserved(&services.db, 100);
}

#[test]
fn test_idempotent_toggles() {
    let services = in_memory_services();
    let engagement = &services.engagement;

    for _ in 0..3 {
        engagement
            .toggle_on(1, 100, ActionKind::RegistrationRecommend)
            .unwrap();
    }
    assert_eq!(engagement.counters(100).unwrap().registration_recommend_count, 1);

    for _ in 0..3 {
        engagement
            .toggle_off(1, 100, ActionKind::RegistrationRecommend)
            .unwrap();
    }
    assert_eq!(engagement.counters(100).unwrap().registration_recommend_count, 0);

    // Off without a prior on leaves no ledger row
    let t = engagement.toggle_off(2, 100, ActionKind::Like).unwrap();
    assert!(!t.changed);
    assert!(!t.on_state);
    assert_eq!(engagement.history(100).unwrap().len(), 1);
}

#[test]
fn test_conservation_after_interleavings() {
    let services = in_memory_services();
    let engagement = &services.engagement;

    // Deterministic pseudo-random walk over users, targets, kinds and switches
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    for _ in 0..400 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let r = seed >> 33;
        let user_id = 1 + (r % 4) as i64;
        let target_id = 100 + ((r >> 2) % 2) as i64;
        let kind = ActionKind::ALL[((r >> 3) % 3) as usize];
        if (r >> 5) % 2 == 0 {
            engagement.toggle_on(user_id, target_id, kind).unwrap();
        } else {
            engagement.toggle_off(user_id, target_id, kind).unwrap();
        }
    }

    assert_conserved(&services.db, 100);
    assert_conserved(&services.db, 101);
}

#[test]
fn test_concurrent_toggle_on_counts_once() {
    let temp = TempDir::new().unwrap();
    let first = open_file_db(&temp);
    SeedData::from_json(SEED).unwrap().apply(&first).unwrap();
    // Second handle owns its own writer connection
    let second = open_file_db(&temp);

    let config = Config::default();
    let handles = [
        Arc::new(Services::new(first.clone(), &config)),
        Arc::new(Services::new(second, &config)),
    ];

    const THREADS: usize = 16;
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let services = handles[i % 2].clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                services.engagement.toggle_on(3, 100, ActionKind::Like)
            })
        })
        .collect();

    let mut changed = 0;
    for worker in workers {
        let transition = worker.join().unwrap().unwrap();
        assert!(transition.on_state);
        if transition.changed {
            changed += 1;
        }
    }

    assert_eq!(changed, 1);
    assert_eq!(handles[0].engagement.counters(100).unwrap().like_count, 1);
    assert_conserved(&first, 100);
}

#[test]
fn test_concurrent_mixed_toggles_stay_conserved() {
    let temp = TempDir::new().unwrap();
    let db = open_file_db(&temp);
    SeedData::from_json(SEED).unwrap().apply(&db).unwrap();
    let services = Arc::new(Services::new(db.clone(), &Config::default()));

    let workers: Vec<_> = (1..=4)
        .map(|user_id| {
            let services = services.clone();
            thread::spawn(move || {
                for round in 0..25 {
                    let kind = ActionKind::ALL[round % 3];
                    if round % 2 == 0 {
                        services.engagement.toggle_on(user_id, 101, kind).unwrap();
                    } else {
                        services.engagement.toggle_off(user_id, 101, kind).unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_conserved(&db, 101);
}

#[test]
fn test_soft_deleted_target_rejects_toggles_but_stays_auditable() {
    let services = in_memory_services();
    let engagement = &services.engagement;

    engagement.toggle_on(1, 101, ActionKind::Like).unwrap();
    engagement.toggle_on(2, 101, ActionKind::FoundingRecommend).unwrap();

    services
        .db
        .with_conn_mut(|conn| reference::transition_project_state(conn, 101, LifecycleState::Deleted))
        .unwrap();

    assert!(matches!(
        engagement.toggle_on(3, 101, ActionKind::Like),
        Err(LedgerError::NotFound(_))
    ));
    assert!(matches!(
        engagement.toggle_off(1, 101, ActionKind::Like),
        Err(LedgerError::NotFound(_))
    ));

    let history = engagement.history(101).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|row| row.on_state));

    let counters = engagement.counters(101).unwrap();
    assert_eq!(counters.like_count, 1);
    assert_eq!(counters.founding_recommend_count, 1);
}

#[test]
fn test_reconcile_repairs_out_of_band_drift() {
    let services = in_memory_services();
    let engagement = &services.engagement;

    engagement.toggle_on(1, 100, ActionKind::Like).unwrap();
    engagement.toggle_on(2, 100, ActionKind::Like).unwrap();

    services
        .db
        .with_conn_mut(|conn| {
            conn.execute(
                "UPDATE target_counters SET like_count = 9 WHERE target_id = 100",
                [],
            )?;
            Ok(())
        })
        .unwrap();

    let report = engagement.reconcile(100).unwrap();
    assert!(report.corrected());
    assert_eq!(report.before.like_count, 9);
    assert_eq!(report.after.like_count, 2);
    assert_conserved(&services.db, 100);

    assert!(!engagement.reconcile(100).unwrap().corrected());
}

#[test]
fn test_viewer_state_reflects_each_kind() {
    let services = in_memory_services();
    let engagement = &services.engagement;

    engagement.toggle_on(4, 100, ActionKind::Like).unwrap();
    engagement.toggle_on(4, 100, ActionKind::RegistrationRecommend).unwrap();
    engagement.toggle_off(4, 100, ActionKind::Like).unwrap();

    let state = engagement.viewer_state(4, 100).unwrap();
    assert!(!state.states[&ActionKind::Like]);
    assert!(!state.states[&ActionKind::FoundingRecommend]);
    assert!(state.states[&ActionKind::RegistrationRecommend]);
}

#[test]
fn test_toggle_proceeds_while_a_reader_snapshot_is_open() {
    let temp = TempDir::new().unwrap();
    let db = open_file_db(&temp);
    SeedData::from_json(SEED).unwrap().apply(&db).unwrap();
    let services = Arc::new(Services::new(db.clone(), &Config::default()));

    let (snapshot_tx, snapshot_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    // Holds a pooled reader inside an open read transaction, as a long
    // aggregation does, until released
    let reader_db = db.clone();
    let reader = thread::spawn(move || {
        reader_db
            .with_conn(|conn| {
                let snapshot = conn.unchecked_transaction()?;
                let before = counters::read(&snapshot, 100)?;
                snapshot_tx.send(()).ok();
                release_rx.recv().ok();
                let after = counters::read(&snapshot, 100)?;
                Ok((before.like_count, after.like_count))
            })
            .unwrap()
    });
    snapshot_rx.recv().unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let writer_services = services.clone();
    thread::spawn(move || {
        let result = writer_services.engagement.toggle_on(1, 100, ActionKind::Like);
        done_tx.send(result).ok();
    });

    let transition = done_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("toggle blocked behind an open reader")
        .unwrap();
    assert!(transition.changed);
    assert_eq!(transition.counters.like_count, 1);

    // Other readers are not serialized behind the held one either
    let rows = services
        .statistics
        .aggregate(&StatisticsScope::default(), GroupBy::Total)
        .unwrap();
    assert_eq!(rows[0].metric_totals.like_count, 1);

    release_tx.send(()).unwrap();
    // The held snapshot never saw the concurrent commit
    assert_eq!(reader.join().unwrap(), (0, 0));
    assert_conserved(&db, 100);
}
