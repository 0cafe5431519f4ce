//! # Ledger Scenario Tests
//!
//! End-to-end grant/revoke behavior against both storage backends,
//! including concurrent grants against one target.

use stampcard_core::{
    Actor, Ledger, LedgerError, Role, Snapshot, StampId, VerifiedIdentity,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

const TARGET: &str = "target@jeohyeon.hs.kr";
const MANAGER: &str = "manager@jeohyeon.hs.kr";

fn admin() -> Actor {
    Actor::new("admin@jeohyeon.hs.kr", Role::Admin)
}

fn slot(n: u8) -> StampId {
    StampId::new(n).expect("slot in range")
}

/// Both backends, with the temp dir kept alive for the redb one.
fn backends() -> Vec<(Ledger, Option<TempDir>)> {
    let dir = tempfile::tempdir().expect("temp dir");
    let redb = Ledger::with_redb(dir.path().join("ledger.redb")).expect("open redb");
    vec![(Ledger::in_memory(), None), (redb, Some(dir))]
}

fn register(ledger: &Ledger, id: &str, email: &str, role: Role) -> Actor {
    ledger
        .login(&VerifiedIdentity::new(id, email, ""))
        .expect("login");
    if role != Role::Student {
        ledger.set_role(&admin(), email, role).expect("set role");
    }
    ledger.actor(id).expect("actor")
}

fn seed(ledger: &Ledger) -> Actor {
    register(ledger, "target", TARGET, Role::Student);
    register(ledger, "manager", MANAGER, Role::Manager)
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn manager_quota_scenario() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        for n in 1..=5 {
            ledger
                .grant(&admin(), TARGET, Some(&format!("stamp{}", n)), false)
                .expect("seed slot");
        }

        // First grant lands on the lowest free slot and is recorded
        let granted = ledger.grant(&manager, TARGET, None, true).expect("grant");
        assert_eq!(granted, slot(6));
        let history = ledger.grant_history(&admin()).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].manager_email, MANAGER);
        assert_eq!(history[0].target_email, TARGET);
        assert_eq!(history[0].stamp_id, slot(6));

        // Second grant is refused although slots are free
        assert!(matches!(
            ledger.grant(&manager, TARGET, None, true),
            Err(LedgerError::LimitExceeded { .. })
        ));

        // Revoke frees both the slot and the quota
        let outcome = ledger.revoke(&admin(), TARGET, "stamp6").expect("revoke");
        assert!(outcome.was_granted);
        assert!(outcome.released.is_some());
        assert!(!ledger.stamp_set(&admin(), Some(TARGET)).expect("card").get(slot(6)));
        assert!(ledger.grant_history(&admin()).expect("history").is_empty());

        let again = ledger.grant(&manager, TARGET, None, true).expect("regrant");
        assert_eq!(again, slot(6));
    }
}

#[test]
fn manager_self_grant_consumes_quota() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        assert_eq!(
            ledger.grant(&manager, MANAGER, None, true).expect("self grant"),
            slot(1)
        );
        assert!(matches!(
            ledger.grant(&manager, MANAGER, None, true),
            Err(LedgerError::LimitExceeded { .. })
        ));
        // Quota is per target: the student is still available
        assert_eq!(
            ledger.grant(&manager, TARGET, None, true).expect("grant"),
            slot(1)
        );
    }
}

#[test]
fn admin_grants_ignore_manager_history() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        ledger.grant(&manager, TARGET, None, true).expect("manager grant");

        for expected in 2..=4 {
            let granted = ledger.grant(&admin(), TARGET, None, true).expect("admin grant");
            assert_eq!(granted, slot(expected));
        }
        ledger
            .grant(&admin(), TARGET, Some("stamp30"), false)
            .expect("admin specific");

        let history = ledger.grant_history(&admin()).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].manager_email, MANAGER);
    }
}

#[test]
fn admin_grants_do_not_consume_manager_quota() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        ledger.grant(&admin(), TARGET, None, true).expect("admin grant");
        ledger
            .grant(&admin(), TARGET, Some("stamp2"), false)
            .expect("admin specific");

        // History-based quota: earlier admin stamps do not block the manager
        let granted = ledger.grant(&manager, TARGET, None, true).expect("manager grant");
        assert_eq!(granted, slot(3));
    }
}

#[test]
fn revoke_of_admin_slot_leaves_manager_history() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        ledger.grant(&manager, TARGET, None, true).expect("manager grant");
        ledger
            .grant(&admin(), TARGET, Some("stamp9"), false)
            .expect("admin specific");

        let outcome = ledger.revoke(&admin(), TARGET, "stamp9").expect("revoke");
        assert!(outcome.released.is_none());
        assert_eq!(ledger.grant_history(&admin()).expect("history").len(), 1);

        // Revoking an already clear slot is a no-op
        let outcome = ledger.revoke(&admin(), TARGET, "stamp9").expect("revoke");
        assert!(!outcome.was_granted);
    }
}

#[test]
fn full_card_reports_all_slots_taken() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        for _ in 0..34 {
            ledger.grant(&admin(), TARGET, None, true).expect("fill");
        }
        assert!(ledger.stamp_set(&admin(), Some(TARGET)).expect("card").is_complete());
        assert!(matches!(
            ledger.grant(&admin(), TARGET, None, true),
            Err(LedgerError::AllSlotsTaken { .. })
        ));
        assert!(matches!(
            ledger.grant(&manager, TARGET, None, true),
            Err(LedgerError::AllSlotsTaken { .. })
        ));
        // The failed manager grant wrote no history
        assert!(ledger.grant_history(&admin()).expect("history").is_empty());
    }
}

#[test]
fn unknown_target_is_not_created() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        assert!(matches!(
            ledger.grant(&manager, "ghost@jeohyeon.hs.kr", None, true),
            Err(LedgerError::TargetNotFound(_))
        ));
        assert!(matches!(
            ledger.revoke(&admin(), "ghost@jeohyeon.hs.kr", "stamp1"),
            Err(LedgerError::TargetNotFound(_))
        ));
        assert_eq!(ledger.list_users(&admin()).expect("users").len(), 2);
    }
}

#[test]
fn emails_match_case_insensitively() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        ledger
            .grant(&manager, "  TARGET@Jeohyeon.HS.kr", None, true)
            .expect("grant");
        assert!(matches!(
            ledger.grant(&manager, TARGET, None, true),
            Err(LedgerError::LimitExceeded { .. })
        ));
    }
}

#[test]
fn reset_clears_cards_and_history() {
    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        ledger.grant(&manager, TARGET, None, true).expect("grant");
        ledger.grant(&admin(), MANAGER, None, true).expect("grant");

        let summary = ledger.reset_all(&admin()).expect("reset");
        assert_eq!(summary.users_reset, 2);
        assert_eq!(summary.grants_deleted, 1);
        for user in ledger.list_users(&admin()).expect("users") {
            assert_eq!(user.stamps.count_granted(), 0);
        }

        // Quota is free again after a reset
        ledger.grant(&manager, TARGET, None, true).expect("grant after reset");
    }
}

#[test]
fn snapshot_restores_across_backends() {
    let source = Ledger::in_memory();
    let manager = seed(&source);
    source.grant(&manager, TARGET, None, true).expect("grant");
    let bytes = source.snapshot().expect("snapshot").to_bytes().expect("encode");

    let dir = tempfile::tempdir().expect("temp dir");
    let target = Ledger::with_redb(dir.path().join("restored.redb")).expect("open redb");
    target
        .restore(Snapshot::from_bytes(&bytes).expect("decode"))
        .expect("restore");

    assert!(target.is_persistent());
    assert_eq!(target.grant_history(&admin()).expect("history").len(), 1);
    let restored_manager = target.actor("manager").expect("actor");
    assert!(matches!(
        target.grant(&restored_manager, TARGET, None, true),
        Err(LedgerError::LimitExceeded { .. })
    ));
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn concurrent_grants_get_distinct_slots() {
    const THREADS: usize = 16;

    for (ledger, _dir) in backends() {
        register(&ledger, "target", TARGET, Role::Student);
        let managers: Vec<Actor> = (0..THREADS)
            .map(|i| {
                register(
                    &ledger,
                    &format!("m{}", i),
                    &format!("m{}@jeohyeon.hs.kr", i),
                    Role::Manager,
                )
            })
            .collect();

        let ledger = Arc::new(ledger);
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = managers
            .into_iter()
            .map(|manager| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ledger.grant(&manager, TARGET, None, true)
                })
            })
            .collect();

        let slots: BTreeSet<StampId> = handles
            .into_iter()
            .map(|h| h.join().expect("thread").expect("grant"))
            .collect();

        assert_eq!(slots.len(), THREADS);
        let card = ledger.stamp_set(&admin(), Some(TARGET)).expect("card");
        assert_eq!(card.count_granted(), THREADS);
        assert_eq!(card.granted().collect::<BTreeSet<_>>(), slots);
        assert_eq!(ledger.grant_history(&admin()).expect("history").len(), THREADS);
    }
}

#[test]
fn concurrent_double_submit_grants_once() {
    const THREADS: usize = 8;

    for (ledger, _dir) in backends() {
        let manager = seed(&ledger);
        let ledger = Arc::new(ledger);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                let manager = manager.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ledger.grant(&manager, TARGET, None, true)
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::LimitExceeded { .. })))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(refused, THREADS - 1);

        let card = ledger.stamp_set(&admin(), Some(TARGET)).expect("card");
        assert_eq!(card.count_granted(), 1);
        assert_eq!(ledger.grant_history(&admin()).expect("history").len(), 1);
    }
}

#[test]
fn concurrent_admin_sequential_grants_never_collide() {
    const THREADS: usize = 10;

    for (ledger, _dir) in backends() {
        seed(&ledger);
        let ledger = Arc::new(ledger);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ledger.grant(&admin(), TARGET, None, true)
                })
            })
            .collect();

        let slots: BTreeSet<StampId> = handles
            .into_iter()
            .map(|h| h.join().expect("thread").expect("grant"))
            .collect();

        // Sequential allocation fills exactly slots 1..=THREADS
        let expected: BTreeSet<StampId> = (1..=THREADS as u8).map(slot).collect();
        assert_eq!(slots, expected);
    }
}
