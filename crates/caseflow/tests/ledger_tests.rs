//! Ledger behaviour across the public API: history shape, permissions,
//! state machine and concurrent writers.

mod common;

use caseflow::ledger::CaseFilter;
use caseflow::model::{CaseStatus, Effect};
use caseflow::permission::Role;
use caseflow::CaseflowError;

use common::TestHarness;

#[test]
fn test_history_is_a_contiguous_chain() {
    let h = TestHarness::new();
    h.create("2024/001", "Protocol");
    h.transfer("2024/001", "UnitA");
    h.transfer("2024/001", "UnitB");
    h.transfer("2024/001", "Finance");

    let history = h.history("2024/001");
    assert_eq!(history.len(), 4);
    for (i, movement) in history.iter().enumerate() {
        assert_eq!(movement.sequence as usize, i);
    }
    for pair in history.windows(2) {
        assert_eq!(pair[1].from_unit.as_deref(), Some(pair[0].to_unit.as_str()));
    }

    let case = h.app.ledger.get("2024/001").unwrap();
    let last = history.last().unwrap();
    assert_eq!(case.current_unit, last.to_unit);
    assert_eq!(case.last_sequence, last.sequence);
    assert_eq!(case.status, CaseStatus::Active);
}

#[test]
fn test_derived_state_follows_every_effect() {
    let h = TestHarness::new();
    let ledger = &h.app.ledger;
    h.create("2024/002", "Protocol");
    h.transfer("2024/002", "UnitA");

    let case = ledger.get("2024/002").unwrap();
    let returned = ledger.return_case(&h.admin, &case, None, Some("missing signature")).unwrap();
    assert_eq!(returned.to_unit, "Protocol");
    assert_eq!(returned.effect, Effect::Return);

    let case = ledger.get("2024/002").unwrap();
    let finalized = ledger.finalize(&h.admin, &case, None).unwrap();
    assert_eq!(finalized.to_unit, "Protocol");

    let case = ledger.get("2024/002").unwrap();
    assert!(case.is_finalized());
    assert!(matches!(
        ledger.transfer(&h.admin, &case, "UnitB", None),
        Err(CaseflowError::InvalidState(_))
    ));

    let reopened = ledger.reopen(&h.admin, &case, None).unwrap();
    assert_eq!(reopened.to_unit, "Protocol");
    let case = ledger.get("2024/002").unwrap();
    assert_eq!(case.status, CaseStatus::Active);
    assert_eq!(case.last_sequence, 4);
}

#[test]
fn test_operator_cannot_finalize() {
    let h = TestHarness::new();
    let case = h.create("2024/003", "UnitA");
    let operator = h.actor("op-1", Role::Operator, "UnitA");

    let err = h.app.ledger.finalize(&operator, &case, None).unwrap_err();
    assert!(matches!(err, CaseflowError::PermissionDenied { .. }));
    assert_eq!(h.history("2024/003").len(), 1);
}

#[test]
fn test_operator_finalize_outside_scope_leaves_history_unchanged() {
    let h = TestHarness::new();
    h.create("2024/007", "Protocol");
    h.transfer("2024/007", "Finance");
    let before = h.history("2024/007");
    let case = h.app.ledger.get("2024/007").unwrap();
    let operator = h.actor("op-1", Role::Operator, "UnitA");

    let err = h.app.ledger.finalize(&operator, &case, None).unwrap_err();
    match err {
        CaseflowError::PermissionDenied { actor, unit, .. } => {
            assert_eq!(actor, "op-1");
            assert_eq!(unit, "Finance");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.history("2024/007"), before);
    assert_eq!(h.app.ledger.get("2024/007").unwrap().status, CaseStatus::Active);
}

#[test]
fn test_operator_cannot_move_cases() {
    let h = TestHarness::new();
    h.create("2024/008", "Protocol");
    h.transfer("2024/008", "UnitA");
    let case = h.app.ledger.get("2024/008").unwrap();
    let operator = h.actor("op-1", Role::Operator, "UnitA");

    assert!(matches!(
        h.app.ledger.transfer(&operator, &case, "UnitB", Some("for review")),
        Err(CaseflowError::PermissionDenied { .. })
    ));
    assert!(matches!(
        h.app.ledger.return_case(&operator, &case, None, None),
        Err(CaseflowError::PermissionDenied { .. })
    ));
    assert_eq!(h.history("2024/008").len(), 2);
    assert_eq!(h.app.ledger.get("2024/008").unwrap().current_unit, "UnitA");
}

#[test]
fn test_return_to_unvisited_unit_is_rejected() {
    let h = TestHarness::new();
    h.create("2024/004", "Protocol");
    h.transfer("2024/004", "UnitA");
    let case = h.app.ledger.get("2024/004").unwrap();

    let err = h
        .app
        .ledger
        .return_case(&h.admin, &case, Some("Finance"), None)
        .unwrap_err();
    assert!(matches!(err, CaseflowError::Validation { .. }));
    assert_eq!(h.history("2024/004").len(), 2);
}

#[test]
fn test_stale_snapshot_conflicts() {
    let h = TestHarness::new();
    let stale = h.create("2024/005", "Protocol");
    h.transfer("2024/005", "UnitA");

    let err = h
        .app
        .ledger
        .transfer(&h.admin, &stale, "UnitB", None)
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.app.ledger.get("2024/005").unwrap().current_unit, "UnitA");
}

#[test]
fn test_racing_transfers_have_one_winner() {
    let h = TestHarness::new();
    let snapshot = h.create("2024/006", "Protocol");
    let prior = snapshot.last_sequence;

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = ["UnitA", "UnitB"]
            .into_iter()
            .map(|unit| {
                let ledger = h.app.ledger.clone();
                let admin = h.admin.clone();
                let snapshot = snapshot.clone();
                s.spawn(move || ledger.transfer(&admin, &snapshot, unit, None))
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CaseflowError::Conflict { .. }))));

    let case = h.app.ledger.get("2024/006").unwrap();
    assert_eq!(case.last_sequence, prior + 1);
    assert_eq!(case.current_unit, winners[0].to_unit);
    assert_eq!(h.history("2024/006").len(), 2);
}

#[test]
fn test_list_filters_by_derived_unit() {
    let h = TestHarness::new();
    h.create("2024/010", "Protocol");
    h.create("2024/011", "Protocol");
    h.create("2024/012", "UnitA");
    h.transfer("2024/011", "UnitA");

    let (in_a, total) = h
        .app
        .ledger
        .list(&CaseFilter {
            unit: Some("UnitA".to_string()),
            ..CaseFilter::default()
        })
        .unwrap();
    assert_eq!(total, 2);
    let mut ids: Vec<&str> = in_a.iter().map(|c| c.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["2024/011", "2024/012"]);
}

#[test]
fn test_delete_is_admin_only() {
    let h = TestHarness::new();
    let case = h.create("2024/013", "UnitA");
    let manager = h.actor("mgr", Role::UnitManager, "UnitA");
    assert!(matches!(
        h.app.ledger.delete(&manager, &case),
        Err(CaseflowError::PermissionDenied { .. })
    ));
    h.app.ledger.delete(&h.admin, &case).unwrap();
    assert!(h.app.ledger.find("2024/013").unwrap().is_none());
}
