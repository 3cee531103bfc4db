//! Property-based invariant tests for the planning station store.
//!
//! 1. Station ids stay pairwise distinct under any operation sequence.
//! 2. `station_number` equals 1..=N after every structural change.
//! 3. Coerced latitude always lies within its domain.
//! 4. Every station sharing a duplicated Kavach ID is invalid.
//! 5. `isValid` agrees with a fresh `validate_all` report.
//! 6. `add` never changes the count when it is rejected.

use std::collections::HashSet;

use kplan_core::field::{LATITUDE_RANGE, LONGITUDE_RANGE, SAFE_RADIUS_RANGE};
use kplan_core::{PlanningStationStore, StationField};
use proptest::prelude::*;

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Add,
    Remove(usize),
    Update(usize, StationField, String),
    Fill(usize, String),
    Move(usize, usize),
    Collapse(usize),
}

fn field_strategy() -> impl Strategy<Value = StationField> {
    proptest::sample::select(StationField::ALL.to_vec())
}

fn raw_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[0-9]{1,4}",
        "-?[0-9]{1,3}\\.[0-9]{1,6}",
        "[a-zA-Z ]{0,12}",
        Just("NaN".to_owned()),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Add),
        1 => (0usize..8).prop_map(Op::Remove),
        4 => (0usize..8, field_strategy(), raw_strategy())
            .prop_map(|(i, f, r)| Op::Update(i, f, r)),
        3 => (0usize..8, "[1-3]{1,2}").prop_map(|(i, k)| Op::Fill(i, k)),
        1 => (0usize..8, 0usize..8).prop_map(|(a, b)| Op::Move(a, b)),
        1 => (0usize..8).prop_map(Op::Collapse),
    ]
}

fn id_at(store: &PlanningStationStore, index: usize) -> Option<String> {
    if store.is_empty() {
        return None;
    }
    let i = index % store.len();
    Some(store.stations()[i].id().as_str().to_owned())
}

fn apply(store: &mut PlanningStationStore, op: &Op) {
    match op {
        Op::Add => {
            let before = store.len();
            if store.add().is_err() {
                assert_eq!(store.len(), before, "rejected add changed the count");
            }
        }
        Op::Remove(i) => {
            if let Some(id) = id_at(store, *i) {
                assert!(store.remove(&id));
            }
        }
        Op::Update(i, field, raw) => {
            if let Some(id) = id_at(store, *i) {
                assert!(store.update(&id, *field, raw).is_applied());
            }
        }
        Op::Fill(i, kavach) => {
            if let Some(id) = id_at(store, *i) {
                for (field, raw) in [
                    (StationField::KavachId, kavach.as_str()),
                    (StationField::StationCode, "SC"),
                    (StationField::StationName, "Name"),
                    (StationField::Latitude, "20.5"),
                    (StationField::Longitude, "78.9"),
                ] {
                    let _ = store.update(&id, field, raw);
                }
            }
        }
        Op::Move(i, to) => {
            if let Some(id) = id_at(store, *i) {
                assert!(store.move_station(&id, *to));
            }
        }
        Op::Collapse(i) => {
            if let Some(id) = id_at(store, *i) {
                assert!(store.set_collapsed(&id, true));
            }
        }
    }
}

fn check_invariants(store: &PlanningStationStore) -> Result<(), TestCaseError> {
    let ids: HashSet<&str> = store.iter().map(|s| s.id().as_str()).collect();
    prop_assert_eq!(ids.len(), store.len(), "duplicate station id");

    for (i, s) in store.iter().enumerate() {
        prop_assert_eq!(s.station_number(), i + 1);
        if let Some(lat) = s.latitude() {
            prop_assert!((LATITUDE_RANGE.0..=LATITUDE_RANGE.1).contains(&lat));
        }
        if let Some(lon) = s.longitude() {
            prop_assert!((LONGITUDE_RANGE.0..=LONGITUDE_RANGE.1).contains(&lon));
        }
        prop_assert!((SAFE_RADIUS_RANGE.0..=SAFE_RADIUS_RANGE.1).contains(&s.safe_radius_km()));
        prop_assert!((1..=7).contains(&s.allocated_frequency()));
        prop_assert!(s.kavach_id().chars().all(|c| c.is_ascii_digit()));
        prop_assert!(s.kavach_id().len() <= 10);
    }

    let report = store.validate_all();
    for s in store.iter() {
        prop_assert_eq!(
            s.is_valid(),
            report.is_station_valid(s.id().as_str()),
            "isValid disagrees with report for {}",
            s.id()
        );
    }
    for group in report.duplicate_groups() {
        prop_assert!(!store.get(group.owner.as_str()).is_some_and(|s| s.is_valid()));
        for dup in &group.duplicates {
            prop_assert!(!store.get(dup.as_str()).is_some_and(|s| s.is_valid()));
        }
    }
    Ok(())
}

// ═════════════════════════════════════════════════════════════════════════
// 1–6. Invariants hold after every operation
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn invariants_hold_under_arbitrary_ops(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let mut store = PlanningStationStore::new();
        for op in &ops {
            apply(&mut store, op);
            check_invariants(&store)?;
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Latitude clamping over the whole real line
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn latitude_update_is_clamped(v in -1.0e6f64..1.0e6) {
        let mut store = PlanningStationStore::new();
        let id = store.add().expect("first add").id().as_str().to_owned();
        let _ = store.update(&id, StationField::Latitude, &v.to_string());
        let lat = store.get(&id).and_then(|s| s.latitude());
        prop_assert!(lat.is_some());
        let lat = lat.unwrap_or_default();
        prop_assert!((LATITUDE_RANGE.0..=LATITUDE_RANGE.1).contains(&lat));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Renumber is idempotent
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn renumber_is_idempotent(ops in proptest::collection::vec(op_strategy(), 0..30)) {
        let mut store = PlanningStationStore::new();
        for op in &ops {
            apply(&mut store, op);
        }
        store.renumber();
        let once: Vec<usize> = store.iter().map(|s| s.station_number()).collect();
        store.renumber();
        let twice: Vec<usize> = store.iter().map(|s| s.station_number()).collect();
        prop_assert_eq!(once, twice);
    }
}
