#![forbid(unsafe_code)]

//! The authoritative, ordered collection of planning stations.
//!
//! # Design
//!
//! [`PlanningStationStore`] is the single owner of every live
//! [`PlanningStation`]. Callers get shared references only; all writes go
//! through store operations so that derived state (station numbers and the
//! `isValid` flag) is recomputed after every mutation.
//!
//! Duplicate Kavach IDs are admitted: a user typing towards a free ID passes
//! through prefixes that belong to other stations. Every station sharing a
//! duplicated ID is marked invalid instead.
//!
//! # Invariants
//!
//! 1. Station ids are pairwise distinct.
//! 2. `station_number == index + 1` for every station after each structural
//!    change.
//! 3. A station is valid iff every field passes its check and its non-empty
//!    Kavach ID is not shared with any other station.
//! 4. Listeners observe exactly one event per successful mutation, after the
//!    store is consistent again.
//!
//! # Failure Modes
//!
//! - **Unknown id**: `update`/`remove` on an id that is not present are
//!   no-ops, reported through the return value and a `warn!`.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::events::{Listeners, StoreEvent, Subscription};
use crate::field::{FieldValue, StationField};
use crate::identity::Autofill;
use crate::station::{IdGenerator, PlanningStation, StationId};
use crate::validate::{FieldCheck, FieldFailure, ValidationReport, check_station};

/// `add()` refused because the current last station is incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("complete Station {station_number} first: {failure}")]
pub struct AddRejected {
    pub station: StationId,
    pub station_number: usize,
    pub failure: FieldFailure,
}

impl AddRejected {
    #[must_use]
    pub fn field(&self) -> StationField {
        self.failure.field
    }

    #[must_use]
    pub fn check(&self) -> FieldCheck {
        self.failure.check
    }
}

/// Result of a field update.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum UpdateOutcome {
    /// The coerced value that was stored.
    Applied(FieldValue),
    UnknownStation,
}

impl UpdateOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Applied(v) => Some(v),
            Self::UnknownStation => None,
        }
    }
}

/// Ordered collection of planning stations with change notification.
#[derive(Debug, Default)]
pub struct PlanningStationStore {
    stations: Vec<PlanningStation>,
    ids: IdGenerator,
    listeners: Listeners,
}

impl PlanningStationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with loaded stations (see [`replace_all`](Self::replace_all)).
    #[must_use]
    pub fn with_stations(stations: Vec<PlanningStation>) -> Self {
        let mut store = Self::new();
        store.load(stations);
        store
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Stations in display order.
    #[must_use]
    pub fn stations(&self) -> &[PlanningStation] {
        &self.stations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanningStation> {
        self.stations.iter()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PlanningStation> {
        self.stations.iter().find(|s| s.id().as_str() == id)
    }

    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.stations.iter().position(|s| s.id().as_str() == id)
    }

    #[must_use]
    pub fn last(&self) -> Option<&PlanningStation> {
        self.stations.last()
    }

    /// Kavach IDs held by every station except `id`.
    #[must_use]
    pub fn kavach_ids_except(&self, id: &str) -> BTreeSet<String> {
        self.stations
            .iter()
            .filter(|s| s.id().as_str() != id && !s.kavach_id().is_empty())
            .map(|s| s.kavach_id().to_owned())
            .collect()
    }

    pub fn subscribe(&mut self, listener: impl Fn(&StoreEvent) + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Append a fresh station.
    ///
    /// Refused when the current last station fails any field check. On
    /// success the previous last station is collapsed.
    pub fn add(&mut self) -> Result<&PlanningStation, AddRejected> {
        if let Some(last) = self.stations.last_mut() {
            if let Err(failure) = check_station(last) {
                tracing::debug!(
                    station = %last.id(),
                    field = %failure.field,
                    check = %failure.check,
                    "add rejected"
                );
                return Err(AddRejected {
                    station: last.id().clone(),
                    station_number: last.station_number(),
                    failure,
                });
            }
            last.set_collapsed(true);
        }

        let taken: HashSet<&str> = self.stations.iter().map(|s| s.id().as_str()).collect();
        let id = self.ids.next(|candidate| taken.contains(candidate));
        let number = self.stations.len() + 1;
        self.stations.push(PlanningStation::new(id.clone(), number));
        self.refresh();
        tracing::debug!(station = %id, number, "station added");
        self.listeners.emit(&StoreEvent::Added { id });

        let index = self.stations.len() - 1;
        Ok(&self.stations[index])
    }

    /// Remove a station. Returns whether anything was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(index) = self.position(id) else {
            tracing::warn!(station = id, "remove: unknown station");
            return false;
        };
        let removed = self.stations.remove(index);
        self.refresh();
        tracing::debug!(station = %removed.id(), remaining = self.stations.len(), "station removed");
        self.listeners.emit(&StoreEvent::Removed {
            id: removed.id().clone(),
        });
        true
    }

    /// Coerce `raw` into `field` of station `id`.
    pub fn update(&mut self, id: &str, field: StationField, raw: &str) -> UpdateOutcome {
        self.write(id, field, |s| s.set(field, raw))
    }

    /// Store an already-typed value into `field` of station `id`.
    pub fn update_value(&mut self, id: &str, field: StationField, value: FieldValue) -> UpdateOutcome {
        self.write(id, field, |s| s.set_value(field, value))
    }

    fn write(
        &mut self,
        id: &str,
        field: StationField,
        apply: impl FnOnce(&mut PlanningStation) -> FieldValue,
    ) -> UpdateOutcome {
        let Some(index) = self.position(id) else {
            tracing::warn!(station = id, %field, "update: unknown station");
            return UpdateOutcome::UnknownStation;
        };
        let stored = apply(&mut self.stations[index]);
        self.refresh_validity();
        tracing::debug!(station = id, %field, value = %stored, "field updated");
        self.listeners.emit(&StoreEvent::Updated {
            id: self.stations[index].id().clone(),
            field,
        });
        UpdateOutcome::Applied(stored)
    }

    /// Apply every autofill assignment to station `id`.
    ///
    /// Emits one `Updated` event per assigned field.
    pub fn apply_autofill(&mut self, id: &str, fill: &Autofill) -> bool {
        if self.position(id).is_none() {
            tracing::warn!(station = id, "autofill: unknown station");
            return false;
        }
        for (field, value) in fill.assignments() {
            let _ = self.update_value(id, field, value);
        }
        true
    }

    /// Reset the fields that depend on the Kavach ID (code, name, coordinates).
    pub fn clear_dependents(&mut self, id: &str) -> bool {
        if self.position(id).is_none() {
            return false;
        }
        for field in crate::identity::DEPENDENT_FIELDS {
            let _ = self.update_value(id, field, field.default_value());
        }
        true
    }

    /// Move station `id` to `to` (clamped to the last index) and renumber.
    pub fn move_station(&mut self, id: &str, to: usize) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let to = to.min(self.stations.len() - 1);
        if from == to {
            return true;
        }
        let station = self.stations.remove(from);
        self.stations.insert(to, station);
        self.renumber();
        true
    }

    /// Recompute `station_number` from position. Idempotent.
    pub fn renumber(&mut self) {
        let changed = self.renumber_quiet();
        if changed {
            self.listeners.emit(&StoreEvent::Renumbered);
        }
    }

    fn renumber_quiet(&mut self) -> bool {
        let mut changed = false;
        for (i, station) in self.stations.iter_mut().enumerate() {
            if station.station_number() != i + 1 {
                station.set_station_number(i + 1);
                changed = true;
            }
        }
        changed
    }

    /// Field failures and Kavach ID uniqueness across the whole store.
    #[must_use]
    pub fn validate_all(&self) -> ValidationReport {
        ValidationReport::build(&self.stations)
    }

    pub fn clear(&mut self) {
        let count = self.stations.len();
        self.stations.clear();
        tracing::info!(count, "store cleared");
        self.listeners.emit(&StoreEvent::Cleared);
    }

    /// Replace the contents with loaded stations.
    ///
    /// Missing or repeated ids are regenerated, numbers re-derived, fields
    /// normalized, validity recomputed, and every station collapsed.
    pub fn replace_all(&mut self, stations: Vec<PlanningStation>) {
        self.load(stations);
        tracing::info!(count = self.stations.len(), "store replaced");
        self.listeners.emit(&StoreEvent::Replaced {
            count: self.stations.len(),
        });
    }

    fn load(&mut self, stations: Vec<PlanningStation>) {
        let mut seen: HashSet<StationId> = HashSet::with_capacity(stations.len());
        let mut loaded = Vec::with_capacity(stations.len());
        for mut station in stations {
            if station.id().is_empty() || seen.contains(station.id()) {
                let fresh = self.ids.next(|c| seen.contains(c));
                tracing::debug!(old = %station.id(), new = %fresh, "regenerated station id");
                station.set_id(fresh);
            }
            seen.insert(station.id().clone());
            station.normalize();
            station.set_collapsed(true);
            loaded.push(station);
        }
        self.stations = loaded;
        self.refresh();
    }

    pub fn set_collapsed(&mut self, id: &str, collapsed: bool) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.stations[index].set_collapsed(collapsed);
        self.listeners.emit(&StoreEvent::Collapsed {
            id: self.stations[index].id().clone(),
            collapsed,
        });
        true
    }

    /// Expand everything if all stations are collapsed, otherwise collapse
    /// everything. Returns the new collapsed state.
    pub fn toggle_all_collapsed(&mut self) -> bool {
        let collapse = !self.stations.iter().all(PlanningStation::is_collapsed);
        let ids: Vec<StationId> = self.stations.iter().map(|s| s.id().clone()).collect();
        for id in ids {
            let _ = self.set_collapsed(id.as_str(), collapse);
        }
        collapse
    }

    fn refresh(&mut self) {
        self.renumber_quiet();
        self.refresh_validity();
    }

    fn refresh_validity(&mut self) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for station in &self.stations {
            if !station.kavach_id().is_empty() {
                *counts.entry(station.kavach_id().to_owned()).or_default() += 1;
            }
        }
        for station in &mut self.stations {
            let unique = station.kavach_id().is_empty()
                || counts.get(station.kavach_id()).copied().unwrap_or(0) <= 1;
            let valid = unique && check_station(station).is_ok();
            station.set_valid(valid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fill(store: &mut PlanningStationStore, id: &str, kavach: &str) {
        for (field, raw) in [
            (StationField::KavachId, kavach),
            (StationField::StationCode, "KCG"),
            (StationField::StationName, "Kacheguda"),
            (StationField::Latitude, "17.38"),
            (StationField::Longitude, "78.48"),
        ] {
            assert!(store.update(id, field, raw).is_applied());
        }
    }

    fn add_id(store: &mut PlanningStationStore) -> String {
        store.add().expect("add").id().as_str().to_owned()
    }

    #[test]
    fn first_add_is_unconditional() {
        let mut store = PlanningStationStore::new();
        let s = store.add().expect("first add");
        assert_eq!(s.station_number(), 1);
        assert!(!s.is_collapsed());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn add_rejects_incomplete_last_station() {
        let mut store = PlanningStationStore::new();
        let id = add_id(&mut store);
        fill(&mut store, &id, "100");
        let _ = store.update(&id, StationField::StationName, "");

        let err = store.add().expect_err("name missing");
        assert_eq!(err.field(), StationField::StationName);
        assert_eq!(err.check(), FieldCheck::Missing);
        assert_eq!(store.len(), 1);
        assert_eq!(
            err.to_string(),
            "complete Station 1 first: Station Name is missing"
        );
    }

    #[test]
    fn add_collapses_previous_last() {
        let mut store = PlanningStationStore::new();
        let a = add_id(&mut store);
        fill(&mut store, &a, "100");
        let b = add_id(&mut store);
        assert!(store.get(&a).expect("a").is_collapsed());
        assert!(!store.get(&b).expect("b").is_collapsed());
        assert_eq!(store.get(&b).expect("b").station_number(), 2);
    }

    #[test]
    fn remove_renumbers() {
        let mut store = PlanningStationStore::new();
        let a = add_id(&mut store);
        fill(&mut store, &a, "100");
        let b = add_id(&mut store);
        fill(&mut store, &b, "200");
        let c = add_id(&mut store);

        assert!(store.remove(&b));
        assert!(!store.remove(&b));
        assert_eq!(store.get(&c).expect("c").station_number(), 2);
    }

    #[test]
    fn update_unknown_station_is_reported() {
        let mut store = PlanningStationStore::new();
        assert_eq!(
            store.update("nope", StationField::Latitude, "20"),
            UpdateOutcome::UnknownStation
        );
    }

    #[test]
    fn update_returns_clamped_value() {
        let mut store = PlanningStationStore::new();
        let a = add_id(&mut store);
        let out = store.update(&a, StationField::SafeRadiusKm, "40");
        assert_eq!(out.value(), Some(&FieldValue::Float(Some(25.0))));
    }

    #[test]
    fn duplicates_invalidate_every_occurrence() {
        let mut store = PlanningStationStore::new();
        let a = add_id(&mut store);
        fill(&mut store, &a, "100");
        let b = add_id(&mut store);
        fill(&mut store, &b, "200");
        let c = add_id(&mut store);
        fill(&mut store, &c, "100");

        assert!(!store.get(&a).expect("a").is_valid());
        assert!(store.get(&b).expect("b").is_valid());
        assert!(!store.get(&c).expect("c").is_valid());

        let report = store.validate_all();
        let invalid: Vec<&str> = report.invalid_ids().map(StationId::as_str).collect();
        assert_eq!(invalid, [a.as_str(), c.as_str()]);

        // Fixing the duplicate revalidates the peer too.
        let _ = store.update(&c, StationField::KavachId, "300");
        assert!(store.get(&a).expect("a").is_valid());
        assert!(store.validate_all().is_valid());
    }

    #[test]
    fn replace_all_regenerates_ids_and_collapses() {
        let mut store = PlanningStationStore::new();
        let mut dup = PlanningStation::new(StationId::from("same"), 9);
        dup.set(StationField::KavachId, "1");
        let twin = dup.clone();
        let blank = PlanningStation::new(StationId::default(), 0);

        store.replace_all(vec![dup, twin, blank]);
        let ids: HashSet<&str> = store.iter().map(|s| s.id().as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("same"));
        let numbers: Vec<usize> = store.iter().map(PlanningStation::station_number).collect();
        assert_eq!(numbers, [1, 2, 3]);
        assert!(store.iter().all(PlanningStation::is_collapsed));
    }

    #[test]
    fn toggle_all_flips_between_states() {
        let mut store = PlanningStationStore::new();
        let a = add_id(&mut store);
        fill(&mut store, &a, "100");
        let _b = add_id(&mut store);
        assert!(store.toggle_all_collapsed());
        assert!(store.iter().all(PlanningStation::is_collapsed));
        assert!(!store.toggle_all_collapsed());
        assert!(!store.iter().any(PlanningStation::is_collapsed));
    }

    #[test]
    fn move_station_renumbers() {
        let mut store = PlanningStationStore::new();
        let a = add_id(&mut store);
        fill(&mut store, &a, "100");
        let b = add_id(&mut store);
        assert!(store.move_station(&b, 0));
        assert_eq!(store.get(&b).expect("b").station_number(), 1);
        assert_eq!(store.get(&a).expect("a").station_number(), 2);
    }

    #[test]
    fn autofill_and_clear_dependents() {
        let mut store = PlanningStationStore::new();
        let a = add_id(&mut store);
        let fill = Autofill {
            kavach_id: "101".into(),
            station_code: "ALP".into(),
            station_name: "Alpha".into(),
            latitude: Some(17.1),
            longitude: Some(78.2),
            optimum_static_profile_transfer: None,
            onboard_slots: Some(4),
        };
        assert!(store.apply_autofill(&a, &fill));
        let s = store.get(&a).expect("a");
        assert_eq!(s.station_code(), "ALP");
        assert_eq!(s.onboard_slots(), Some(4));
        assert!(s.is_valid());

        assert!(store.clear_dependents(&a));
        let s = store.get(&a).expect("a");
        assert_eq!(s.kavach_id(), "101");
        assert_eq!(s.station_name(), "");
        assert!(!s.is_valid());
    }

    #[test]
    fn events_follow_mutations() {
        let mut store = PlanningStationStore::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let _sub = store.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        let a = add_id(&mut store);
        let _ = store.update(&a, StationField::StationCode, "X");
        store.remove(&a);
        store.clear();

        let id = StationId::from(a.as_str());
        assert_eq!(
            *events.borrow(),
            vec![
                StoreEvent::Added { id: id.clone() },
                StoreEvent::Updated {
                    id: id.clone(),
                    field: StationField::StationCode
                },
                StoreEvent::Removed { id },
                StoreEvent::Cleared,
            ]
        );
    }
}
