#![forbid(unsafe_code)]

//! Kavach ID lookup, suggestions, and autofill.
//!
//! # Design
//!
//! The master lookup is a JSON object mapping Kavach ID strings to station
//! records. It is parsed once into a [`KavachLookup`] that preserves the
//! source order, because suggestions are reported in that order.
//!
//! The resolver has two states. When the lookup could not be loaded it is
//! *unavailable*: suggestions are empty, every resolution is `NotFound`, and
//! the caller is expected to surface the reason to the user.
//!
//! # Invariants
//!
//! 1. [`IdentityResolver::suggest`] never yields an excluded ID and never
//!    yields anything for an empty prefix.
//! 2. [`IdentityResolver::resolve_exact`] reports `DuplicateInSession` before
//!    consulting the lookup.
//! 3. Autofill only touches the dependent fields; radius and frequency are
//!    left alone.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::field::{FieldValue, StationField};
use crate::station::PlanningStation;
use crate::validate::{StationIssue, ValidationReport};

/// Upper bound on suggestions shown for one prefix.
pub const SUGGESTION_LIMIT: usize = 10;

/// Fields cleared when the Kavach ID stops resolving.
pub const DEPENDENT_FIELDS: [StationField; 4] = [
    StationField::StationCode,
    StationField::StationName,
    StationField::Latitude,
    StationField::Longitude,
];

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup table is not a JSON object: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("lookup entry `{key}` is malformed: {source}")]
    Entry {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One record of the master lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupEntry {
    pub name: String,
    pub code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub optimum_static_profile_transfer: Option<u32>,
    pub onboard_slots: Option<u32>,
}

/// Wire shape of a lookup record. Numbers may arrive as strings and text
/// may arrive as numbers, so every field is read leniently.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    latitude: Option<Value>,
    #[serde(default)]
    longitude: Option<Value>,
    #[serde(default)]
    optimum_static_profile_transfer: Option<Value>,
    #[serde(default)]
    onboard_slots: Option<Value>,
}

impl From<RawEntry> for LookupEntry {
    fn from(raw: RawEntry) -> Self {
        Self {
            name: lenient_text(raw.name.as_ref()),
            code: lenient_text(raw.code.as_ref()),
            latitude: lenient_f64(raw.latitude.as_ref()),
            longitude: lenient_f64(raw.longitude.as_ref()),
            optimum_static_profile_transfer: lenient_u32(
                raw.optimum_static_profile_transfer.as_ref(),
            ),
            onboard_slots: lenient_u32(raw.onboard_slots.as_ref()),
        }
    }
}

fn lenient_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn lenient_f64(v: Option<&Value>) -> Option<f64> {
    let n = match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => crate::field::parse_float(s),
        _ => None,
    };
    n.filter(|f| f.is_finite())
}

fn lenient_u32(v: Option<&Value>) -> Option<u32> {
    let n = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => crate::field::parse_float(s)?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then(|| n.trunc().min(f64::from(u32::MAX)) as u32)
}

/// The master Kavach ID table, in source order.
#[derive(Debug, Clone, Default)]
pub struct KavachLookup {
    entries: Vec<(String, LookupEntry)>,
    index: HashMap<String, usize>,
}

impl KavachLookup {
    /// Parse the lookup JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, LookupError> {
        let map: serde_json::Map<String, Value> = serde_json::from_str(json)?;
        let mut lookup = Self::default();
        for (key, value) in map {
            let raw: RawEntry = serde_json::from_value(value).map_err(|source| {
                LookupError::Entry {
                    key: key.clone(),
                    source,
                }
            })?;
            lookup.insert(key, raw.into());
        }
        tracing::debug!(entries = lookup.len(), "kavach lookup parsed");
        Ok(lookup)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, LookupEntry)>) -> Self {
        let mut lookup = Self::default();
        for (key, entry) in entries {
            lookup.insert(key, entry);
        }
        lookup
    }

    fn insert(&mut self, key: String, entry: LookupEntry) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = entry,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, entry));
            }
        }
    }

    #[must_use]
    pub fn get(&self, kavach_id: &str) -> Option<&LookupEntry> {
        self.index.get(kavach_id).map(|&i| &self.entries[i].1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LookupEntry)> + '_ {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }
}

/// One suggestion: the ID and its lookup record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suggestion<'a> {
    pub kavach_id: &'a str,
    pub entry: &'a LookupEntry,
}

impl Suggestion<'_> {
    /// `"<id> (<name>)"`, or `"<id> (N/A)"` when the record has no name.
    #[must_use]
    pub fn label(&self) -> String {
        let name = if self.entry.name.is_empty() {
            "N/A"
        } else {
            self.entry.name.as_str()
        };
        format!("{} ({name})", self.kavach_id)
    }
}

/// Lazy, restartable sequence of lookup entries matching a prefix.
///
/// Cloning yields an independent cursor over the same matches.
#[derive(Debug, Clone)]
pub struct Suggestions<'a> {
    entries: &'a [(String, LookupEntry)],
    pos: usize,
    prefix: &'a str,
    exclude: &'a BTreeSet<String>,
}

impl Suggestions<'_> {
    /// Rewind to the first match.
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl<'a> Iterator for Suggestions<'a> {
    type Item = Suggestion<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.prefix.is_empty() {
            return None;
        }
        let entries = self.entries;
        while let Some((id, entry)) = entries.get(self.pos) {
            self.pos += 1;
            if id.starts_with(self.prefix) && !self.exclude.contains(id) {
                return Some(Suggestion {
                    kavach_id: id,
                    entry,
                });
            }
        }
        None
    }
}

/// Values copied into a station when its Kavach ID resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct Autofill {
    pub kavach_id: String,
    pub station_code: String,
    pub station_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub optimum_static_profile_transfer: Option<u32>,
    pub onboard_slots: Option<u32>,
}

impl Autofill {
    fn new(kavach_id: &str, entry: &LookupEntry) -> Self {
        Self {
            kavach_id: kavach_id.to_owned(),
            station_code: entry.code.clone(),
            station_name: entry.name.clone(),
            latitude: entry.latitude,
            longitude: entry.longitude,
            optimum_static_profile_transfer: entry.optimum_static_profile_transfer,
            onboard_slots: entry.onboard_slots,
        }
    }

    /// Field assignments in display order. Slot counts are only assigned
    /// when the lookup record carries them.
    #[must_use]
    pub fn assignments(&self) -> Vec<(StationField, FieldValue)> {
        let mut out = vec![
            (StationField::KavachId, FieldValue::Text(self.kavach_id.clone())),
            (
                StationField::StationCode,
                FieldValue::Text(self.station_code.clone()),
            ),
            (
                StationField::StationName,
                FieldValue::Text(self.station_name.clone()),
            ),
            (StationField::Latitude, FieldValue::Float(self.latitude)),
            (StationField::Longitude, FieldValue::Float(self.longitude)),
        ];
        if let Some(v) = self.optimum_static_profile_transfer {
            out.push((
                StationField::OptimumStaticProfileTransfer,
                FieldValue::Int(Some(i64::from(v))),
            ));
        }
        if let Some(v) = self.onboard_slots {
            out.push((StationField::OnboardSlots, FieldValue::Int(Some(i64::from(v)))));
        }
        out
    }
}

/// Outcome of resolving a complete Kavach ID.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(Autofill),
    NotFound,
    DuplicateInSession,
}

#[derive(Debug, Clone)]
enum LookupState {
    Ready(KavachLookup),
    Unavailable { reason: String },
}

/// Suggests and resolves Kavach IDs against the master lookup.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    state: LookupState,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(lookup: KavachLookup) -> Self {
        Self {
            state: LookupState::Ready(lookup),
        }
    }

    /// A resolver with no lookup. Every query comes back empty.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(%reason, "kavach lookup unavailable");
        Self {
            state: LookupState::Unavailable { reason },
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.state, LookupState::Ready(_))
    }

    #[must_use]
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            LookupState::Ready(_) => None,
            LookupState::Unavailable { reason } => Some(reason),
        }
    }

    #[must_use]
    pub fn lookup(&self) -> Option<&KavachLookup> {
        match &self.state {
            LookupState::Ready(l) => Some(l),
            LookupState::Unavailable { .. } => None,
        }
    }

    /// Entries whose ID starts with `prefix`, skipping `exclude`, in lookup
    /// order.
    #[must_use]
    pub fn suggest<'a>(&'a self, prefix: &'a str, exclude: &'a BTreeSet<String>) -> Suggestions<'a> {
        let entries = self
            .lookup()
            .map_or(&[][..], |l| l.entries.as_slice());
        Suggestions {
            entries,
            pos: 0,
            prefix,
            exclude,
        }
    }

    /// The first [`SUGGESTION_LIMIT`] suggestions for `prefix`.
    #[must_use]
    pub fn suggest_top<'a>(
        &'a self,
        prefix: &'a str,
        exclude: &'a BTreeSet<String>,
    ) -> Vec<Suggestion<'a>> {
        self.suggest(prefix, exclude).take(SUGGESTION_LIMIT).collect()
    }

    /// Resolve a complete Kavach ID.
    ///
    /// `exclude` holds the IDs used by every *other* station in the session.
    #[must_use]
    pub fn resolve_exact(&self, kavach_id: &str, exclude: &BTreeSet<String>) -> Resolution {
        let id = kavach_id.trim();
        if id.is_empty() {
            return Resolution::NotFound;
        }
        if exclude.contains(id) {
            return Resolution::DuplicateInSession;
        }
        match self.lookup().and_then(|l| l.get(id)) {
            Some(entry) => Resolution::Found(Autofill::new(id, entry)),
            None => Resolution::NotFound,
        }
    }

    /// Reset the fields that depend on a resolved Kavach ID.
    pub fn clear_dependents(station: &mut PlanningStation) {
        for field in DEPENDENT_FIELDS {
            let _ = station.set_value(field, field.default_value());
        }
    }

    /// Flag stations whose Kavach ID is set but absent from the lookup.
    ///
    /// Duplicate occurrences are already flagged by the report and are not
    /// flagged twice.
    pub fn audit(&self, stations: &[PlanningStation], report: &mut ValidationReport) {
        for station in stations {
            let id = station.kavach_id();
            if id.is_empty() {
                continue;
            }
            let known = self.lookup().is_some_and(|l| l.get(id).is_some());
            let duplicate = report
                .issues_for(station.id().as_str())
                .iter()
                .any(|i| matches!(i, StationIssue::DuplicateKavachId { .. }));
            if !known && !duplicate {
                report.push(
                    station.id(),
                    StationIssue::UnknownKavachId {
                        kavach_id: id.to_owned(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::StationId;

    const LOOKUP: &str = r#"{
        "101": {"name": "Alpha", "code": "ALP", "latitude": 17.1, "longitude": 78.2},
        "102": {"name": "Beta", "code": "BET", "latitude": "17.5", "longitude": "78.9",
                "optimum_static_profile_transfer": 3, "onboard_slots": "5"},
        "1030": {"name": "", "code": 77, "latitude": null},
        "201": {"name": "Gamma", "code": "GAM"}
    }"#;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(KavachLookup::from_json_str(LOOKUP).expect("parse"))
    }

    #[test]
    fn lookup_preserves_source_order_and_reads_leniently() {
        let lookup = KavachLookup::from_json_str(LOOKUP).expect("parse");
        let keys: Vec<&str> = lookup.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["101", "102", "1030", "201"]);
        let beta = lookup.get("102").expect("beta");
        assert_eq!(beta.latitude, Some(17.5));
        assert_eq!(beta.onboard_slots, Some(5));
        assert_eq!(lookup.get("1030").expect("1030").code, "77");
    }

    #[test]
    fn non_object_lookup_is_rejected() {
        assert!(matches!(
            KavachLookup::from_json_str("[1,2]"),
            Err(LookupError::Parse(_))
        ));
        assert!(matches!(
            KavachLookup::from_json_str(r#"{"1": 5}"#),
            Err(LookupError::Entry { .. })
        ));
    }

    #[test]
    fn suggestions_filter_by_prefix_and_exclusion() {
        let r = resolver();
        let exclude: BTreeSet<String> = ["102".to_owned()].into();
        let ids: Vec<&str> = r.suggest("10", &exclude).map(|s| s.kavach_id).collect();
        assert_eq!(ids, ["101", "1030"]);
        assert_eq!(r.suggest("", &BTreeSet::new()).count(), 0);
        assert_eq!(r.suggest("9", &BTreeSet::new()).count(), 0);
    }

    #[test]
    fn suggestions_are_restartable() {
        let r = resolver();
        let none = BTreeSet::new();
        let mut it = r.suggest("1", &none);
        let copy = it.clone();
        assert_eq!(it.by_ref().count(), 3);
        assert_eq!(copy.count(), 3);
        it.restart();
        assert_eq!(it.next().map(|s| s.label()), Some("101 (Alpha)".to_owned()));
    }

    #[test]
    fn label_uses_na_for_nameless_entries() {
        let r = resolver();
        let none = BTreeSet::new();
        let s = r.suggest("103", &none).next().expect("1030");
        assert_eq!(s.label(), "1030 (N/A)");
    }

    #[test]
    fn suggest_top_caps_results() {
        let lookup = KavachLookup::from_entries(
            (0..25).map(|i| (format!("5{i:02}"), LookupEntry::default())),
        );
        let r = IdentityResolver::new(lookup);
        assert_eq!(r.suggest_top("5", &BTreeSet::new()).len(), SUGGESTION_LIMIT);
    }

    #[test]
    fn resolve_prefers_duplicate_over_lookup() {
        let r = resolver();
        let exclude: BTreeSet<String> = ["101".to_owned()].into();
        assert_eq!(r.resolve_exact("101", &exclude), Resolution::DuplicateInSession);
        assert_eq!(r.resolve_exact("999", &BTreeSet::new()), Resolution::NotFound);
        match r.resolve_exact("102", &BTreeSet::new()) {
            Resolution::Found(fill) => {
                assert_eq!(fill.station_code, "BET");
                assert_eq!(fill.optimum_static_profile_transfer, Some(3));
                assert_eq!(fill.assignments().len(), 7);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn autofill_without_slots_leaves_them_alone() {
        let r = resolver();
        let Resolution::Found(fill) = r.resolve_exact("101", &BTreeSet::new()) else {
            panic!("101 should resolve");
        };
        let fields: Vec<StationField> = fill.assignments().into_iter().map(|(f, _)| f).collect();
        assert!(!fields.contains(&StationField::OnboardSlots));
        assert!(!fields.contains(&StationField::SafeRadiusKm));
    }

    #[test]
    fn unavailable_resolver_is_empty() {
        let r = IdentityResolver::unavailable("HTTP 500");
        assert!(!r.is_available());
        assert_eq!(r.unavailable_reason(), Some("HTTP 500"));
        assert_eq!(r.suggest("1", &BTreeSet::new()).count(), 0);
        assert_eq!(r.resolve_exact("101", &BTreeSet::new()), Resolution::NotFound);
    }

    #[test]
    fn clear_dependents_resets_four_fields() {
        let mut s = PlanningStation::new(StationId::from("a"), 1);
        s.set(StationField::StationCode, "ALP");
        s.set(StationField::StationName, "Alpha");
        s.set(StationField::Latitude, "17.1");
        s.set(StationField::Longitude, "78.2");
        s.set(StationField::SafeRadiusKm, "20");
        IdentityResolver::clear_dependents(&mut s);
        assert_eq!(s.station_code(), "");
        assert_eq!(s.station_name(), "");
        assert_eq!(s.coordinates(), None);
        assert_eq!(s.safe_radius_km(), 20.0);
    }

    #[test]
    fn audit_flags_unknown_ids() {
        let r = resolver();
        let mut known = PlanningStation::new(StationId::from("a"), 1);
        known.set(StationField::KavachId, "101");
        let mut unknown = PlanningStation::new(StationId::from("b"), 2);
        unknown.set(StationField::KavachId, "999");
        let stations = [known, unknown];
        let mut report = ValidationReport::build(&stations);
        r.audit(&stations, &mut report);
        assert!(report.issues_for("b").contains(&StationIssue::UnknownKavachId {
            kavach_id: "999".into()
        }));
        assert!(
            !report
                .issues_for("a")
                .iter()
                .any(|i| matches!(i, StationIssue::UnknownKavachId { .. }))
        );
    }
}
