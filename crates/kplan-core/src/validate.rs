#![forbid(unsafe_code)]

//! Field validation and the cross-station validation report.
//!
//! [`check`] and [`check_value`] are pure: given a [`FieldSpec`] and a value
//! they classify it without touching any station. [`check_station`] walks a
//! station's fields in display order and stops at the first failure, which
//! is what a UI needs to decide where to put focus.
//!
//! [`ValidationReport`] is the store-wide view: per-field failures plus
//! duplicate Kavach ID groups (and, once an
//! [`IdentityResolver`](crate::IdentityResolver) has audited it, IDs that are
//! missing from the master lookup).

use std::collections::HashMap;
use std::fmt;

use crate::field::{FieldKind, FieldSpec, FieldValue, StationField};
use crate::station::{PlanningStation, StationId};

/// Classification of a single field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCheck {
    Valid,
    Missing,
    NotANumber,
    BelowMin,
    AboveMax,
}

impl FieldCheck {
    #[must_use]
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

impl fmt::Display for FieldCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Valid => "valid",
            Self::Missing => "missing",
            Self::NotANumber => "not a number",
            Self::BelowMin => "below minimum",
            Self::AboveMax => "above maximum",
        })
    }
}

/// Classify raw input against `spec`.
///
/// Whitespace-only input counts as empty. Non-finite numbers and fractional
/// input for integer fields are `NotANumber`.
#[must_use]
pub fn check(spec: &FieldSpec, raw: &str) -> FieldCheck {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return empty(spec);
    }
    match spec.kind {
        FieldKind::Text => FieldCheck::Valid,
        FieldKind::Float => match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => check_range(spec, v),
            _ => FieldCheck::NotANumber,
        },
        FieldKind::Int => match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() && v.fract() == 0.0 => check_range(spec, v),
            _ => FieldCheck::NotANumber,
        },
    }
}

/// Classify an already-typed value against `spec`.
#[must_use]
pub fn check_value(spec: &FieldSpec, value: &FieldValue) -> FieldCheck {
    match value {
        FieldValue::Text(s) => check(spec, s),
        FieldValue::Int(None) | FieldValue::Float(None) => empty(spec),
        FieldValue::Int(Some(i)) => check_range(spec, *i as f64),
        FieldValue::Float(Some(f)) if f.is_finite() => check_range(spec, *f),
        FieldValue::Float(Some(_)) => FieldCheck::NotANumber,
    }
}

fn empty(spec: &FieldSpec) -> FieldCheck {
    if spec.required {
        FieldCheck::Missing
    } else {
        FieldCheck::Valid
    }
}

fn check_range(spec: &FieldSpec, v: f64) -> FieldCheck {
    if spec.min.is_some_and(|min| v < min) {
        FieldCheck::BelowMin
    } else if spec.max.is_some_and(|max| v > max) {
        FieldCheck::AboveMax
    } else {
        FieldCheck::Valid
    }
}

/// The first field of a station that failed its check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFailure {
    pub field: StationField,
    pub check: FieldCheck,
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is {}", self.field.label(), self.check)
    }
}

/// Check every field of `station` in display order; report the first failure.
pub fn check_station(station: &PlanningStation) -> Result<(), FieldFailure> {
    match failures(station).next() {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

/// All failing fields of `station`, in display order.
pub fn failures(station: &PlanningStation) -> impl Iterator<Item = FieldFailure> + '_ {
    StationField::ALL.into_iter().filter_map(move |field| {
        let check = check_value(&field.spec(), &station.get(field));
        (!check.is_valid()).then_some(FieldFailure { field, check })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Store-wide report
// ─────────────────────────────────────────────────────────────────────────────

/// Why a station is not acceptable.
#[derive(Debug, Clone, PartialEq)]
pub enum StationIssue {
    Field(FieldFailure),
    /// Another station carries the same Kavach ID. `owner` is the first
    /// station (in store order) that uses it.
    DuplicateKavachId {
        kavach_id: String,
        owner: StationId,
        owner_number: usize,
    },
    /// The Kavach ID is not in the master lookup.
    UnknownKavachId { kavach_id: String },
}

impl StationIssue {
    /// The field a UI should focus for this issue.
    #[must_use]
    pub fn field(&self) -> StationField {
        match self {
            Self::Field(f) => f.field,
            Self::DuplicateKavachId { .. } | Self::UnknownKavachId { .. } => StationField::KavachId,
        }
    }
}

impl fmt::Display for StationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(failure) => failure.fmt(f),
            Self::DuplicateKavachId {
                kavach_id,
                owner_number,
                ..
            } => write!(
                f,
                "Kavach ID {kavach_id} is already used in Station {owner_number}"
            ),
            Self::UnknownKavachId { kavach_id } => {
                write!(f, "Kavach ID {kavach_id} not found in master list")
            }
        }
    }
}

/// Stations sharing one Kavach ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub kavach_id: String,
    pub owner: StationId,
    pub duplicates: Vec<StationId>,
}

/// Result of validating the whole store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    order: Vec<StationId>,
    issues: HashMap<StationId, Vec<StationIssue>>,
    duplicate_groups: Vec<DuplicateGroup>,
}

impl ValidationReport {
    /// Build a report for `stations` (in store order): field failures plus
    /// duplicate Kavach ID groups.
    #[must_use]
    pub fn build(stations: &[PlanningStation]) -> Self {
        let mut report = Self {
            order: stations.iter().map(|s| s.id().clone()).collect(),
            ..Self::default()
        };

        for station in stations {
            for failure in failures(station) {
                report.push(station.id(), StationIssue::Field(failure));
            }
        }

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        let mut owners: HashMap<&str, (usize, usize)> = HashMap::new();
        for station in stations {
            let key = station.kavach_id();
            if key.is_empty() {
                continue;
            }
            match owners.get(key) {
                Some(&(group, _)) => groups[group].duplicates.push(station.id().clone()),
                None => {
                    owners.insert(key, (groups.len(), station.station_number()));
                    groups.push(DuplicateGroup {
                        kavach_id: key.to_owned(),
                        owner: station.id().clone(),
                        duplicates: Vec::new(),
                    });
                }
            }
        }
        groups.retain(|g| !g.duplicates.is_empty());

        for group in &groups {
            let owner_number = owners
                .get(group.kavach_id.as_str())
                .map_or(0, |&(_, n)| n);
            for id in std::iter::once(&group.owner).chain(&group.duplicates) {
                report.push(
                    id,
                    StationIssue::DuplicateKavachId {
                        kavach_id: group.kavach_id.clone(),
                        owner: group.owner.clone(),
                        owner_number,
                    },
                );
            }
        }
        report.duplicate_groups = groups;
        report
    }

    pub fn push(&mut self, id: &StationId, issue: StationIssue) {
        self.issues.entry(id.clone()).or_default().push(issue);
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    #[must_use]
    pub fn is_station_valid(&self, id: &str) -> bool {
        !self.issues.contains_key(id)
    }

    /// Ids of invalid stations, in store order.
    pub fn invalid_ids(&self) -> impl Iterator<Item = &StationId> + '_ {
        self.order.iter().filter(|id| self.issues.contains_key(*id))
    }

    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.issues.len()
    }

    #[must_use]
    pub fn issues_for(&self, id: &str) -> &[StationIssue] {
        self.issues.get(id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn duplicate_groups(&self) -> &[DuplicateGroup] {
        &self.duplicate_groups
    }

    /// The first invalid station in store order and the field to focus.
    #[must_use]
    pub fn first_invalid(&self) -> Option<(&StationId, StationField)> {
        let id = self.invalid_ids().next()?;
        let field = self.issues_for(id.as_str()).first()?.field();
        Some((id, field))
    }
}
