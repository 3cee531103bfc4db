#![forbid(unsafe_code)]

//! The planning station entity and its identifier.
//!
//! A [`PlanningStation`] is a plain record. Every write goes through
//! [`PlanningStation::set`], which coerces and clamps according to the
//! field's [`FieldSpec`](crate::FieldSpec), so an entity can never hold an
//! out-of-domain number or a non-digit Kavach ID.
//!
//! The serialized form uses camelCase keys and is what persistence stores
//! under the `planningStations` key.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::field::{
    DEFAULT_ALLOCATED_FREQUENCY, DEFAULT_SAFE_RADIUS_KM, FieldValue, StationField,
};

/// Opaque, session-unique station identifier (`station_<epoch-ms>_<seq>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for StationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for StationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Generates `station_<epoch-ms>_<seq>` identifiers.
///
/// The sequence number is monotonic per generator, so two ids minted in the
/// same millisecond still differ.
#[derive(Debug, Default)]
pub(crate) struct IdGenerator {
    seq: u64,
}

impl IdGenerator {
    pub(crate) fn next(&mut self, taken: impl Fn(&str) -> bool) -> StationId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        loop {
            let candidate = format!("station_{millis}_{}", self.seq);
            self.seq = self.seq.wrapping_add(1);
            if !taken(&candidate) {
                return StationId(candidate);
            }
        }
    }
}

/// Whether a station is being planned in this session or already approved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationKind {
    #[default]
    Planning,
    Approved,
}

impl StationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Approved => "approved",
        }
    }
}

fn default_safe_radius() -> f64 {
    DEFAULT_SAFE_RADIUS_KM
}

fn default_frequency() -> u8 {
    DEFAULT_ALLOCATED_FREQUENCY
}

fn default_slots() -> Option<u32> {
    Some(0)
}

/// One planning station card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningStation {
    #[serde(default)]
    id: StationId,
    #[serde(default)]
    station_number: usize,
    #[serde(default)]
    kavach_id: String,
    #[serde(default)]
    station_code: String,
    #[serde(default)]
    station_name: String,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default = "default_safe_radius")]
    safe_radius_km: f64,
    #[serde(default = "default_frequency")]
    allocated_frequency: u8,
    #[serde(default = "default_slots")]
    optimum_static_profile_transfer: Option<u32>,
    #[serde(default = "default_slots")]
    onboard_slots: Option<u32>,
    #[serde(rename = "type", default)]
    kind: StationKind,
    #[serde(default)]
    is_valid: bool,
    #[serde(default)]
    is_collapsed: bool,
}

impl PlanningStation {
    /// A fresh, expanded, invalid station with default field values.
    #[must_use]
    pub fn new(id: StationId, station_number: usize) -> Self {
        Self {
            id,
            station_number,
            kavach_id: String::new(),
            station_code: String::new(),
            station_name: String::new(),
            latitude: None,
            longitude: None,
            safe_radius_km: DEFAULT_SAFE_RADIUS_KM,
            allocated_frequency: DEFAULT_ALLOCATED_FREQUENCY,
            optimum_static_profile_transfer: Some(0),
            onboard_slots: Some(0),
            kind: StationKind::Planning,
            is_valid: false,
            is_collapsed: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &StationId {
        &self.id
    }

    #[must_use]
    pub fn station_number(&self) -> usize {
        self.station_number
    }

    #[must_use]
    pub fn kavach_id(&self) -> &str {
        &self.kavach_id
    }

    #[must_use]
    pub fn station_code(&self) -> &str {
        &self.station_code
    }

    #[must_use]
    pub fn station_name(&self) -> &str {
        &self.station_name
    }

    #[must_use]
    pub fn latitude(&self) -> Option<f64> {
        self.latitude
    }

    #[must_use]
    pub fn longitude(&self) -> Option<f64> {
        self.longitude
    }

    #[must_use]
    pub fn safe_radius_km(&self) -> f64 {
        self.safe_radius_km
    }

    #[must_use]
    pub fn allocated_frequency(&self) -> u8 {
        self.allocated_frequency
    }

    #[must_use]
    pub fn optimum_static_profile_transfer(&self) -> Option<u32> {
        self.optimum_static_profile_transfer
    }

    #[must_use]
    pub fn onboard_slots(&self) -> Option<u32> {
        self.onboard_slots
    }

    #[must_use]
    pub fn kind(&self) -> StationKind {
        self.kind
    }

    /// Derived flag: all required fields valid and Kavach ID unique.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    #[must_use]
    pub fn is_collapsed(&self) -> bool {
        self.is_collapsed
    }

    /// Both coordinates are present.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// Display name for map popups: the station name, or `Station <n>`.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.station_name.trim().is_empty() {
            format!("Station {}", self.station_number)
        } else {
            self.station_name.clone()
        }
    }

    /// Read a field as a typed value.
    #[must_use]
    pub fn get(&self, field: StationField) -> FieldValue {
        match field {
            StationField::KavachId => FieldValue::Text(self.kavach_id.clone()),
            StationField::StationCode => FieldValue::Text(self.station_code.clone()),
            StationField::StationName => FieldValue::Text(self.station_name.clone()),
            StationField::Latitude => FieldValue::Float(self.latitude),
            StationField::Longitude => FieldValue::Float(self.longitude),
            StationField::OptimumStaticProfileTransfer => {
                FieldValue::Int(self.optimum_static_profile_transfer.map(i64::from))
            }
            StationField::OnboardSlots => FieldValue::Int(self.onboard_slots.map(i64::from)),
            StationField::SafeRadiusKm => FieldValue::Float(Some(self.safe_radius_km)),
            StationField::AllocatedFrequency => {
                FieldValue::Int(Some(i64::from(self.allocated_frequency)))
            }
        }
    }

    /// Coerce `raw` into `field` and store it. Returns the stored value.
    pub fn set(&mut self, field: StationField, raw: &str) -> FieldValue {
        let value = field.coerce(raw);
        self.store(field, value)
    }

    /// Normalize an already-typed value into `field` and store it.
    pub fn set_value(&mut self, field: StationField, value: FieldValue) -> FieldValue {
        let value = field.normalize(value);
        self.store(field, value)
    }

    fn store(&mut self, field: StationField, value: FieldValue) -> FieldValue {
        match (field, &value) {
            (StationField::KavachId, FieldValue::Text(s)) => self.kavach_id.clone_from(s),
            (StationField::StationCode, FieldValue::Text(s)) => self.station_code.clone_from(s),
            (StationField::StationName, FieldValue::Text(s)) => self.station_name.clone_from(s),
            (StationField::Latitude, FieldValue::Float(v)) => self.latitude = *v,
            (StationField::Longitude, FieldValue::Float(v)) => self.longitude = *v,
            (StationField::OptimumStaticProfileTransfer, FieldValue::Int(v)) => {
                self.optimum_static_profile_transfer = v.map(saturate_u32);
            }
            (StationField::OnboardSlots, FieldValue::Int(v)) => {
                self.onboard_slots = v.map(saturate_u32);
            }
            (StationField::SafeRadiusKm, FieldValue::Float(Some(v))) => self.safe_radius_km = *v,
            (StationField::AllocatedFrequency, FieldValue::Int(Some(v))) => {
                self.allocated_frequency = u8::try_from(*v).unwrap_or(DEFAULT_ALLOCATED_FREQUENCY);
            }
            // `normalize` guarantees the kind matches and slider fields are set.
            _ => {}
        }
        self.get(field)
    }

    /// Re-apply coercion to every field. Used on data that did not come
    /// through [`set`](Self::set), such as a loaded snapshot.
    pub fn normalize(&mut self) {
        for field in StationField::ALL {
            let current = self.get(field);
            let _ = self.set_value(field, current);
        }
    }

    pub(crate) fn set_id(&mut self, id: StationId) {
        self.id = id;
    }

    pub(crate) fn set_station_number(&mut self, n: usize) {
        self.station_number = n;
    }

    pub(crate) fn set_valid(&mut self, valid: bool) {
        self.is_valid = valid;
    }

    pub(crate) fn set_collapsed(&mut self, collapsed: bool) {
        self.is_collapsed = collapsed;
    }
}

fn saturate_u32(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}
