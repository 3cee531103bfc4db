#![forbid(unsafe_code)]

//! Service seams and their wire types.
//!
//! Every remote interaction goes through one of four traits so the session
//! can be driven by the blocking [`HttpClient`](crate::http::HttpClient), by
//! a browser host, or by an in-process fake in tests:
//!
//! | Trait               | Endpoint                        |
//! |---------------------|---------------------------------|
//! | [`LookupSource`]    | GET `/static/skavidLookup.json` |
//! | [`MapRenderService`]| POST `/api/update_map`          |
//! | [`AllocationService`]| POST `/api/run_allocation`, POST `/allocate_slots_endpoint` |
//! | [`FileProbe`]       | HEAD `<fileUrl>`                |

use std::fmt;

use kplan_core::PlanningStation;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::sync::{MapPayload, MapRender};

/// A remote call that did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Source of the master Kavach ID table (raw JSON text).
pub trait LookupSource {
    fn fetch_lookup(&self) -> Result<String, TransportError>;
}

/// Renders the current planning stations into a map description.
pub trait MapRenderService: Send + Sync {
    fn update_map(&self, payload: &MapPayload) -> Result<MapRender, TransportError>;
}

/// Runs the server-side allocation and accepts the final submission.
pub trait AllocationService {
    fn run_allocation(
        &self,
        stations: &[PlanningStation],
    ) -> Result<Vec<AllocationResult>, TransportError>;

    fn submit(&self, records: &[SubmissionRecord]) -> Result<SubmissionResponse, TransportError>;
}

/// Checks whether a generated file is ready. Returns the HTTP status.
pub trait FileProbe {
    fn probe(&self, url: &str) -> Result<u16, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Allocation
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/run_allocation`.
#[derive(Debug, Serialize)]
pub struct AllocationRequest<'a> {
    pub planning_stations: &'a [PlanningStation],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationStatus {
    Allocated,
    Conflict,
    NotAllocated,
    Warning,
    Other(String),
}

impl AllocationStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Allocated => "Allocated",
            Self::Conflict => "Conflict",
            Self::NotAllocated => "Not Allocated",
            Self::Warning => "Warning",
            Self::Other(s) => s,
        }
    }

    /// `Conflict` and `Not Allocated` are failures for the station.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Conflict | Self::NotAllocated)
    }
}

impl From<String> for AllocationStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Allocated" => Self::Allocated,
            "Conflict" => Self::Conflict,
            "Not Allocated" => Self::NotAllocated,
            "Warning" => Self::Warning,
            _ => Self::Other(s),
        }
    }
}

impl<'de> Deserialize<'de> for AllocationStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(match v {
            Value::String(s) => s.into(),
            Value::Null => Self::Other(String::new()),
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Frequency` in an allocation result: a number, a numeric string, `"N/A"`,
/// or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatedFrequency {
    Slot(u32),
    NotApplicable,
}

fn lenient_frequency<'de, D: Deserializer<'de>>(d: D) -> Result<Option<AllocatedFrequency>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(AllocatedFrequency::Slot),
        Some(Value::String(s)) if s.trim() == "N/A" => Some(AllocatedFrequency::NotApplicable),
        Some(Value::String(s)) => s.trim().parse().ok().map(AllocatedFrequency::Slot),
        _ => None,
    })
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// One row of the allocation response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AllocationResult {
    #[serde(rename = "Station", default)]
    pub station: Value,
    #[serde(rename = "Status")]
    pub status: AllocationStatus,
    #[serde(rename = "Frequency", default, deserialize_with = "lenient_frequency")]
    pub frequency: Option<AllocatedFrequency>,
    #[serde(rename = "StationarySlots", default, deserialize_with = "lenient_count")]
    pub stationary_slots: Option<u64>,
    #[serde(rename = "OnboardSlotsOverall", default, deserialize_with = "lenient_count")]
    pub onboard_slots_overall: Option<u64>,
    #[serde(rename = "Error", default)]
    pub error: Option<String>,
}

impl AllocationResult {
    /// Station label as the server reported it.
    #[must_use]
    pub fn station_label(&self) -> String {
        match &self.station {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// The allocated slot, if the server assigned one.
    #[must_use]
    pub fn frequency_slot(&self) -> Option<u32> {
        match self.frequency {
            Some(AllocatedFrequency::Slot(n)) => Some(n),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission
// ─────────────────────────────────────────────────────────────────────────────

/// One station in the final submission, keyed the way the slot allocator
/// expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionRecord {
    #[serde(rename = "KavachID")]
    pub kavach_id: String,
    #[serde(rename = "StationCode")]
    pub station_code: String,
    pub name: String,
    #[serde(rename = "Latitude")]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<f64>,
    #[serde(rename = "onboardSlots")]
    pub onboard_slots: Option<u32>,
    #[serde(rename = "Static")]
    pub static_profile_transfer: Option<u32>,
    pub safe_radius_km: f64,
    pub allocated_frequency: u8,
}

impl From<&PlanningStation> for SubmissionRecord {
    fn from(s: &PlanningStation) -> Self {
        Self {
            kavach_id: s.kavach_id().to_owned(),
            station_code: s.station_code().to_owned(),
            name: s.station_name().to_owned(),
            latitude: s.latitude(),
            longitude: s.longitude(),
            onboard_slots: s.onboard_slots(),
            static_profile_transfer: s.optimum_static_profile_transfer(),
            safe_radius_km: s.safe_radius_km(),
            allocated_frequency: s.allocated_frequency(),
        }
    }
}

/// Response of `POST /allocate_slots_endpoint`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
