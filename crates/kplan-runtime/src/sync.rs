#![forbid(unsafe_code)]

//! Keeps the remote map rendering in step with the planning stations.
//!
//! # Design
//!
//! [`MapSyncController`] is sans-IO. The host tells it the current time (a
//! `Duration` since session start) and the stations; the controller decides
//! whether a request is due, builds the payload, and hands back a
//! [`MapSyncRequest`] tagged with a [`SyncToken`]. The host performs the call
//! however it likes (worker thread, `fetch`, test fake) and reports back
//! through [`complete`](MapSyncController::complete).
//!
//! ```text
//!  request_sync(now) ──► pending(due) ──poll(now ≥ due)──► Request(token)
//!                                   └──payload empty────► Placeholder
//!  complete(token, result):
//!      token == latest ──► Applied | Failed
//!      otherwise       ──► Stale (dropped, view untouched)
//! ```
//!
//! # Invariants
//!
//! 1. Tokens are issued in strictly increasing order.
//! 2. Only the most recently issued token can change the view.
//! 3. The payload is built at dispatch time, so the latest state wins even
//!    when several requests collapse into one.
//! 4. An empty payload never reaches the remote service.

use std::collections::BTreeSet;
use std::fmt;

use kplan_core::{PlanningStation, StationKind};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, info_span, warn};
use web_time::Duration;

use crate::service::TransportError;

/// Map center used when the response does not carry a usable one.
pub const DEFAULT_CENTER: [f64; 2] = [20.5937, 78.9629];
pub const DEFAULT_ZOOM: f64 = 6.0;

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

/// One planning station as the map service sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapStation {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub rad: f64,
    pub name: String,
    pub frequency: u8,
    #[serde(rename = "onboardSlots")]
    pub onboard_slots: u32,
    #[serde(rename = "type")]
    pub kind: StationKind,
}

/// Body of `POST /api/update_map`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapPayload {
    #[serde(rename = "planningStations")]
    pub planning_stations: Vec<MapStation>,
}

impl MapPayload {
    /// Stations with both coordinates set; the rest are left off the map.
    #[must_use]
    pub fn from_stations(stations: &[PlanningStation]) -> Self {
        let planning_stations = stations
            .iter()
            .filter_map(|s| {
                let (lat, lon) = s.coordinates()?;
                Some(MapStation {
                    id: s.id().to_string(),
                    lat,
                    lon,
                    rad: s.safe_radius_km(),
                    name: s.display_name(),
                    frequency: s.allocated_frequency(),
                    onboard_slots: s.onboard_slots().unwrap_or(0),
                    kind: s.kind(),
                })
            })
            .collect();
        Self { planning_stations }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.planning_stations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.planning_stations.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────────────────

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn lenient_frequency<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u8>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_center<'de, D: Deserializer<'de>>(d: D) -> Result<[f64; 2], D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    let pair = v.as_ref().and_then(Value::as_array).and_then(|a| match a.as_slice() {
        [lat, lon] => Some([lat.as_f64()?, lon.as_f64()?]),
        _ => None,
    });
    Ok(pair.unwrap_or(DEFAULT_CENTER))
}

fn lenient_zoom<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<Value>::deserialize(d)?
        .as_ref()
        .and_then(Value::as_f64)
        .filter(|z| z.is_finite())
        .unwrap_or(DEFAULT_ZOOM))
}

fn default_center() -> [f64; 2] {
    DEFAULT_CENTER
}

fn default_zoom() -> f64 {
    DEFAULT_ZOOM
}

/// A station (planning or approved) as rendered by the map service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderedStation {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lon: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: StationKind,
    /// Coverage radius in km.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub radius: f64,
    #[serde(default, deserialize_with = "lenient_frequency")]
    pub frequency: Option<u8>,
    #[serde(rename = "fillOpacity", default, deserialize_with = "lenient_f64")]
    pub fill_opacity: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub weight: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub popup_content: String,
}

impl RenderedStation {
    #[must_use]
    pub fn style(&self) -> FrequencyStyle {
        self.frequency.map_or(FrequencyStyle::FALLBACK, frequency_style)
    }

    #[must_use]
    pub fn radius_m(&self) -> f64 {
        self.radius * 1000.0
    }
}

/// A planning station whose coverage reaches an approved station.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InterTypeConflict {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub planning_lat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub planning_lon: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub approved_lat: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub approved_lon: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub popup_content: String,
}

/// Two same-frequency stations whose coverage overlaps.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverlapPair {
    #[serde(default)]
    pub line_coords: Vec<[f64; 2]>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub popup_content: String,
}

/// Response of `POST /api/update_map`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MapRender {
    #[serde(default = "default_center", deserialize_with = "lenient_center")]
    pub center_location: [f64; 2],
    #[serde(default = "default_zoom", deserialize_with = "lenient_zoom")]
    pub zoom_level: f64,
    #[serde(rename = "allStationData", default)]
    pub stations: Vec<RenderedStation>,
    #[serde(rename = "interTypeConflicts", default)]
    pub inter_type_conflicts: Vec<InterTypeConflict>,
    #[serde(rename = "overlappingPairData", default)]
    pub overlapping_pairs: Vec<OverlapPair>,
    #[serde(rename = "hasConflict", default)]
    pub has_conflict: bool,
}

impl Default for MapRender {
    fn default() -> Self {
        Self {
            center_location: DEFAULT_CENTER,
            zoom_level: DEFAULT_ZOOM,
            stations: Vec::new(),
            inter_type_conflicts: Vec::new(),
            overlapping_pairs: Vec::new(),
            has_conflict: false,
        }
    }
}

impl MapRender {
    pub fn planning(&self) -> impl Iterator<Item = &RenderedStation> + '_ {
        self.stations.iter().filter(|s| s.kind == StationKind::Planning)
    }

    pub fn approved(&self) -> impl Iterator<Item = &RenderedStation> + '_ {
        self.stations.iter().filter(|s| s.kind == StationKind::Approved)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frequency palette
// ─────────────────────────────────────────────────────────────────────────────

/// Outline and fill colors for a frequency slot's coverage circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrequencyStyle {
    pub outline: &'static str,
    pub fill: &'static str,
}

impl FrequencyStyle {
    pub const FALLBACK: Self = Self {
        outline: "grey",
        fill: "lightgrey",
    };
}

const PALETTE: [FrequencyStyle; 7] = [
    FrequencyStyle { outline: "#12ab12", fill: "#90EE90" },
    FrequencyStyle { outline: "#0066ff", fill: "#ADD8E6" },
    FrequencyStyle { outline: "#ecec0e", fill: "#FFFACD" },
    FrequencyStyle { outline: "#ff9900", fill: "#FFDAB9" },
    FrequencyStyle { outline: "#868688", fill: "#bdbdc1" },
    FrequencyStyle { outline: "#cc0000", fill: "#ff5050" },
    FrequencyStyle { outline: "#cc0099", fill: "#FFB6C1" },
];

/// Palette entry for slot `freq` (1–7), grey for anything else.
#[must_use]
pub fn frequency_style(freq: u8) -> FrequencyStyle {
    match freq {
        1..=7 => PALETTE[usize::from(freq - 1)],
        _ => FrequencyStyle::FALLBACK,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Monotonic sequence number of a map request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncToken(u64);

impl SyncToken {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Rebuild a token handed out earlier (e.g. after a round trip through
    /// a JS host).
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request the host must send to the map service.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSyncRequest {
    pub token: SyncToken,
    pub payload: MapPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncDispatch {
    /// Nothing due.
    Idle,
    /// No station has coordinates; the view was reset locally.
    Placeholder,
    Request(MapSyncRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    Failed,
    /// A newer request was issued (or the work was invalidated); the
    /// response was dropped.
    Stale,
}

/// What the map area currently shows.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MapView {
    #[default]
    Placeholder,
    Rendered(MapRender),
    /// The last request failed; the map was torn down.
    Error(String),
}

impl MapView {
    #[must_use]
    pub fn render(&self) -> Option<&MapRender> {
        match self {
            Self::Rendered(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_conflict(&self) -> bool {
        self.render().is_some_and(|r| r.has_conflict)
    }
}

/// Debounced, stale-safe map synchronization state machine.
#[derive(Debug, Default)]
pub struct MapSyncController {
    debounce: Duration,
    due: Option<Duration>,
    next_token: u64,
    latest: Option<SyncToken>,
    outstanding: BTreeSet<SyncToken>,
    view: MapView,
}

impl MapSyncController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Coalesce requests arriving within `debounce` of each other.
    #[must_use]
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            debounce,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Ask for a refresh. Repeated calls push the deadline out.
    pub fn request_sync(&mut self, now: Duration) {
        let due = now.saturating_add(self.debounce);
        debug!(due_ms = due.as_millis() as u64, "map sync requested");
        self.due = Some(due);
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    /// When the pending request becomes due, for host-side timers.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.due
    }

    /// Dispatch the pending request if it is due.
    pub fn poll(&mut self, now: Duration, stations: &[PlanningStation]) -> SyncDispatch {
        match self.due {
            Some(due) if now >= due => {}
            _ => return SyncDispatch::Idle,
        }
        self.due = None;

        let payload = MapPayload::from_stations(stations);
        let _span = info_span!("map_sync.dispatch", stations = payload.len()).entered();
        if payload.is_empty() {
            self.invalidate();
            self.view = MapView::Placeholder;
            info!("no station has coordinates, showing placeholder");
            return SyncDispatch::Placeholder;
        }

        self.next_token += 1;
        let token = SyncToken(self.next_token);
        self.latest = Some(token);
        self.outstanding.insert(token);
        info!(%token, outstanding = self.outstanding.len(), "map sync dispatched");
        SyncDispatch::Request(MapSyncRequest { token, payload })
    }

    /// Report the result of a request issued by [`poll`](Self::poll).
    pub fn complete(
        &mut self,
        token: SyncToken,
        result: Result<MapRender, TransportError>,
    ) -> SyncOutcome {
        self.outstanding.remove(&token);
        if self.latest != Some(token) {
            debug!(%token, latest = ?self.latest, "dropping stale map response");
            return SyncOutcome::Stale;
        }
        self.latest = None;
        match result {
            Ok(render) => {
                info!(
                    %token,
                    stations = render.stations.len(),
                    has_conflict = render.has_conflict,
                    "map render applied"
                );
                self.view = MapView::Rendered(render);
                SyncOutcome::Applied
            }
            Err(e) => {
                warn!(%token, error = %e, "map refresh failed");
                self.view = MapView::Error(e.to_string());
                SyncOutcome::Failed
            }
        }
    }

    /// Supersede every outstanding request; their responses become stale.
    pub fn invalidate(&mut self) {
        if !self.outstanding.is_empty() {
            debug!(count = self.outstanding.len(), "superseding outstanding map requests");
        }
        self.latest = None;
        self.outstanding.clear();
    }

    /// A request whose response would still be applied is outstanding.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.latest.is_some()
    }

    /// Number of issued requests that have not completed yet.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    #[must_use]
    pub fn view(&self) -> &MapView {
        &self.view
    }
}
