#![forbid(unsafe_code)]

//! Platform-independent planner facade speaking JSON strings.
//!
//! [`WebPlanner`] wraps a [`PlannerSession`] for a host that owns the event
//! loop and performs every network request itself. The wasm-bindgen exports
//! and the native tests share this type; no JS types appear here.
//!
//! # Design
//!
//! - **Host-driven time**: the host calls [`WebPlanner::set_time_ms`] with
//!   its monotonic clock before polling. The wall clock is never read.
//! - **Step protocol**: `poll_sync` hands out a request with a token, the
//!   host posts it, and `complete_sync` brings the answer back. The same
//!   shape covers allocation (`prepare_allocation` / `record_allocation`)
//!   and submission (`prepare_submission` / `accept_submission` /
//!   `observe_file_status`).
//! - **JSON out**: every structured answer is a JSON string whose `kind`
//!   field names the variant, so the host can switch on it.
//!
//! # Failure Modes
//!
//! - Malformed host input (bad JSON, unknown field name) returns
//!   [`WebError`]; the session is untouched.
//! - Workflow refusals (no stations, invalid stations) return
//!   [`WebError::Workflow`] with the validation report already applied to
//!   the store (invalid cards expanded).

use std::fmt;

use kplan_core::{
    AddRejected, Autofill, PlanningStation, StationField, StorageBackend, ValidationReport,
};
use kplan_runtime::{
    AllocationRequest, AllocationResult, FilePoll, KavachFeedback, MapRender, MapView,
    PlannerConfig, PlannerSession, PollStep, StartupError, SubmissionResponse, SubmitNext,
    SyncDispatch, SyncOutcome, SyncToken, TransportError, WorkflowError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Duration;

/// Facade error surfaced to the host as a message string.
#[derive(Debug, Error)]
pub enum WebError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("invalid config: {0}")]
    Config(String),
    /// Host passed JSON we could not read.
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("unknown station field `{0}`")]
    UnknownField(String),
    #[error("no planning station with id {0}")]
    UnknownStation(String),
    #[error(transparent)]
    AddRejected(#[from] AddRejected),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    /// `observe_file_*` without an accepted submission.
    #[error("no submitted file is awaiting readiness")]
    NoPendingFile,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        warn!(error = %e, "view serialization failed");
        String::from("null")
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON views
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AutofillView<'a> {
    kavach_id: &'a str,
    station_code: &'a str,
    station_name: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    optimum_static_profile_transfer: Option<u32>,
    onboard_slots: Option<u32>,
}

impl<'a> From<&'a Autofill> for AutofillView<'a> {
    fn from(fill: &'a Autofill) -> Self {
        Self {
            kavach_id: &fill.kavach_id,
            station_code: &fill.station_code,
            station_name: &fill.station_name,
            latitude: fill.latitude,
            longitude: fill.longitude,
            optimum_static_profile_transfer: fill.optimum_static_profile_transfer,
            onboard_slots: fill.onboard_slots,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum FeedbackView<'a> {
    Empty,
    Autofilled { fill: AutofillView<'a> },
    Duplicate { message: String },
    Partial,
    NotFound { message: String },
    UnknownStation,
}

fn feedback_view<'a>(feedback: &'a KavachFeedback, raw: &str) -> FeedbackView<'a> {
    let kavach_id = raw.trim();
    match feedback {
        KavachFeedback::Empty => FeedbackView::Empty,
        KavachFeedback::Autofilled(fill) => FeedbackView::Autofilled { fill: fill.into() },
        KavachFeedback::Duplicate => FeedbackView::Duplicate {
            message: format!("Kavach ID {kavach_id} is already used by another station"),
        },
        KavachFeedback::Partial => FeedbackView::Partial,
        KavachFeedback::NotFound => FeedbackView::NotFound {
            message: format!("Kavach ID {kavach_id} not found in master list"),
        },
        KavachFeedback::UnknownStation => FeedbackView::UnknownStation,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueView {
    field: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StationReportView {
    id: String,
    station_number: usize,
    issues: Vec<IssueView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FocusView {
    id: String,
    field: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportView {
    valid: bool,
    invalid_count: usize,
    stations: Vec<StationReportView>,
    /// Where the host should move focus.
    focus: Option<FocusView>,
}

impl ReportView {
    fn build(report: &ValidationReport, stations: &[PlanningStation]) -> Self {
        let stations = stations
            .iter()
            .filter(|s| !report.is_station_valid(s.id().as_str()))
            .map(|s| StationReportView {
                id: s.id().as_str().to_owned(),
                station_number: s.station_number(),
                issues: report
                    .issues_for(s.id().as_str())
                    .iter()
                    .map(|issue| IssueView {
                        field: issue.field().name(),
                        message: issue.to_string(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            valid: report.is_valid(),
            invalid_count: report.invalid_count(),
            stations,
            focus: report.first_invalid().map(|(id, field)| FocusView {
                id: id.as_str().to_owned(),
                field: field.name(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum DispatchView<'a> {
    Idle,
    Placeholder,
    Request {
        token: u64,
        payload: &'a kplan_runtime::MapPayload,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum MapStateView<'a> {
    Placeholder,
    #[serde(rename_all = "camelCase")]
    Rendered {
        has_conflict: bool,
        stations: usize,
        conflicts: usize,
        overlaps: usize,
    },
    Error {
        message: &'a str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AllocationRowView {
    station: String,
    status: String,
    failed: bool,
    frequency: Option<u32>,
    stationary_slots: Option<u64>,
    onboard_slots_overall: Option<u64>,
    error: Option<String>,
}

impl From<&AllocationResult> for AllocationRowView {
    fn from(r: &AllocationResult) -> Self {
        Self {
            station: r.station_label(),
            status: r.status.as_str().to_owned(),
            failed: r.status.is_failure(),
            frequency: r.frequency_slot(),
            stationary_slots: r.stationary_slots,
            onboard_slots_overall: r.onboard_slots_overall,
            error: r.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum SubmitView<'a> {
    #[serde(rename_all = "camelCase")]
    AwaitFile { url: &'a str, max_retries: u32 },
    Acknowledged { message: &'a str },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum FileStepView {
    Ready {
        url: String,
        retries: u32,
    },
    #[serde(rename_all = "camelCase")]
    Retry {
        attempt: u32,
        after_ms: u64,
        status: u16,
    },
    Failed {
        message: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// WebPlanner
// ─────────────────────────────────────────────────────────────────────────────

/// Host-driven planner session.
pub struct WebPlanner {
    session: PlannerSession,
    file_poll: Option<FilePoll>,
}

impl WebPlanner {
    /// Start from the lookup JSON the host fetched and an optional JSON
    /// config. Saved stations are restored from `backend`.
    pub fn new(
        lookup_json: &str,
        config_json: Option<&str>,
        backend: Box<dyn StorageBackend>,
    ) -> Result<Self, WebError> {
        let config = match config_json.map(str::trim).filter(|s| !s.is_empty()) {
            Some(json) => {
                PlannerConfig::from_json_str(json).map_err(|e| WebError::Config(e.to_string()))?
            }
            None => PlannerConfig::default(),
        };
        let mut session = PlannerSession::from_lookup_json(config, lookup_json, backend)?;
        session.set_time(Duration::ZERO);
        Ok(Self {
            session,
            file_poll: None,
        })
    }

    #[must_use]
    pub fn session(&self) -> &PlannerSession {
        &self.session
    }

    /// Advance the host clock. Negative and non-finite values are ignored.
    pub fn set_time_ms(&mut self, now_ms: f64) {
        if now_ms.is_finite() && now_ms >= 0.0 {
            self.session
                .set_time(Duration::from_micros((now_ms * 1000.0).round() as u64));
        }
    }

    // ── Stations ─────────────────────────────────────────────────────────

    /// All stations in store order, camelCase keys.
    #[must_use]
    pub fn stations_json(&self) -> String {
        to_json(self.session.stations())
    }

    #[must_use]
    pub fn station_count(&self) -> usize {
        self.session.stations().len()
    }

    /// Append a station; returns its id.
    pub fn add_station(&mut self) -> Result<String, WebError> {
        self.session
            .add_station()
            .map(|id| id.as_str().to_owned())
            .map_err(WebError::from)
    }

    pub fn remove_station(&mut self, id: &str) -> bool {
        self.session.remove_station(id)
    }

    /// Store `raw` into `field` and return the coerced value as text.
    pub fn update_field(&mut self, id: &str, field: &str, raw: &str) -> Result<String, WebError> {
        let field: StationField = field
            .parse()
            .map_err(|_| WebError::UnknownField(field.to_owned()))?;
        self.session
            .update_field(id, field, raw)
            .value()
            .map(|v| v.to_raw())
            .ok_or_else(|| WebError::UnknownStation(id.to_owned()))
    }

    /// Feedback JSON for a typed (`commit == false`) or committed Kavach ID.
    pub fn enter_kavach_id(&mut self, id: &str, raw: &str, commit: bool) -> String {
        let feedback = self.session.enter_kavach_id(id, raw, commit);
        to_json(&feedback_view(&feedback, raw))
    }

    #[must_use]
    pub fn suggestions_json(&self, id: &str, prefix: &str) -> String {
        to_json(&self.session.suggestions(id, prefix))
    }

    pub fn set_collapsed(&mut self, id: &str, collapsed: bool) -> bool {
        self.session.set_collapsed(id, collapsed)
    }

    /// Returns the collapsed state every card now has, or `None` when there is nothing to toggle or a station is invalid.
    pub fn toggle_all_collapsed(&mut self) -> Option<bool> {
        self.session.toggle_all_collapsed()
    }

    pub fn move_station(&mut self, id: &str, to: usize) -> bool {
        self.session.move_station(id, to)
    }

    pub fn clear(&mut self) {
        self.file_poll = None;
        self.session.clear();
    }

    pub fn validate_json(&mut self) -> String {
        let report = self.session.validate();
        to_json(&ReportView::build(&report, self.session.stations()))
    }

    // ── Map sync ─────────────────────────────────────────────────────────

    pub fn request_sync(&mut self) {
        self.session.request_sync();
    }

    /// Milliseconds of session time at which `poll_sync` will dispatch.
    #[must_use]
    pub fn next_sync_deadline_ms(&self) -> Option<f64> {
        self.session
            .sync_controller()
            .next_deadline()
            .map(|d| d.as_micros() as f64 / 1000.0)
    }

    /// `{"kind":"idle"}`, `{"kind":"placeholder"}`, or
    /// `{"kind":"request","token":n,"payload":{...}}`.
    pub fn poll_sync(&mut self) -> String {
        match self.session.poll_sync() {
            SyncDispatch::Idle => to_json(&DispatchView::Idle),
            SyncDispatch::Placeholder => to_json(&DispatchView::Placeholder),
            SyncDispatch::Request(request) => {
                debug!(token = %request.token, stations = request.payload.len(), "map sync dispatched");
                to_json(&DispatchView::Request {
                    token: request.token.get(),
                    payload: &request.payload,
                })
            }
        }
    }

    /// Hand back the response body (or the host's error text) for `token`.
    /// Returns `"applied"`, `"failed"`, or `"stale"`.
    pub fn complete_sync(&mut self, token: u64, response: Result<&str, String>) -> &'static str {
        let result = match response {
            Ok(body) => serde_json::from_str::<MapRender>(body).map_err(TransportError::from),
            Err(message) => Err(TransportError::Network(message)),
        };
        match self.session.complete_sync(SyncToken::from_raw(token), result) {
            SyncOutcome::Applied => "applied",
            SyncOutcome::Failed => "failed",
            SyncOutcome::Stale => "stale",
        }
    }

    #[must_use]
    pub fn map_state_json(&self) -> String {
        let view = match self.session.map_view() {
            MapView::Placeholder => MapStateView::Placeholder,
            MapView::Rendered(render) => MapStateView::Rendered {
                has_conflict: render.has_conflict,
                stations: render.stations.len(),
                conflicts: render.inter_type_conflicts.len(),
                overlaps: render.overlapping_pairs.len(),
            },
            MapView::Error(message) => MapStateView::Error { message },
        };
        to_json(&view)
    }

    // ── Allocation ───────────────────────────────────────────────────────

    /// Validate and return the allocation request body.
    pub fn prepare_allocation(&mut self) -> Result<String, WebError> {
        self.session.prepare_allocation()?;
        Ok(to_json(&AllocationRequest {
            planning_stations: self.session.stations(),
        }))
    }

    /// Record the allocation response body; returns the result rows.
    pub fn record_allocation(&mut self, response_json: &str) -> Result<String, WebError> {
        let results: Vec<AllocationResult> = serde_json::from_str(response_json)
            .map_err(|e| WebError::BadInput(e.to_string()))?;
        let rows: Vec<AllocationRowView> = self
            .session
            .record_allocation(results)
            .iter()
            .map(AllocationRowView::from)
            .collect();
        Ok(to_json(&rows))
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Validate and return the submission request body.
    pub fn prepare_submission(&mut self) -> Result<String, WebError> {
        let records = self.session.prepare_submission()?;
        info!(stations = records.len(), "submission prepared");
        Ok(to_json(&records))
    }

    /// Read the submission endpoint's answer. A file URL arms the
    /// readiness poll.
    pub fn accept_submission(&mut self, response_json: &str) -> Result<String, WebError> {
        let response: SubmissionResponse = serde_json::from_str(response_json)
            .map_err(|e| WebError::BadInput(e.to_string()))?;
        match self.session.accept_submission(response)? {
            SubmitNext::AwaitFile(poll) => {
                let view = to_json(&SubmitView::AwaitFile {
                    url: poll.url(),
                    max_retries: poll.max_retries(),
                });
                self.file_poll = Some(poll);
                Ok(view)
            }
            SubmitNext::Acknowledged { message } => {
                Ok(to_json(&SubmitView::Acknowledged { message: &message }))
            }
        }
    }

    /// URL the host should probe with `HEAD`, if a file is awaited.
    #[must_use]
    pub fn pending_file_url(&self) -> Option<&str> {
        self.file_poll.as_ref().map(FilePoll::url)
    }

    /// Feed one `HEAD` status. Ready clears the session.
    pub fn observe_file_status(&mut self, status: u16) -> Result<String, WebError> {
        self.observe_file(Ok(status))
    }

    /// The host's probe failed before any status arrived.
    pub fn observe_file_error(&mut self, message: String) -> Result<String, WebError> {
        self.observe_file(Err(TransportError::Network(message)))
    }

    /// Stop waiting for the file. The stations are kept.
    pub fn cancel_file_poll(&mut self) -> bool {
        let cancelled = self.file_poll.take().is_some();
        if cancelled {
            info!("file poll cancelled by host");
        }
        cancelled
    }

    fn observe_file(&mut self, probe: Result<u16, TransportError>) -> Result<String, WebError> {
        let poll = self.file_poll.as_mut().ok_or(WebError::NoPendingFile)?;
        let view = match poll.observe(probe) {
            PollStep::Ready => {
                let ready = FileStepView::Ready {
                    url: poll.url().to_owned(),
                    retries: poll.retries(),
                };
                self.file_poll = None;
                self.session.complete_submission();
                ready
            }
            PollStep::Retry {
                attempt,
                after,
                status,
            } => FileStepView::Retry {
                attempt,
                after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                status,
            },
            PollStep::Failed(e) => {
                warn!(url = poll.url(), error = %e, "file poll failed");
                self.file_poll = None;
                FileStepView::Failed {
                    message: e.to_string(),
                }
            }
        };
        Ok(to_json(&view))
    }
}

impl fmt::Debug for WebPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPlanner")
            .field("session", &self.session)
            .field("file_poll", &self.file_poll.as_ref().map(FilePoll::url))
            .finish()
    }
}
