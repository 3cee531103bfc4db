#![forbid(unsafe_code)]

//! A planning session: the store, its persistence, identity resolution, and
//! map sync wired together.
//!
//! # Design
//!
//! [`PlannerSession`] owns one [`PlanningStationStore`] and reacts to its
//! change events. A store subscription only flags work (save, map sync);
//! the session settles that work after each operation returns, so listeners
//! never re-enter the store.
//!
//! Network work is expressed twice:
//! - **Blocking** helpers (`run_allocation`, `submit`, `sync_now`) take the
//!   service traits and finish the whole workflow.
//! - **Step** methods (`prepare_submission`, `accept_submission`,
//!   `record_allocation`, `poll_sync`/`complete_sync`) let a host that
//!   cannot block (a browser) perform the I/O itself.
//!
//! # Invariants
//!
//! 1. Every mutation that emits a store event is persisted before the
//!    operation returns.
//! 2. Every event that affects the map schedules a sync at the session clock.
//! 3. A submission only clears the session after its file is confirmed ready.
//!
//! # Failure Modes
//!
//! - **Lookup unavailable at start**: `start` fails with
//!   [`StartupError`]; there is no degraded mode.
//! - **Persistence failure**: logged by [`StationPersistence`], never
//!   surfaced.
//! - **Map failure**: shown through [`MapView::Error`]; the session keeps
//!   working.

use std::cell::Cell;
use std::rc::Rc;

use kplan_core::{
    AddRejected, Autofill, IdentityResolver, KavachLookup, LookupError, PlanningStation,
    PlanningStationStore, Resolution, StationField, StationId, StationPersistence, StorageBackend,
    StoreEvent, Subscription, UpdateOutcome, ValidationReport,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::{Duration, Instant};

use crate::cancellation::CancellationToken;
use crate::config::PlannerConfig;
#[cfg(not(target_arch = "wasm32"))]
use crate::driver::ThreadedSyncDriver;
use crate::poll::{FilePoll, PollError, PollStep, poll_file_ready};
use crate::service::{
    AllocationResult, AllocationService, FileProbe, LookupSource, MapRenderService,
    SubmissionRecord, SubmissionResponse, TransportError,
};
use crate::sync::{MapRender, MapSyncController, MapView, SyncDispatch, SyncOutcome, SyncToken};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// The session could not start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
    #[error("Kavach ID lookup could not be loaded: {source}")]
    LookupUnavailable { source: TransportError },
    #[error("Kavach ID lookup is malformed: {0}")]
    LookupInvalid(#[from] LookupError),
}

/// An allocation or submission workflow stopped.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("add at least one planning station first")]
    NoStations,
    #[error("correct the errors in {} station(s) first", .0.invalid_count())]
    Invalid(ValidationReport),
    #[error("no stations to submit")]
    EmptySubmission,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Poll(#[from] PollError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// What happened when a Kavach ID was typed or committed.
#[derive(Debug, Clone, PartialEq)]
pub enum KavachFeedback {
    /// The input coerced to nothing.
    Empty,
    /// Found in the lookup; dependent fields were filled.
    Autofilled(Autofill),
    /// Another station already uses this ID.
    Duplicate,
    /// Not an exact match yet; the user is still typing.
    Partial,
    /// Committed but unknown; dependent fields were cleared.
    NotFound,
    UnknownStation,
}

/// One entry of the suggestion dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KavachSuggestion {
    pub kavach_id: String,
    pub label: String,
}

/// Next step after the submission endpoint answered.
#[derive(Debug, Clone)]
pub enum SubmitNext {
    /// Poll the generated file until it is downloadable.
    AwaitFile(FilePoll),
    /// Accepted without a file; the stations are kept.
    Acknowledged { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The file is ready and the session was cleared.
    FileReady { url: String, retries: u32 },
    Acknowledged { message: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PendingWork {
    save: Cell<bool>,
    sync: Cell<bool>,
}

#[derive(Debug, Clone, Copy)]
enum Clock {
    Wall(Instant),
    Manual(Duration),
}

pub struct PlannerSession {
    config: PlannerConfig,
    store: PlanningStationStore,
    resolver: IdentityResolver,
    persistence: StationPersistence,
    sync: MapSyncController,
    allocation: Vec<AllocationResult>,
    clock: Clock,
    pending: Rc<PendingWork>,
    _changes: Subscription,
}

impl PlannerSession {
    /// Fetch the lookup table, restore saved stations, and schedule the
    /// first map sync.
    pub fn start(
        config: PlannerConfig,
        lookup: &dyn LookupSource,
        backend: Box<dyn StorageBackend>,
    ) -> Result<Self, StartupError> {
        let json = lookup
            .fetch_lookup()
            .map_err(|source| StartupError::LookupUnavailable { source })?;
        Self::from_lookup_json(config, &json, backend)
    }

    /// Start from lookup JSON the host already fetched.
    pub fn from_lookup_json(
        config: PlannerConfig,
        lookup_json: &str,
        backend: Box<dyn StorageBackend>,
    ) -> Result<Self, StartupError> {
        let lookup = KavachLookup::from_json_str(lookup_json)?;
        Self::with_lookup(config, lookup, backend)
    }

    pub fn with_lookup(
        config: PlannerConfig,
        lookup: KavachLookup,
        backend: Box<dyn StorageBackend>,
    ) -> Result<Self, StartupError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(StartupError::InvalidConfig(errors));
        }

        let persistence = StationPersistence::with_key(backend, config.storage_key.clone());
        let mut store = PlanningStationStore::new();
        store.replace_all(persistence.load());

        let pending = Rc::new(PendingWork::default());
        let flags = Rc::clone(&pending);
        let changes = store.subscribe(move |event: &StoreEvent| {
            flags.save.set(true);
            if event.affects_map() {
                flags.sync.set(true);
            }
        });

        let mut sync = MapSyncController::with_debounce(config.sync_debounce());
        sync.request_sync(Duration::ZERO);

        info!(
            stations = store.len(),
            lookup_entries = lookup.len(),
            backend = persistence.backend_name(),
            "planner session started"
        );
        Ok(Self {
            config,
            store,
            resolver: IdentityResolver::new(lookup),
            persistence,
            sync,
            allocation: Vec::new(),
            clock: Clock::Wall(Instant::now()),
            pending,
            _changes: changes,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────

    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &PlanningStationStore {
        &self.store
    }

    #[must_use]
    pub fn stations(&self) -> &[PlanningStation] {
        self.store.stations()
    }

    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    #[must_use]
    pub fn persistence(&self) -> &StationPersistence {
        &self.persistence
    }

    #[must_use]
    pub fn map_view(&self) -> &MapView {
        self.sync.view()
    }

    #[must_use]
    pub fn sync_controller(&self) -> &MapSyncController {
        &self.sync
    }

    /// Results of the last allocation run.
    #[must_use]
    pub fn allocation_results(&self) -> &[AllocationResult] {
        &self.allocation
    }

    /// Observe store changes. The session's own bookkeeping runs first.
    pub fn subscribe(&mut self, listener: impl Fn(&StoreEvent) + 'static) -> Subscription {
        self.store.subscribe(listener)
    }

    // ── Clock ────────────────────────────────────────────────────────────

    /// Session time used for sync deadlines.
    #[must_use]
    pub fn now(&self) -> Duration {
        match self.clock {
            Clock::Wall(started) => started.elapsed(),
            Clock::Manual(now) => now,
        }
    }

    /// Drive the session clock from the host. Once set, the wall clock is
    /// no longer consulted.
    pub fn set_time(&mut self, now: Duration) {
        self.clock = Clock::Manual(now);
    }

    // ── Station editing ──────────────────────────────────────────────────

    pub fn add_station(&mut self) -> Result<StationId, AddRejected> {
        let result = self.store.add().map(|s| s.id().clone());
        if let Err(rejected) = &result {
            let _ = self.store.set_collapsed(rejected.station.as_str(), false);
        }
        self.settle();
        result
    }

    /// Removing the last station also drops the allocation results.
    pub fn remove_station(&mut self, id: &str) -> bool {
        let removed = self.store.remove(id);
        if removed && self.store.is_empty() && !self.allocation.is_empty() {
            debug!("last station removed, dropping allocation results");
            self.allocation.clear();
        }
        self.settle();
        removed
    }

    pub fn update_field(&mut self, id: &str, field: StationField, raw: &str) -> UpdateOutcome {
        let outcome = self.store.update(id, field, raw);
        self.settle();
        outcome
    }

    /// Store a typed or selected Kavach ID and resolve it.
    ///
    /// `commit` is true when the user selected a suggestion or left the
    /// field; only then does an unknown ID clear the dependent fields.
    pub fn enter_kavach_id(&mut self, id: &str, raw: &str, commit: bool) -> KavachFeedback {
        let UpdateOutcome::Applied(value) = self.store.update(id, StationField::KavachId, raw)
        else {
            return KavachFeedback::UnknownStation;
        };
        let kavach_id = value.to_raw();
        let feedback = if kavach_id.is_empty() {
            KavachFeedback::Empty
        } else {
            let others = self.store.kavach_ids_except(id);
            match self.resolver.resolve_exact(&kavach_id, &others) {
                Resolution::DuplicateInSession => KavachFeedback::Duplicate,
                Resolution::Found(fill) => {
                    let _ = self.store.apply_autofill(id, &fill);
                    KavachFeedback::Autofilled(fill)
                }
                Resolution::NotFound if commit => {
                    let _ = self.store.clear_dependents(id);
                    KavachFeedback::NotFound
                }
                Resolution::NotFound => KavachFeedback::Partial,
            }
        };
        debug!(station = id, %kavach_id, commit, ?feedback, "kavach id entered");
        self.settle();
        feedback
    }

    /// Lookup IDs starting with `prefix` that no other station uses, capped
    /// at the configured limit.
    #[must_use]
    pub fn suggestions(&self, id: &str, prefix: &str) -> Vec<KavachSuggestion> {
        let others = self.store.kavach_ids_except(id);
        self.resolver
            .suggest(prefix.trim(), &others)
            .take(self.config.suggestion_limit)
            .map(|s| KavachSuggestion {
                kavach_id: s.kavach_id.to_owned(),
                label: s.label(),
            })
            .collect()
    }

    pub fn set_collapsed(&mut self, id: &str, collapsed: bool) -> bool {
        let found = self.store.set_collapsed(id, collapsed);
        self.settle();
        found
    }

    /// Collapse or expand every card once all stations validate.
    ///
    /// Returns `None` without toggling when there are no stations or any
    /// station is invalid; the validation pass expands the invalid cards.
    pub fn toggle_all_collapsed(&mut self) -> Option<bool> {
        if self.store.is_empty() {
            return None;
        }
        if !self.validate().is_valid() {
            debug!("toggle refused, stations need attention");
            return None;
        }
        let collapsed = self.store.toggle_all_collapsed();
        self.settle();
        Some(collapsed)
    }

    pub fn move_station(&mut self, id: &str, to: usize) -> bool {
        let moved = self.store.move_station(id, to);
        self.settle();
        moved
    }

    /// Drop every planning station and any allocation results. Map
    /// requests already in flight are superseded.
    pub fn clear(&mut self) {
        self.store.clear();
        self.allocation.clear();
        self.sync.invalidate();
        self.settle();
    }

    /// Full validation including the master-list check. Invalid stations are
    /// expanded so their errors are visible.
    pub fn validate(&mut self) -> ValidationReport {
        let mut report = self.store.validate_all();
        self.resolver.audit(self.store.stations(), &mut report);
        let invalid: Vec<StationId> = report.invalid_ids().cloned().collect();
        for id in &invalid {
            if self.store.get(id.as_str()).is_some_and(PlanningStation::is_collapsed) {
                let _ = self.store.set_collapsed(id.as_str(), false);
            }
        }
        if !report.is_valid() {
            info!(invalid = report.invalid_count(), "validation found errors");
        }
        self.settle();
        report
    }

    fn settle(&mut self) {
        if self.pending.save.take() {
            self.persistence.save(self.store.stations());
        }
        if self.pending.sync.take() {
            let now = self.now();
            self.sync.request_sync(now);
        }
    }

    // ── Map sync ─────────────────────────────────────────────────────────

    /// Ask for a map refresh without changing anything.
    pub fn request_sync(&mut self) {
        let now = self.now();
        self.sync.request_sync(now);
    }

    /// Dispatch a due map sync, if any.
    pub fn poll_sync(&mut self) -> SyncDispatch {
        let now = self.now();
        self.sync.poll(now, self.store.stations())
    }

    pub fn complete_sync(
        &mut self,
        token: SyncToken,
        result: Result<MapRender, TransportError>,
    ) -> SyncOutcome {
        self.sync.complete(token, result)
    }

    /// Run a due map sync inline.
    pub fn sync_now(&mut self, service: &dyn MapRenderService) -> Option<SyncOutcome> {
        match self.poll_sync() {
            SyncDispatch::Request(request) => {
                let result = service.update_map(&request.payload);
                Some(self.sync.complete(request.token, result))
            }
            SyncDispatch::Placeholder | SyncDispatch::Idle => None,
        }
    }

    /// Apply finished requests, then hand a due request to the driver.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn pump_sync(&mut self, driver: &mut ThreadedSyncDriver) -> Vec<SyncOutcome> {
        let outcomes = driver.drain(&mut self.sync);
        if let SyncDispatch::Request(request) = self.poll_sync() {
            driver.dispatch(request);
        }
        outcomes
    }

    // ── Allocation ───────────────────────────────────────────────────────

    /// Checks that must pass before the allocation service is called.
    pub fn prepare_allocation(&mut self) -> Result<(), WorkflowError> {
        if self.store.is_empty() {
            return Err(WorkflowError::NoStations);
        }
        let report = self.validate();
        if report.is_valid() {
            Ok(())
        } else {
            Err(WorkflowError::Invalid(report))
        }
    }

    /// Keep the server's results and refresh the map.
    pub fn record_allocation(&mut self, results: Vec<AllocationResult>) -> &[AllocationResult] {
        let failures = results.iter().filter(|r| r.status.is_failure()).count();
        info!(results = results.len(), failures, "allocation finished");
        self.allocation = results;
        self.request_sync();
        &self.allocation
    }

    pub fn run_allocation(
        &mut self,
        service: &dyn AllocationService,
    ) -> Result<&[AllocationResult], WorkflowError> {
        self.prepare_allocation()?;
        let results = service.run_allocation(self.store.stations()).map_err(|e| {
            warn!(error = %e, "allocation request failed");
            e
        })?;
        Ok(self.record_allocation(results))
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Validate and map the stations to submission records.
    pub fn prepare_submission(&mut self) -> Result<Vec<SubmissionRecord>, WorkflowError> {
        let report = self.validate();
        if !report.is_valid() {
            return Err(WorkflowError::Invalid(report));
        }
        let records: Vec<SubmissionRecord> =
            self.store.iter().map(SubmissionRecord::from).collect();
        if records.is_empty() {
            return Err(WorkflowError::EmptySubmission);
        }
        Ok(records)
    }

    /// Interpret the submission endpoint's answer.
    pub fn accept_submission(
        &self,
        response: SubmissionResponse,
    ) -> Result<SubmitNext, WorkflowError> {
        let SubmissionResponse {
            file_url,
            message,
            error,
        } = response;
        if let Some(url) = file_url.filter(|u| !u.trim().is_empty()) {
            info!(%url, "submission accepted, waiting for file");
            return Ok(SubmitNext::AwaitFile(FilePoll::new(
                url,
                self.config.file_poll_policy(),
            )));
        }
        let message = message.filter(|m| !m.trim().is_empty());
        match (message, error) {
            (Some(message), _) => Ok(SubmitNext::Acknowledged { message }),
            (None, Some(error)) => Err(WorkflowError::Rejected(error)),
            (None, None) => Err(WorkflowError::Rejected(
                "unknown response from server after submission".into(),
            )),
        }
    }

    /// The submitted file is ready: start over with an empty session.
    pub fn complete_submission(&mut self) {
        info!(stations = self.store.len(), "submission complete, clearing session");
        self.clear();
    }

    /// Validate, submit, wait for the file, and clear the session.
    ///
    /// `on_retry` sees each not-ready probe of the file.
    pub fn submit(
        &mut self,
        service: &dyn AllocationService,
        probe: &dyn FileProbe,
        cancel: &CancellationToken,
        on_retry: impl FnMut(&PollStep),
    ) -> Result<SubmitOutcome, WorkflowError> {
        let records = self.prepare_submission()?;
        info!(stations = records.len(), "submitting stations");
        let response = service.submit(&records)?;
        match self.accept_submission(response)? {
            SubmitNext::AwaitFile(poll) => {
                let url = poll.url().to_owned();
                let policy = self.config.file_poll_policy();
                let retries = poll_file_ready(probe, &url, &policy, cancel, on_retry)?;
                self.complete_submission();
                Ok(SubmitOutcome::FileReady { url, retries })
            }
            SubmitNext::Acknowledged { message } => Ok(SubmitOutcome::Acknowledged { message }),
        }
    }
}

impl std::fmt::Debug for PlannerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerSession")
            .field("stations", &self.store.len())
            .field("backend", &self.persistence.backend_name())
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}
