#![forbid(unsafe_code)]

//! Runtime: map synchronization, allocation and submission workflows, and the
//! planning session that ties them to the store.
//!
//! # Role in kplan
//! `kplan-core` knows nothing about the network. This crate adds the
//! service seams ([`service`]), the stale-safe map sync state machine
//! ([`sync`]), bounded file polling with cancellation ([`poll`],
//! [`cancellation`], [`retry`]), configuration ([`config`]), and
//! [`PlannerSession`], which owns a store and keeps its persistence and map
//! view current.
//!
//! # Hosts
//! - Native: [`HttpClient`] (feature `http`) implements every service trait
//!   with blocking `reqwest`; [`ThreadedSyncDriver`] runs map requests on
//!   worker threads.
//! - Browser: `kplan-web` drives the same session through its step methods
//!   and performs the requests with `fetch`.

pub mod cancellation;
pub mod config;
#[cfg(not(target_arch = "wasm32"))]
pub mod driver;
#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
pub mod http;
pub mod poll;
pub mod retry;
pub mod service;
pub mod session;
pub mod sync;

pub use cancellation::{CancellationSource, CancellationToken};
pub use config::{ConfigError, EndpointConfig, FilePollConfig, PlannerConfig};
#[cfg(not(target_arch = "wasm32"))]
pub use driver::ThreadedSyncDriver;
#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
pub use http::HttpClient;
pub use poll::{FilePoll, PollError, PollStep, poll_file_ready};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use service::{
    AllocatedFrequency, AllocationRequest, AllocationResult, AllocationService, AllocationStatus,
    FileProbe, LookupSource, MapRenderService, SubmissionRecord, SubmissionResponse,
    TransportError,
};
pub use session::{
    KavachFeedback, KavachSuggestion, PlannerSession, StartupError, SubmitNext, SubmitOutcome,
    WorkflowError,
};
pub use sync::{
    FrequencyStyle, MapPayload, MapRender, MapStation, MapSyncController, MapSyncRequest, MapView,
    SyncDispatch, SyncOutcome, SyncToken, frequency_style,
};
