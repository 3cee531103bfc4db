#![forbid(unsafe_code)]

//! Core: planning station model, field validation, identity resolution, and
//! persistence.
//!
//! # Role in kplan
//! `kplan-core` owns the authoritative, in-session collection of planning
//! stations. Everything that mutates a station goes through
//! [`PlanningStationStore`]; everything that decides whether a station is
//! acceptable goes through [`validate`] and [`IdentityResolver`].
//!
//! # Primary responsibilities
//! - **Field model**: a closed set of [`StationField`]s, each statically bound
//!   to a type and domain, with coercion that clamps instead of rejecting.
//! - **FieldValidator**: pure per-field checks returning a [`FieldCheck`].
//! - **IdentityResolver**: Kavach ID suggestions, exact resolution, autofill.
//! - **PlanningStationStore**: add/remove/update/renumber/validate with change
//!   notifications.
//! - **Persistence**: a single JSON key in a pluggable [`StorageBackend`].
//!
//! # How it fits in the system
//! `kplan-runtime` drives a store from a session object and keeps the remote
//! map service in sync with it; `kplan-web` exposes that session to a
//! browser host. This crate performs no network I/O.

pub mod events;
pub mod field;
pub mod identity;
pub mod persistence;
pub mod station;
pub mod store;
pub mod validate;

pub use events::{StoreEvent, Subscription};
pub use field::{FieldKind, FieldSpec, FieldValue, StationField, UnknownField};
pub use identity::{
    Autofill, IdentityResolver, KavachLookup, LookupEntry, LookupError, Resolution,
    SUGGESTION_LIMIT, Suggestion, Suggestions,
};
#[cfg(feature = "file-storage")]
pub use persistence::FileStorage;
pub use persistence::{
    DEFAULT_STORAGE_KEY, MemoryStorage, StationPersistence, StorageBackend, StorageError,
    StorageResult,
};
pub use station::{PlanningStation, StationId, StationKind};
pub use store::{AddRejected, PlanningStationStore, UpdateOutcome};
pub use validate::{
    DuplicateGroup, FieldCheck, FieldFailure, StationIssue, ValidationReport, check, check_station,
    check_value,
};
