#![forbid(unsafe_code)]

//! `kplan-web` exposes a planning session to a browser host.
//!
//! Design goals:
//! - **Host-driven I/O**: JS performs `fetch` for the map, allocation,
//!   submission, and file probes, then reports the answers back.
//! - **Deterministic time**: the host advances the session clock explicitly.
//! - **No blocking / no threads**: suitable for `wasm32-unknown-unknown`.
//!
//! [`WebPlanner`] holds the platform-independent logic and is what the
//! native tests drive. On `wasm32` the `PlannerApp` export wraps it with
//! camelCase methods and persists stations to `window.localStorage`.

pub mod planner_core;

#[cfg(target_arch = "wasm32")]
mod wasm;

pub use planner_core::{WebError, WebPlanner};

#[cfg(target_arch = "wasm32")]
pub use wasm::{LocalStorage, PlannerApp};
