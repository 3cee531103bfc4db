#![forbid(unsafe_code)]

//! Runs map requests on worker threads and feeds results back.
//!
//! Each [`MapSyncRequest`] gets its own thread calling the
//! [`MapRenderService`]; the `(token, result)` pair comes back over an mpsc
//! channel. The controller stays on the owning thread and applies results
//! through [`drain`](ThreadedSyncDriver::drain), where stale tokens are
//! discarded. Requests are never aborted; superseded responses are simply
//! dropped.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;

use tracing::{debug, warn};
use web_time::{Duration, Instant};

use crate::service::{MapRenderService, TransportError};
use crate::sync::{MapRender, MapSyncController, MapSyncRequest, SyncOutcome, SyncToken};

type Completion = (SyncToken, Result<MapRender, TransportError>);

pub struct ThreadedSyncDriver {
    service: Arc<dyn MapRenderService>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    in_flight: usize,
}

impl ThreadedSyncDriver {
    #[must_use]
    pub fn new(service: Arc<dyn MapRenderService>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            service,
            tx,
            rx,
            in_flight: 0,
        }
    }

    /// Start `request` on a worker thread.
    pub fn dispatch(&mut self, request: MapSyncRequest) {
        let MapSyncRequest { token, payload } = request;
        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("kplan-map-sync-{}", token.get()))
            .spawn(move || {
                let result = service.update_map(&payload);
                let _ = tx.send((token, result));
            });
        match spawned {
            Ok(_) => {
                self.in_flight += 1;
                debug!(%token, in_flight = self.in_flight, "map request started");
            }
            Err(e) => {
                warn!(%token, error = %e, "failed to spawn map sync worker");
                self.in_flight += 1;
                let _ = self.tx.send((
                    token,
                    Err(TransportError::Unavailable(format!("worker spawn failed: {e}"))),
                ));
            }
        }
    }

    /// Requests started but not yet drained.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Apply every completion that has arrived, without blocking.
    pub fn drain(&mut self, controller: &mut MapSyncController) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::new();
        while let Ok((token, result)) = self.rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            outcomes.push(controller.complete(token, result));
        }
        outcomes
    }

    /// Block until every started request has completed or `timeout`
    /// elapses, applying results as they arrive.
    pub fn wait_idle(
        &mut self,
        controller: &mut MapSyncController,
        timeout: Duration,
    ) -> Vec<SyncOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcomes = Vec::new();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok((token, result)) => {
                    self.in_flight -= 1;
                    outcomes.push(controller.complete(token, result));
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(in_flight = self.in_flight, "map requests still running");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        outcomes
    }
}

impl std::fmt::Debug for ThreadedSyncDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedSyncDriver")
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}
