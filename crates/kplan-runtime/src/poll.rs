#![forbid(unsafe_code)]

//! Waiting for a submitted allocation file to become downloadable.
//!
//! After a successful submission the server returns a `fileUrl` that is
//! generated asynchronously. The file is probed with `HEAD`:
//!
//! | Probe result      | Next step                                   |
//! |-------------------|---------------------------------------------|
//! | `200`             | ready                                       |
//! | `404`             | fail: not found                             |
//! | other, retries left | wait `policy.delay(n)` and probe again    |
//! | other, exhausted  | fail: timed out                             |
//! | transport error   | fail immediately                            |
//!
//! [`FilePoll`] is the sans-IO step function; [`poll_file_ready`] drives it
//! with a blocking [`FileProbe`] and a [`CancellationToken`] for the waits.

use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use web_time::Duration;

use crate::cancellation::CancellationToken;
use crate::retry::RetryPolicy;
use crate::service::{FileProbe, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("file not found or not yet available")]
    NotFound,
    #[error("file processing timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },
    #[error("file poll cancelled")]
    Cancelled,
    #[error("error checking file readiness: {0}")]
    Transport(#[from] TransportError),
}

/// What to do after observing one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    Ready,
    /// Probe again after `after`. `attempt` counts retries so far (1-based).
    Retry { attempt: u32, after: Duration, status: u16 },
    Failed(PollError),
}

/// Readiness state for one file URL.
#[derive(Debug, Clone)]
pub struct FilePoll {
    url: String,
    policy: RetryPolicy,
    retries: u32,
    done: bool,
}

impl FilePoll {
    #[must_use]
    pub fn new(url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
            retries: 0,
            done: false,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Retries performed so far.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.policy.max_retries
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed the result of a probe. Once a terminal step has been returned,
    /// further observations repeat it as `TimedOut`.
    pub fn observe(&mut self, probe: Result<u16, TransportError>) -> PollStep {
        if self.done {
            return PollStep::Failed(PollError::TimedOut {
                attempts: self.retries,
            });
        }
        let step = match probe {
            Ok(200) => PollStep::Ready,
            Ok(404) => PollStep::Failed(PollError::NotFound),
            Ok(_) if self.retries >= self.policy.max_retries => {
                PollStep::Failed(PollError::TimedOut {
                    attempts: self.retries,
                })
            }
            Ok(status) => {
                let after = self.policy.delay(self.retries);
                self.retries += 1;
                PollStep::Retry {
                    attempt: self.retries,
                    after,
                    status,
                }
            }
            Err(e) => PollStep::Failed(PollError::Transport(e)),
        };
        if !matches!(step, PollStep::Retry { .. }) {
            self.done = true;
        }
        step
    }
}

/// Probe `url` until it is ready, fails, or `cancel` fires.
///
/// `on_retry` sees every intermediate step (for progress display). Returns
/// the number of retries it took.
pub fn poll_file_ready(
    probe: &dyn FileProbe,
    url: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_retry: impl FnMut(&PollStep),
) -> Result<u32, PollError> {
    let _span = info_span!("file_poll", url).entered();
    debug!(
        max_retries = policy.max_retries,
        budget_ms = u64::try_from(policy.total_max_delay().as_millis()).unwrap_or(u64::MAX),
        "waiting for file"
    );
    let mut poll = FilePoll::new(url, policy.clone());
    loop {
        if cancel.is_cancelled() {
            info!(retries = poll.retries(), "file poll cancelled");
            return Err(PollError::Cancelled);
        }
        let step = poll.observe(probe.probe(url));
        match &step {
            PollStep::Ready => {
                info!(retries = poll.retries(), "file ready");
                return Ok(poll.retries());
            }
            PollStep::Failed(e) => {
                warn!(error = %e, "file poll failed");
                return Err(e.clone());
            }
            PollStep::Retry {
                attempt,
                after,
                status,
            } => {
                debug!(attempt, max = poll.max_retries(), status, "file not ready");
                on_retry(&step);
                if cancel.wait_timeout(*after) {
                    info!(retries = poll.retries(), "file poll cancelled");
                    return Err(PollError::Cancelled);
                }
            }
        }
    }
}
