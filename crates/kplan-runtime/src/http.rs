#![forbid(unsafe_code)]

//! Blocking HTTP implementation of every service seam.
//!
//! One [`HttpClient`] talks to the planner server: it fetches the lookup
//! table, renders the map, runs the allocation, submits the final station
//! list, and probes generated files with `HEAD`. Endpoint paths and timeouts
//! come from [`PlannerConfig`].
//!
//! # Failure Modes
//!
//! - Connection, TLS, and timeout failures become
//!   [`TransportError::Network`].
//! - Non-success statuses become [`TransportError::Status`] carrying the
//!   response body. For submissions the body's `error` or `message` field is
//!   used when present, else `Server error: <status>`.
//! - Unparseable success bodies become [`TransportError::Decode`].

use reqwest::blocking::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use web_time::Duration;

use kplan_core::PlanningStation;

use crate::config::PlannerConfig;
use crate::service::{
    AllocationRequest, AllocationResult, AllocationService, FileProbe, LookupSource,
    MapRenderService, SubmissionRecord, SubmissionResponse, TransportError,
};
use crate::sync::{MapPayload, MapRender};

fn network(e: reqwest::Error) -> TransportError {
    TransportError::Network(e.to_string())
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: PlannerConfig,
}

impl HttpClient {
    pub fn new(config: PlannerConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.http_connect_timeout_secs))
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(network)?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, TransportError> {
        let url = self.config.url(path);
        debug!(%url, "POST");
        self.client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .map_err(network)
    }

    fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
        let status = response.status();
        let url = response.url().to_string();
        let text = response.text().map_err(network)?;
        if !status.is_success() {
            warn!(status = status.as_u16(), %url, "request failed");
            return Err(TransportError::Status {
                status: status.as_u16(),
                url,
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl LookupSource for HttpClient {
    fn fetch_lookup(&self) -> Result<String, TransportError> {
        let url = self.config.url(&self.config.endpoints.lookup);
        debug!(%url, "GET");
        let response = self.client.get(&url).send().map_err(network)?;
        let status = response.status();
        let text = response.text().map_err(network)?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                url,
                body: text,
            })
        }
    }
}

impl MapRenderService for HttpClient {
    fn update_map(&self, payload: &MapPayload) -> Result<MapRender, TransportError> {
        let response = self.post_json(&self.config.endpoints.update_map, payload)?;
        Self::read_json(response)
    }
}

impl AllocationService for HttpClient {
    fn run_allocation(
        &self,
        stations: &[PlanningStation],
    ) -> Result<Vec<AllocationResult>, TransportError> {
        let body = AllocationRequest {
            planning_stations: stations,
        };
        let response = self.post_json(&self.config.endpoints.run_allocation, &body)?;
        Self::read_json(response)
    }

    fn submit(&self, records: &[SubmissionRecord]) -> Result<SubmissionResponse, TransportError> {
        let response = self.post_json(&self.config.endpoints.submit, records)?;
        let status = response.status();
        let url = response.url().to_string();
        let text = response.text().map_err(network)?;
        if status.is_success() {
            return Ok(serde_json::from_str(&text)?);
        }
        Err(TransportError::Status {
            status: status.as_u16(),
            url,
            body: submission_error_message(status.as_u16(), &text),
        })
    }
}

impl FileProbe for HttpClient {
    fn probe(&self, url: &str) -> Result<u16, TransportError> {
        let url = self.config.url(url);
        let response = self.client.head(&url).send().map_err(network)?;
        Ok(response.status().as_u16())
    }
}

/// `error`, then `message`, from a failed submission body.
fn submission_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<SubmissionResponse>(body)
        .ok()
        .and_then(|r| r.error.or(r.message))
        .unwrap_or_else(|| format!("Server error: {status}"))
}
