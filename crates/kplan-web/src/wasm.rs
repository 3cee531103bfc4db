#![forbid(unsafe_code)]

//! `wasm-bindgen` exports for the planner.
//!
//! This module wraps [`super::planner_core::WebPlanner`] with JS-friendly
//! types and backs persistence with `window.localStorage`. Only compiled on
//! `wasm32` targets.

use js_sys::Reflect;
use kplan_core::{StorageBackend, StorageError, StorageResult};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::Storage;

use super::planner_core::{WebError, WebPlanner};

fn console_error(msg: &str) {
    let global = js_sys::global();
    let Ok(console) = Reflect::get(&global, &"console".into()) else {
        return;
    };
    let Ok(error) = Reflect::get(&console, &"error".into()) else {
        return;
    };
    let Ok(error_fn) = error.dyn_into::<js_sys::Function>() else {
        return;
    };
    let _ = error_fn.call1(&console, &JsValue::from_str(msg));
}

fn install_panic_hook() {
    use std::sync::Once;

    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            let msg = match info.location() {
                Some(loc) => format!("panic at {}:{}: {info}", loc.file(), loc.line()),
                None => format!("panic: {info}"),
            };
            console_error(&msg);
        }));
    });
}

fn js_error(e: &WebError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn js_text(value: &JsValue) -> String {
    value
        .as_string()
        .unwrap_or_else(|| format!("{value:?}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// localStorage backend
// ─────────────────────────────────────────────────────────────────────────────

/// [`StorageBackend`] over `window.localStorage`.
///
/// When storage is unavailable (private mode, sandboxed iframe) every read
/// returns `None` and writes report [`StorageError::Unavailable`].
#[derive(Debug, Clone)]
pub struct LocalStorage {
    storage: Option<Storage>,
}

impl LocalStorage {
    #[must_use]
    pub fn new() -> Self {
        let storage = web_sys::window().and_then(|w| w.local_storage().ok().flatten());
        if storage.is_none() {
            console_error("localStorage unavailable; planning stations will not persist");
        }
        Self { storage }
    }

    fn storage(&self) -> StorageResult<&Storage> {
        self.storage
            .as_ref()
            .ok_or_else(|| StorageError::Unavailable("localStorage".into()))
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for LocalStorage {
    fn name(&self) -> &str {
        "localStorage"
    }

    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        match &self.storage {
            Some(storage) => storage
                .get_item(key)
                .map_err(|e| StorageError::Unavailable(js_text(&e))),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        // Quota exhaustion surfaces here as a DOMException.
        self.storage()?
            .set_item(key, value)
            .map_err(|e| StorageError::Unavailable(js_text(&e)))
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.storage()?
            .remove_item(key)
            .map_err(|e| StorageError::Unavailable(js_text(&e)))
    }

    fn is_available(&self) -> bool {
        self.storage.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PlannerApp
// ─────────────────────────────────────────────────────────────────────────────

/// Planner session exported to JS.
#[wasm_bindgen]
pub struct PlannerApp {
    inner: WebPlanner,
}

#[wasm_bindgen]
impl PlannerApp {
    /// Start from the fetched `skavidLookup.json` text and an optional JSON
    /// config.
    #[wasm_bindgen(constructor)]
    pub fn new(lookup_json: &str, config_json: Option<String>) -> Result<PlannerApp, JsValue> {
        install_panic_hook();
        let inner = WebPlanner::new(
            lookup_json,
            config_json.as_deref(),
            Box::new(LocalStorage::new()),
        )
        .map_err(|e| js_error(&e))?;
        Ok(Self { inner })
    }

    #[wasm_bindgen(js_name = setTime)]
    pub fn set_time(&mut self, now_ms: f64) {
        self.inner.set_time_ms(now_ms);
    }

    // ── Stations ─────────────────────────────────────────────────────────

    #[wasm_bindgen(js_name = stationsJson)]
    pub fn stations_json(&self) -> String {
        self.inner.stations_json()
    }

    #[wasm_bindgen(js_name = stationCount)]
    pub fn station_count(&self) -> u32 {
        u32::try_from(self.inner.station_count()).unwrap_or(u32::MAX)
    }

    #[wasm_bindgen(js_name = addStation)]
    pub fn add_station(&mut self) -> Result<String, JsValue> {
        self.inner.add_station().map_err(|e| js_error(&e))
    }

    #[wasm_bindgen(js_name = removeStation)]
    pub fn remove_station(&mut self, id: &str) -> bool {
        self.inner.remove_station(id)
    }

    #[wasm_bindgen(js_name = updateField)]
    pub fn update_field(&mut self, id: &str, field: &str, raw: &str) -> Result<String, JsValue> {
        self.inner
            .update_field(id, field, raw)
            .map_err(|e| js_error(&e))
    }

    #[wasm_bindgen(js_name = enterKavachId)]
    pub fn enter_kavach_id(&mut self, id: &str, raw: &str, commit: bool) -> String {
        self.inner.enter_kavach_id(id, raw, commit)
    }

    #[wasm_bindgen(js_name = suggestionsJson)]
    pub fn suggestions_json(&self, id: &str, prefix: &str) -> String {
        self.inner.suggestions_json(id, prefix)
    }

    #[wasm_bindgen(js_name = setCollapsed)]
    pub fn set_collapsed(&mut self, id: &str, collapsed: bool) -> bool {
        self.inner.set_collapsed(id, collapsed)
    }

    #[wasm_bindgen(js_name = toggleAllCollapsed)]
    pub fn toggle_all_collapsed(&mut self) -> Option<bool> {
        self.inner.toggle_all_collapsed()
    }

    #[wasm_bindgen(js_name = moveStation)]
    pub fn move_station(&mut self, id: &str, to: u32) -> bool {
        self.inner.move_station(id, to as usize)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    #[wasm_bindgen(js_name = validateJson)]
    pub fn validate_json(&mut self) -> String {
        self.inner.validate_json()
    }

    // ── Map sync ─────────────────────────────────────────────────────────

    #[wasm_bindgen(js_name = requestSync)]
    pub fn request_sync(&mut self) {
        self.inner.request_sync();
    }

    #[wasm_bindgen(js_name = nextSyncDeadline)]
    pub fn next_sync_deadline(&self) -> Option<f64> {
        self.inner.next_sync_deadline_ms()
    }

    #[wasm_bindgen(js_name = pollSync)]
    pub fn poll_sync(&mut self) -> String {
        self.inner.poll_sync()
    }

    /// Pass either the response body or an error message for `token`.
    #[wasm_bindgen(js_name = completeSync)]
    pub fn complete_sync(
        &mut self,
        token: f64,
        body: Option<String>,
        error: Option<String>,
    ) -> String {
        if !(token.is_finite() && token >= 0.0) {
            return "stale".to_owned();
        }
        let token = token as u64;
        let outcome = match (body, error) {
            (_, Some(error)) => self.inner.complete_sync(token, Err(error)),
            (Some(body), None) => self.inner.complete_sync(token, Ok(&body)),
            (None, None) => self
                .inner
                .complete_sync(token, Err("empty map response".to_owned())),
        };
        outcome.to_owned()
    }

    #[wasm_bindgen(js_name = mapStateJson)]
    pub fn map_state_json(&self) -> String {
        self.inner.map_state_json()
    }

    // ── Allocation ───────────────────────────────────────────────────────

    #[wasm_bindgen(js_name = prepareAllocation)]
    pub fn prepare_allocation(&mut self) -> Result<String, JsValue> {
        self.inner.prepare_allocation().map_err(|e| js_error(&e))
    }

    #[wasm_bindgen(js_name = recordAllocation)]
    pub fn record_allocation(&mut self, response_json: &str) -> Result<String, JsValue> {
        self.inner
            .record_allocation(response_json)
            .map_err(|e| js_error(&e))
    }

    // ── Submission ───────────────────────────────────────────────────────

    #[wasm_bindgen(js_name = prepareSubmission)]
    pub fn prepare_submission(&mut self) -> Result<String, JsValue> {
        self.inner.prepare_submission().map_err(|e| js_error(&e))
    }

    #[wasm_bindgen(js_name = acceptSubmission)]
    pub fn accept_submission(&mut self, response_json: &str) -> Result<String, JsValue> {
        self.inner
            .accept_submission(response_json)
            .map_err(|e| js_error(&e))
    }

    #[wasm_bindgen(js_name = pendingFileUrl)]
    pub fn pending_file_url(&self) -> Option<String> {
        self.inner.pending_file_url().map(str::to_owned)
    }

    #[wasm_bindgen(js_name = observeFileStatus)]
    pub fn observe_file_status(&mut self, status: u16) -> Result<String, JsValue> {
        self.inner
            .observe_file_status(status)
            .map_err(|e| js_error(&e))
    }

    #[wasm_bindgen(js_name = observeFileError)]
    pub fn observe_file_error(&mut self, message: String) -> Result<String, JsValue> {
        self.inner
            .observe_file_error(message)
            .map_err(|e| js_error(&e))
    }

    #[wasm_bindgen(js_name = cancelFilePoll)]
    pub fn cancel_file_poll(&mut self) -> bool {
        self.inner.cancel_file_poll()
    }
}
