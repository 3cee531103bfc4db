#![forbid(unsafe_code)]

//! Host-protocol tests for [`WebPlanner`], driven the way the browser
//! bindings drive it: JSON in, JSON out, host-owned clock.

use std::rc::Rc;

use kplan_core::MemoryStorage;
use kplan_web::{WebError, WebPlanner};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

const LOOKUP: &str = r#"{
    "1001": {"name": "Secunderabad", "code": "SC", "latitude": 17.4399, "longitude": 78.4983},
    "1002": {"name": "Kazipet", "code": "KZJ", "latitude": "17.9689", "longitude": "79.5941",
             "onboard_slots": 6}
}"#;

const FAST_POLL: &str = r#"{"file_poll": {"interval_ms": 250, "max_attempts": 2}}"#;

fn parse(json: &str) -> Value {
    serde_json::from_str(json).expect("facade returns JSON")
}

fn planner_with(storage: Rc<MemoryStorage>, config: Option<&str>) -> WebPlanner {
    WebPlanner::new(LOOKUP, config, Box::new(storage)).expect("planner starts")
}

fn planner() -> WebPlanner {
    planner_with(Rc::new(MemoryStorage::new()), None)
}

/// Add a station and resolve it to `kavach_id`.
fn resolved(planner: &mut WebPlanner, kavach_id: &str) -> String {
    let id = planner.add_station().expect("add");
    let feedback = parse(&planner.enter_kavach_id(&id, kavach_id, true));
    assert_eq!(feedback["kind"], "autofilled");
    id
}

fn sync_token(planner: &mut WebPlanner) -> u64 {
    let dispatch = parse(&planner.poll_sync());
    assert_eq!(dispatch["kind"], "request", "{dispatch}");
    dispatch["token"].as_u64().expect("token")
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup and editing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn empty_start_shows_placeholder() {
    let mut p = planner();
    assert_eq!(p.stations_json(), "[]");
    assert_eq!(parse(&p.poll_sync()), json!({"kind": "placeholder"}));
    assert_eq!(parse(&p.map_state_json()), json!({"status": "placeholder"}));
    assert_eq!(parse(&p.poll_sync()), json!({"kind": "idle"}));
}

#[test]
fn bad_lookup_and_bad_config_are_reported() {
    let err = WebPlanner::new("not json", None, Box::new(MemoryStorage::new()))
        .expect_err("bad lookup");
    assert!(matches!(err, WebError::Startup(_)));

    let err = WebPlanner::new(LOOKUP, Some("{\"storage_key\": 3}"), Box::new(MemoryStorage::new()))
        .expect_err("bad config");
    assert!(err.to_string().starts_with("invalid config"), "{err}");
}

#[test]
fn kavach_entry_autofills_and_persists() {
    let storage = Rc::new(MemoryStorage::new());
    let mut p = planner_with(Rc::clone(&storage), None);
    let id = p.add_station().expect("add");

    assert_eq!(parse(&p.enter_kavach_id(&id, "10", false)), json!({"kind": "partial"}));
    let feedback = parse(&p.enter_kavach_id(&id, "1002", false));
    assert_eq!(feedback["kind"], "autofilled");
    assert_eq!(feedback["fill"]["stationCode"], "KZJ");
    assert_eq!(feedback["fill"]["onboardSlots"], 6);

    let stations = parse(&p.stations_json());
    assert_eq!(stations[0]["stationName"], "Kazipet");
    assert!(storage.raw("planningStations").expect("saved").contains("Kazipet"));

    // A second planner over the same storage restores the station.
    let restored = planner_with(storage, None);
    assert_eq!(restored.station_count(), 1);
    assert_eq!(parse(&restored.stations_json())[0]["kavachId"], "1002");
}

#[test]
fn committed_unknown_id_reports_not_found() {
    let mut p = planner();
    let id = p.add_station().expect("add");
    let feedback = parse(&p.enter_kavach_id(&id, " 4242 ", true));
    assert_eq!(
        feedback,
        json!({"kind": "notFound", "message": "Kavach ID 4242 not found in master list"})
    );
}

#[test]
fn update_field_returns_the_coerced_value() {
    let mut p = planner();
    let id = p.add_station().expect("add");
    assert_eq!(p.update_field(&id, "latitude", "91").expect("applied"), "37.1");
    assert_eq!(p.update_field(&id, "safe_radius_km", "12.5").expect("applied"), "12.5");

    assert!(matches!(
        p.update_field(&id, "colour", "red"),
        Err(WebError::UnknownField(ref f)) if f == "colour"
    ));
    assert!(matches!(
        p.update_field("missing", "latitude", "10"),
        Err(WebError::UnknownStation(_))
    ));
}

#[test]
fn incomplete_station_blocks_add() {
    let mut p = planner();
    let _ = p.add_station().expect("first");
    let err = p.add_station().expect_err("incomplete");
    assert!(matches!(err, WebError::AddRejected(_)));
    assert!(err.to_string().contains("Station 1"), "{err}");
    assert_eq!(p.station_count(), 1);
}

#[test]
fn suggestions_skip_ids_in_use() {
    let mut p = planner();
    let a = resolved(&mut p, "1001");
    let b = p.add_station().expect("add");
    let got = parse(&p.suggestions_json(&b, "100"));
    assert_eq!(got, json!([{"kavachId": "1002", "label": "1002 (Kazipet)"}]));
    // The station's own ID stays suggestible.
    assert_eq!(parse(&p.suggestions_json(&a, "1001"))[0]["kavachId"], "1001");
}

#[test]
fn validation_report_lists_duplicates_and_focus() {
    let mut p = planner();
    let a = resolved(&mut p, "1001");
    let b = p.add_station().expect("add");
    assert_eq!(parse(&p.enter_kavach_id(&b, "1001", true))["kind"], "duplicate");

    let report = parse(&p.validate_json());
    assert_eq!(report["valid"], false);
    assert_eq!(report["invalidCount"], 2);
    assert_eq!(report["focus"], json!({"id": a, "field": "kavachId"}));
    let ids: Vec<&str> = report["stations"]
        .as_array()
        .expect("stations")
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str()]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Map sync
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn sync_round_trip_applies_the_latest_response() {
    let mut p = planner();
    let _ = resolved(&mut p, "1001");

    let dispatch = parse(&p.poll_sync());
    assert_eq!(dispatch["kind"], "request");
    let station = &dispatch["payload"]["planningStations"][0];
    assert_eq!(station["name"], "Secunderabad");
    assert_eq!(station["lat"], 17.4399);
    let first = dispatch["token"].as_u64().expect("token");

    p.request_sync();
    let second = sync_token(&mut p);
    assert!(second > first);

    let body = r#"{"center_location": [17.4, 78.5], "zoom_level": 7,
                   "allStationData": [{"id": "a", "lat": 17.4, "lon": 78.5, "type": "planning"}],
                   "hasConflict": true}"#;
    assert_eq!(p.complete_sync(second, Ok(body)), "applied");
    assert_eq!(p.complete_sync(first, Ok(body)), "stale");
    assert_eq!(
        parse(&p.map_state_json()),
        json!({"status": "rendered", "hasConflict": true, "stations": 1, "conflicts": 0, "overlaps": 0})
    );
}

#[test]
fn sync_failure_and_bad_body_show_an_error() {
    let mut p = planner();
    let _ = resolved(&mut p, "1001");

    let token = sync_token(&mut p);
    assert_eq!(p.complete_sync(token, Err("offline".into())), "failed");
    assert_eq!(
        parse(&p.map_state_json()),
        json!({"status": "error", "message": "network error: offline"})
    );

    p.request_sync();
    let token = sync_token(&mut p);
    assert_eq!(p.complete_sync(token, Ok("<html>")), "failed");
    assert_eq!(parse(&p.map_state_json())["status"], "error");
}

#[test]
fn host_clock_drives_the_debounce() {
    let mut p = planner_with(
        Rc::new(MemoryStorage::new()),
        Some(r#"{"sync_debounce_ms": 300}"#),
    );
    p.set_time_ms(1_000.0);
    assert_eq!(parse(&p.poll_sync())["kind"], "placeholder");

    let _ = resolved(&mut p, "1001");
    assert_eq!(p.next_sync_deadline_ms(), Some(1_300.0));
    p.set_time_ms(1_299.0);
    assert_eq!(parse(&p.poll_sync())["kind"], "idle");

    // Garbage times are ignored rather than rewinding the clock.
    p.set_time_ms(f64::NAN);
    p.set_time_ms(-5.0);
    assert_eq!(parse(&p.poll_sync())["kind"], "idle");

    p.set_time_ms(1_300.0);
    assert_eq!(parse(&p.poll_sync())["kind"], "request");
}

// ─────────────────────────────────────────────────────────────────────────────
// Allocation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn allocation_needs_valid_stations() {
    let mut p = planner();
    let err = p.prepare_allocation().expect_err("empty");
    assert_eq!(err.to_string(), "add at least one planning station first");

    let _ = p.add_station().expect("add");
    let err = p.prepare_allocation().expect_err("invalid");
    assert_eq!(err.to_string(), "correct the errors in 1 station(s) first");
}

#[test]
fn allocation_results_are_recorded() {
    let mut p = planner();
    let _ = resolved(&mut p, "1001");
    let _ = resolved(&mut p, "1002");

    let body = parse(&p.prepare_allocation().expect("valid"));
    assert_eq!(body["planning_stations"].as_array().map(Vec::len), Some(2));

    let rows = parse(
        &p.record_allocation(
            r#"[{"Station": "SC", "Status": "Allocated", "Frequency": "3", "StationarySlots": 4},
                {"Station": "KZJ", "Status": "Not Allocated", "Frequency": "N/A",
                 "Error": "no free slot"}]"#,
        )
        .expect("rows"),
    );
    assert_eq!(rows[0]["frequency"], 3);
    assert_eq!(rows[0]["failed"], false);
    assert_eq!(rows[1]["status"], "Not Allocated");
    assert_eq!(rows[1]["failed"], true);
    assert_eq!(rows[1]["frequency"], Value::Null);
    assert_eq!(rows[1]["error"], "no free slot");

    assert!(matches!(
        p.record_allocation("{}"),
        Err(WebError::BadInput(_))
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn ready_file_clears_the_session() {
    let storage = Rc::new(MemoryStorage::new());
    let mut p = planner_with(Rc::clone(&storage), Some(FAST_POLL));
    let _ = resolved(&mut p, "1001");

    let records = parse(&p.prepare_submission().expect("records"));
    assert_eq!(records[0]["KavachID"], "1001");
    assert_eq!(records[0]["StationCode"], "SC");

    let next = parse(
        &p.accept_submission(r#"{"fileUrl": "/files/out.xlsx"}"#)
            .expect("accepted"),
    );
    assert_eq!(next, json!({"kind": "awaitFile", "url": "/files/out.xlsx", "maxRetries": 2}));
    assert_eq!(p.pending_file_url(), Some("/files/out.xlsx"));

    let step = parse(&p.observe_file_status(503).expect("step"));
    assert_eq!(step, json!({"kind": "retry", "attempt": 1, "afterMs": 250, "status": 503}));
    assert_eq!(p.station_count(), 1);

    let step = parse(&p.observe_file_status(200).expect("step"));
    assert_eq!(step, json!({"kind": "ready", "url": "/files/out.xlsx", "retries": 1}));
    assert_eq!(p.station_count(), 0);
    assert_eq!(storage.raw("planningStations").as_deref(), Some("[]"));
    assert_eq!(p.pending_file_url(), None);
}

#[test]
fn missing_file_keeps_the_stations() {
    let mut p = planner_with(Rc::new(MemoryStorage::new()), Some(FAST_POLL));
    let _ = resolved(&mut p, "1001");
    let _ = p.prepare_submission().expect("records");
    let _ = p
        .accept_submission(r#"{"fileUrl": "/files/out.xlsx"}"#)
        .expect("accepted");

    let step = parse(&p.observe_file_status(404).expect("step"));
    assert_eq!(step["kind"], "failed");
    assert_eq!(step["message"], "file not found or not yet available");
    assert_eq!(p.station_count(), 1);
    assert!(matches!(p.observe_file_status(200), Err(WebError::NoPendingFile)));
}

#[test]
fn retries_run_out() {
    let mut p = planner_with(Rc::new(MemoryStorage::new()), Some(FAST_POLL));
    let _ = resolved(&mut p, "1001");
    let _ = p
        .accept_submission(r#"{"fileUrl": "/files/out.xlsx"}"#)
        .expect("accepted");

    for attempt in 1..=2 {
        let step = parse(&p.observe_file_status(202).expect("step"));
        assert_eq!(step["attempt"], attempt);
    }
    let step = parse(&p.observe_file_status(202).expect("step"));
    assert_eq!(
        step,
        json!({"kind": "failed", "message": "file processing timed out after 2 attempts"})
    );
    assert_eq!(p.station_count(), 1);
}

#[test]
fn probe_errors_and_cancellation_stop_the_poll() {
    let mut p = planner();
    let _ = resolved(&mut p, "1001");
    let _ = p
        .accept_submission(r#"{"fileUrl": "/files/a.xlsx"}"#)
        .expect("accepted");
    let step = parse(&p.observe_file_error("fetch failed".into()).expect("step"));
    assert_eq!(
        step["message"],
        "error checking file readiness: network error: fetch failed"
    );

    let _ = p
        .accept_submission(r#"{"fileUrl": "/files/b.xlsx"}"#)
        .expect("accepted");
    assert!(p.cancel_file_poll());
    assert!(!p.cancel_file_poll());
    assert_eq!(p.station_count(), 1);
}

#[test]
fn submission_answers_without_a_file() {
    let mut p = planner();
    let _ = resolved(&mut p, "1001");

    let next = parse(&p.accept_submission(r#"{"message": "queued"}"#).expect("ack"));
    assert_eq!(next, json!({"kind": "acknowledged", "message": "queued"}));

    let next = parse(
        &p.accept_submission(r#"{"error": "2 rows skipped", "message": "queued"}"#)
            .expect("message wins"),
    );
    assert_eq!(next, json!({"kind": "acknowledged", "message": "queued"}));

    let err = p
        .accept_submission(r#"{"error": "slots exhausted"}"#)
        .expect_err("rejected");
    assert_eq!(err.to_string(), "submission rejected: slots exhausted");

    let err = p.accept_submission("{}").expect_err("unknown");
    assert_eq!(
        err.to_string(),
        "submission rejected: unknown response from server after submission"
    );
    assert_eq!(p.station_count(), 1);
}
