//! End-to-end tests for the in-process ingestion path: parse a raw feed
//! snapshot, run it through the filters, and drive the sector tracker
//! across several ticks. No database required.

use chrono::{DateTime, Duration, TimeZone, Utc};

use skywatch::classifier::ControllerClassifier;
use skywatch::fetcher::parse_snapshot;
use skywatch::filters;
use skywatch::geo::GeoIndex;
use skywatch::proximity;
use skywatch::sector_tracker::{SectorEvent, SectorTracker};

fn square(lat0: f64, lon0: f64, size: f64) -> Vec<(f64, f64)> {
    vec![
        (lat0, lon0),
        (lat0, lon0 + size),
        (lat0 + size, lon0 + size),
        (lat0 + size, lon0),
    ]
}

fn regional_geo() -> GeoIndex {
    GeoIndex::from_rings(
        &square(-45.0, 140.0, 20.0),
        vec![
            ("S_A".to_string(), 0, 60_000, square(-34.0, 150.5, 1.0)),
            ("S_B".to_string(), 0, 60_000, square(-35.2, 152.0, 1.0)),
        ],
    )
    .unwrap()
}

fn t(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

fn snapshot_body(timestamp: DateTime<Utc>, lat: f64, lon: f64, groundspeed: i32) -> String {
    format!(
        r#"{{
            "general": {{"update_timestamp": "{}"}},
            "pilots": [
                {{"cid": 1001, "callsign": "QFA1", "latitude": {lat}, "longitude": {lon},
                  "altitude": 30000, "groundspeed": {groundspeed}, "heading": 120,
                  "flight_plan": {{"flight_rules": "I", "aircraft_short": "B738",
                                  "departure": "YSSY", "arrival": "YMML", "route": "DCT"}}}},
                {{"cid": 1002, "callsign": "TEST99", "latitude": {lat}, "longitude": {lon},
                  "altitude": 5000, "groundspeed": 200,
                  "flight_plan": {{"flight_rules": "V", "departure": "YSSY", "arrival": "YSSY"}}}},
                {{"cid": 1003, "callsign": "VOZ7", "latitude": 51.5, "longitude": 0.1,
                  "altitude": 10000, "groundspeed": 300,
                  "flight_plan": {{"flight_rules": "I", "departure": "EGLL", "arrival": "EGCC"}}}}
            ],
            "controllers": [
                {{"cid": 2001, "callsign": "SY_TWR", "frequency": "120.500",
                  "name": "Sydney Tower", "rating": 4, "facility": 2,
                  "latitude": null, "longitude": null}}
            ],
            "transceivers": [
                {{"cid": 2001, "frequency": 120500000, "latitude": -33.6, "longitude": 151.0}}
            ]
        }}"#,
        timestamp.to_rfc3339(),
    )
}

#[test]
fn test_snapshot_through_filters_and_tracker() {
    let geo = regional_geo();
    let mut tracker = SectorTracker::new();
    let classifier = ControllerClassifier::default();

    // Tick 1: inside S_A at cruise speed.
    let snapshot = parse_snapshot(snapshot_body(t(0), -33.5, 151.0, 450).as_bytes()).unwrap();
    assert_eq!(snapshot.flights.len(), 3);
    let filtered = filters::apply(snapshot, &geo);
    // TEST99 is an excluded callsign, VOZ7 is outside the boundary.
    assert_eq!(filtered.flights.len(), 1);
    assert_eq!(filtered.flights[0].callsign, "QFA1");

    let events = tracker.update(&filtered.flights, &geo);
    assert!(matches!(
        events.as_slice(),
        [SectorEvent::Entered { sector_name, .. }] if sector_name == "S_A"
    ));

    // The tower controller got its position from a transceiver, so it can
    // pair; QFA1 is roughly ten nautical miles from it.
    let interactions = proximity::pair(&filtered.flights, &filtered.controllers, &classifier);
    assert_eq!(interactions.len(), 1);
    assert_eq!(interactions[0].controller_callsign, "SY_TWR");
    assert!(interactions[0].distance_nm <= interactions[0].proximity_nm);

    // Tick 2: still inside S_A.
    let snapshot = parse_snapshot(snapshot_body(t(60), -33.4, 151.2, 450).as_bytes()).unwrap();
    let filtered = filters::apply(snapshot, &geo);
    let events = tracker.update(&filtered.flights, &geo);
    assert!(events.is_empty());

    // Tick 3: moved into S_B; S_A closes with a 120 second duration.
    let snapshot = parse_snapshot(snapshot_body(t(120), -34.8, 152.5, 450).as_bytes()).unwrap();
    let filtered = filters::apply(snapshot, &geo);
    let events = tracker.update(&filtered.flights, &geo);
    assert_eq!(events.len(), 2);
    match &events[0] {
        SectorEvent::Exited {
            sector_name,
            duration_seconds,
            exit_at,
            ..
        } => {
            assert_eq!(sector_name, "S_A");
            assert_eq!(*duration_seconds, 120);
            assert_eq!(*exit_at, t(120));
        }
        other => panic!("expected S_A exit, got {other:?}"),
    }
    match &events[1] {
        SectorEvent::Entered {
            sector_name,
            entry_at,
            ..
        } => {
            assert_eq!(sector_name, "S_B");
            assert_eq!(*entry_at, t(120));
        }
        other => panic!("expected S_B entry, got {other:?}"),
    }
}

#[test]
fn test_incomplete_plan_then_complete_plan_creates_fresh_state() {
    let geo = regional_geo();
    let mut tracker = SectorTracker::new();

    // A flight with an empty departure never reaches the tracker.
    let body = format!(
        r#"{{
            "general": {{"update_timestamp": "{}"}},
            "pilots": [{{"cid": 3003, "callsign": "JST3", "latitude": -33.5,
                        "longitude": 151.0, "altitude": 20000, "groundspeed": 400,
                        "flight_plan": {{"flight_rules": "I", "departure": "", "arrival": "YMML"}}}}],
            "controllers": [],
            "transceivers": []
        }}"#,
        t(0).to_rfc3339(),
    );
    let filtered = filters::apply(parse_snapshot(body.as_bytes()).unwrap(), &geo);
    assert!(filtered.flights.is_empty());
    let events = tracker.update(&filtered.flights, &geo);
    assert!(events.is_empty());
    assert_eq!(tracker.tracked_count(), 0);

    // The plan is filed a tick later: state starts fresh from that snapshot.
    let body = format!(
        r#"{{
            "general": {{"update_timestamp": "{}"}},
            "pilots": [{{"cid": 3003, "callsign": "JST3", "latitude": -33.5,
                        "longitude": 151.0, "altitude": 20000, "groundspeed": 400,
                        "flight_plan": {{"flight_rules": "I", "departure": "YSSY", "arrival": "YMML"}}}}],
            "controllers": [],
            "transceivers": []
        }}"#,
        t(60).to_rfc3339(),
    );
    let filtered = filters::apply(parse_snapshot(body.as_bytes()).unwrap(), &geo);
    let events = tracker.update(&filtered.flights, &geo);
    assert!(matches!(
        events.as_slice(),
        [SectorEvent::Entered { entry_at, .. }] if *entry_at == t(60)
    ));
    assert_eq!(tracker.tracked_count(), 1);
}

#[test]
fn test_continuous_occupancy_produces_single_entry() {
    // An aircraft observed inside one sector across many ticks yields
    // exactly one entry event and nothing else until it leaves.
    let geo = regional_geo();
    let mut tracker = SectorTracker::new();
    let mut all_events = Vec::new();

    for i in 0..10 {
        let body = snapshot_body(t(60 * i), -33.5 + 0.01 * i as f64, 151.0, 450);
        let filtered = filters::apply(parse_snapshot(body.as_bytes()).unwrap(), &geo);
        all_events.extend(tracker.update(&filtered.flights, &geo));
    }

    assert_eq!(all_events.len(), 1);
    assert!(matches!(&all_events[0], SectorEvent::Entered { .. }));
}
