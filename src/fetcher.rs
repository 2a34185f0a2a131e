//! Periodic retrieval of the upstream network data snapshot.
//!
//! One HTTP GET per tick with explicit connect and total timeouts. Transient
//! failures (connect errors, timeouts, 5xx) are retried with exponential
//! backoff; malformed payloads are not retried and are logged with a payload
//! fingerprint so repeated bad responses can be correlated.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::classifier::ControllerType;
use crate::config::FetchConfig;
use crate::feed::{FeedSnapshot, FeedTransceiver};
use crate::samples::{
    ControllerSample, FlightRules, FlightSample, Snapshot, TransceiverOwner, TransceiverSample,
};

/// Why a fetch failed. The orchestrator maps this onto its skip-tick policy.
#[derive(Debug)]
pub enum FetchError {
    /// Network-level failure: connect error, timeout, request abort.
    Transient { detail: String },
    /// Unexpected HTTP status. 5xx counts as transient, anything else does not.
    Upstream { status: u16 },
    /// The payload did not match the documented schema. Never retried.
    Parse { fingerprint: String, detail: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transient { .. } => true,
            FetchError::Upstream { status } => *status >= 500,
            FetchError::Parse { .. } => false,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient { detail } => write!(f, "transient fetch failure: {detail}"),
            FetchError::Upstream { status } => write!(f, "unexpected upstream status {status}"),
            FetchError::Parse {
                fingerprint,
                detail,
            } => write!(f, "snapshot parse failure (payload {fingerprint}): {detail}"),
        }
    }
}

impl std::error::Error for FetchError {}

pub struct Fetcher {
    client: reqwest::Client,
    url: String,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl Fetcher {
    pub fn new(url: String, cfg: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            max_attempts: cfg.max_attempts.max(1),
            initial_backoff: Duration::from_secs(cfg.initial_backoff_secs),
        })
    }

    /// Fetch and parse one snapshot. Retries transient failures up to the
    /// configured attempt count; parse failures return immediately.
    pub async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let mut backoff = self.initial_backoff;
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            match self.fetch_once().await {
                Ok(snapshot) => {
                    metrics::counter!("fetch.success").increment(1);
                    return Ok(snapshot);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    metrics::counter!("fetch.retry").increment(1);
                    warn!(
                        "Fetch attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(e);
                }
                Err(e) => {
                    metrics::counter!("fetch.failed").increment(1);
                    return Err(e);
                }
            }
        }

        metrics::counter!("fetch.failed").increment(1);
        Err(last_err.unwrap_or(FetchError::Transient {
            detail: "retries exhausted".to_string(),
        }))
    }

    async fn fetch_once(&self) -> Result<Snapshot, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchError::Transient {
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Upstream {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| FetchError::Transient {
            detail: e.to_string(),
        })?;

        parse_snapshot(&body)
    }
}

/// Parse the raw snapshot body into typed records.
///
/// Pilots without a position never make it into the snapshot: every consumer
/// of a `FlightSample` needs coordinates. Position-less controllers are kept;
/// the geographic filter documents that policy.
pub fn parse_snapshot(body: &[u8]) -> Result<Snapshot, FetchError> {
    let feed: FeedSnapshot = serde_json::from_slice(body).map_err(|e| FetchError::Parse {
        fingerprint: payload_fingerprint(body),
        detail: e.to_string(),
    })?;

    let observed_at = feed.general.update_timestamp;

    let mut flights = Vec::with_capacity(feed.pilots.len());
    for pilot in &feed.pilots {
        let (latitude, longitude) = match (pilot.latitude, pilot.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                metrics::counter!("fetch.flights.missing_position").increment(1);
                debug!("Dropping pilot {} without position", pilot.callsign);
                continue;
            }
        };
        let plan = pilot.flight_plan.as_ref();
        flights.push(FlightSample {
            callsign: pilot.callsign.clone(),
            pilot_id: pilot.cid,
            observed_at,
            latitude,
            longitude,
            altitude_ft: pilot.altitude,
            groundspeed_kt: pilot.groundspeed,
            heading_deg: pilot.heading,
            departure_icao: plan.map(|p| p.departure.trim().to_string()).unwrap_or_default(),
            arrival_icao: plan.map(|p| p.arrival.trim().to_string()).unwrap_or_default(),
            aircraft_type: plan.and_then(|p| p.aircraft_short.clone()),
            flight_rules: plan.and_then(|p| FlightRules::from_feed_code(&p.flight_rules)),
            route: plan.and_then(|p| p.route.clone()),
        });
    }

    let pilot_cids: HashSet<i64> = feed.pilots.iter().map(|p| p.cid).collect();
    let controller_cids: HashSet<i64> = feed.controllers.iter().map(|c| c.cid).collect();

    let mut transceivers = Vec::with_capacity(feed.transceivers.len());
    for t in &feed.transceivers {
        let owner = if pilot_cids.contains(&t.cid) {
            TransceiverOwner::Flight
        } else if controller_cids.contains(&t.cid) {
            TransceiverOwner::Controller
        } else {
            metrics::counter!("fetch.transceivers.unlinked").increment(1);
            continue;
        };
        let callsign = t
            .callsign
            .clone()
            .or_else(|| owner_callsign(&feed, owner, t.cid))
            .unwrap_or_default();
        transceivers.push(TransceiverSample {
            owner,
            cid: t.cid,
            callsign,
            observed_at,
            frequency_hz: t.frequency,
            latitude: t.latitude,
            longitude: t.longitude,
            height_msl_m: t.height_msl_m,
        });
    }

    let mut controllers = Vec::with_capacity(feed.controllers.len());
    for c in &feed.controllers {
        let (latitude, longitude) = match (c.latitude, c.longitude) {
            (Some(lat), Some(lon)) => (Some(lat), Some(lon)),
            // The feed carries controller positions on transceivers.
            _ => transceiver_position(&feed.transceivers, c.cid),
        };
        controllers.push(ControllerSample {
            callsign: c.callsign.clone(),
            cid: c.cid,
            observed_at,
            frequency: c.frequency.clone(),
            name: c.name.clone(),
            rating: c.rating,
            facility: c.facility,
            latitude,
            longitude,
            controller_type: ControllerType::Unknown,
        });
    }

    Ok(Snapshot {
        server_timestamp: observed_at,
        flights,
        controllers,
        transceivers,
    })
}

fn owner_callsign(feed: &FeedSnapshot, owner: TransceiverOwner, cid: i64) -> Option<String> {
    match owner {
        TransceiverOwner::Flight => feed
            .pilots
            .iter()
            .find(|p| p.cid == cid)
            .map(|p| p.callsign.clone()),
        TransceiverOwner::Controller => feed
            .controllers
            .iter()
            .find(|c| c.cid == cid)
            .map(|c| c.callsign.clone()),
    }
}

fn transceiver_position(
    transceivers: &[FeedTransceiver],
    cid: i64,
) -> (Option<f64>, Option<f64>) {
    transceivers
        .iter()
        .find(|t| t.cid == cid && t.latitude.is_some() && t.longitude.is_some())
        .map(|t| (t.latitude, t.longitude))
        .unwrap_or((None, None))
}

/// Short SHA-256 fingerprint of a payload, for correlating bad responses.
pub fn payload_fingerprint(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<u8> {
        br#"{
            "general": {"update_timestamp": "2025-06-01T10:00:00Z"},
            "pilots": [
                {"cid": 1001, "callsign": "QFA1", "latitude": -33.0, "longitude": 151.0,
                 "altitude": 35000, "groundspeed": 450, "heading": 90,
                 "flight_plan": {"flight_rules": "I", "aircraft_short": "B738",
                                 "departure": "YSSY", "arrival": "YMML", "route": "DCT"}},
                {"cid": 1002, "callsign": "VOZ2", "latitude": null, "longitude": null,
                 "altitude": 0, "groundspeed": 0, "heading": 0, "flight_plan": null}
            ],
            "controllers": [
                {"cid": 2001, "callsign": "SY_TWR", "frequency": "120.500",
                 "name": "Sydney Tower", "rating": 3, "facility": 2,
                 "latitude": null, "longitude": null}
            ],
            "transceivers": [
                {"cid": 2001, "frequency": 120500000, "latitude": -33.95, "longitude": 151.18,
                 "height_msl_m": 20.0},
                {"cid": 1001, "frequency": 120500000, "latitude": -33.0, "longitude": 151.0},
                {"cid": 9999, "frequency": 118000000, "latitude": 0.0, "longitude": 0.0}
            ]
        }"#
        .to_vec()
    }

    #[test]
    fn test_parse_snapshot() {
        let snapshot = parse_snapshot(&fixture()).unwrap();
        assert_eq!(
            snapshot.server_timestamp.to_rfc3339(),
            "2025-06-01T10:00:00+00:00"
        );

        // The position-less pilot is dropped.
        assert_eq!(snapshot.flights.len(), 1);
        let flight = &snapshot.flights[0];
        assert_eq!(flight.callsign, "QFA1");
        assert_eq!(flight.pilot_id, 1001);
        assert_eq!(flight.departure_icao, "YSSY");
        assert_eq!(flight.flight_rules, Some(FlightRules::Ifr));

        // Controller position is backfilled from its transceiver.
        assert_eq!(snapshot.controllers.len(), 1);
        let controller = &snapshot.controllers[0];
        assert_eq!(controller.position(), Some((-33.95, 151.18)));

        // The unlinked transceiver (cid 9999) is dropped; the others carry
        // their owner's callsign.
        assert_eq!(snapshot.transceivers.len(), 2);
        assert!(snapshot.transceivers.iter().all(|t| t.cid != 9999));
        let tower_tx = snapshot
            .transceivers
            .iter()
            .find(|t| t.cid == 2001)
            .unwrap();
        assert_eq!(tower_tx.owner, TransceiverOwner::Controller);
        assert_eq!(tower_tx.callsign, "SY_TWR");
    }

    #[test]
    fn test_parse_failure_carries_fingerprint() {
        let err = parse_snapshot(b"{not json").unwrap_err();
        match &err {
            FetchError::Parse { fingerprint, .. } => {
                assert_eq!(fingerprint.len(), 16);
                assert_eq!(*fingerprint, payload_fingerprint(b"{not json"));
            }
            other => panic!("expected parse error, got {other}"),
        }
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Transient {
            detail: "timeout".into()
        }
        .is_transient());
        assert!(FetchError::Upstream { status: 503 }.is_transient());
        assert!(!FetchError::Upstream { status: 404 }.is_transient());
    }

    #[test]
    fn test_missing_flight_plan_yields_empty_icaos() {
        let body = br#"{
            "general": {"update_timestamp": "2025-06-01T10:00:00Z"},
            "pilots": [{"cid": 1, "callsign": "JST3", "latitude": -33.0,
                        "longitude": 151.0, "altitude": 1000}],
            "controllers": [],
            "transceivers": []
        }"#;
        let snapshot = parse_snapshot(body).unwrap();
        assert_eq!(snapshot.flights[0].departure_icao, "");
        assert_eq!(snapshot.flights[0].arrival_icao, "");
        assert_eq!(snapshot.flights[0].groundspeed_kt, None);
    }
}
