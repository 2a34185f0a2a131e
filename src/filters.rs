//! Per-sample validation applied before any state change.
//!
//! Three predicates, in order: flight-plan completeness, geographic
//! containment, and the non-operational callsign exclusion list. All three
//! are pure functions over one sample; drops are counted per kind.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::geo::GeoIndex;
use crate::samples::{ControllerSample, FlightSample, Snapshot, TransceiverOwner};

/// Callsigns containing any of these are not operational stations.
static EXCLUDED_CONTAINS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(ATIS|INFO|MET|VOLMET|SIGMET)").unwrap());

/// Callsigns starting with any of these are test or system stations.
static EXCLUDED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(TEST|TRAINING|DEMO|MAINT|SYS|ADMIN)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    IncompleteFlightPlan,
    OutsideBoundary,
    ExcludedCallsign,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::IncompleteFlightPlan => "incomplete_flight_plan",
            RejectReason::OutsideBoundary => "outside_boundary",
            RejectReason::ExcludedCallsign => "excluded_callsign",
        }
    }
}

pub fn is_excluded_callsign(callsign: &str) -> bool {
    EXCLUDED_CONTAINS.is_match(callsign) || EXCLUDED_PREFIX.is_match(callsign)
}

/// Validate one flight sample. The flight-plan check cannot be disabled:
/// summarization depends on non-empty departure and arrival fields.
pub fn check_flight(sample: &FlightSample, geo: &GeoIndex) -> Result<(), RejectReason> {
    if sample.departure_icao.is_empty() || sample.arrival_icao.is_empty() {
        return Err(RejectReason::IncompleteFlightPlan);
    }
    if !geo.contains(sample.latitude, sample.longitude) {
        return Err(RejectReason::OutsideBoundary);
    }
    if is_excluded_callsign(&sample.callsign) {
        return Err(RejectReason::ExcludedCallsign);
    }
    Ok(())
}

/// Validate one controller sample. Position-less controllers are retained:
/// they are operationally valid and simply never pair with aircraft.
pub fn check_controller(sample: &ControllerSample, geo: &GeoIndex) -> Result<(), RejectReason> {
    if let Some((lat, lon)) = sample.position()
        && !geo.contains(lat, lon)
    {
        return Err(RejectReason::OutsideBoundary);
    }
    if is_excluded_callsign(&sample.callsign) {
        return Err(RejectReason::ExcludedCallsign);
    }
    Ok(())
}

/// Apply the filter pipeline to a snapshot, dropping rejected samples and
/// the transceivers that belonged to them.
pub fn apply(snapshot: Snapshot, geo: &GeoIndex) -> Snapshot {
    let Snapshot {
        server_timestamp,
        flights,
        controllers,
        transceivers,
    } = snapshot;

    let flights: Vec<FlightSample> = flights
        .into_iter()
        .filter(|f| match check_flight(f, geo) {
            Ok(()) => true,
            Err(reason) => {
                metrics::counter!("filters.dropped", "entity" => "flight", "kind" => reason.as_str())
                    .increment(1);
                trace!("Dropped flight {}: {}", f.callsign, reason.as_str());
                false
            }
        })
        .collect();

    let controllers: Vec<ControllerSample> = controllers
        .into_iter()
        .filter(|c| match check_controller(c, geo) {
            Ok(()) => true,
            Err(reason) => {
                metrics::counter!("filters.dropped", "entity" => "controller", "kind" => reason.as_str())
                    .increment(1);
                trace!("Dropped controller {}: {}", c.callsign, reason.as_str());
                false
            }
        })
        .collect();

    // Only transceivers whose owner survived stay attached to the snapshot.
    let flight_cids: std::collections::HashSet<i64> = flights.iter().map(|f| f.pilot_id).collect();
    let controller_cids: std::collections::HashSet<i64> =
        controllers.iter().map(|c| c.cid).collect();
    let transceivers = transceivers
        .into_iter()
        .filter(|t| match t.owner {
            TransceiverOwner::Flight => flight_cids.contains(&t.cid),
            TransceiverOwner::Controller => controller_cids.contains(&t.cid),
        })
        .collect();

    Snapshot {
        server_timestamp,
        flights,
        controllers,
        transceivers,
    }
}
