//! Record types flowing through the ingestion pipeline.
//!
//! Every pipeline stage consumes and produces these explicit shapes; nothing
//! downstream of the fetcher sees raw feed JSON.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::classifier::ControllerType;
use crate::schema::{controller_samples, flight_samples, transceiver_samples};

/// Filed flight rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlightRules {
    Ifr,
    Vfr,
}

impl FlightRules {
    /// Parse the single-letter code carried by the network feed.
    pub fn from_feed_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "I" | "IFR" => Some(FlightRules::Ifr),
            "V" | "VFR" => Some(FlightRules::Vfr),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlightRules::Ifr => "IFR",
            FlightRules::Vfr => "VFR",
        }
    }
}

/// One observation of an aircraft at a tick. Created by the fetcher, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightSample {
    pub callsign: String,
    pub pilot_id: i64,
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: i32,
    pub groundspeed_kt: Option<i32>,
    pub heading_deg: Option<i32>,
    pub departure_icao: String,
    pub arrival_icao: String,
    pub aircraft_type: Option<String>,
    pub flight_rules: Option<FlightRules>,
    pub route: Option<String>,
}

/// One observation of an active controller at a tick.
///
/// Position is optional: the feed only carries one when the controller has an
/// associated transceiver, and position-less controllers are operationally
/// valid. `controller_type` is derived once per tick by the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSample {
    pub callsign: String,
    pub cid: i64,
    pub observed_at: DateTime<Utc>,
    pub frequency: String,
    pub name: Option<String>,
    pub rating: i32,
    pub facility: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub controller_type: ControllerType,
}

impl ControllerSample {
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Which kind of station owns a transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverOwner {
    Flight,
    Controller,
}

impl TransceiverOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransceiverOwner::Flight => "flight",
            TransceiverOwner::Controller => "controller",
        }
    }
}

/// A frequency + position tuple bound to a flight or controller sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverSample {
    pub owner: TransceiverOwner,
    pub cid: i64,
    pub callsign: String,
    pub observed_at: DateTime<Utc>,
    pub frequency_hz: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height_msl_m: Option<f64>,
}

/// One parsed tick of upstream data. Immutable; the caller owns it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub server_timestamp: DateTime<Utc>,
    pub flights: Vec<FlightSample>,
    pub controllers: Vec<ControllerSample>,
    pub transceivers: Vec<TransceiverSample>,
}

// Row structs for the persistence layer.

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = flight_samples)]
pub struct NewFlightSample {
    pub callsign: String,
    pub pilot_id: i64,
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: i32,
    pub groundspeed_kt: Option<i32>,
    pub heading_deg: Option<i32>,
    pub departure_icao: String,
    pub arrival_icao: String,
    pub aircraft_type: Option<String>,
    pub flight_rules: Option<String>,
    pub route: Option<String>,
}

impl From<&FlightSample> for NewFlightSample {
    fn from(s: &FlightSample) -> Self {
        Self {
            callsign: s.callsign.clone(),
            pilot_id: s.pilot_id,
            observed_at: s.observed_at,
            latitude: s.latitude,
            longitude: s.longitude,
            altitude_ft: s.altitude_ft,
            groundspeed_kt: s.groundspeed_kt,
            heading_deg: s.heading_deg,
            departure_icao: s.departure_icao.clone(),
            arrival_icao: s.arrival_icao.clone(),
            aircraft_type: s.aircraft_type.clone(),
            flight_rules: s.flight_rules.map(|r| r.as_str().to_string()),
            route: s.route.clone(),
        }
    }
}

/// A stored flight sample, as read back by the summarizer.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = flight_samples)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlightSampleRow {
    pub id: i64,
    pub callsign: String,
    pub pilot_id: i64,
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: i32,
    pub groundspeed_kt: Option<i32>,
    pub heading_deg: Option<i32>,
    pub departure_icao: String,
    pub arrival_icao: String,
    pub aircraft_type: Option<String>,
    pub flight_rules: Option<String>,
    pub route: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = controller_samples)]
pub struct NewControllerSample {
    pub callsign: String,
    pub cid: i64,
    pub observed_at: DateTime<Utc>,
    pub frequency: String,
    pub name: Option<String>,
    pub rating: i32,
    pub facility: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub controller_type: String,
}

impl From<&ControllerSample> for NewControllerSample {
    fn from(s: &ControllerSample) -> Self {
        Self {
            callsign: s.callsign.clone(),
            cid: s.cid,
            observed_at: s.observed_at,
            frequency: s.frequency.clone(),
            name: s.name.clone(),
            rating: s.rating,
            facility: s.facility,
            latitude: s.latitude,
            longitude: s.longitude,
            controller_type: s.controller_type.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transceiver_samples)]
pub struct NewTransceiverSample {
    pub entity_type: String,
    pub cid: i64,
    pub callsign: String,
    pub observed_at: DateTime<Utc>,
    pub frequency_hz: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height_msl_m: Option<f64>,
}

impl From<&TransceiverSample> for NewTransceiverSample {
    fn from(s: &TransceiverSample) -> Self {
        Self {
            entity_type: s.owner.as_str().to_string(),
            cid: s.cid,
            callsign: s.callsign.clone(),
            observed_at: s.observed_at,
            frequency_hz: s.frequency_hz,
            latitude: s.latitude,
            longitude: s.longitude,
            height_msl_m: s.height_msl_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_rules_from_feed_code() {
        assert_eq!(FlightRules::from_feed_code("I"), Some(FlightRules::Ifr));
        assert_eq!(FlightRules::from_feed_code("V"), Some(FlightRules::Vfr));
        assert_eq!(FlightRules::from_feed_code("ifr"), Some(FlightRules::Ifr));
        assert_eq!(FlightRules::from_feed_code("S"), None);
        assert_eq!(FlightRules::from_feed_code(""), None);
    }
}
