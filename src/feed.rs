//! Wire schema of the upstream network data snapshot.
//!
//! These structs mirror the documented JSON layout only; conversion into the
//! pipeline's record types happens in the fetcher so nothing downstream
//! touches raw feed shapes.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSnapshot {
    pub general: FeedGeneral,
    #[serde(default)]
    pub pilots: Vec<FeedPilot>,
    #[serde(default)]
    pub controllers: Vec<FeedController>,
    #[serde(default)]
    pub transceivers: Vec<FeedTransceiver>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedGeneral {
    pub update_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedPilot {
    pub cid: i64,
    pub callsign: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub altitude: i32,
    pub groundspeed: Option<i32>,
    pub heading: Option<i32>,
    pub flight_plan: Option<FeedFlightPlan>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedFlightPlan {
    #[serde(default)]
    pub flight_rules: String,
    #[serde(default)]
    pub aircraft_short: Option<String>,
    #[serde(default)]
    pub departure: String,
    #[serde(default)]
    pub arrival: String,
    #[serde(default)]
    pub route: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedController {
    pub cid: i64,
    pub callsign: String,
    #[serde(default)]
    pub frequency: String,
    pub name: Option<String>,
    #[serde(default)]
    pub rating: i32,
    #[serde(default)]
    pub facility: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedTransceiver {
    pub cid: i64,
    #[serde(default)]
    pub callsign: Option<String>,
    pub frequency: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub height_msl_m: Option<f64>,
}
