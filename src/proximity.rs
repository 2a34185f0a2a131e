//! Aircraft / controller interaction detection.
//!
//! Pairs every positioned controller with the flights inside its
//! classified proximity radius. Cardinalities are small (low thousands of
//! flights by low hundreds of controllers), so a quadratic scan behind a
//! cheap bounding-box prefilter is plenty fast. The pairing is computed
//! once per tick; there is no separate flight-centric pass.

use chrono::{DateTime, Utc};

use crate::classifier::{ControllerClassifier, ControllerType};
use crate::samples::{ControllerSample, FlightSample};

/// Mean Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Great-circle distance between two coordinates in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_NM * c
}

/// A detected pairing of a flight with a controller at one tick. Carries the
/// radius used so retrospective re-classification is never needed.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub flight_callsign: String,
    pub flight_pilot_id: i64,
    pub controller_callsign: String,
    pub controller_type: ControllerType,
    pub distance_nm: f64,
    pub proximity_nm: f64,
    pub observed_at: DateTime<Utc>,
}

/// Pair flights with controllers for one tick. Controllers without a
/// position are skipped.
pub fn pair(
    flights: &[FlightSample],
    controllers: &[ControllerSample],
    classifier: &ControllerClassifier,
) -> Vec<Interaction> {
    let mut interactions = Vec::new();

    for controller in controllers {
        let Some((c_lat, c_lon)) = controller.position() else {
            continue;
        };
        let classification = classifier.classify(&controller.callsign, controller.facility);
        let radius_nm = classification.radius_nm;

        // Coarse degree window around the controller; one degree of latitude
        // is sixty nautical miles, longitude shrinks with cos(lat).
        let lat_window = radius_nm / 60.0 + 0.1;
        let lon_window = radius_nm / (60.0 * c_lat.to_radians().cos().abs().max(0.01)) + 0.1;

        for flight in flights {
            if (flight.latitude - c_lat).abs() > lat_window
                || (flight.longitude - c_lon).abs() > lon_window
            {
                continue;
            }
            let distance_nm = haversine_nm(flight.latitude, flight.longitude, c_lat, c_lon);
            if distance_nm <= radius_nm {
                interactions.push(Interaction {
                    flight_callsign: flight.callsign.clone(),
                    flight_pilot_id: flight.pilot_id,
                    controller_callsign: controller.callsign.clone(),
                    controller_type: classification.kind,
                    distance_nm,
                    proximity_nm: radius_nm,
                    observed_at: flight.observed_at,
                });
            }
        }
    }

    interactions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RadiusTable;
    use chrono::Utc;

    fn flight(callsign: &str, pilot_id: i64, lat: f64, lon: f64) -> FlightSample {
        FlightSample {
            callsign: callsign.to_string(),
            pilot_id,
            observed_at: Utc::now(),
            latitude: lat,
            longitude: lon,
            altitude_ft: 5_000,
            groundspeed_kt: Some(250),
            heading_deg: None,
            departure_icao: "YSSY".to_string(),
            arrival_icao: "YMML".to_string(),
            aircraft_type: None,
            flight_rules: None,
            route: None,
        }
    }

    fn tower(callsign: &str, lat: f64, lon: f64) -> ControllerSample {
        ControllerSample {
            callsign: callsign.to_string(),
            cid: 2001,
            observed_at: Utc::now(),
            frequency: "120.500".to_string(),
            name: None,
            rating: 3,
            facility: 2,
            latitude: Some(lat),
            longitude: Some(lon),
            controller_type: ControllerType::Unknown,
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude along a meridian is sixty nautical miles,
        // give or take the spherical model.
        let d = haversine_nm(-33.0, 151.0, -34.0, 151.0);
        assert!((d - 60.0).abs() < 0.1, "got {d}");
        assert_eq!(haversine_nm(-33.0, 151.0, -33.0, 151.0), 0.0);
    }

    #[test]
    fn test_tower_pairs_flights_inside_fifteen_nm() {
        let classifier = ControllerClassifier::default();
        let c_lat = -33.95;
        let c_lon = 151.18;
        // Offsets straight down the meridian: 8, 14.9 and 20 nautical miles.
        let flights = vec![
            flight("FLA", 1, c_lat + 8.0 / 60.04, c_lon),
            flight("FLB", 2, c_lat + 14.9 / 60.04, c_lon),
            flight("FLC", 3, c_lat + 20.0 / 60.04, c_lon),
        ];
        let controllers = vec![tower("SY_TWR", c_lat, c_lon)];

        let interactions = pair(&flights, &controllers, &classifier);
        let callsigns: Vec<&str> = interactions
            .iter()
            .map(|i| i.flight_callsign.as_str())
            .collect();
        assert_eq!(callsigns, vec!["FLA", "FLB"]);
        for i in &interactions {
            assert_eq!(i.controller_type, ControllerType::Tower);
            assert_eq!(i.proximity_nm, 15.0);
            assert!(i.distance_nm <= i.proximity_nm);
        }
    }

    #[test]
    fn test_distance_equal_to_radius_is_included() {
        let c_lat = -33.95;
        let c_lon = 151.18;
        let f = flight("FLX", 9, c_lat + 0.2, c_lon);
        let exact = haversine_nm(f.latitude, f.longitude, c_lat, c_lon);
        let classifier = ControllerClassifier::new(RadiusTable {
            tower_nm: exact,
            ..RadiusTable::default()
        });

        let interactions = pair(
            std::slice::from_ref(&f),
            &[tower("SY_TWR", c_lat, c_lon)],
            &classifier,
        );
        assert_eq!(interactions.len(), 1);
    }

    #[test]
    fn test_controller_without_position_is_skipped() {
        let classifier = ControllerClassifier::default();
        let mut c = tower("SY_TWR", 0.0, 0.0);
        c.latitude = None;
        c.longitude = None;
        let flights = vec![flight("FLA", 1, 0.0, 0.0)];
        assert!(pair(&flights, &[c], &classifier).is_empty());
    }

    #[test]
    fn test_each_pairing_emitted_once() {
        let classifier = ControllerClassifier::default();
        let flights = vec![flight("FLA", 1, -33.95, 151.18)];
        let controllers = vec![
            tower("SY_TWR", -33.95, 151.18),
            tower("SY_TWR2", -33.95, 151.20),
        ];
        let interactions = pair(&flights, &controllers, &classifier);
        assert_eq!(interactions.len(), 2);
        let mut keys: Vec<(String, String)> = interactions
            .iter()
            .map(|i| (i.flight_callsign.clone(), i.controller_callsign.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_center_range_pairs_distant_flights() {
        let classifier = ControllerClassifier::default();
        // 300 nm north of the controller: inside a 400 nm center range.
        let flights = vec![flight("FLA", 1, -33.0 + 300.0 / 60.04, 151.0)];
        let controllers = vec![{
            let mut c = tower("ML_CTR", -33.0, 151.0);
            c.facility = 4;
            c
        }];
        let interactions = pair(&flights, &controllers, &classifier);
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].controller_type, ControllerType::Center);
        assert_eq!(interactions[0].proximity_nm, 400.0);
    }
}
