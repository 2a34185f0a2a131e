//! Controller classification.
//!
//! Maps a controller callsign and facility code to a controller type and the
//! proximity radius used by the interaction detector. The facility code wins
//! when it is known; otherwise the callsign suffix decides.

use serde::{Deserialize, Serialize};

/// Tagged controller type. No inheritance; radii come from a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    Ground,
    Tower,
    Approach,
    Center,
    Fss,
    Unknown,
}

impl ControllerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerType::Ground => "ground",
            ControllerType::Tower => "tower",
            ControllerType::Approach => "approach",
            ControllerType::Center => "center",
            ControllerType::Fss => "fss",
            ControllerType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ControllerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proximity radii in nautical miles, overridable from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadiusTable {
    pub ground_nm: f64,
    pub tower_nm: f64,
    pub approach_nm: f64,
    pub center_nm: f64,
    pub fss_nm: f64,
    pub unknown_nm: f64,
}

impl Default for RadiusTable {
    fn default() -> Self {
        Self {
            ground_nm: 15.0,
            tower_nm: 15.0,
            approach_nm: 60.0,
            center_nm: 400.0,
            fss_nm: 1000.0,
            unknown_nm: 30.0,
        }
    }
}

impl RadiusTable {
    pub fn radius_for(&self, kind: ControllerType) -> f64 {
        match kind {
            ControllerType::Ground => self.ground_nm,
            ControllerType::Tower => self.tower_nm,
            ControllerType::Approach => self.approach_nm,
            ControllerType::Center => self.center_nm,
            ControllerType::Fss => self.fss_nm,
            ControllerType::Unknown => self.unknown_nm,
        }
    }
}

/// A classification result: the type tag and the radius to pair with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub kind: ControllerType,
    pub radius_nm: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerClassifier {
    radii: RadiusTable,
}

impl ControllerClassifier {
    pub fn new(radii: RadiusTable) -> Self {
        Self { radii }
    }

    pub fn classify(&self, callsign: &str, facility: i32) -> Classification {
        let kind = type_from_facility(facility)
            .or_else(|| type_from_suffix(callsign))
            .unwrap_or(ControllerType::Unknown);
        Classification {
            kind,
            radius_nm: self.radii.radius_for(kind),
        }
    }
}

fn type_from_facility(facility: i32) -> Option<ControllerType> {
    match facility {
        1 => Some(ControllerType::Ground),
        2 => Some(ControllerType::Tower),
        3 => Some(ControllerType::Approach),
        4 => Some(ControllerType::Center),
        5 => Some(ControllerType::Fss),
        _ => None,
    }
}

fn type_from_suffix(callsign: &str) -> Option<ControllerType> {
    let upper = callsign.to_ascii_uppercase();
    if upper.ends_with("_GND") {
        Some(ControllerType::Ground)
    } else if upper.ends_with("_TWR") {
        Some(ControllerType::Tower)
    } else if upper.ends_with("_APP") {
        Some(ControllerType::Approach)
    } else if upper.ends_with("_CTR") {
        Some(ControllerType::Center)
    } else if upper.ends_with("_FSS") {
        Some(ControllerType::Fss)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facility_code_takes_precedence() {
        let classifier = ControllerClassifier::default();
        // Facility says tower even though the suffix says center.
        let c = classifier.classify("SY_CTR", 2);
        assert_eq!(c.kind, ControllerType::Tower);
        assert_eq!(c.radius_nm, 15.0);
    }

    #[test]
    fn test_suffix_fallback_when_facility_unknown() {
        let classifier = ControllerClassifier::default();
        let c = classifier.classify("ML_APP", 0);
        assert_eq!(c.kind, ControllerType::Approach);
        assert_eq!(c.radius_nm, 60.0);

        let c = classifier.classify("br_ctr", 99);
        assert_eq!(c.kind, ControllerType::Center);
        assert_eq!(c.radius_nm, 400.0);
    }

    #[test]
    fn test_unknown_gets_default_radius() {
        let classifier = ControllerClassifier::default();
        let c = classifier.classify("SY-RADIO", 0);
        assert_eq!(c.kind, ControllerType::Unknown);
        assert_eq!(c.radius_nm, 30.0);
    }

    #[test]
    fn test_all_facility_codes() {
        let classifier = ControllerClassifier::default();
        let expected = [
            (1, ControllerType::Ground, 15.0),
            (2, ControllerType::Tower, 15.0),
            (3, ControllerType::Approach, 60.0),
            (4, ControllerType::Center, 400.0),
            (5, ControllerType::Fss, 1000.0),
        ];
        for (code, kind, radius) in expected {
            let c = classifier.classify("XX_DEL", code);
            assert_eq!(c.kind, kind);
            assert_eq!(c.radius_nm, radius);
        }
    }

    #[test]
    fn test_radius_overrides() {
        let classifier = ControllerClassifier::new(RadiusTable {
            tower_nm: 20.0,
            ..RadiusTable::default()
        });
        let c = classifier.classify("SY_TWR", 2);
        assert_eq!(c.radius_nm, 20.0);
    }
}
