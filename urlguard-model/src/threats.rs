use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity bucket shared by the live feed and the threat map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Suspicious,
    Safe,
}

/// One entry of `GET /api/threats/live`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveThreat {
    pub id: String,
    pub label: String,
    pub entity: String,
    pub location: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// One entry of `GET /api/threats/map-data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatMapPoint {
    pub threat_id: String,
    #[serde(rename = "type")]
    pub threat_type: String,
    pub severity: Severity,
    pub source: Coordinates,
    pub target: Coordinates,
    pub attack_vector: String,
    pub timestamp: DateTime<Utc>,
}

impl ThreatMapPoint {
    pub fn has_valid_coordinates(&self) -> bool {
        self.source.is_valid() && self.target.is_valid()
    }
}

/// One entry of `GET /api/threats/regions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCount {
    pub region: String,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_map_point_wire_shape() {
        let point: ThreatMapPoint = serde_json::from_str(
            r#"{
                "threat_id": "THR-0001-120501",
                "type": "credential_harvesting",
                "severity": "critical",
                "source": {"lat": 55.75, "lng": 37.62},
                "target": {"lat": 40.71, "lng": -74.01},
                "attack_vector": "email",
                "timestamp": "2025-03-01T12:05:01.123456Z"
            }"#,
        )
        .unwrap();

        assert_eq!(point.threat_type, "credential_harvesting");
        assert_eq!(point.severity, Severity::Critical);
        assert!(point.has_valid_coordinates());
    }

    #[test]
    fn coordinate_bounds() {
        assert!(Coordinates { lat: -90.0, lng: 180.0 }.is_valid());
        assert!(!Coordinates { lat: 91.0, lng: 0.0 }.is_valid());
        assert!(!Coordinates { lat: 0.0, lng: -180.5 }.is_valid());
    }
}
