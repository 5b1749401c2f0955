//! Environmental readings and irrigation recommendations as consumed by the
//! zone control loop, plus their wire shapes and range checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Soil type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilType {
    Sandy,
    Clay,
    Loamy,
    Siliceous,
}

impl SoilType {
    pub const ALL: [SoilType; 4] = [Self::Sandy, Self::Clay, Self::Loamy, Self::Siliceous];
}

impl fmt::Display for SoilType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sandy => write!(f, "sandy"),
            Self::Clay => write!(f, "clay"),
            Self::Loamy => write!(f, "loamy"),
            Self::Siliceous => write!(f, "siliceous"),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment snapshot
// ---------------------------------------------------------------------------

/// One immutable reading of the shared field environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentSnapshot {
    pub soil_type: SoilType,
    /// Percent, 0–100.
    pub soil_moisture: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Percent, 0–100.
    pub humidity: f64,
    /// Millimetres, >= 0.
    pub precipitation: f64,
    /// Fraction, 0–1.
    pub water_retention: f64,
    /// Fraction, 0–1.
    pub drainage_rate: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl EnvironmentSnapshot {
    /// Reject the snapshot whole if any metric is out of range.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        check_range(&mut errors, "soil_moisture", self.soil_moisture, 0.0, 100.0);
        check_range(&mut errors, "humidity", self.humidity, 0.0, 100.0);
        check_range(&mut errors, "water_retention", self.water_retention, 0.0, 1.0);
        check_range(&mut errors, "drainage_rate", self.drainage_rate, 0.0, 1.0);
        check_range(&mut errors, "precipitation", self.precipitation, 0.0, f64::MAX);
        if !self.temperature.is_finite() {
            errors.push(format!("temperature {} is not finite", self.temperature));
        }

        finish("snapshot", errors)
    }
}

/// Snapshot as it travels over HTTP or MQTT. The timestamp is optional and
/// may lack an offset.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotWire {
    pub soil_type: SoilType,
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub precipitation: f64,
    pub water_retention: f64,
    pub drainage_rate: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl SnapshotWire {
    /// Convert to the domain type. `received_at` stands in for a missing
    /// timestamp.
    pub fn into_snapshot(self, received_at: OffsetDateTime) -> Result<EnvironmentSnapshot> {
        let timestamp = match self.timestamp.as_deref() {
            Some(s) => parse_timestamp(s)?,
            None => received_at,
        };
        Ok(EnvironmentSnapshot {
            soil_type: self.soil_type,
            soil_moisture: self.soil_moisture,
            temperature: self.temperature,
            humidity: self.humidity,
            precipitation: self.precipitation,
            water_retention: self.water_retention,
            drainage_rate: self.drainage_rate,
            timestamp,
        })
    }
}

/// Body of a prediction request: the snapshot metrics without the timestamp.
#[derive(Debug, Serialize)]
pub struct PredictRequest {
    pub soil_type: SoilType,
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub precipitation: f64,
    pub water_retention: f64,
    pub drainage_rate: f64,
}

impl From<&EnvironmentSnapshot> for PredictRequest {
    fn from(s: &EnvironmentSnapshot) -> Self {
        Self {
            soil_type: s.soil_type,
            soil_moisture: s.soil_moisture,
            temperature: s.temperature,
            humidity: s.humidity,
            precipitation: s.precipitation,
            water_retention: s.water_retention,
            drainage_rate: s.drainage_rate,
        }
    }
}

/// Accepts RFC 3339, or an ISO-8601 datetime without offset (taken as UTC).
pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(ts);
    }
    PrimitiveDateTime::parse(s, &Iso8601::DEFAULT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| Error::InvalidInput(format!("bad timestamp '{s}': {e}")))
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationRecommendation {
    pub needs_irrigation: bool,
    /// Litres per hectare, >= 0.
    pub water_amount: f64,
    /// Percent, 0–100. Advisory only.
    pub confidence: f64,
    pub reason: String,
}

impl IrrigationRecommendation {
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        check_range(&mut errors, "water_amount", self.water_amount, 0.0, f64::MAX);
        check_range(&mut errors, "confidence", self.confidence, 0.0, 100.0);
        finish("recommendation", errors)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_range(errors: &mut Vec<String>, field: &str, v: f64, min: f64, max: f64) {
    if !v.is_finite() {
        errors.push(format!("{field} {v} is not finite"));
    } else if v < min || v > max {
        if max == f64::MAX {
            errors.push(format!("{field} {v} must be >= {min}"));
        } else {
            errors.push(format!("{field} {v} out of range [{min}, {max}]"));
        }
    }
}

fn finish(what: &str, errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("{what}: {}", errors.join("; "))))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use time::macros::datetime;

    pub(crate) fn snapshot() -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            soil_type: SoilType::Loamy,
            soil_moisture: 45.0,
            temperature: 22.0,
            humidity: 65.0,
            precipitation: 0.0,
            water_retention: 0.5,
            drainage_rate: 0.3,
            timestamp: datetime!(2025-06-01 12:00 UTC),
        }
    }

    pub(crate) fn recommendation(needs: bool, amount: f64) -> IrrigationRecommendation {
        IrrigationRecommendation {
            needs_irrigation: needs,
            water_amount: amount,
            confidence: 80.0,
            reason: format!("Calculated water requirement: {amount}L/ha"),
        }
    }

    #[test]
    fn valid_snapshot_passes() {
        snapshot().validate().unwrap();
    }

    #[test]
    fn snapshot_moisture_above_100_rejected() {
        let s = EnvironmentSnapshot {
            soil_moisture: 101.0,
            ..snapshot()
        };
        let err = s.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ref m) if m.contains("soil_moisture")));
    }

    #[test]
    fn snapshot_reports_every_violation() {
        let s = EnvironmentSnapshot {
            humidity: -1.0,
            water_retention: 1.5,
            precipitation: -0.1,
            temperature: f64::NAN,
            ..snapshot()
        };
        let msg = s.validate().unwrap_err().to_string();
        for field in ["humidity", "water_retention", "precipitation", "temperature"] {
            assert!(msg.contains(field), "missing {field} in: {msg}");
        }
    }

    #[test]
    fn recommendation_negative_amount_rejected() {
        let r = recommendation(true, -3.0);
        assert!(r.validate().is_err());
    }

    #[test]
    fn recommendation_zero_confidence_is_valid() {
        let r = IrrigationRecommendation {
            confidence: 0.0,
            ..recommendation(true, 12.5)
        };
        r.validate().unwrap();
    }

    #[test]
    fn recommendation_confidence_over_100_rejected() {
        let r = IrrigationRecommendation {
            confidence: 100.5,
            ..recommendation(false, 0.0)
        };
        assert!(r.validate().is_err());
    }

    #[test]
    fn wire_snapshot_naive_timestamp_is_utc() {
        let json = r#"{
            "soil_type": "clay", "soil_moisture": 52.1, "temperature": 18.4,
            "humidity": 71.0, "precipitation": 2.5, "water_retention": 0.44,
            "drainage_rate": 0.21, "timestamp": "2025-03-04T10:15:30.123456"
        }"#;
        let wire: SnapshotWire = serde_json::from_str(json).unwrap();
        let s = wire.into_snapshot(OffsetDateTime::now_utc()).unwrap();
        assert_eq!(s.soil_type, SoilType::Clay);
        assert_eq!(s.timestamp.date(), time::macros::date!(2025-03-04));
        assert_eq!(s.timestamp.offset(), time::UtcOffset::UTC);
    }

    #[test]
    fn wire_snapshot_missing_timestamp_uses_receive_time() {
        let json = r#"{
            "soil_type": "sandy", "soil_moisture": 30, "temperature": 25,
            "humidity": 40, "precipitation": 0, "water_retention": 0.3,
            "drainage_rate": 0.5
        }"#;
        let wire: SnapshotWire = serde_json::from_str(json).unwrap();
        let at = datetime!(2025-01-01 00:00 UTC);
        assert_eq!(wire.into_snapshot(at).unwrap().timestamp, at);
    }

    #[test]
    fn wire_snapshot_unknown_soil_type_fails_decoding() {
        let json = r#"{
            "soil_type": "peat", "soil_moisture": 30, "temperature": 25,
            "humidity": 40, "precipitation": 0, "water_retention": 0.3,
            "drainage_rate": 0.5
        }"#;
        assert!(serde_json::from_str::<SnapshotWire>(json).is_err());
    }

    #[test]
    fn garbage_timestamp_is_invalid_input() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn predict_request_omits_timestamp() {
        let body = serde_json::to_value(PredictRequest::from(&snapshot())).unwrap();
        assert_eq!(body["soil_type"], "loamy");
        assert!(body.get("timestamp").is_none());
        assert_eq!(body.as_object().unwrap().len(), 7);
    }
}
