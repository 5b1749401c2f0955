//! The irrigation zone entity and the slice of it a decision may replace.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::model::{EnvironmentSnapshot, IrrigationRecommendation, SoilType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneMode {
    Auto,
    Manual,
}

impl fmt::Display for ZoneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A zone as seen outside the registry. Values handed out are copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IrrigationZone {
    pub id: String,
    pub name: String,
    pub soil_type: SoilType,
    /// Last observed moisture, percent.
    pub moisture_level: f64,
    /// Static target, percent.
    pub optimal_moisture: f64,
    pub mode: ZoneMode,
    pub irrigating: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watered: Option<OffsetDateTime>,
    /// L/ha applied in the current irrigation cycle.
    pub water_used: f64,
    pub last_recommendation: Option<IrrigationRecommendation>,
    /// Highest snapshot sequence applied to the soil fields.
    pub snapshot_seq: u64,
    /// Highest snapshot sequence behind an accepted prediction.
    pub prediction_seq: u64,
}

impl IrrigationZone {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        soil_type: SoilType,
        moisture_level: f64,
        optimal_moisture: f64,
        mode: ZoneMode,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            soil_type,
            moisture_level,
            optimal_moisture,
            mode,
            irrigating: false,
            last_watered: None,
            water_used: 0.0,
            last_recommendation: None,
            snapshot_seq: 0,
            prediction_seq: 0,
        }
    }

    pub(crate) fn apply_snapshot(&mut self, seq: u64, snapshot: &EnvironmentSnapshot) {
        self.soil_type = snapshot.soil_type;
        self.moisture_level = snapshot.soil_moisture;
        self.snapshot_seq = seq;
    }

    pub(crate) fn apply(&mut self, next: NextState) {
        self.mode = next.mode;
        self.irrigating = next.irrigating;
        self.water_used = next.water_used;
        self.last_watered = next.last_watered;
        self.last_recommendation = next.last_recommendation;
        self.prediction_seq = next.prediction_seq;
    }

    pub(crate) fn next_state(&self) -> NextState {
        NextState {
            mode: self.mode,
            irrigating: self.irrigating,
            water_used: self.water_used,
            last_watered: self.last_watered,
            last_recommendation: self.last_recommendation.clone(),
            prediction_seq: self.prediction_seq,
        }
    }
}

/// The mutable fields a decision replaces atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct NextState {
    pub mode: ZoneMode,
    pub irrigating: bool,
    pub water_used: f64,
    pub last_watered: Option<OffsetDateTime>,
    pub last_recommendation: Option<IrrigationRecommendation>,
    pub prediction_seq: u64,
}
