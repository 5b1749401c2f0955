//! In-process stand-ins for the sensor and prediction services, for local
//! development without either running.
//!
//! Readings are drawn uniformly from plausible field ranges. Predictions
//! use the FAO-style estimate `(1 - moisture/100) * retention * 1000` L/ha
//! with a 100 L/ha irrigation threshold.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::Result;
use crate::model::{EnvironmentSnapshot, IrrigationRecommendation, SoilType};
use crate::source::{PredictionSource, ReadingSource};

/// L/ha above which irrigation is recommended.
const IRRIGATION_THRESHOLD: f64 = 100.0;

pub struct SimReadingSource;

#[async_trait]
impl ReadingSource for SimReadingSource {
    async fn fetch_snapshot(&self) -> Result<EnvironmentSnapshot> {
        Ok(EnvironmentSnapshot {
            soil_type: SoilType::ALL[fastrand::usize(..SoilType::ALL.len())],
            soil_moisture: uniform(30.0, 70.0),
            temperature: uniform(15.0, 30.0),
            humidity: uniform(40.0, 80.0),
            precipitation: uniform(0.0, 10.0),
            water_retention: uniform(0.3, 0.8),
            drainage_rate: uniform(0.1, 0.5),
            timestamp: OffsetDateTime::now_utc(),
        })
    }
}

pub struct SimPredictionSource;

#[async_trait]
impl PredictionSource for SimPredictionSource {
    async fn predict(&self, snapshot: &EnvironmentSnapshot) -> Result<IrrigationRecommendation> {
        Ok(estimate(snapshot))
    }
}

/// Water requirement estimate from moisture deficit and retention.
pub(crate) fn estimate(snapshot: &EnvironmentSnapshot) -> IrrigationRecommendation {
    let water = round2((1.0 - snapshot.soil_moisture / 100.0) * snapshot.water_retention * 1000.0);
    let needs_irrigation = water > IRRIGATION_THRESHOLD;

    // Confidence grows with the estimated deficit.
    let confidence = round2((60.0 + water / 10.0).clamp(60.0, 95.0));

    let reason = if needs_irrigation {
        format!("Calculated water requirement: {water}L/ha")
    } else {
        "Irrigation not necessary".to_string()
    };

    IrrigationRecommendation {
        needs_irrigation,
        water_amount: water,
        confidence,
        reason,
    }
}

fn uniform(min: f64, max: f64) -> f64 {
    round2(min + fastrand::f64() * (max - min))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
