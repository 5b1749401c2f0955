//! Contracts for the two external collaborators the control loop consumes.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{EnvironmentSnapshot, IrrigationRecommendation};

/// Supplies environmental snapshots on demand.
///
/// Fails with `SourceUnavailable` on transport or decoding errors.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<EnvironmentSnapshot>;
}

/// Turns a snapshot into an irrigation recommendation.
///
/// Fails with `SourceUnavailable`, or `InvalidInput` when the source
/// rejects the snapshot.
#[async_trait]
pub trait PredictionSource: Send + Sync {
    async fn predict(&self, snapshot: &EnvironmentSnapshot) -> Result<IrrigationRecommendation>;
}
