//! Refresh scheduler: periodically acquires a snapshot and a prediction and
//! feeds them through the decision engine for every zone.
//!
//! A cycle has two phases:
//!
//! ```text
//! acquire: fetch_snapshot ─▶ validate ─▶ predict ─▶ validate   (may suspend)
//! apply:   every zone: upsert_from_snapshot ─▶ PredictionReceived
//! ```
//!
//! Nothing reaches the registry unless the whole acquire phase succeeds.
//! Shutdown abandons an in-flight acquire phase and drops its result.
//! Each acquired snapshot gets a strictly increasing sequence number, which
//! the registry and decision engine use to discard results that arrive out
//! of order.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::decision::{Outcome, Prediction, ZoneEvent};
use crate::error::{Error, Origin, Result};
use crate::model::{EnvironmentSnapshot, IrrigationRecommendation};
use crate::registry::ZoneRegistry;
use crate::source::{PredictionSource, ReadingSource};
use crate::state::SharedState;

/// Outcome of one completed refresh cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub seq: u64,
    pub recommendation: IrrigationRecommendation,
    /// Zones whose state the prediction was applied to.
    pub applied: Vec<String>,
    /// Zones that had already seen a newer snapshot; left untouched.
    pub stale: Vec<String>,
}

struct Acquired {
    seq: u64,
    snapshot: EnvironmentSnapshot,
    recommendation: IrrigationRecommendation,
}

pub struct RefreshScheduler {
    registry: Arc<ZoneRegistry>,
    reading: Arc<dyn ReadingSource>,
    prediction: Arc<dyn PredictionSource>,
    shared: SharedState,
    fetch_timeout: Duration,
    seq: AtomicU64,
}

impl RefreshScheduler {
    pub fn new(
        registry: Arc<ZoneRegistry>,
        reading: Arc<dyn ReadingSource>,
        prediction: Arc<dyn PredictionSource>,
        shared: SharedState,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            reading,
            prediction,
            shared,
            fetch_timeout,
            seq: AtomicU64::new(0),
        }
    }

    /// Run the periodic loop until `shutdown` flips (or its sender drops).
    /// The first cycle starts immediately. Intended to be `tokio::spawn`-ed
    /// from main.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            zones = self.registry.len(),
            interval_sec = interval.as_secs(),
            fetch_timeout_sec = self.fetch_timeout.as_secs(),
            "scheduler started"
        );
        self.shared
            .write()
            .await
            .record_system(format!("scheduler started (every {}s)", interval.as_secs()));

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let acquired = tokio::select! {
                _ = shutdown.changed() => {
                    info!("scheduler: shutdown during acquisition, cycle abandoned");
                    break;
                }
                acquired = self.acquire() => acquired,
            };

            // Result already reported inside complete().
            let _ = self.complete("periodic", acquired).await;
        }

        info!("scheduler stopped");
    }

    /// Run one full cycle now.
    pub async fn refresh(&self, reason: &str) -> Result<RefreshReport> {
        let acquired = self.acquire().await;
        self.complete(reason, acquired).await
    }

    /// Immediate cycle for a zone that has just entered AUTO, so it does not
    /// wait a full period for its first decision.
    pub async fn trigger(&self, zone_id: &str) -> Result<RefreshReport> {
        // Reject unknown ids before touching any source.
        self.registry.get(zone_id).await?;
        info!(zone = %zone_id, "scheduler: immediate refresh requested");
        self.refresh(&format!("zone {zone_id} entered auto")).await
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn acquire(&self) -> Result<Acquired> {
        let snapshot = self
            .bounded(Origin::Reading, self.reading.fetch_snapshot())
            .await?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        snapshot.validate()?;

        let recommendation = self
            .bounded(Origin::Prediction, self.prediction.predict(&snapshot))
            .await?;
        recommendation.validate()?;

        Ok(Acquired {
            seq,
            snapshot,
            recommendation,
        })
    }

    async fn complete(&self, reason: &str, acquired: Result<Acquired>) -> Result<RefreshReport> {
        let acquired = match acquired {
            Ok(a) => a,
            Err(e) => {
                warn!(reason, kind = e.kind(), "scheduler: refresh failed, zones unchanged: {e}");
                self.shared
                    .write()
                    .await
                    .record_refresh_failed(format!("refresh ({reason}) failed: {e}"));
                return Err(e);
            }
        };

        let report = self.apply(acquired).await;
        debug!(
            reason,
            seq = report.seq,
            applied = report.applied.len(),
            stale = report.stale.len(),
            "scheduler: refresh complete"
        );
        self.shared.write().await.record_refresh_ok();
        Ok(report)
    }

    async fn apply(&self, acquired: Acquired) -> RefreshReport {
        let Acquired {
            seq,
            snapshot,
            recommendation,
        } = acquired;

        if !self
            .shared
            .write()
            .await
            .record_cycle(seq, &snapshot, &recommendation)
        {
            debug!(seq, "scheduler: newer cycle already recorded");
        }

        let event = ZoneEvent::PredictionReceived(Prediction {
            seq,
            recommendation: recommendation.clone(),
        });
        let now = OffsetDateTime::now_utc();
        let mut applied = Vec::new();
        let mut stale = Vec::new();

        for zone_id in self.registry.ids() {
            let result = match self
                .registry
                .upsert_from_snapshot(zone_id, seq, &snapshot)
                .await
            {
                Ok(()) => self.registry.transition(zone_id, &event, now).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(t) => {
                    if t.outcome == Outcome::Applied && t.was_irrigating != t.zone.irrigating {
                        let detail = if t.zone.irrigating {
                            format!("irrigation started ({:.2}L/ha)", t.zone.water_used)
                        } else {
                            "irrigation stopped".to_string()
                        };
                        self.shared.write().await.record_decision(zone_id, detail);
                    }
                    applied.push(zone_id.clone());
                }
                Err(Error::StaleResult { seq, latest, .. }) => {
                    debug!(zone = %zone_id, seq, latest, "scheduler: stale result discarded");
                    stale.push(zone_id.clone());
                }
                Err(e) => {
                    // Ids come from the registry itself, so this is a bug.
                    error!(zone = %zone_id, "scheduler: apply failed: {e}");
                }
            }
        }

        RefreshReport {
            seq,
            recommendation,
            applied,
            stale,
        }
    }

    /// Bound a source call by the fetch timeout.
    async fn bounded<T>(&self, origin: Origin, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.fetch_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::SourceUnavailable {
                origin,
                detail: format!("timed out after {}s", self.fetch_timeout.as_secs_f32()),
            }),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
