//! Zone registry: the sole owner of zone state.
//!
//! Zones are fixed at start-up, so the id → zone map itself is never
//! mutated. Each zone sits behind its own async mutex: operations on one
//! zone are serialised, operations on different zones proceed in parallel.

use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::decision::{decide, Outcome, ZoneEvent};
use crate::error::{Error, Result};
use crate::model::EnvironmentSnapshot;
use crate::zone::{IrrigationZone, NextState};

pub struct ZoneRegistry {
    /// Insertion order, for stable listing.
    order: Vec<String>,
    zones: HashMap<String, Mutex<IrrigationZone>>,
}

/// Result of a decision applied under the zone lock.
#[derive(Debug, Clone)]
pub struct Transition {
    pub zone: IrrigationZone,
    pub outcome: Outcome,
    pub request_prediction: bool,
    /// Irrigation state before the event.
    pub was_irrigating: bool,
}

impl ZoneRegistry {
    pub fn new(zones: Vec<IrrigationZone>) -> Result<Self> {
        let mut order = Vec::with_capacity(zones.len());
        let mut map = HashMap::with_capacity(zones.len());
        for z in zones {
            if map.contains_key(&z.id) {
                return Err(Error::InvalidInput(format!("duplicate zone id '{}'", z.id)));
            }
            order.push(z.id.clone());
            map.insert(z.id.clone(), Mutex::new(z));
        }
        Ok(Self { order, zones: map })
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    fn slot(&self, id: &str) -> Result<&Mutex<IrrigationZone>> {
        self.zones
            .get(id)
            .ok_or_else(|| Error::UnknownZone(id.to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<IrrigationZone> {
        Ok(self.slot(id)?.lock().await.clone())
    }

    /// Copies of every zone in insertion order.
    pub async fn list(&self) -> Vec<IrrigationZone> {
        let mut out = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(slot) = self.zones.get(id) {
                out.push(slot.lock().await.clone());
            }
        }
        out
    }

    /// Copy soil type and moisture from a snapshot into the zone. A snapshot
    /// acquired before the one already applied is rejected as stale.
    pub async fn upsert_from_snapshot(
        &self,
        id: &str,
        seq: u64,
        snapshot: &EnvironmentSnapshot,
    ) -> Result<()> {
        let mut zone = self.slot(id)?.lock().await;
        if seq <= zone.snapshot_seq {
            return Err(Error::StaleResult {
                zone_id: id.to_string(),
                seq,
                latest: zone.snapshot_seq,
            });
        }
        zone.apply_snapshot(seq, snapshot);
        debug!(
            zone = %id,
            seq,
            soil_type = %snapshot.soil_type,
            moisture = snapshot.soil_moisture,
            "registry: snapshot applied"
        );
        Ok(())
    }

    /// Replace the zone's mutable fields with a decision's output, for
    /// callers that decided outside `transition`.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn apply_decision(&self, id: &str, next: NextState) -> Result<()> {
        let mut zone = self.slot(id)?.lock().await;
        commit(&mut zone, next);
        Ok(())
    }

    /// Decide and apply in one step, holding the zone lock throughout so at
    /// most one transition per zone is ever in flight.
    pub async fn transition(
        &self,
        id: &str,
        event: &ZoneEvent,
        now: OffsetDateTime,
    ) -> Result<Transition> {
        let mut zone = self.slot(id)?.lock().await;
        let decision = decide(&zone, event, now)?;
        let was_irrigating = zone.irrigating;

        if decision.outcome == Outcome::Applied {
            commit(&mut zone, decision.next);
        } else {
            debug!(zone = %id, ?event, mode = %zone.mode, "event ignored in current mode");
        }

        Ok(Transition {
            zone: zone.clone(),
            outcome: decision.outcome,
            request_prediction: decision.request_prediction,
            was_irrigating,
        })
    }
}

/// Apply `next` to a locked zone and log mode and irrigation changes.
fn commit(zone: &mut IrrigationZone, next: NextState) {
    let was_mode = zone.mode;
    let was_irrigating = zone.irrigating;
    zone.apply(next);

    if was_mode != zone.mode {
        info!(zone = %zone.id, mode = %zone.mode, "zone mode changed");
    }
    if was_irrigating != zone.irrigating {
        info!(
            zone = %zone.id,
            irrigating = zone.irrigating,
            water_used = zone.water_used,
            "zone irrigation {}",
            if zone.irrigating { "started" } else { "stopped" }
        );
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::decision::Prediction;
    use crate::model::tests::{recommendation, snapshot};
    use crate::model::SoilType;
    use crate::zone::ZoneMode;
    use std::sync::Arc;

    pub(crate) fn two_zones() -> ZoneRegistry {
        ZoneRegistry::new(vec![
            IrrigationZone::new("1", "Zone 1", SoilType::Loamy, 45.0, 60.0, ZoneMode::Auto),
            IrrigationZone::new("2", "Zone 2", SoilType::Clay, 50.0, 55.0, ZoneMode::Manual),
        ])
        .unwrap()
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn duplicate_ids_rejected() {
        let z = IrrigationZone::new("1", "A", SoilType::Sandy, 40.0, 60.0, ZoneMode::Auto);
        assert!(ZoneRegistry::new(vec![z.clone(), z]).is_err());
    }

    #[tokio::test]
    async fn get_unknown_zone() {
        let reg = two_zones();
        assert!(matches!(reg.get("nope").await, Err(Error::UnknownZone(id)) if id == "nope"));
    }

    #[tokio::test]
    async fn list_keeps_insertion_order() {
        let reg = ZoneRegistry::new(vec![
            IrrigationZone::new("b", "B", SoilType::Sandy, 40.0, 60.0, ZoneMode::Auto),
            IrrigationZone::new("a", "A", SoilType::Sandy, 40.0, 60.0, ZoneMode::Auto),
        ])
        .unwrap();
        let ids: Vec<String> = reg.list().await.into_iter().map(|z| z.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn list_returns_copies() {
        let reg = two_zones();
        let mut listed = reg.list().await;
        listed[0].irrigating = true;
        assert!(!reg.get("1").await.unwrap().irrigating);
    }

    #[tokio::test]
    async fn upsert_updates_soil_fields_only() {
        let reg = two_zones();
        let mut s = snapshot();
        s.soil_type = SoilType::Siliceous;
        s.soil_moisture = 33.3;

        reg.upsert_from_snapshot("1", 1, &s).await.unwrap();

        let z = reg.get("1").await.unwrap();
        assert_eq!(z.soil_type, SoilType::Siliceous);
        assert_eq!(z.moisture_level, 33.3);
        assert_eq!(z.optimal_moisture, 60.0);
        assert_eq!(z.mode, ZoneMode::Auto);
    }

    #[tokio::test]
    async fn upsert_unknown_zone() {
        let reg = two_zones();
        let err = reg.upsert_from_snapshot("9", 1, &snapshot()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownZone(_)));
    }

    #[tokio::test]
    async fn upsert_older_snapshot_is_stale() {
        let reg = two_zones();
        let mut newer = snapshot();
        newer.soil_moisture = 61.0;
        reg.upsert_from_snapshot("1", 5, &newer).await.unwrap();

        let err = reg.upsert_from_snapshot("1", 4, &snapshot()).await.unwrap_err();
        assert!(matches!(err, Error::StaleResult { seq: 4, latest: 5, .. }));
        assert_eq!(reg.get("1").await.unwrap().moisture_level, 61.0);
    }

    #[tokio::test]
    async fn apply_decision_unknown_zone() {
        let reg = two_zones();
        let next = reg.get("1").await.unwrap().next_state();
        assert!(matches!(
            reg.apply_decision("x", next).await,
            Err(Error::UnknownZone(_))
        ));
    }

    #[tokio::test]
    async fn apply_decision_replaces_mutable_fields() {
        let reg = two_zones();
        let mut next = reg.get("2").await.unwrap().next_state();
        next.irrigating = true;
        next.water_used = 7.0;
        reg.apply_decision("2", next).await.unwrap();

        let z = reg.get("2").await.unwrap();
        assert!(z.irrigating);
        assert_eq!(z.water_used, 7.0);
        assert_eq!(z.name, "Zone 2");
    }

    #[tokio::test]
    async fn transition_reports_reprediction_on_auto() {
        let reg = two_zones();
        let t = reg
            .transition("2", &ZoneEvent::ModeToggled(ZoneMode::Auto), now())
            .await
            .unwrap();
        assert!(t.request_prediction);
        assert_eq!(t.zone.mode, ZoneMode::Auto);
    }

    #[tokio::test]
    async fn transition_stale_prediction_leaves_zone_untouched() {
        let reg = two_zones();
        let ev = |seq, needs| {
            ZoneEvent::PredictionReceived(Prediction {
                seq,
                recommendation: recommendation(needs, 150.0),
            })
        };
        reg.transition("1", &ev(2, false), now()).await.unwrap();
        let before = reg.get("1").await.unwrap();

        let err = reg.transition("1", &ev(1, true), now()).await.unwrap_err();

        assert!(matches!(err, Error::StaleResult { .. }));
        assert_eq!(reg.get("1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn locked_zone_does_not_block_others() {
        let reg = two_zones();
        let _held = reg.zones["1"].lock().await;

        let t = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            reg.transition("2", &ZoneEvent::IrrigationToggled, now()),
        )
        .await
        .expect("zone 2 blocked behind zone 1")
        .unwrap();

        assert!(t.zone.irrigating);
        assert!(tokio::time::timeout(std::time::Duration::from_millis(50), reg.get("1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn concurrent_toggles_serialise_per_zone() {
        let reg = Arc::new(two_zones());
        // Zone 2 is manual and idle. An even number of toggles must leave
        // it idle if no two transitions interleave.
        let mut handles = Vec::new();
        for _ in 0..64 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg.transition("2", &ZoneEvent::IrrigationToggled, OffsetDateTime::now_utc())
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(!reg.get("2").await.unwrap().irrigating);
    }
}
