use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::model::{EnvironmentSnapshot, IrrigationRecommendation};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

pub fn shared() -> SharedState {
    Arc::new(RwLock::new(SystemState::new()))
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// What the hub has been doing, for operators. Zone state lives in the
/// registry, not here.
pub struct SystemState {
    pub started_at: Instant,
    pub last_refresh: Option<OffsetDateTime>,
    pub last_snapshot: Option<EnvironmentSnapshot>,
    pub consecutive_failures: u32,
    pub events: VecDeque<SystemEvent>,
    /// Newest cycle recorded by `record_cycle`.
    latest_seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Snapshot,
    Prediction,
    Decision,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    pub last_snapshot: Option<EnvironmentSnapshot>,
    pub consecutive_failures: u32,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            last_refresh: None,
            last_snapshot: None,
            consecutive_failures: 0,
            events: VecDeque::with_capacity(MAX_EVENTS),
            latest_seq: 0,
        }
    }

    /// Record the snapshot and recommendation of cycle `seq`. A cycle older
    /// than one already recorded is ignored and `false` returned.
    pub fn record_cycle(
        &mut self,
        seq: u64,
        snapshot: &EnvironmentSnapshot,
        rec: &IrrigationRecommendation,
    ) -> bool {
        if seq <= self.latest_seq {
            return false;
        }
        self.latest_seq = seq;
        self.record_snapshot(seq, snapshot);
        self.record_prediction(seq, rec);
        true
    }

    fn record_snapshot(&mut self, seq: u64, snapshot: &EnvironmentSnapshot) {
        let detail = format!(
            "#{seq}: {} soil, moisture {:.1}%, {:.1}°C, humidity {:.1}%, rain {:.1}mm",
            snapshot.soil_type,
            snapshot.soil_moisture,
            snapshot.temperature,
            snapshot.humidity,
            snapshot.precipitation
        );
        self.last_snapshot = Some(snapshot.clone());
        self.push_event(EventKind::Snapshot, detail);
    }

    fn record_prediction(&mut self, seq: u64, rec: &IrrigationRecommendation) {
        let detail = if rec.needs_irrigation {
            format!(
                "#{seq}: irrigate {:.2}L/ha ({:.0}% confidence) — {}",
                rec.water_amount, rec.confidence, rec.reason
            )
        } else {
            format!("#{seq}: no irrigation ({:.0}% confidence) — {}", rec.confidence, rec.reason)
        };
        self.push_event(EventKind::Prediction, detail);
    }

    /// Record a zone state change.
    pub fn record_decision(&mut self, zone_id: &str, detail: impl std::fmt::Display) {
        self.push_event(EventKind::Decision, format!("{zone_id}: {detail}"));
    }

    /// Mark a refresh cycle as completed.
    pub fn record_refresh_ok(&mut self) {
        self.last_refresh = Some(OffsetDateTime::now_utc());
        self.consecutive_failures = 0;
    }

    /// Mark a refresh cycle as failed.
    pub fn record_refresh_failed(&mut self, detail: String) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.push_event(EventKind::Error, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            last_refresh: self.last_refresh,
            last_snapshot: self.last_snapshot.clone(),
            consecutive_failures: self.consecutive_failures,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    #[cfg(test)]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{recommendation, snapshot};

    #[test]
    fn ring_buffer_is_bounded() {
        let mut st = SystemState::new();
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn status_lists_newest_first() {
        let mut st = SystemState::new();
        st.record_system("first".into());
        st.record_error("second".into());
        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[1].detail, "first");
    }

    #[test]
    fn failures_count_until_success() {
        let mut st = SystemState::new();
        st.record_refresh_failed("a".into());
        st.record_refresh_failed("b".into());
        assert_eq!(st.consecutive_failures, 2);
        assert_eq!(st.count(EventKind::Error), 2);

        st.record_refresh_ok();
        assert_eq!(st.consecutive_failures, 0);
        assert!(st.last_refresh.is_some());
    }

    #[test]
    fn snapshot_and_prediction_details() {
        let mut st = SystemState::new();
        st.record_snapshot(4, &snapshot());
        st.record_prediction(4, &recommendation(true, 12.5));

        assert_eq!(st.last_snapshot, Some(snapshot()));
        let details: Vec<&str> = st.events.iter().map(|e| e.detail.as_str()).collect();
        assert!(details[0].starts_with("#4: loamy soil, moisture 45.0%"));
        assert!(details[1].contains("irrigate 12.50L/ha"));
    }

    #[test]
    fn older_cycle_does_not_replace_newer() {
        let mut st = SystemState::new();
        let newer = EnvironmentSnapshot {
            soil_moisture: 65.0,
            ..snapshot()
        };
        assert!(st.record_cycle(2, &newer, &recommendation(false, 0.0)));

        assert!(!st.record_cycle(1, &snapshot(), &recommendation(true, 300.0)));
        assert!(!st.record_cycle(2, &snapshot(), &recommendation(true, 300.0)));

        assert_eq!(st.last_snapshot.as_ref().unwrap().soil_moisture, 65.0);
        assert_eq!(st.count(EventKind::Snapshot), 1);
        assert_eq!(st.count(EventKind::Prediction), 1);
    }

    #[test]
    fn status_serialises_kinds_lowercase() {
        let mut st = SystemState::new();
        st.record_decision("1", "irrigation started");
        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["events"][0]["kind"], "decision");
        assert_eq!(json["events"][0]["detail"], "1: irrigation started");
        assert!(json["last_refresh"].is_null());
    }
}
