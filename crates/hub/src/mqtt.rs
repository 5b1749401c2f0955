//! Reading source fed by field nodes publishing snapshots over MQTT.
//!
//! Nodes publish one JSON snapshot per message to `tele/<node_id>/snapshot`.
//! The event loop caches the newest well-formed one; `fetch_snapshot` hands
//! out that cache as long as it is fresh.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{EnvironmentSnapshot, SnapshotWire};
use crate::source::ReadingSource;
use crate::state::SharedState;

pub(crate) const SNAPSHOT_TOPIC: &str = "tele/+/snapshot";

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub stale_after: Duration,
}

struct Latest {
    node_id: String,
    snapshot: EnvironmentSnapshot,
    received: Instant,
}

#[derive(Clone)]
pub struct MqttReadingSource {
    latest: Arc<RwLock<Option<Latest>>>,
    stale_after: Duration,
}

impl MqttReadingSource {
    fn new(stale_after: Duration) -> Self {
        Self {
            latest: Arc::new(RwLock::new(None)),
            stale_after,
        }
    }

    /// Connect to the broker and spawn the event loop that keeps the cache
    /// current. Must be called from within a tokio runtime.
    pub fn spawn(settings: MqttSettings, shared: SharedState) -> Self {
        let source = Self::new(settings.stale_after);

        let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(opts, 20);

        let cache = source.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        cache.handle_publish(&p.topic, &p.payload, &shared).await;
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(topic = SNAPSHOT_TOPIC, "mqtt connected, subscribing");
                        // Subscriptions do not survive a clean-session reconnect.
                        if let Err(e) = client.try_subscribe(SNAPSHOT_TOPIC, QoS::AtLeastOnce) {
                            warn!("mqtt subscribe failed: {e}");
                        }
                        shared.write().await.record_system("mqtt connected".to_string());
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("mqtt disconnected");
                        shared.write().await.record_system("mqtt disconnected".to_string());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt error: {e}. reconnecting...");
                        shared.write().await.record_error(format!("mqtt error: {e}"));
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        source
    }

    /// Cache a snapshot message. Anything malformed is logged and dropped.
    async fn handle_publish(&self, topic: &str, payload: &[u8], shared: &SharedState) {
        let Some(node_id) = extract_node_id(topic) else {
            debug!(%topic, "unhandled topic");
            return;
        };

        let snapshot = serde_json::from_slice::<SnapshotWire>(payload)
            .map_err(|e| Error::reading_unavailable(format!("bad snapshot json: {e}")))
            .and_then(|wire| wire.into_snapshot(OffsetDateTime::now_utc()));

        match snapshot {
            Ok(snapshot) => {
                debug!(node = %node_id, moisture = snapshot.soil_moisture, "snapshot received");
                *self.latest.write().await = Some(Latest {
                    node_id: node_id.to_string(),
                    snapshot,
                    received: Instant::now(),
                });
            }
            Err(e) => {
                warn!(node = %node_id, %topic, "{e}");
                shared
                    .write()
                    .await
                    .record_error(format!("{node_id}: {e}"));
            }
        }
    }
}

#[async_trait]
impl ReadingSource for MqttReadingSource {
    async fn fetch_snapshot(&self) -> Result<EnvironmentSnapshot> {
        let guard = self.latest.read().await;
        let Some(latest) = guard.as_ref() else {
            return Err(Error::reading_unavailable("no snapshot received yet"));
        };

        let age = latest.received.elapsed();
        if age > self.stale_after {
            return Err(Error::reading_unavailable(format!(
                "latest snapshot from '{}' is {}s old (limit {}s)",
                latest.node_id,
                age.as_secs(),
                self.stale_after.as_secs()
            )));
        }
        Ok(latest.snapshot.clone())
    }
}

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

/// Extract node_id from "tele/<node_id>/snapshot".
pub(crate) fn extract_node_id(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "snapshot" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

// ===========================================================================
// Tests
// ===========================================================================
