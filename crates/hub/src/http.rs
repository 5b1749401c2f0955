//! HTTP+JSON clients for the sensor and prediction services.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::model::{EnvironmentSnapshot, IrrigationRecommendation, PredictRequest, SnapshotWire};
use crate::source::{PredictionSource, ReadingSource};

/// Which sensor-service route yields a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingEndpoint {
    /// `POST /simulate-sensors`: ask the service for a fresh reading.
    #[default]
    Simulate,
    /// `GET /sensor-data`: the most recent stored reading.
    Latest,
}

// ---------------------------------------------------------------------------
// Reading source
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpReadingSource {
    client: Client,
    base_url: String,
    endpoint: ReadingEndpoint,
}

impl HttpReadingSource {
    pub fn new(base_url: impl Into<String>, endpoint: ReadingEndpoint) -> Self {
        Self {
            client: Client::new(),
            base_url: trim_base(base_url.into()),
            endpoint,
        }
    }
}

#[async_trait]
impl ReadingSource for HttpReadingSource {
    async fn fetch_snapshot(&self) -> Result<EnvironmentSnapshot> {
        let request = match self.endpoint {
            ReadingEndpoint::Simulate => self
                .client
                .post(format!("{}/simulate-sensors", self.base_url)),
            ReadingEndpoint::Latest => self.client.get(format!("{}/sensor-data", self.base_url)),
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::reading_unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::reading_unavailable(format!(
                "sensor service returned {status}"
            )));
        }

        let wire: SnapshotWire = response
            .json()
            .await
            .map_err(|e| Error::reading_unavailable(format!("undecodable snapshot: {e}")))?;

        wire.into_snapshot(OffsetDateTime::now_utc())
            .map_err(|e| Error::reading_unavailable(format!("undecodable snapshot: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Prediction source
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpPredictionSource {
    client: Client,
    base_url: String,
}

impl HttpPredictionSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: trim_base(base_url.into()),
        }
    }
}

#[async_trait]
impl PredictionSource for HttpPredictionSource {
    async fn predict(&self, snapshot: &EnvironmentSnapshot) -> Result<IrrigationRecommendation> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&PredictRequest::from(snapshot))
            .send()
            .await
            .map_err(|e| Error::prediction_unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InvalidInput(format!(
                "prediction service rejected snapshot: {}",
                body.trim()
            )));
        }
        if !status.is_success() {
            return Err(Error::prediction_unavailable(format!(
                "prediction service returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::prediction_unavailable(format!("undecodable recommendation: {e}")))
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

// ===========================================================================
// Tests
// ===========================================================================
