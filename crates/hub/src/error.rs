//! Error taxonomy shared by the registry, decision engine, sources and
//! scheduler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which external collaborator a `SourceUnavailable` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Reading,
    Prediction,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reading => write!(f, "reading"),
            Self::Prediction => write!(f, "prediction"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// An operation named a zone id the registry does not hold.
    #[error("unknown zone '{0}'")]
    UnknownZone(String),

    /// A reading or prediction source failed; retried next period.
    #[error("{origin} source unavailable: {detail}")]
    SourceUnavailable { origin: Origin, detail: String },

    /// A snapshot or recommendation failed validation and was dropped whole.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A result arrived after a newer one was already applied to the zone.
    #[error("stale result for zone '{zone_id}': seq {seq} <= applied {latest}")]
    StaleResult { zone_id: String, seq: u64, latest: u64 },
}

impl Error {
    pub fn reading_unavailable(detail: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            origin: Origin::Reading,
            detail: detail.into(),
        }
    }

    pub fn prediction_unavailable(detail: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            origin: Origin::Prediction,
            detail: detail.into(),
        }
    }

    /// Short machine-readable kind, used in API bodies and event details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownZone(_) => "unknown_zone",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::InvalidInput(_) => "invalid_input",
            Self::StaleResult { .. } => "stale_result",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::UnknownZone(_) => StatusCode::NOT_FOUND,
            Self::SourceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::StaleResult { .. } => StatusCode::CONFLICT,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
