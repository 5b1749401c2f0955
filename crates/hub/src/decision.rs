//! Decision engine: reconciles predictions and operator commands with a
//! zone's mode and irrigation status.
//!
//! `decide` is pure and synchronous. It never touches the registry; the
//! caller applies the returned [`NextState`] while holding the zone lock.
//!
//! ```text
//!            ModeToggled(Manual)                IrrigationToggled
//!   ┌──────┐ ───────────────────▶ ┌────────┐ ◀──────────────┐
//!   │ AUTO │                      │ MANUAL │ ───────────────┘
//!   └──────┘ ◀─────────────────── └────────┘   (flip irrigating)
//!     │  ▲    ModeToggled(Auto)
//!     │  │    irrigating := false, re-predict
//!     └──┘
//!  PredictionReceived: irrigating := needs_irrigation
//! ```

use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::model::IrrigationRecommendation;
use crate::zone::{IrrigationZone, NextState, ZoneMode};

/// A recommendation tagged with the sequence number of the snapshot it was
/// computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub seq: u64,
    pub recommendation: IrrigationRecommendation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEvent {
    PredictionReceived(Prediction),
    ModeToggled(ZoneMode),
    IrrigationToggled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The event is not legal in the zone's current mode; state unchanged.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub next: NextState,
    pub outcome: Outcome,
    /// The caller must request a fresh prediction for this zone.
    pub request_prediction: bool,
}

impl Decision {
    fn applied(next: NextState) -> Self {
        Self {
            next,
            outcome: Outcome::Applied,
            request_prediction: false,
        }
    }

    fn ignored(zone: &IrrigationZone) -> Self {
        Self {
            next: zone.next_state(),
            outcome: Outcome::Ignored,
            request_prediction: false,
        }
    }
}

/// Compute the next state of `zone` after `event`. `now` stamps
/// `last_watered` when irrigation starts.
///
/// Fails only with [`Error::StaleResult`], for a prediction whose snapshot
/// is not newer than the last one accepted by this zone.
pub fn decide(zone: &IrrigationZone, event: &ZoneEvent, now: OffsetDateTime) -> Result<Decision> {
    let mut next = zone.next_state();

    match event {
        ZoneEvent::ModeToggled(ZoneMode::Auto) => {
            // Any manual irrigation in progress is cancelled; water resumes
            // only once a fresh prediction arrives.
            next.mode = ZoneMode::Auto;
            next.irrigating = false;
            Ok(Decision {
                next,
                outcome: Outcome::Applied,
                request_prediction: true,
            })
        }

        ZoneEvent::ModeToggled(ZoneMode::Manual) => {
            if zone.mode == ZoneMode::Manual {
                return Ok(Decision::ignored(zone));
            }
            next.mode = ZoneMode::Manual;
            Ok(Decision::applied(next))
        }

        ZoneEvent::PredictionReceived(p) => {
            if p.seq <= zone.prediction_seq {
                return Err(Error::StaleResult {
                    zone_id: zone.id.clone(),
                    seq: p.seq,
                    latest: zone.prediction_seq,
                });
            }
            next.prediction_seq = p.seq;
            next.last_recommendation = Some(p.recommendation.clone());

            if zone.mode == ZoneMode::Auto {
                let rec = &p.recommendation;
                if rec.needs_irrigation {
                    if !zone.irrigating {
                        start_cycle(&mut next, now);
                    }
                    // Each recommendation is the dose for the cycle, not an
                    // increment.
                    next.water_used = rec.water_amount;
                }
                next.irrigating = rec.needs_irrigation;
            }
            Ok(Decision::applied(next))
        }

        ZoneEvent::IrrigationToggled => {
            if zone.mode == ZoneMode::Auto {
                return Ok(Decision::ignored(zone));
            }
            next.irrigating = !zone.irrigating;
            if next.irrigating {
                start_cycle(&mut next, now);
            }
            Ok(Decision::applied(next))
        }
    }
}

fn start_cycle(next: &mut NextState, now: OffsetDateTime) {
    next.irrigating = true;
    next.water_used = 0.0;
    next.last_watered = Some(now);
}

// ===========================================================================
// Tests
// ===========================================================================
