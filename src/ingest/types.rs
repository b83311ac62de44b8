//! Canonical sample type shared by every stage of the pipeline.
//!
//! Whatever shape a message arrives in, it leaves the normalizer as a
//! [`Record`]. Optional metrics are `None` when the sender did not supply a
//! valid (non-negative) value; `bpm` keeps its raw value so that a
//! "no signal" reading can still be shown on the display.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::{HeartError, Result};

/// One physiological sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Wall-clock time at which the sample was received (second resolution)
    pub timestamp: NaiveDateTime,
    /// Heart rate in beats per minute; negative means no valid reading
    pub bpm: f64,
    /// Sender-supplied secondary rate
    pub ipm: Option<f64>,
    /// Sender-supplied RMSSD
    pub rmssd: Option<f64>,
    /// Sender-supplied heart-rate standard deviation
    pub hrstd: Option<f64>,
    /// Raw waveform samples, only present in the richest wire format
    pub raw_samples: Vec<f64>,
}

/// The body half of a log line. Field names follow the structured wire
/// format so a body can be fed straight back through the normalizer.
#[derive(Serialize)]
struct RecordBody<'a> {
    bpm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rmssd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hrstd: Option<f64>,
    #[serde(skip_serializing_if = "<[f64]>::is_empty")]
    raw_data: &'a [f64],
}

impl Record {
    /// A record carrying only a heart rate.
    pub fn from_bpm(timestamp: NaiveDateTime, bpm: f64) -> Self {
        Self {
            timestamp,
            bpm,
            ipm: None,
            rmssd: None,
            hrstd: None,
            raw_samples: Vec::new(),
        }
    }

    /// Whether the record carries a usable heart rate.
    ///
    /// Records without one are never written to the log.
    pub fn has_signal(&self) -> bool {
        self.bpm.is_finite() && self.bpm >= 0.0
    }

    /// Canonical single-line body used by the append log.
    pub fn body(&self) -> Result<String> {
        let body = RecordBody {
            bpm: self.bpm,
            ipm: self.ipm,
            rmssd: self.rmssd,
            hrstd: self.hrstd,
            raw_data: &self.raw_samples,
        };
        serde_json::to_string(&body).map_err(|e| HeartError::malformed(e.to_string()))
    }
}

/// Keep a sender-supplied optional metric only when it is a real reading.
pub(crate) fn valid_metric(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}
