//! Heart-rate statistics over a window of samples.
//!
//! Everything here is a pure function of its inputs, so it can be called
//! from any thread without coordination.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::core::window::WindowEntry;
use crate::error::{HeartError, Result};
use crate::ingest::Record;

/// Default multiplier for the IPM fallback (`ipm ≈ bpm × 1.5`).
///
/// This is an approximation carried over from the sensor firmware's
/// companion tooling, not a validated physiological model.
pub const DEFAULT_IPM_FACTOR: f64 = 1.5;

/// Where a reported value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Supplied by the sender
    Measured,
    /// Derived from the window
    Computed,
    /// Estimated from bpm with the configured factor
    Approximated,
}

/// A value together with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub origin: Origin,
}

impl Reading {
    pub fn measured(value: f64) -> Self {
        Self {
            value,
            origin: Origin::Measured,
        }
    }

    pub fn computed(value: f64) -> Self {
        Self {
            value,
            origin: Origin::Computed,
        }
    }

    pub fn approximated(value: f64) -> Self {
        Self {
            value,
            origin: Origin::Approximated,
        }
    }
}

/// One point of the plotted series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Scan-order index within the window
    pub index: usize,
    pub bpm: f64,
    /// Sender IPM, or the approximation when absent
    pub ipm: Option<f64>,
}

fn require(rates: &[f64], required: usize) -> Result<()> {
    if rates.len() < required {
        return Err(HeartError::InsufficientSamples {
            required,
            actual: rates.len(),
        });
    }
    Ok(())
}

/// Root mean square of successive differences.
///
/// # Errors
///
/// `InsufficientSamples` for fewer than two rates.
pub fn rmssd(rates: &[f64]) -> Result<f64> {
    require(rates, 2)?;
    let sum_sq: f64 = rates
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).powi(2))
        .sum();
    Ok((sum_sq / (rates.len() - 1) as f64).sqrt())
}

/// Population standard deviation of the rates.
///
/// # Errors
///
/// `InsufficientSamples` for fewer than two rates; a single sample has no
/// spread to report.
pub fn hrstd(rates: &[f64]) -> Result<f64> {
    require(rates, 2)?;
    Ok(rates.iter().population_std_dev())
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(rates: &[f64]) -> Option<f64> {
    if rates.is_empty() {
        None
    } else {
        Some(rates.iter().mean())
    }
}

/// `round(bpm × factor)`
pub fn approximate_ipm(bpm: f64, factor: f64) -> f64 {
    (bpm * factor).round()
}

/// The record's IPM, falling back to the approximation.
///
/// Returns `None` when the record has no valid heart rate.
pub fn resolve_ipm(record: &Record, factor: f64) -> Option<Reading> {
    if !record.has_signal() {
        return None;
    }
    Some(match record.ipm {
        Some(ipm) => Reading::measured(ipm),
        None => Reading::approximated(approximate_ipm(record.bpm, factor)),
    })
}

/// Everything the display needs for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMetrics {
    pub bpm: Option<Reading>,
    pub ipm: Option<Reading>,
    pub rmssd: Option<Reading>,
    pub hrstd: Option<Reading>,
    pub mean_bpm: Option<f64>,
    pub series: Vec<SeriesPoint>,
}

impl WindowMetrics {
    /// Compute metrics over `entries`, reporting `latest` as the current reading.
    ///
    /// Variability is computed from the window when it has enough samples;
    /// otherwise the latest record's own value is passed through.
    pub fn compute(entries: &[WindowEntry], latest: Option<&Record>, ipm_factor: f64) -> Self {
        let rates: Vec<f64> = entries.iter().map(|e| e.record.bpm).collect();

        let series = entries
            .iter()
            .map(|e| SeriesPoint {
                index: e.index,
                bpm: e.record.bpm,
                ipm: resolve_ipm(&e.record, ipm_factor).map(|r| r.value),
            })
            .collect();

        Self {
            bpm: latest
                .filter(|r| r.has_signal())
                .map(|r| Reading::measured(r.bpm)),
            ipm: latest.and_then(|r| resolve_ipm(r, ipm_factor)),
            rmssd: variability("rmssd", rmssd(&rates), latest.and_then(|r| r.rmssd)),
            hrstd: variability("hrstd", hrstd(&rates), latest.and_then(|r| r.hrstd)),
            mean_bpm: mean(&rates),
            series,
        }
    }
}

fn variability(name: &str, computed: Result<f64>, reported: Option<f64>) -> Option<Reading> {
    match computed {
        Ok(value) => Some(Reading::computed(value)),
        Err(e) => {
            tracing::debug!(metric = name, error = %e, "metric undefined over window");
            reported.map(Reading::measured)
        }
    }
}
