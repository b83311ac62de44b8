//! Decoding of transport messages into canonical records.
//!
//! Three wire shapes are accepted:
//!
//! - **structured**: a JSON object such as `{"bpm": 72, "ipm": 108, "raw_data": [..]}`.
//!   The single-quoted literal dialect written by older tooling
//!   (`{'bpm': 72, 'rmssd': None}`) is accepted as a fallback.
//! - **scalar**: a bare number, taken as `bpm`.
//! - **delimited**: `key=value` pairs such as `IR=51234, BPM=72.4, Avg BPM=70`.
//!   The rolling average wins over the instantaneous rate.
//!
//! The shape is picked from the message content unless the normalizer has
//! been pinned to one format.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{HeartError, Result};
use crate::ingest::types::{valid_metric, Record};

/// Value stored in `bpm` when a structured message carries an explicit null.
const NO_SIGNAL: f64 = -1.0;

/// Longest message excerpt quoted in an error.
const PREVIEW_CHARS: usize = 40;

/// Supported wire representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    Structured,
    Scalar,
    Delimited,
}

impl WireFormat {
    /// Pick the format from the shape of the message.
    pub fn detect(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.starts_with('{') {
            Some(WireFormat::Structured)
        } else if parse_rate(text).is_some() {
            Some(WireFormat::Scalar)
        } else if text.contains('=') {
            Some(WireFormat::Delimited)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireFormat::Structured => "structured",
            WireFormat::Scalar => "scalar",
            WireFormat::Delimited => "delimited",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "structured" | "json" => Ok(WireFormat::Structured),
            "scalar" => Ok(WireFormat::Scalar),
            "delimited" | "kv" => Ok(WireFormat::Delimited),
            other => Err(format!("unknown wire format '{other}'")),
        }
    }
}

/// Turns raw transport messages into [`Record`]s.
///
/// Decoding is pure: the only input besides the message is the receipt
/// time, which the caller assigns.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    pinned: Option<WireFormat>,
}

impl Normalizer {
    /// A normalizer that detects the format of every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// A normalizer restricted to a single format, or auto-detecting on `None`.
    pub fn with_format(format: Option<WireFormat>) -> Self {
        Self { pinned: format }
    }

    /// The pinned format, if any.
    pub fn format(&self) -> Option<WireFormat> {
        self.pinned
    }

    /// Decode one message.
    pub fn normalize(&self, message: &[u8], received_at: NaiveDateTime) -> Result<Record> {
        let text = std::str::from_utf8(message)
            .map_err(|e| HeartError::malformed(format!("message is not UTF-8: {e}")))?
            .trim();
        if text.is_empty() {
            return Err(HeartError::malformed("empty message"));
        }

        let format = match self.pinned {
            Some(format) => format,
            None => WireFormat::detect(text).ok_or_else(|| {
                HeartError::malformed(format!("unrecognized message shape: {}", preview(text)))
            })?,
        };

        match format {
            WireFormat::Structured => decode_structured(text, received_at),
            WireFormat::Scalar => decode_scalar(text, received_at),
            WireFormat::Delimited => decode_delimited(text, received_at),
        }
    }
}

fn decode_structured(text: &str, received_at: NaiveDateTime) -> Result<Record> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(json_err) => serde_json::from_str(&literal_to_json(text)).map_err(|_| {
            HeartError::malformed(format!("invalid structured payload: {json_err}"))
        })?,
    };

    let object = value
        .as_object()
        .ok_or_else(|| HeartError::malformed("structured payload is not an object"))?;

    let bpm = match object.get("bpm") {
        Some(Value::Null) => NO_SIGNAL,
        Some(v) => number(v).ok_or_else(|| HeartError::malformed("field `bpm` is not a number"))?,
        None => return Err(HeartError::malformed("missing field `bpm`")),
    };

    let raw_samples = object
        .get("raw_data")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(number).collect())
        .unwrap_or_default();

    Ok(Record {
        timestamp: received_at,
        bpm,
        ipm: valid_metric(object.get("ipm").and_then(number)),
        rmssd: valid_metric(object.get("rmssd").and_then(number)),
        hrstd: valid_metric(object.get("hrstd").and_then(number)),
        raw_samples,
    })
}

fn decode_scalar(text: &str, received_at: NaiveDateTime) -> Result<Record> {
    let bpm = parse_rate(text)
        .ok_or_else(|| HeartError::malformed(format!("not a rate: {}", preview(text))))?;
    Ok(Record::from_bpm(received_at, bpm))
}

fn decode_delimited(text: &str, received_at: NaiveDateTime) -> Result<Record> {
    let mut record = Record::from_bpm(received_at, NO_SIGNAL);
    let mut average = None;
    let mut instant = None;

    for pair in text.split([',', ';']) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let Some(value) = parse_rate(value) else {
            continue;
        };

        match normalize_key(key).as_str() {
            "avgbpm" | "averagebpm" => average = Some(value),
            "bpm" | "hr" => instant = Some(value),
            "ir" => record.raw_samples.push(value),
            "ipm" => record.ipm = valid_metric(Some(value)),
            "rmssd" => record.rmssd = valid_metric(Some(value)),
            "hrstd" => record.hrstd = valid_metric(Some(value)),
            _ => {}
        }
    }

    record.bpm = average.or(instant).ok_or_else(|| {
        HeartError::malformed(format!("no rate in delimited message: {}", preview(text)))
    })?;
    Ok(record)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_rate(s),
        _ => None,
    }
}

fn parse_rate(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `"Avg BPM"` -> `"avgbpm"`
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Rewrite the single-quoted literal dialect into JSON.
fn literal_to_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    out.push(c);
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    out.push('"');
                    quote = None;
                } else if c == '"' {
                    out.push_str("\\\"");
                } else {
                    out.push(c);
                }
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push('"');
            }
            None if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            None => out.push(c),
        }
    }

    out
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
