//! Measurement line parser
//!
//! Turns one line of helper output into an optional [`Measurement`]. Two
//! strategies are tried in order:
//!
//! 1. **Structured decode** - the line is decoded as a JSON object with
//!    optional `bpm` and `timestamp` fields.
//! 2. **Resilient scan** - only when the line is not a JSON object at all,
//!    the text after a `"bpm"` key is scanned for an integer.
//!
//! A line that decodes cleanly but carries no usable `bpm` (`{"bpm": null}`,
//! `{"hr": 70}`) is final: it yields nothing and the scan is not attempted.
//! The helper is expected to emit well-formed JSON; the scan covers partial
//! writes, truncated lines and extra text printed around the payload.

use crate::types::Measurement;
use serde_json::{Map, Value};

/// Key searched for by the resilient scan
const BPM_KEY: &str = "\"bpm\"";

/// Outcome of the structured decode
#[derive(Debug, PartialEq)]
enum Decoded {
    /// Line is a JSON object; the inner value is the usable measurement, if any
    Object(Option<Measurement>),
    /// Line is not a JSON object
    Invalid,
}

/// Stateless parser for helper output lines
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementParser;

impl MeasurementParser {
    /// Parse a single line (without its trailing newline)
    pub fn parse(line: &str) -> Option<Measurement> {
        if line.is_empty() {
            return None;
        }

        match decode_structured(line) {
            Decoded::Object(measurement) => measurement,
            Decoded::Invalid => scan_resilient(line).map(Measurement::new),
        }
    }

    /// Parse a line that may be missing
    pub fn parse_opt(line: Option<&str>) -> Option<Measurement> {
        line.and_then(Self::parse)
    }
}

fn decode_structured(line: &str) -> Decoded {
    let object: Map<String, Value> = match serde_json::from_str(line) {
        Ok(Value::Object(object)) => object,
        Ok(_) => {
            tracing::trace!("Line is JSON but not an object, scanning line");
            return Decoded::Invalid;
        }
        Err(e) => {
            tracing::trace!("Structured decode failed ({}), scanning line", e);
            return Decoded::Invalid;
        }
    };

    let Some(bpm) = object.get("bpm").and_then(bpm_from_value) else {
        return Decoded::Object(None);
    };

    let timestamp = match object.get("timestamp") {
        Some(Value::String(ts)) => Some(ts.clone()),
        _ => None,
    };

    Decoded::Object(Some(Measurement { bpm, timestamp }))
}

/// Numeric JSON value to bpm. Fractions are truncated toward zero; values
/// outside the `i32` range are unusable.
fn bpm_from_value(value: &Value) -> Option<i32> {
    let Value::Number(n) = value else {
        return None;
    };

    if let Some(i) = n.as_i64() {
        return i32::try_from(i).ok();
    }

    let f = n.as_f64()?;
    if f.is_finite() && f >= i32::MIN as f64 && f <= i32::MAX as f64 {
        Some(f.trunc() as i32)
    } else {
        None
    }
}

fn scan_resilient(line: &str) -> Option<i32> {
    let key = line.find(BPM_KEY)?;
    let after_key = &line[key + BPM_KEY.len()..];
    let colon = after_key.find(':')?;
    let rest = after_key[colon + 1..].trim_start_matches(|c: char| !c.is_ascii_digit() && c != '-');

    let (negative, digits) = match rest.strip_prefix('-') {
        Some(tail) => (true, tail),
        None => (false, rest),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let number = if negative {
        &rest[..end + 1]
    } else {
        &digits[..end]
    };
    number.parse().ok()
}
