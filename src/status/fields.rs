//! Ordered fallback key tables for every logical status field.
//!
//! Firmware revisions name the same value differently and sometimes send
//! several spellings in one payload where only the earliest is authoritative,
//! so the order of each table is significant.

use serde_json::{Map, Value};

use crate::utils::parse_clock;

use super::normalize::Anomaly;

/// One logical field and the keys it may arrive under, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTable {
    pub name: &'static str,
    pub keys: &'static [&'static str],
}

pub const IS_PRINTING: FieldTable = FieldTable {
    name: "is_printing",
    keys: &["IsPrinting", "Printing", "isPrinting", "is_printing", "Status"],
};

pub const PROGRESS: FieldTable = FieldTable {
    name: "progress",
    keys: &["Progress", "progress", "PrintProgress", "print_progress", "Percent"],
};

pub const CURRENT_LAYER: FieldTable = FieldTable {
    name: "current_layer",
    keys: &[
        "CurrentLayer",
        "Layer",
        "current_layer",
        "CurrentLine",
        "LineNum",
        "Layers",
    ],
};

pub const TOTAL_LAYER: FieldTable = FieldTable {
    name: "total_layer",
    keys: &[
        "TotalLayer",
        "TotalLayers",
        "MaxLayer",
        "Lines",
        "total_layers",
        "Slices",
    ],
};

pub const REMAIN_TIME: FieldTable = FieldTable {
    name: "remain_seconds",
    keys: &[
        "RemainTime",
        "TimeLeft",
        "remain_time",
        "RemainingTime",
        "TimeRemaining",
        "PrintTimeLeft",
        "LeftTime",
        "remainTime",
        "leftTime",
    ],
};

pub const TOTAL_TIME: FieldTable = FieldTable {
    name: "total_seconds",
    keys: &[
        "TotalTime",
        "total_time",
        "TotalPrintTime",
        "PrintTime",
        "PrintDuration",
        "EstimatedTime",
        "totalTime",
        "printTime",
    ],
};

pub const TASK_ID: FieldTable = FieldTable {
    name: "task_id",
    keys: &["TaskID", "task_id", "JobID", "PrintID"],
};

pub const TASK_NAME: FieldTable = FieldTable {
    name: "task_name",
    keys: &["TaskName", "task_name", "FileName", "JobName", "PrintName"],
};

pub const UV_TEMPERATURE: FieldTable = FieldTable {
    name: "uv_temperature",
    keys: &[
        "UVTemp",
        "UV",
        "uv_temp",
        "UVTemperature",
        "LightTemp",
        "UVPanelTemp",
        "UVPanel",
    ],
};

/// Child keys probed under [`UV_PARENTS`] when no direct temperature key matched
pub const UV_NESTED_TEMPERATURE: FieldTable = FieldTable {
    name: "uv_temperature",
    keys: &["Temp", "Temperature", "Value", "Current"],
};

pub const UV_PARENTS: &[&str] = &["UV", "UVPanel", "Light"];

/// Millisecond counters some firmware sends instead of time fields
pub const TOTAL_TICKS: &str = "TotalTicks";
pub const CURRENT_TICKS: &str = "CurrentTicks";

/// Top-level containers that wrap the print/temperature objects
pub const STATUS_CONTAINERS: &[&str] = &["StatusData", "Status", "PrintStatus", "state"];
pub const PRINT_INFO_KEYS: &[&str] = &["PrintInfo", "PrintStatus", "print", "Print"];
pub const TEMPERATURE_KEYS: &[&str] = &["Temperature", "Temps", "temp", "temperature"];

/// Any of these at the top level means the body itself is the print info
pub const DIRECT_PRINT_FIELDS: &[&str] = &["IsPrinting", "Progress", "CurrentLayer", "TotalLayer"];

/// Lowercased `Status` strings that mean a print is running
pub const PRINTING_WORDS: &[&str] = &["running", "printing", "busy"];

/// Numeric `Status` codes: 1 preparing, 2-4 printing, 7 finishing
pub const PRINTING_CODES: &[i64] = &[1, 2, 3, 4, 7];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoerceError {
    #[error("expected a number, got {0}")]
    NotNumeric(String),
    #[error("value {0} is out of range")]
    OutOfRange(String),
    #[error("malformed clock string {0:?}")]
    BadClock(String),
}

impl FieldTable {
    /// Walks the keys in order and returns the first accepted value with the
    /// key it came from.
    ///
    /// `decode` returns `Ok(Some(_))` to accept, `Ok(None)` to pass over a
    /// present but non-authoritative value, and `Err` to record an anomaly and
    /// continue. Null values count as absent.
    pub fn first_match<T>(
        &self,
        obj: &Map<String, Value>,
        anomalies: &mut Vec<Anomaly>,
        mut decode: impl FnMut(&str, &Value) -> Result<Option<T>, CoerceError>,
    ) -> Option<(&'static str, T)> {
        for &key in self.keys {
            let Some(value) = obj.get(key).filter(|v| !v.is_null()) else {
                continue;
            };
            match decode(key, value) {
                Ok(Some(out)) => return Some((key, out)),
                Ok(None) => {}
                Err(reason) => anomalies.push(Anomaly::Field {
                    field: self.name,
                    key: key.to_string(),
                    reason,
                }),
            }
        }
        None
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
        other => other.to_string(),
    }
}

pub fn to_f64(value: &Value) -> Result<f64, CoerceError> {
    let out = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
    .ok_or_else(|| CoerceError::NotNumeric(describe(value)))?;

    if out.is_finite() {
        Ok(out)
    } else {
        Err(CoerceError::OutOfRange(describe(value)))
    }
}

/// Integer coercion, floats are truncated
pub fn to_i64(value: &Value) -> Result<i64, CoerceError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .ok_or_else(|| CoerceError::OutOfRange(describe(value))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| CoerceError::NotNumeric(describe(value))),
        Value::Bool(b) => Ok(i64::from(*b)),
        _ => Err(CoerceError::NotNumeric(describe(value))),
    }
}

pub fn to_u32(value: &Value) -> Result<u32, CoerceError> {
    let n = to_i64(value)?;
    u32::try_from(n).map_err(|_| CoerceError::OutOfRange(describe(value)))
}

pub fn to_u64(value: &Value) -> Result<u64, CoerceError> {
    let n = to_i64(value)?;
    u64::try_from(n).map_err(|_| CoerceError::OutOfRange(describe(value)))
}

/// Seconds from an integer, a numeric string, or a `hh:mm:ss` / `mm:ss` clock
pub fn to_seconds(value: &Value) -> Result<u64, CoerceError> {
    match value {
        Value::String(s) if s.contains(':') => {
            parse_clock(s).ok_or_else(|| CoerceError::BadClock(s.clone()))
        }
        other => to_u64(other),
    }
}

pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
