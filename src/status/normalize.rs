use serde_json::{Map, Value};

use super::{
    fields::{self, CoerceError},
    CoarseStatus, PrintInfo, PrinterStatus, Temperature,
};

type Object = Map<String, Value>;

/// Something in a status body that could not be used. Logged by the caller,
/// never fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Anomaly {
    #[error("status body is not a JSON object")]
    NotAnObject,
    #[error("no print info payload found")]
    NoPrintInfo,
    #[error("no temperature payload found")]
    NoTemperature,
    #[error("{field}: ignored {key:?}: {reason}")]
    Field {
        field: &'static str,
        key: String,
        reason: CoerceError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub status: PrinterStatus,
    pub anomalies: Vec<Anomaly>,
}

impl Normalized {
    /// Neither a print info nor a temperature payload was found
    pub fn is_empty(&self) -> bool {
        self.anomalies.iter().any(|a| matches!(a, Anomaly::NotAnObject))
            || (self.anomalies.contains(&Anomaly::NoPrintInfo)
                && self.anomalies.contains(&Anomaly::NoTemperature))
    }
}

/// Where a payload was found in the message body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// `Data.Data.<key>`
    DoublyNested,
    /// `Data.<key>`
    Nested,
    /// `<container>.<key>`
    Container(&'static str),
    /// `<key>` at the top level
    TopLevel,
    /// the body itself carries print info fields
    Body,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Located<'a> {
    pub print_info: Option<(Source, &'a Object)>,
    pub temperature: Option<(Source, &'a Object)>,
}

fn non_empty_object(value: Option<&Value>) -> Option<&Object> {
    value.and_then(Value::as_object).filter(|m| !m.is_empty())
}

fn pick<'a>(parent: &'a Object, keys: &[&str]) -> Option<&'a Object> {
    keys.iter().find_map(|k| non_empty_object(parent.get(*k)))
}

/// Finds the print info and temperature objects, independently. The first
/// container holding a non-empty object wins.
pub fn locate(body: &Object) -> Located<'_> {
    let data = non_empty_object(body.get("Data"));
    let inner = data.and_then(|d| non_empty_object(d.get("Data")));

    let find = |nested_key: &'static str, keys: &'static [&'static str]| {
        inner
            .and_then(|d| pick(d, &[nested_key]))
            .map(|m| (Source::DoublyNested, m))
            .or_else(|| data.and_then(|d| pick(d, &[nested_key])).map(|m| (Source::Nested, m)))
            .or_else(|| {
                fields::STATUS_CONTAINERS.iter().find_map(|&container| {
                    non_empty_object(body.get(container))
                        .and_then(|c| pick(c, keys))
                        .map(|m| (Source::Container(container), m))
                })
            })
            .or_else(|| pick(body, keys).map(|m| (Source::TopLevel, m)))
    };

    let print_info = find("PrintInfo", fields::PRINT_INFO_KEYS).or_else(|| {
        fields::DIRECT_PRINT_FIELDS
            .iter()
            .any(|k| body.contains_key(*k))
            .then_some((Source::Body, body))
    });
    let temperature = find("Temperature", fields::TEMPERATURE_KEYS);

    Located {
        print_info,
        temperature,
    }
}

/// Maps an arbitrary decoded status message to a [`PrinterStatus`].
pub fn normalize(body: &Value) -> Normalized {
    let mut anomalies = vec![];

    let Some(obj) = body.as_object() else {
        anomalies.push(Anomaly::NotAnObject);
        return Normalized {
            status: PrinterStatus {
                raw: body.clone(),
                ..Default::default()
            },
            anomalies,
        };
    };

    let located = locate(obj);

    let mut print_info = match located.print_info {
        Some((_, payload)) => decode_print_info(payload, &mut anomalies),
        None => {
            anomalies.push(Anomaly::NoPrintInfo);
            PrintInfo::default()
        }
    };
    print_info.derive_times();

    let temperature = match located.temperature {
        Some((_, payload)) => decode_temperature(payload, &mut anomalies),
        None => {
            anomalies.push(Anomaly::NoTemperature);
            Temperature::default()
        }
    };

    let status = CoarseStatus::classify(&print_info, located.print_info.is_some());

    Normalized {
        status: PrinterStatus {
            temperature,
            print_info,
            status,
            raw: body.clone(),
        },
        anomalies,
    }
}

/// `(is_printing, raw status code)`. The first present key decides, even when
/// its value says nothing useful.
fn decode_printing(key: &str, value: &Value) -> Result<Option<(bool, Option<i64>)>, CoerceError> {
    if key != "Status" {
        return Ok(Some((fields::truthy(value), None)));
    }
    let out = match value {
        Value::String(s) => {
            let s = s.to_lowercase();
            (fields::PRINTING_WORDS.contains(&s.as_str()), None)
        }
        Value::Number(n) => match status_code(n) {
            Some(code) => (fields::PRINTING_CODES.contains(&code), Some(code)),
            None => (false, None),
        },
        _ => (false, None),
    };
    Ok(Some(out))
}

/// Integer codes, or floats with no fractional part such as `2.0`
fn status_code(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// A zero duration is not authoritative, keep looking
fn nonzero_seconds(_: &str, value: &Value) -> Result<Option<u64>, CoerceError> {
    fields::to_seconds(value).map(|s| (s > 0).then_some(s))
}

fn decode_print_info(data: &Object, anomalies: &mut Vec<Anomaly>) -> PrintInfo {
    let mut info = PrintInfo::default();

    if let Some((_, (printing, code))) = fields::IS_PRINTING.first_match(data, anomalies, decode_printing) {
        info.is_printing = printing;
        info.raw_status_code = code;
    }

    if let Some((_, p)) = fields::PROGRESS.first_match(data, anomalies, |_, v| fields::to_f64(v).map(Some)) {
        info.progress_percent = p.clamp(0.0, 100.0);
    }

    if let Some((_, l)) = fields::CURRENT_LAYER.first_match(data, anomalies, |_, v| fields::to_u32(v).map(Some)) {
        info.current_layer = l;
    }

    if let Some((_, l)) = fields::TOTAL_LAYER.first_match(data, anomalies, |_, v| fields::to_u32(v).map(Some)) {
        info.total_layer = l;
    }

    if let Some((_, s)) = fields::REMAIN_TIME.first_match(data, anomalies, nonzero_seconds) {
        info.remain_seconds = s;
    }

    if let Some((_, s)) = fields::TOTAL_TIME.first_match(data, anomalies, nonzero_seconds) {
        info.total_seconds = s;
    }

    decode_ticks(data, &mut info, anomalies);

    if let Some((_, id)) = fields::TASK_ID.first_match(data, anomalies, |_, v| Ok(Some(fields::to_text(v)))) {
        info.task_id = id;
    }

    if let Some((_, name)) = fields::TASK_NAME.first_match(data, anomalies, |_, v| Ok(Some(fields::to_text(v)))) {
        info.task_name = name;
    }

    info
}

fn tick_field(data: &Object, key: &str, anomalies: &mut Vec<Anomaly>) -> Option<u64> {
    let value = data.get(key).filter(|v| !v.is_null())?;
    match fields::to_u64(value) {
        Ok(ticks) => Some(ticks),
        Err(reason) => {
            anomalies.push(Anomaly::Field {
                field: "ticks",
                key: key.to_string(),
                reason,
            });
            None
        }
    }
}

/// Millisecond tick counters, only used where the time fields left a gap
fn decode_ticks(data: &Object, info: &mut PrintInfo, anomalies: &mut Vec<Anomaly>) {
    if info.total_seconds > 0 && info.remain_seconds > 0 {
        return;
    }

    let total_ticks = tick_field(data, fields::TOTAL_TICKS, anomalies);

    if info.total_seconds == 0 {
        if let Some(total) = total_ticks {
            info.total_seconds = total / 1000;
        }
    }

    if info.remain_seconds == 0 {
        if let Some(total) = total_ticks {
            if let Some(current) = tick_field(data, fields::CURRENT_TICKS, anomalies) {
                info.remain_seconds = total.saturating_sub(current) / 1000;
            }
        }
    }
}

fn decode_temperature(data: &Object, anomalies: &mut Vec<Anomaly>) -> Temperature {
    // the first decodable direct key wins, even at 0
    let direct = fields::UV_TEMPERATURE
        .first_match(data, anomalies, |_, v| fields::to_f64(v).map(Some))
        .map(|(_, t)| t)
        .unwrap_or(0.0);

    if direct != 0.0 {
        return Temperature {
            uv_temperature_celsius: direct,
        };
    }

    let nested = fields::UV_PARENTS.iter().find_map(|&parent| {
        let child = data.get(parent)?.as_object()?;
        fields::UV_NESTED_TEMPERATURE
            .first_match(child, anomalies, |_, v| fields::to_f64(v).map(Some))
            .map(|(_, t)| t)
    });

    Temperature {
        uv_temperature_celsius: nested.unwrap_or(direct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn print_payload() -> Value {
        json!({
            "Status": 2,
            "Progress": 42.5,
            "CurrentLayer": 64,
            "TotalLayer": 341,
            "RemainTime": "01:02:03",
            "TotalTime": 7200,
            "TaskID": "task-1",
            "TaskName": "benchy.goo"
        })
    }

    fn temperature_payload() -> Value {
        json!({ "UVTemp": 31.5 })
    }

    fn assert_expected(status: &PrinterStatus) {
        let info = &status.print_info;
        assert!(info.is_printing);
        assert_eq!(info.raw_status_code, Some(2));
        assert_eq!(info.progress_percent, 42.5);
        assert_eq!(info.layers(), Some((64, 341)));
        assert_eq!(info.remain_seconds, 3723);
        assert_eq!(info.total_seconds, 7200);
        assert_eq!(info.task_id, "task-1");
        assert_eq!(info.task_name, "benchy.goo");
        assert_eq!(status.temperature.uv_temperature_celsius, 31.5);
        assert_eq!(status.status, CoarseStatus::Printing);
    }

    #[test]
    fn same_values_from_every_supported_shape() {
        let p = print_payload();
        let t = temperature_payload();

        let shapes = vec![
            json!({ "Data": { "Data": { "PrintInfo": p, "Temperature": t } } }),
            json!({ "Data": { "PrintInfo": p, "Temperature": t } }),
            json!({ "StatusData": { "PrintInfo": p, "Temperature": t } }),
            json!({ "Status": { "PrintInfo": p, "Temps": t } }),
            json!({ "PrintStatus": { "print": p, "temp": t } }),
            json!({ "state": { "Print": p, "temperature": t } }),
            json!({ "PrintInfo": p, "Temperature": t }),
            json!({ "print": p, "Temps": t }),
        ];

        for body in shapes {
            let out = normalize(&body);
            assert_expected(&out.status);
            assert!(!out.is_empty(), "{body}");
            assert_eq!(out.status.raw, body);
        }
    }

    #[test]
    fn locate_reports_source() {
        let p = print_payload();
        let body = json!({ "Data": { "Data": { "PrintInfo": p } }, "Status": { "Temperature": { "UV": 30 } } });
        let located = locate(body.as_object().unwrap());
        assert_eq!(located.print_info.map(|(s, _)| s), Some(Source::DoublyNested));
        assert_eq!(
            located.temperature.map(|(s, _)| s),
            Some(Source::Container("Status"))
        );
    }

    #[test]
    fn first_container_wins() {
        let body = json!({
            "StatusData": { "PrintInfo": { "CurrentLayer": 1, "TotalLayer": 10 } },
            "PrintInfo": { "CurrentLayer": 5, "TotalLayer": 10 }
        });
        let out = normalize(&body);
        assert_eq!(out.status.print_info.current_layer, 1);
    }

    #[test]
    fn empty_nested_object_is_skipped() {
        let body = json!({
            "Data": { "PrintInfo": {} },
            "PrintInfo": { "CurrentLayer": 3, "TotalLayer": 9 }
        });
        let out = normalize(&body);
        assert_eq!(out.status.print_info.layers(), Some((3, 9)));
    }

    #[test]
    fn direct_fields_use_the_body() {
        let body = json!({ "IsPrinting": true, "CurrentLayer": 12, "TotalLayer": 100 });
        let located = locate(body.as_object().unwrap());
        assert_eq!(located.print_info.map(|(s, _)| s), Some(Source::Body));

        let out = normalize(&body);
        assert!(out.status.print_info.is_printing);
        assert_eq!(out.status.print_info.layers(), Some((12, 100)));
        assert!(out.anomalies.contains(&Anomaly::NoTemperature));
    }

    #[test]
    fn clock_strings() {
        let body = json!({ "PrintInfo": { "RemainTime": "02:30:15", "TotalTime": "45:10" } });
        let info = normalize(&body).status.print_info;
        assert_eq!(info.remain_seconds, 2 * 3600 + 30 * 60 + 15);
        assert_eq!(info.total_seconds, 45 * 60 + 10);
    }

    #[test]
    fn malformed_duration_tries_next_key() {
        let body = json!({ "PrintInfo": { "RemainTime": "soon", "TimeLeft": "1:2:3:4", "remain_time": 90 } });
        let out = normalize(&body);
        assert_eq!(out.status.print_info.remain_seconds, 90);
        let skipped: Vec<_> = out
            .anomalies
            .iter()
            .filter_map(|a| match a {
                Anomaly::Field { field: "remain_seconds", key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec!["RemainTime", "TimeLeft"]);
    }

    #[test]
    fn overflowing_clock_tries_next_key() {
        let body = json!({ "PrintInfo": { "RemainTime": "99999999999999999:00:00", "TimeLeft": "00:10:00" } });
        let out = normalize(&body);
        assert_eq!(out.status.print_info.remain_seconds, 600);
        assert!(out.anomalies.iter().any(|a| matches!(
            a,
            Anomaly::Field { field: "remain_seconds", reason: CoerceError::BadClock(_), .. }
        )));

        let body = json!({ "PrintInfo": { "RemainTime": "99999999999999999:00:00" } });
        assert_eq!(normalize(&body).status.print_info.remain_seconds, 0);
    }

    #[test]
    fn zero_duration_is_not_authoritative() {
        let body = json!({ "PrintInfo": { "RemainTime": 0, "TimeLeft": 300 } });
        assert_eq!(normalize(&body).status.print_info.remain_seconds, 300);
    }

    #[test]
    fn ticks_fill_missing_times() {
        let body = json!({ "PrintInfo": { "TotalTicks": 600000, "CurrentTicks": 150000 } });
        let info = normalize(&body).status.print_info;
        assert_eq!(info.remain_seconds, 450);
        assert_eq!(info.total_seconds, 600);
    }

    #[test]
    fn ticks_never_replace_parsed_times() {
        let body = json!({ "PrintInfo": {
            "RemainTime": 100, "TotalTime": 200,
            "TotalTicks": 600000, "CurrentTicks": 150000
        } });
        let info = normalize(&body).status.print_info;
        assert_eq!(info.remain_seconds, 100);
        assert_eq!(info.total_seconds, 200);
    }

    #[test]
    fn current_ticks_past_total_saturate() {
        let body = json!({ "PrintInfo": { "TotalTicks": 1000, "CurrentTicks": 5000 } });
        assert_eq!(normalize(&body).status.print_info.remain_seconds, 0);
    }

    #[test]
    fn derived_remain_from_progress() {
        let body = json!({ "PrintInfo": { "TotalTime": 1000, "Progress": 25 } });
        let info = normalize(&body).status.print_info;
        assert_eq!(info.remain_seconds, 750);

        let body = json!({ "PrintInfo": { "RemainTime": 750, "Progress": 25 } });
        let info = normalize(&body).status.print_info;
        assert_eq!(info.total_seconds, 1000);
    }

    #[test]
    fn status_code_drives_printing() {
        let out = normalize(&json!({ "PrintInfo": { "Status": 2 } }));
        assert!(out.status.print_info.is_printing);
        assert_eq!(out.status.print_info.raw_status_code, Some(2));
        assert_eq!(out.status.status, CoarseStatus::Printing);

        for code in [0, 8] {
            let out = normalize(&json!({ "PrintInfo": { "Status": code } }));
            assert!(!out.status.print_info.is_printing);
            assert_eq!(out.status.status, CoarseStatus::Idle);
        }

        let out = normalize(&json!({ "PrintInfo": { "Status": 1 } }));
        assert!(out.status.print_info.is_printing);
        assert_eq!(out.status.status, CoarseStatus::Preparing);
    }

    #[test]
    fn integral_float_status_code() {
        let out = normalize(&json!({ "PrintInfo": { "Status": 2.0 } }));
        assert!(out.status.print_info.is_printing);
        assert_eq!(out.status.print_info.raw_status_code, Some(2));
        assert_eq!(out.status.status, CoarseStatus::Printing);

        let out = normalize(&json!({ "PrintInfo": { "Status": 8.0 } }));
        assert_eq!(out.status.print_info.raw_status_code, Some(8));
        assert_eq!(out.status.status, CoarseStatus::Idle);

        let out = normalize(&json!({ "PrintInfo": { "Status": 2.5 } }));
        assert!(!out.status.print_info.is_printing);
        assert_eq!(out.status.print_info.raw_status_code, None);
    }

    #[test]
    fn status_string_drives_printing() {
        let out = normalize(&json!({ "PrintInfo": { "Status": "Running" } }));
        assert!(out.status.print_info.is_printing);
        assert_eq!(out.status.print_info.raw_status_code, None);

        let out = normalize(&json!({ "PrintInfo": { "Status": "paused" } }));
        assert!(!out.status.print_info.is_printing);
        assert_eq!(out.status.status, CoarseStatus::Idle);
    }

    #[test]
    fn boolean_flag_beats_status_code() {
        let out = normalize(&json!({ "PrintInfo": { "IsPrinting": false, "Status": 3 } }));
        assert!(!out.status.print_info.is_printing);
        assert_eq!(out.status.print_info.raw_status_code, None);
    }

    #[test]
    fn zero_progress_keeps_printing_state() {
        let out = normalize(&json!({ "PrintInfo": { "Status": 2, "Progress": 0, "TotalLayer": 10 } }));
        assert!(out.status.print_info.is_printing);
        assert_eq!(out.status.print_info.progress(), Some(0.0));
    }

    #[test]
    fn progress_is_clamped() {
        let info = normalize(&json!({ "PrintInfo": { "Progress": "130" } })).status.print_info;
        assert_eq!(info.progress_percent, 100.0);
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let out = normalize(&json!({ "PrintInfo": {
            "Progress": "n/a", "CurrentLayer": [1], "TotalLayer": -5
        } }));
        let info = &out.status.print_info;
        assert_eq!(info.progress_percent, 0.0);
        assert_eq!(info.current_layer, 0);
        assert_eq!(info.total_layer, 0);
        assert_eq!(out.anomalies.len(), 4, "{:?}", out.anomalies);
    }

    #[test]
    fn nested_uv_temperature() {
        let body = json!({ "Temperature": { "UV": { "Current": "28.25" } } });
        let out = normalize(&body);
        assert_eq!(out.status.temperature.uv_temperature_celsius, 28.25);

        let body = json!({ "Temperature": { "UVTemp": 0, "Light": { "Temp": 40 } } });
        assert_eq!(normalize(&body).status.temperature.uv_temperature_celsius, 40.0);
    }

    #[test]
    fn direct_uv_temperature_wins_over_nested() {
        let body = json!({ "Temperature": { "LightTemp": 35, "UVPanel": { "Temp": 99 } } });
        assert_eq!(normalize(&body).status.temperature.uv_temperature_celsius, 35.0);
    }

    #[test]
    fn non_object_body() {
        let out = normalize(&json!([1, 2, 3]));
        assert!(out.is_empty());
        assert_eq!(out.status.status, CoarseStatus::Unknown);
    }

    #[test]
    fn body_without_payloads_is_empty() {
        let out = normalize(&json!({ "Topic": "sdcp/status/x", "Data": { "Cmd": 0 } }));
        assert!(out.is_empty());
        assert_eq!(out.status.print_info, PrintInfo::default());
    }
}
