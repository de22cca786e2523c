pub mod fields;
pub mod normalize;

use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::utils::format_duration;

pub use normalize::{locate, normalize, Anomaly, Located, Normalized, Source};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    /// 0 when the printer did not report one
    pub uv_temperature_celsius: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintInfo {
    pub is_printing: bool,
    /// 0..=100
    pub progress_percent: f64,
    pub current_layer: u32,
    pub total_layer: u32,
    pub remain_seconds: u64,
    pub total_seconds: u64,
    pub task_id: String,
    pub task_name: String,
    /// integer `Status` as sent by the printer, if it sent one
    pub raw_status_code: Option<i64>,
}

impl PrintInfo {
    /// `(current, total)`, unknown while the total layer count is 0
    pub fn layers(&self) -> Option<(u32, u32)> {
        (self.total_layer > 0).then_some((self.current_layer, self.total_layer))
    }

    /// Reported progress, unknown while the total layer count is 0
    pub fn progress(&self) -> Option<f64> {
        (self.total_layer > 0).then_some(self.progress_percent)
    }

    /// current / total * 100, clamped to 0..=100
    pub fn layer_progress(&self) -> Option<f64> {
        let (current, total) = self.layers()?;
        Some((current as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
    }

    pub fn remaining_layers(&self) -> Option<u32> {
        let (current, total) = self.layers()?;
        Some(total.saturating_sub(current))
    }

    /// Fills in whichever of remain/total is missing from the other and the
    /// progress. Parsed nonzero values are never replaced.
    pub fn derive_times(&mut self) {
        let progress = self.progress_percent;
        if !(progress > 0.0 && progress < 100.0) {
            return;
        }

        if self.remain_seconds == 0 && self.total_seconds > 0 {
            self.remain_seconds = (self.total_seconds as f64 * (100.0 - progress) / 100.0).round() as u64;
        } else if self.total_seconds == 0 && self.remain_seconds > 0 {
            self.total_seconds = (self.remain_seconds as f64 * 100.0 / (100.0 - progress)).round() as u64;
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoarseStatus {
    Idle,
    Preparing,
    Printing,
    Finishing,
    #[default]
    Unknown,
}

impl CoarseStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 | 8 => Self::Idle,
            1 => Self::Preparing,
            2..=4 => Self::Printing,
            7 => Self::Finishing,
            _ => Self::Unknown,
        }
    }

    /// Raw code first, then the printing flag. With no print info at all the
    /// status is unknown rather than idle.
    pub fn classify(info: &PrintInfo, has_print_info: bool) -> Self {
        match info.raw_status_code {
            Some(code) => Self::from_code(code),
            None if info.is_printing => Self::Printing,
            None if has_print_info => Self::Idle,
            None => Self::Unknown,
        }
    }

    pub fn to_text(&self) -> &'static str {
        match self {
            CoarseStatus::Idle => "Idle",
            CoarseStatus::Preparing => "Preparing to print",
            CoarseStatus::Printing => "Printing",
            CoarseStatus::Finishing => "Finishing",
            CoarseStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PrinterStatus {
    pub temperature: Temperature,
    pub print_info: PrintInfo,
    pub status: CoarseStatus,
    /// the decoded message this status came from
    pub raw: serde_json::Value,
}

impl PrinterStatus {
    pub fn summary(&self) -> String {
        let info = &self.print_info;

        let layers = match info.layers() {
            Some((current, total)) => format!("{}/{}", current, total),
            None => "--".to_string(),
        };
        let progress = match info.progress() {
            Some(p) => format!("{:.1}%", p),
            None => "--".to_string(),
        };
        let remain = match info.remain_seconds {
            0 => "--".to_string(),
            s => format_duration(s),
        };

        format!(
            "{}, Printing={}, Progress={}, Layer={}, Remaining={}, UV={:.1}C",
            self.status.to_text(),
            info.is_printing,
            progress,
            layers,
            remain,
            self.temperature.uv_temperature_celsius,
        )
    }
}

/// Latest status and when it arrived. Replaced as a whole, never edited.
#[derive(Debug, Default, Clone)]
pub struct StatusSnapshot {
    pub status: Arc<PrinterStatus>,
    pub last_updated: Option<DateTime<Local>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_unknown_without_total() {
        let info = PrintInfo {
            current_layer: 10,
            progress_percent: 40.0,
            ..Default::default()
        };
        assert_eq!(info.layers(), None);
        assert_eq!(info.progress(), None);
        assert_eq!(info.layer_progress(), None);
        assert_eq!(info.remaining_layers(), None);
    }

    #[test]
    fn layer_progress_from_counts() {
        let info = PrintInfo {
            current_layer: 64,
            total_layer: 256,
            ..Default::default()
        };
        assert_eq!(info.layers(), Some((64, 256)));
        assert_eq!(info.layer_progress(), Some(25.0));
        assert_eq!(info.remaining_layers(), Some(192));
    }

    #[test]
    fn derives_remain_from_total() {
        let mut info = PrintInfo {
            total_seconds: 1000,
            progress_percent: 25.0,
            ..Default::default()
        };
        info.derive_times();
        assert_eq!(info.remain_seconds, 750);
        assert_eq!(info.total_seconds, 1000);
    }

    #[test]
    fn derives_total_from_remain() {
        let mut info = PrintInfo {
            remain_seconds: 750,
            progress_percent: 25.0,
            ..Default::default()
        };
        info.derive_times();
        assert_eq!(info.total_seconds, 1000);
    }

    #[test]
    fn derivation_keeps_parsed_values() {
        let mut info = PrintInfo {
            remain_seconds: 10,
            total_seconds: 1000,
            progress_percent: 25.0,
            ..Default::default()
        };
        info.derive_times();
        assert_eq!(info.remain_seconds, 10);
        assert_eq!(info.total_seconds, 1000);

        let mut info = PrintInfo {
            total_seconds: 1000,
            ..Default::default()
        };
        info.derive_times();
        assert_eq!(info.remain_seconds, 0);
    }

    #[test]
    fn coarse_status_codes() {
        assert_eq!(CoarseStatus::from_code(0), CoarseStatus::Idle);
        assert_eq!(CoarseStatus::from_code(8), CoarseStatus::Idle);
        assert_eq!(CoarseStatus::from_code(1), CoarseStatus::Preparing);
        assert_eq!(CoarseStatus::from_code(3), CoarseStatus::Printing);
        assert_eq!(CoarseStatus::from_code(7), CoarseStatus::Finishing);
        assert_eq!(CoarseStatus::from_code(13), CoarseStatus::Unknown);
    }

    #[test]
    fn classify_without_code() {
        let printing = PrintInfo {
            is_printing: true,
            ..Default::default()
        };
        assert_eq!(CoarseStatus::classify(&printing, true), CoarseStatus::Printing);
        assert_eq!(CoarseStatus::classify(&PrintInfo::default(), true), CoarseStatus::Idle);
        assert_eq!(CoarseStatus::classify(&PrintInfo::default(), false), CoarseStatus::Unknown);
    }

    #[test]
    fn summary_marks_unknowns() {
        let status = PrinterStatus::default();
        let s = status.summary();
        assert!(s.starts_with("Unknown"));
        assert!(s.contains("Layer=--"));
        assert!(s.contains("Progress=--"));
    }
}
