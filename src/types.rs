use serde::{Deserialize, Serialize};
use std::fmt;

/// Print-status code the printer reports while it is laying down filament.
pub const PRINTING_CODE: u32 = 13;

/// Settings as read back from `/get_settings` or echoed by `/update_settings`.
///
/// The device may leave any field out, so everything is optional here and
/// the form fills in defaults. The WiFi secret is never part of this type.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub ssid: Option<String>,
    pub elegooip: Option<String>,
    pub timeout: Option<u64>,
    pub first_layer_timeout: Option<u64>,
    pub start_print_timeout: Option<u64>,
    pub ap_mode: Option<bool>,
    pub pause_on_runout: Option<bool>,
    pub enabled: Option<bool>,
}

// Body of POST /update_settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SettingsPayload {
    pub ssid: String,
    pub passwd: String,
    pub ap_mode: bool,
    pub elegooip: String,
    pub timeout: u64,
    pub first_layer_timeout: u64,
    pub pause_on_runout: bool,
    pub start_print_timeout: u64,
    pub enabled: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UpdateResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub settings: Option<Settings>,
}

/// One `/sensor_status` snapshot. Always replaced as a whole.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SensorStatus {
    pub stopped: bool,
    pub filament_runout: bool,
    pub elegoo: PrinterState,
    pub settings: Option<StatusSettings>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PrinterState {
    #[serde(rename = "mainboardID")]
    pub mainboard_id: String,
    pub print_status: u32,
    pub is_printing: bool,
    pub current_layer: Option<i64>,
    pub total_layer: i64,
    pub progress: i64,
    pub current_ticks: i64,
    pub total_ticks: i64,
    #[serde(rename = "PrintSpeedPct")]
    pub print_speed_pct: i64,
    pub is_websocket_connected: bool,
    pub current_z: f64,

    // overall tick statistics, milliseconds
    pub avg_time_between_ticks: u64,
    pub min_tick_time: u64,
    pub max_tick_time: u64,
    pub tick_sample_count: u64,

    pub start_avg_tick_time: u64,
    pub start_min_tick_time: u64,
    pub start_max_tick_time: u64,
    pub start_tick_count: u64,

    pub first_layer_avg_tick_time: u64,
    pub first_layer_min_tick_time: u64,
    pub first_layer_max_tick_time: u64,
    pub first_layer_tick_count: u64,

    pub later_layers_avg_tick_time: u64,
    pub later_layers_min_tick_time: u64,
    pub later_layers_max_tick_time: u64,
    pub later_layers_tick_count: u64,
}

/// Phases the device keeps separate tick statistics for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    FirstLayer,
    LaterLayers,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Start, Phase::FirstLayer, Phase::LaterLayers];

    pub fn label(self) -> &'static str {
        match self {
            Phase::Start => "Start",
            Phase::FirstLayer => "First layer",
            Phase::LaterLayers => "Later layers",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub samples: u64,
}

impl PhaseStats {
    pub fn has_data(&self) -> bool {
        self.samples > 0
    }
}

impl PrinterState {
    /// Printing flag set and the status code says "Printing".
    pub fn is_actively_printing(&self) -> bool {
        self.is_printing && self.print_status == PRINTING_CODE
    }

    pub fn status(&self) -> PrintStatus {
        PrintStatus::from(self.print_status)
    }

    pub fn overall_stats(&self) -> PhaseStats {
        PhaseStats {
            avg_ms: self.avg_time_between_ticks,
            min_ms: self.min_tick_time,
            max_ms: self.max_tick_time,
            samples: self.tick_sample_count,
        }
    }

    pub fn phase_stats(&self, phase: Phase) -> PhaseStats {
        match phase {
            Phase::Start => PhaseStats {
                avg_ms: self.start_avg_tick_time,
                min_ms: self.start_min_tick_time,
                max_ms: self.start_max_tick_time,
                samples: self.start_tick_count,
            },
            Phase::FirstLayer => PhaseStats {
                avg_ms: self.first_layer_avg_tick_time,
                min_ms: self.first_layer_min_tick_time,
                max_ms: self.first_layer_max_tick_time,
                samples: self.first_layer_tick_count,
            },
            Phase::LaterLayers => PhaseStats {
                avg_ms: self.later_layers_avg_tick_time,
                min_ms: self.later_layers_min_tick_time,
                max_ms: self.later_layers_max_tick_time,
                samples: self.later_layers_tick_count,
            },
        }
    }
}

// Settings subset echoed inside /sensor_status
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSettings {
    pub timeout: Option<u64>,
    pub first_layer_timeout: Option<u64>,
    pub enabled: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub firmware_version: Option<String>,
    pub chip_family: Option<String>,
    pub build_date: Option<String>,
    pub build_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintStatus {
    Idle,
    Homing,
    Dropping,
    Exposing,
    Lifting,
    Pausing,
    Paused,
    Stopping,
    Stopped,
    Complete,
    FileChecking,
    Printing,
    Heating,
    BedLeveling,
    Unknown(u32),
}

impl PrintStatus {
    pub fn code(self) -> u32 {
        match self {
            PrintStatus::Idle => 0,
            PrintStatus::Homing => 1,
            PrintStatus::Dropping => 2,
            PrintStatus::Exposing => 3,
            PrintStatus::Lifting => 4,
            PrintStatus::Pausing => 5,
            PrintStatus::Paused => 6,
            PrintStatus::Stopping => 7,
            PrintStatus::Stopped => 8,
            PrintStatus::Complete => 9,
            PrintStatus::FileChecking => 10,
            PrintStatus::Printing => PRINTING_CODE,
            PrintStatus::Heating => 16,
            PrintStatus::BedLeveling => 20,
            PrintStatus::Unknown(code) => code,
        }
    }
}

impl From<u32> for PrintStatus {
    fn from(code: u32) -> Self {
        match code {
            0 => PrintStatus::Idle,
            1 => PrintStatus::Homing,
            2 => PrintStatus::Dropping,
            3 => PrintStatus::Exposing,
            4 => PrintStatus::Lifting,
            5 => PrintStatus::Pausing,
            6 => PrintStatus::Paused,
            7 => PrintStatus::Stopping,
            8 => PrintStatus::Stopped,
            9 => PrintStatus::Complete,
            10 => PrintStatus::FileChecking,
            PRINTING_CODE => PrintStatus::Printing,
            16 => PrintStatus::Heating,
            20 => PrintStatus::BedLeveling,
            other => PrintStatus::Unknown(other),
        }
    }
}

impl fmt::Display for PrintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrintStatus::Idle => "Idle",
            PrintStatus::Homing => "Homing",
            PrintStatus::Dropping => "Dropping",
            PrintStatus::Exposing => "Exposing",
            PrintStatus::Lifting => "Lifting",
            PrintStatus::Pausing => "Pausing",
            PrintStatus::Paused => "Paused",
            PrintStatus::Stopping => "Stopping",
            PrintStatus::Stopped => "Stopped",
            PrintStatus::Complete => "Complete",
            PrintStatus::FileChecking => "File Checking",
            PrintStatus::Printing => "Printing",
            PrintStatus::Heating => "Heating",
            PrintStatus::BedLeveling => "Bed Leveling",
            PrintStatus::Unknown(code) => return write!(f, "Unknown: {}", code),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_status_decodes_device_payload() {
        let raw = r#"{
            "stopped": true,
            "filamentRunout": false,
            "elegoo": {
                "mainboardID": "abc123",
                "printStatus": 13,
                "isPrinting": true,
                "currentLayer": 1,
                "totalLayer": 240,
                "PrintSpeedPct": 100,
                "isWebsocketConnected": true,
                "currentZ": 0.2,
                "firstLayerAvgTickTime": 850,
                "firstLayerTickCount": 12
            },
            "settings": { "timeout": 2000, "first_layer_timeout": 4000, "enabled": true }
        }"#;
        let status: SensorStatus = serde_json::from_str(raw).unwrap();
        assert!(status.stopped);
        assert_eq!(status.elegoo.mainboard_id, "abc123");
        assert_eq!(status.elegoo.print_speed_pct, 100);
        assert_eq!(status.elegoo.current_layer, Some(1));
        assert!(status.elegoo.is_actively_printing());
        assert_eq!(status.elegoo.phase_stats(Phase::FirstLayer).samples, 12);
        assert!(!status.elegoo.phase_stats(Phase::LaterLayers).has_data());
        assert_eq!(status.settings.unwrap().first_layer_timeout, Some(4000));
    }

    #[test]
    fn sparse_status_falls_back_to_defaults() {
        let status: SensorStatus = serde_json::from_str(r#"{"stopped": false}"#).unwrap();
        assert_eq!(status.elegoo.print_status, 0);
        assert_eq!(status.elegoo.current_layer, None);
        assert!(status.settings.is_none());
    }

    #[test]
    fn print_status_names() {
        assert_eq!(PrintStatus::from(13).to_string(), "Printing");
        assert_eq!(PrintStatus::from(10).to_string(), "File Checking");
        assert_eq!(PrintStatus::from(20).to_string(), "Bed Leveling");
        assert_eq!(PrintStatus::from(15).to_string(), "Unknown: 15");
        assert_eq!(PrintStatus::from(99).code(), 99);
    }

    #[test]
    fn settings_tolerate_missing_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{"ssid": "shop", "timeout": 1500}"#).unwrap();
        assert_eq!(settings.ssid.as_deref(), Some("shop"));
        assert_eq!(settings.timeout, Some(1500));
        assert_eq!(settings.enabled, None);
    }
}
