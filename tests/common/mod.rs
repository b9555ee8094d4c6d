#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

use runout_console::error::DeviceError;
use runout_console::net::DeviceApi;
use runout_console::types::{
    DeviceIdentity, PrinterState, SensorStatus, Settings, SettingsPayload, StatusSettings,
    UpdateResponse,
};

pub enum WriteStep {
    /// Echo exactly what was submitted.
    Accept,
    /// Echo the submission after the device altered it.
    Alter(fn(&mut Settings)),
    Http(u16),
    Rejected,
    Unreachable,
}

/// Device whose responses are queued up by the test.
#[derive(Default)]
pub struct ScriptedDevice {
    settings: Mutex<Option<Settings>>,
    writes: Mutex<VecDeque<WriteStep>>,
    payloads: Mutex<Vec<(SettingsPayload, Instant)>>,
    statuses: Mutex<VecDeque<Result<SensorStatus, String>>>,
    last_status: Mutex<SensorStatus>,
    polls: Mutex<u32>,
    resets: Mutex<u32>,
    fail_reset: Mutex<bool>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        let device = Self::default();
        *device.settings.lock().unwrap() = Some(settings);
        device
    }

    pub fn script_writes(&self, steps: Vec<WriteStep>) {
        self.writes.lock().unwrap().extend(steps);
    }

    pub fn script_statuses(&self, statuses: Vec<Result<SensorStatus, String>>) {
        self.statuses.lock().unwrap().extend(statuses);
    }

    pub fn fail_reset(&self) {
        *self.fail_reset.lock().unwrap() = true;
    }

    pub fn payloads(&self) -> Vec<(SettingsPayload, Instant)> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn polls(&self) -> u32 {
        *self.polls.lock().unwrap()
    }

    pub fn resets(&self) -> u32 {
        *self.resets.lock().unwrap()
    }
}

pub fn echo_of(payload: &SettingsPayload) -> Settings {
    Settings {
        ssid: Some(payload.ssid.clone()),
        elegooip: Some(payload.elegooip.clone()),
        timeout: Some(payload.timeout),
        first_layer_timeout: Some(payload.first_layer_timeout),
        start_print_timeout: Some(payload.start_print_timeout),
        ap_mode: Some(payload.ap_mode),
        pause_on_runout: Some(payload.pause_on_runout),
        enabled: Some(payload.enabled),
    }
}

pub fn device_settings() -> Settings {
    Settings {
        ssid: Some("workshop".to_string()),
        elegooip: Some("192.168.1.50".to_string()),
        timeout: Some(2500),
        first_layer_timeout: Some(5000),
        start_print_timeout: Some(12_000),
        ap_mode: Some(false),
        pause_on_runout: Some(true),
        enabled: Some(true),
    }
}

/// Telemetry for a print on `layer` with the given status code.
pub fn printing(stopped: bool, print_status: u32, layer: i64) -> SensorStatus {
    SensorStatus {
        stopped,
        filament_runout: false,
        elegoo: PrinterState {
            print_status,
            is_printing: true,
            current_layer: Some(layer),
            total_layer: 100,
            is_websocket_connected: true,
            ..PrinterState::default()
        },
        settings: Some(StatusSettings {
            timeout: Some(2000),
            first_layer_timeout: Some(4000),
            enabled: Some(true),
        }),
    }
}

#[async_trait]
impl DeviceApi for ScriptedDevice {
    async fn get_settings(&self) -> Result<Settings, DeviceError> {
        self.settings.lock().unwrap().clone().ok_or(DeviceError::Status {
            status: 503,
            reason: "Service Unavailable".to_string(),
        })
    }

    async fn update_settings(&self, payload: &SettingsPayload) -> Result<UpdateResponse, DeviceError> {
        self.payloads
            .lock()
            .unwrap()
            .push((payload.clone(), Instant::now()));
        let step = self.writes.lock().unwrap().pop_front().unwrap_or(WriteStep::Accept);
        match step {
            WriteStep::Accept => Ok(UpdateResponse {
                success: true,
                settings: Some(echo_of(payload)),
            }),
            WriteStep::Alter(alter) => {
                let mut echo = echo_of(payload);
                alter(&mut echo);
                Ok(UpdateResponse {
                    success: true,
                    settings: Some(echo),
                })
            }
            WriteStep::Http(status) => Err(DeviceError::Status {
                status,
                reason: "Internal Server Error".to_string(),
            }),
            WriteStep::Rejected => Ok(UpdateResponse {
                success: false,
                settings: Some(echo_of(payload)),
            }),
            WriteStep::Unreachable => Err(DeviceError::Unavailable("connection refused".to_string())),
        }
    }

    async fn sensor_status(&self) -> Result<SensorStatus, DeviceError> {
        *self.polls.lock().unwrap() += 1;
        let next = self.statuses.lock().unwrap().pop_front();
        match next {
            Some(Ok(status)) => {
                *self.last_status.lock().unwrap() = status.clone();
                Ok(status)
            }
            Some(Err(message)) => Err(DeviceError::Unavailable(message)),
            None => Ok(self.last_status.lock().unwrap().clone()),
        }
    }

    async fn reset_stats(&self) -> Result<(), DeviceError> {
        *self.resets.lock().unwrap() += 1;
        if *self.fail_reset.lock().unwrap() {
            return Err(DeviceError::Unavailable("reset refused".to_string()));
        }
        Ok(())
    }

    async fn version(&self) -> Result<DeviceIdentity, DeviceError> {
        Ok(DeviceIdentity::default())
    }

    async fn logs(&self) -> Result<serde_json::Value, DeviceError> {
        Ok(serde_json::Value::Null)
    }
}
