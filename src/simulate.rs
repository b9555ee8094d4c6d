//! In-memory stand-in for the sensor accessory.
//!
//! Behaves like the firmware closely enough to drive the console without
//! hardware: settings are stored and echoed, the password is only replaced
//! by a non-empty value, and a simulated print produces tick statistics.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::sync::{Mutex, MutexGuard};

use crate::error::DeviceError;
use crate::net::DeviceApi;
use crate::types::{
    DeviceIdentity, PrinterState, SensorStatus, Settings, SettingsPayload, StatusSettings,
    UpdateResponse, PRINTING_CODE,
};

const LAYER_EVERY_POLLS: u32 = 4;
const MAX_LOG_LINES: usize = 50;

#[derive(Debug, Default, Clone, Copy)]
struct TickAcc {
    total: u64,
    count: u64,
    min: u64,
    max: u64,
}

impl TickAcc {
    fn record(&mut self, ms: u64) {
        self.min = if self.count == 0 { ms } else { self.min.min(ms) };
        self.max = self.max.max(ms);
        self.total += ms;
        self.count += 1;
    }

    fn avg(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total / self.count
        }
    }
}

#[derive(Debug)]
struct SimInner {
    settings: SettingsPayload,
    // the device keeps the password but never reports it
    password: String,
    printer: PrinterState,
    stopped: bool,
    filament_runout: bool,
    printed_ms: u64,
    polls_on_layer: u32,
    overall: TickAcc,
    start: TickAcc,
    first_layer: TickAcc,
    later_layers: TickAcc,
    pinned_timeout: Option<u64>,
    fail_remaining: u32,
    writes: u32,
    polls: u32,
    resets: u32,
    log: Vec<serde_json::Value>,
}

impl Default for SimInner {
    fn default() -> Self {
        SimInner {
            settings: SettingsPayload {
                ssid: String::new(),
                passwd: String::new(),
                ap_mode: false,
                elegooip: String::new(),
                timeout: 2000,
                first_layer_timeout: 4000,
                pause_on_runout: true,
                start_print_timeout: 10_000,
                enabled: true,
            },
            password: String::new(),
            printer: PrinterState {
                mainboard_id: "sim-mainboard".to_string(),
                is_websocket_connected: true,
                current_layer: Some(0),
                ..PrinterState::default()
            },
            stopped: false,
            filament_runout: false,
            printed_ms: 0,
            polls_on_layer: 0,
            overall: TickAcc::default(),
            start: TickAcc::default(),
            first_layer: TickAcc::default(),
            later_layers: TickAcc::default(),
            pinned_timeout: None,
            fail_remaining: 0,
            writes: 0,
            polls: 0,
            resets: 0,
            log: Vec::new(),
        }
    }
}

impl SimInner {
    fn note(&mut self, message: impl Into<String>) {
        self.log.push(serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "message": message.into(),
        }));
        if self.log.len() > MAX_LOG_LINES {
            self.log.remove(0);
        }
    }

    fn take_failure(&mut self) -> Result<(), DeviceError> {
        if self.fail_remaining > 0 {
            self.fail_remaining -= 1;
            return Err(DeviceError::Unavailable("simulated device unreachable".to_string()));
        }
        Ok(())
    }

    fn echo(&self) -> Settings {
        Settings {
            ssid: Some(self.settings.ssid.clone()),
            elegooip: Some(self.settings.elegooip.clone()),
            timeout: Some(self.settings.timeout),
            first_layer_timeout: Some(self.settings.first_layer_timeout),
            start_print_timeout: Some(self.settings.start_print_timeout),
            ap_mode: Some(self.settings.ap_mode),
            pause_on_runout: Some(self.settings.pause_on_runout),
            enabled: Some(self.settings.enabled),
        }
    }

    // one poll's worth of simulated printing
    fn advance(&mut self) {
        if !self.printer.is_actively_printing() || self.stopped {
            return;
        }

        let interval = rand::thread_rng().gen_range(400..1200u64);
        self.printed_ms += interval;
        self.overall.record(interval);
        if self.printed_ms <= self.settings.start_print_timeout {
            self.start.record(interval);
        }
        let layer = self.printer.current_layer.unwrap_or(0);
        if layer <= 1 {
            self.first_layer.record(interval);
        } else {
            self.later_layers.record(interval);
        }

        self.printer.current_ticks += 1;
        self.printer.total_ticks += 1;
        self.polls_on_layer += 1;
        if self.polls_on_layer >= LAYER_EVERY_POLLS && layer < self.printer.total_layer {
            self.polls_on_layer = 0;
            self.printer.current_layer = Some(layer + 1);
            self.printer.current_ticks = 0;
            self.printer.current_z += 0.2;
        }
        if self.printer.total_layer > 0 {
            let layer = self.printer.current_layer.unwrap_or(0);
            self.printer.progress = layer * 100 / self.printer.total_layer;
        }
    }

    fn snapshot(&self) -> SensorStatus {
        let mut printer = self.printer.clone();
        printer.avg_time_between_ticks = self.overall.avg();
        printer.min_tick_time = self.overall.min;
        printer.max_tick_time = self.overall.max;
        printer.tick_sample_count = self.overall.count;
        printer.start_avg_tick_time = self.start.avg();
        printer.start_min_tick_time = self.start.min;
        printer.start_max_tick_time = self.start.max;
        printer.start_tick_count = self.start.count;
        printer.first_layer_avg_tick_time = self.first_layer.avg();
        printer.first_layer_min_tick_time = self.first_layer.min;
        printer.first_layer_max_tick_time = self.first_layer.max;
        printer.first_layer_tick_count = self.first_layer.count;
        printer.later_layers_avg_tick_time = self.later_layers.avg();
        printer.later_layers_min_tick_time = self.later_layers.min;
        printer.later_layers_max_tick_time = self.later_layers.max;
        printer.later_layers_tick_count = self.later_layers.count;

        SensorStatus {
            stopped: self.stopped,
            filament_runout: self.filament_runout,
            elegoo: printer,
            settings: Some(StatusSettings {
                timeout: Some(self.settings.timeout),
                first_layer_timeout: Some(self.settings.first_layer_timeout),
                enabled: Some(self.settings.enabled),
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulatedDevice {
    inner: Mutex<SimInner>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        // a panic while holding the lock leaves plain data behind
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts a print at layer 1 with status "Printing".
    pub fn start_print(&self, total_layers: i64) {
        let mut inner = self.lock();
        inner.printer.is_printing = true;
        inner.printer.print_status = PRINTING_CODE;
        inner.printer.current_layer = Some(1);
        inner.printer.total_layer = total_layers;
        inner.printer.progress = 0;
        inner.printer.current_z = 0.2;
        inner.printed_ms = 0;
        inner.polls_on_layer = 0;
        inner.stopped = false;
        inner.note(format!("print started ({} layers)", total_layers));
    }

    /// Ends the print with the given status code (9 Complete, 8 Stopped, ...).
    pub fn finish_print(&self, status: u32) {
        let mut inner = self.lock();
        inner.printer.is_printing = false;
        inner.printer.print_status = status;
        inner.note(format!("print ended with status {}", status));
    }

    pub fn set_print_status(&self, status: u32) {
        self.lock().printer.print_status = status;
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.lock().stopped = stopped;
    }

    pub fn set_filament_runout(&self, runout: bool) {
        self.lock().filament_runout = runout;
    }

    /// Makes the device ignore written timeouts and keep `value` instead.
    pub fn pin_timeout(&self, value: Option<u64>) {
        self.lock().pinned_timeout = value;
    }

    /// The next `count` requests of any kind fail.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_remaining = count;
    }

    pub fn write_count(&self) -> u32 {
        self.lock().writes
    }

    pub fn poll_count(&self) -> u32 {
        self.lock().polls
    }

    pub fn reset_count(&self) -> u32 {
        self.lock().resets
    }

    pub fn stored_password(&self) -> String {
        self.lock().password.clone()
    }
}

#[async_trait]
impl DeviceApi for SimulatedDevice {
    async fn get_settings(&self) -> Result<Settings, DeviceError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        Ok(inner.echo())
    }

    async fn update_settings(&self, payload: &SettingsPayload) -> Result<UpdateResponse, DeviceError> {
        let mut inner = self.lock();
        inner.writes += 1;
        inner.take_failure()?;

        let mut stored = payload.clone();
        if let Some(pinned) = inner.pinned_timeout {
            stored.timeout = pinned;
        }
        if !payload.passwd.is_empty() {
            inner.password = payload.passwd.clone();
        }
        stored.passwd = String::new();
        inner.settings = stored;
        inner.note("settings updated");

        Ok(UpdateResponse {
            success: true,
            settings: Some(inner.echo()),
        })
    }

    async fn sensor_status(&self) -> Result<SensorStatus, DeviceError> {
        let mut inner = self.lock();
        inner.polls += 1;
        inner.take_failure()?;
        inner.advance();
        Ok(inner.snapshot())
    }

    async fn reset_stats(&self) -> Result<(), DeviceError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        inner.resets += 1;
        inner.overall = TickAcc::default();
        inner.start = TickAcc::default();
        inner.first_layer = TickAcc::default();
        inner.later_layers = TickAcc::default();
        inner.note("tick statistics reset");
        Ok(())
    }

    async fn version(&self) -> Result<DeviceIdentity, DeviceError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let now = Utc::now();
        Ok(DeviceIdentity {
            firmware_version: Some(format!("sim-{}", env!("CARGO_PKG_VERSION"))),
            chip_family: Some("simulated".to_string()),
            build_date: Some(now.format("%b %e %Y").to_string()),
            build_time: Some(now.format("%H:%M:%S").to_string()),
        })
    }

    async fn logs(&self) -> Result<serde_json::Value, DeviceError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        Ok(serde_json::Value::Array(inner.log.clone()))
    }
}
