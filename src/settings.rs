//! Settings sync: load once, validate locally, write-verify-retry.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{FieldError, FieldMismatch, LoadError, SaveError, ValidationErrors, WriteError};
use crate::net::DeviceApi;
use crate::retry::{Echoes, RetryPolicy, WriteAck};
use crate::types::{Settings, SettingsPayload};

const DEFAULT_PAUSE_ON_RUNOUT: bool = true;
const DEFAULT_ENABLED: bool = true;

/// The numeric timeout fields of the settings form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Timeout,
    FirstLayerTimeout,
    StartPrintTimeout,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Timeout, Field::FirstLayerTimeout, Field::StartPrintTimeout];

    pub fn label(self) -> &'static str {
        match self {
            Field::Timeout => "Movement Sensor Timeout",
            Field::FirstLayerTimeout => "First Layer Timeout",
            Field::StartPrintTimeout => "Start Print Timeout",
        }
    }

    /// Inclusive bounds, milliseconds.
    pub fn range(self) -> RangeInclusive<i64> {
        match self {
            Field::Timeout => 100..=30_000,
            Field::FirstLayerTimeout => 100..=60_000,
            Field::StartPrintTimeout => 1_000..=60_000,
        }
    }

    pub fn default_ms(self) -> u64 {
        match self {
            Field::Timeout => 2000,
            Field::FirstLayerTimeout => 4000,
            Field::StartPrintTimeout => 10_000,
        }
    }

    fn check(self, value: &FieldValue) -> Result<u64, String> {
        let n = match value {
            FieldValue::Empty => return Err(format!("{} is required", self.label())),
            FieldValue::Text(text) if text.trim().is_empty() => {
                return Err(format!("{} is required", self.label()))
            }
            FieldValue::Number(n) => *n,
            FieldValue::Text(text) => parse_leading_int(text).ok_or_else(|| {
                format!("{} must be a whole number (current: {})", self.label(), text)
            })?,
        };

        let range = self.range();
        if !range.contains(&n) {
            return Err(format!(
                "{} must be between {} and {} ms (current: {})",
                self.label(),
                range.start(),
                range.end(),
                n
            ));
        }
        Ok(n as u64)
    }
}

/// Raw state of a numeric input: blank, already a number, or typed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Empty,
    Number(i64),
    Text(String),
}

impl FieldValue {
    pub fn from_input(input: &str) -> Self {
        if input.trim().is_empty() {
            FieldValue::Empty
        } else {
            FieldValue::Text(input.to_string())
        }
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Number(n as i64)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Empty => Ok(()),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(text) => f.write_str(text),
        }
    }
}

// Leading sign and digits after optional whitespace; the rest is ignored.
fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit);
    let mut seen = false;
    // saturates so oversized input still fails the range check
    let n = digits.fold(0i64, |acc, d| {
        seen = true;
        acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
    });
    seen.then_some(sign * n)
}

/// Editable copy of the device settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsForm {
    pub ssid: String,
    pub password: String,
    pub elegoo_ip: String,
    pub timeout: FieldValue,
    pub first_layer_timeout: FieldValue,
    pub start_print_timeout: FieldValue,
    pub pause_on_runout: bool,
    pub enabled: bool,
    pub ap_mode: Option<bool>,
    invalid_fields: Vec<Field>,
}

impl SettingsForm {
    /// Populates the form from the device copy. Omitted or zero values take
    /// the defaults and the password always starts blank.
    pub fn from_settings(settings: &Settings) -> Self {
        let timing = |value: Option<u64>, field: Field| {
            FieldValue::from(value.filter(|&v| v != 0).unwrap_or_else(|| field.default_ms()))
        };

        SettingsForm {
            ssid: settings.ssid.clone().unwrap_or_default(),
            password: String::new(),
            elegoo_ip: settings.elegooip.clone().unwrap_or_default(),
            timeout: timing(settings.timeout, Field::Timeout),
            first_layer_timeout: timing(settings.first_layer_timeout, Field::FirstLayerTimeout),
            start_print_timeout: timing(settings.start_print_timeout, Field::StartPrintTimeout),
            pause_on_runout: settings.pause_on_runout.unwrap_or(DEFAULT_PAUSE_ON_RUNOUT),
            enabled: settings.enabled.unwrap_or(DEFAULT_ENABLED),
            ap_mode: settings.ap_mode.filter(|&ap| ap),
            invalid_fields: Vec::new(),
        }
    }

    pub fn value(&self, field: Field) -> &FieldValue {
        match field {
            Field::Timeout => &self.timeout,
            Field::FirstLayerTimeout => &self.first_layer_timeout,
            Field::StartPrintTimeout => &self.start_print_timeout,
        }
    }

    pub fn set(&mut self, field: Field, value: FieldValue) {
        match field {
            Field::Timeout => self.timeout = value,
            Field::FirstLayerTimeout => self.first_layer_timeout = value,
            Field::StartPrintTimeout => self.start_print_timeout = value,
        }
    }

    /// Fields tagged by the most recent validation pass.
    pub fn invalid_fields(&self) -> &[Field] {
        &self.invalid_fields
    }

    pub fn is_invalid(&self, field: Field) -> bool {
        self.invalid_fields.contains(&field)
    }

    /// Checks every timeout field and builds the write payload.
    ///
    /// All violations are collected. Tags from a previous pass are replaced
    /// by this pass's result.
    pub fn validate(&mut self) -> Result<SettingsPayload, ValidationErrors> {
        self.invalid_fields.clear();

        let mut errors = Vec::new();
        let mut values = [0u64; 3];
        for (slot, field) in values.iter_mut().zip(Field::ALL) {
            match field.check(self.value(field)) {
                Ok(n) => *slot = n,
                Err(message) => errors.push(FieldError { field, message }),
            }
        }

        if !errors.is_empty() {
            self.invalid_fields = errors.iter().map(|e| e.field).collect();
            return Err(ValidationErrors(errors));
        }

        let [timeout, first_layer_timeout, start_print_timeout] = values;
        Ok(SettingsPayload {
            ssid: self.ssid.clone(),
            passwd: self.password.clone(),
            ap_mode: false,
            elegooip: self.elegoo_ip.clone(),
            timeout,
            first_layer_timeout,
            pause_on_runout: self.pause_on_runout,
            start_print_timeout,
            enabled: self.enabled,
        })
    }

    /// Takes over the device's authoritative copy after a verified write.
    pub fn adopt(&mut self, echo: &Settings) {
        if let Some(ssid) = &echo.ssid {
            self.ssid = ssid.clone();
        }
        if let Some(ip) = &echo.elegooip {
            self.elegoo_ip = ip.clone();
        }
        for (field, value) in Field::ALL.into_iter().zip([
            echo.timeout,
            echo.first_layer_timeout,
            echo.start_print_timeout,
        ]) {
            if let Some(v) = value {
                self.set(field, FieldValue::from(v));
            }
        }
        if let Some(pause) = echo.pause_on_runout {
            self.pause_on_runout = pause;
        }
        if let Some(enabled) = echo.enabled {
            self.enabled = enabled;
        }
        self.ap_mode = echo.ap_mode.filter(|&ap| ap);
    }
}

fn compare<T: PartialEq + ToString>(
    out: &mut Vec<FieldMismatch>,
    field: &'static str,
    got: Option<&T>,
    expected: &T,
) {
    if got != Some(expected) {
        out.push(FieldMismatch {
            field,
            got: got.map_or_else(|| "nothing".to_string(), ToString::to_string),
            expected: expected.to_string(),
        });
    }
}

impl Echoes<Settings> for SettingsPayload {
    // passwd is never echoed, ap_mode is forced by the client
    fn mismatches(&self, echo: &Settings) -> Vec<FieldMismatch> {
        let mut out = Vec::new();
        compare(&mut out, "timeout", echo.timeout.as_ref(), &self.timeout);
        compare(
            &mut out,
            "first_layer_timeout",
            echo.first_layer_timeout.as_ref(),
            &self.first_layer_timeout,
        );
        compare(&mut out, "pause_on_runout", echo.pause_on_runout.as_ref(), &self.pause_on_runout);
        compare(
            &mut out,
            "start_print_timeout",
            echo.start_print_timeout.as_ref(),
            &self.start_print_timeout,
        );
        compare(&mut out, "enabled", echo.enabled.as_ref(), &self.enabled);
        compare(&mut out, "elegooip", echo.elegooip.as_ref(), &self.elegooip);
        compare(&mut out, "ssid", echo.ssid.as_ref(), &self.ssid);
        out
    }
}

/// Proof of a verified save. Drives the transient "saved" indicator.
#[derive(Debug, Clone)]
pub struct SaveReceipt {
    pub settings: Settings,
    pub saved_at: Instant,
    pub flash: Duration,
}

impl SaveReceipt {
    pub fn indicator_visible(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.saved_at) < self.flash
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SettingsSync<D> {
    device: Arc<D>,
    policy: RetryPolicy,
    flash: Duration,
    saving: AtomicBool,
}

impl<D: DeviceApi> SettingsSync<D> {
    pub fn new(device: Arc<D>, policy: RetryPolicy, flash: Duration) -> Self {
        SettingsSync {
            device,
            policy,
            flash,
            saving: AtomicBool::new(false),
        }
    }

    pub fn from_config(device: Arc<D>, config: &Config) -> Self {
        Self::new(device, config.retry_policy(), config.save_flash())
    }

    /// One read of the device settings. No retry.
    pub async fn load(&self) -> Result<SettingsForm, LoadError> {
        match self.device.get_settings().await {
            Ok(settings) => {
                info!(ssid = ?settings.ssid, elegooip = ?settings.elegooip, "settings loaded");
                Ok(SettingsForm::from_settings(&settings))
            }
            Err(e) => {
                error!(error = %e, "failed to load settings");
                Err(LoadError(e))
            }
        }
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    /// Validates the form and writes it until the device echo matches.
    ///
    /// Rejected with [`SaveError::Busy`] while another save is outstanding.
    /// On success the form adopts the echoed settings.
    pub async fn save(&self, form: &mut SettingsForm) -> Result<SaveReceipt, SaveError> {
        let _guard = BusyGuard::acquire(&self.saving).ok_or(SaveError::Busy)?;

        let payload = match form.validate() {
            Ok(payload) => payload,
            Err(errors) => {
                warn!(fields = ?errors.fields(), "settings failed validation");
                return Err(errors.into());
            }
        };

        let device = &self.device;
        let submitted = &payload;
        let result = self
            .policy
            .write_verified(submitted, || async move {
                let response = device.update_settings(submitted).await?;
                Ok::<_, WriteError>(WriteAck {
                    success: response.success,
                    echo: response.settings,
                })
            })
            .await;

        match result {
            Ok(echo) => {
                info!("settings saved and verified");
                form.adopt(&echo);
                Ok(SaveReceipt {
                    settings: echo,
                    saved_at: Instant::now(),
                    flash: self.flash,
                })
            }
            Err(e) => {
                error!(error = %e, "failed to save settings");
                Err(e.into())
            }
        }
    }
}
