//! Console for the filament-runout sensor accessory.
//!
//! [`settings`] loads, validates and writes the device configuration with
//! echo verification; [`monitor`] polls telemetry and runs the stall clock
//! derived in [`status`].

pub mod config;
pub mod display;
pub mod error;
pub mod monitor;
pub mod net;
pub mod retry;
pub mod settings;
pub mod simulate;
pub mod status;
pub mod types;

pub use config::Config;
pub use error::{DeviceError, LoadError, SaveError, ValidationErrors, WriteError};
pub use monitor::MonitorHandle;
pub use net::{DeviceApi, HttpDevice};
pub use settings::{Field, FieldValue, SettingsForm, SettingsSync};
pub use simulate::SimulatedDevice;
pub use status::{active_timeout, MonitorState, Severity};
