//! Plain-text rendering for the terminal console.

use std::fmt::Write;

use crate::settings::{Field, SettingsForm};
use crate::status::{MonitorState, Severity};
use crate::types::{DeviceIdentity, Phase, PhaseStats, PrinterState};

/// Milliseconds as seconds with two decimals, e.g. `0.85s`.
pub fn seconds(ms: u64) -> String {
    format!("{:.2}s", ms as f64 / 1000.0)
}

pub fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Success => "ok",
        Severity::Warning => "WARN",
        Severity::Error => "ALERT",
    }
}

/// `elapsed / timeout ms` readout for the stall clock.
pub fn stall_readout(state: &MonitorState) -> String {
    format!(
        "[{}] {} / {} ms",
        severity_label(state.severity()),
        state.elapsed().as_millis(),
        state.active_timeout()
    )
}

pub fn average_tick(printer: &PrinterState) -> String {
    if printer.tick_sample_count > 0 {
        seconds(printer.avg_time_between_ticks)
    } else {
        "N/A (waiting for tick changes)".to_string()
    }
}

// Each phase is judged on its own sample count.
pub fn phase_line(label: &str, stats: PhaseStats) -> String {
    if !stats.has_data() {
        return format!("{}: no data yet", label);
    }
    format!(
        "{}: avg {}, min/max {} / {} ({} samples)",
        label,
        seconds(stats.avg_ms),
        seconds(stats.min_ms),
        seconds(stats.max_ms),
        stats.samples
    )
}

pub fn status_line(state: &MonitorState) -> String {
    let status = state.snapshot();
    let printer = &status.elegoo;
    let layer = printer
        .current_layer
        .map_or_else(|| "-".to_string(), |l| l.to_string());

    format!(
        "{} | layer {}/{} {}% | motion {} | runout {} | stall {} | avg tick {}{}",
        printer.status(),
        layer,
        printer.total_layer,
        printer.progress,
        if status.stopped { "stopped" } else { "moving" },
        if status.filament_runout { "yes" } else { "no" },
        stall_readout(state),
        average_tick(printer),
        if printer.is_websocket_connected { "" } else { " | printer offline" },
    )
}

pub fn diagnostics(printer: &PrinterState) -> String {
    let mut out = String::new();
    let overall = printer.overall_stats();
    let _ = writeln!(
        out,
        "Overall: avg {}, min/max {}",
        if overall.avg_ms > 0 { seconds(overall.avg_ms) } else { "N/A".to_string() },
        if overall.has_data() {
            format!("{} / {}", seconds(overall.min_ms), seconds(overall.max_ms))
        } else {
            "N/A".to_string()
        }
    );
    for phase in Phase::ALL {
        let _ = writeln!(out, "{}", phase_line(phase.label(), printer.phase_stats(phase)));
    }
    out
}

pub fn settings_form(form: &SettingsForm) -> String {
    let mut out = String::new();
    if form.ap_mode == Some(true) {
        let _ = writeln!(out, "WiFi network:         {}", form.ssid);
    }
    let _ = writeln!(out, "Printer IP:           {}", form.elegoo_ip);
    for field in Field::ALL {
        let marker = if form.is_invalid(field) { "  <- invalid" } else { "" };
        let _ = writeln!(out, "{:<22}{} ms{}", format!("{}:", field.label()), form.value(field), marker);
    }
    let _ = writeln!(out, "Pause on runout:      {}", form.pause_on_runout);
    let _ = writeln!(out, "Enabled:              {}", form.enabled);
    out
}

pub fn identity(identity: &DeviceIdentity) -> String {
    let part = |value: &Option<String>| value.clone().unwrap_or_else(|| "?".to_string());
    format!(
        "firmware {} ({}) built {} {}",
        part(&identity.firmware_version),
        part(&identity.chip_family),
        part(&identity.build_date),
        part(&identity.build_time)
    )
}
