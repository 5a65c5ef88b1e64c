#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Logging helpers for relay telemetry.
//!
//! Records land in the shared [`TelemetryRecorder`] ring and are mirrored to
//! defmt on the target or stdout on host builds, so tasks never format log
//! lines themselves.

use relay_core::NodeConfig;
use relay_core::sampling::ChannelId;
use relay_core::telemetry::{EventId, TelemetryEventKind, TelemetryRecord, TelemetryRecorder};
use relay_core::transport::{TransportMode, TransportStats};

/// Records `event` and logs the stored record.
pub fn record(
    recorder: &mut TelemetryRecorder,
    tick: u64,
    channel: Option<ChannelId>,
    event: TelemetryEventKind,
) -> EventId {
    let id = recorder.record(tick, channel, event);
    if let Some(stored) = recorder.latest() {
        log_record(stored);
    }
    id
}

/// Logs a record at a level matching its severity.
pub fn log_record(record: &TelemetryRecord) {
    match record.event {
        TelemetryEventKind::CounterPersistFailed { .. } | TelemetryEventKind::FrameDesync { .. } => {
            emit_warn(record);
        }
        _ => emit_info(record),
    }
}

pub fn log_startup(config: &NodeConfig) {
    emit_startup(
        transport_label(config),
        config.baud_rate,
        u64::try_from(config.relay.tick_period.as_micros()).unwrap_or(u64::MAX),
    );
}

pub fn log_transport_stats(stats: TransportStats) {
    emit_stats(stats.received, stats.transmitted, stats.overruns);
}

fn transport_label(config: &NodeConfig) -> &'static str {
    match config.transport {
        TransportMode::Interrupt => "interrupt",
        TransportMode::Polling => "polling",
    }
}

#[cfg(target_os = "none")]
fn emit_info(record: &TelemetryRecord) {
    defmt::info!(
        "telemetry:{=u8} {}",
        record.event.code(),
        defmt::Display2Format(record)
    );
}

#[cfg(target_os = "none")]
fn emit_warn(record: &TelemetryRecord) {
    defmt::warn!(
        "telemetry:{=u8} {}",
        record.event.code(),
        defmt::Display2Format(record)
    );
}

#[cfg(target_os = "none")]
fn emit_startup(transport: &'static str, baud_rate: u32, tick_us: u64) {
    defmt::info!(
        "relay: up, {} transport at {} baud, tick={}us",
        transport,
        baud_rate,
        tick_us
    );
}

#[cfg(target_os = "none")]
fn emit_stats(received: u32, transmitted: u32, overruns: u32) {
    defmt::warn!(
        "uart: rx={} tx={} overruns={}",
        received,
        transmitted,
        overruns
    );
}

#[cfg(not(target_os = "none"))]
fn emit_info(record: &TelemetryRecord) {
    println!("telemetry:{} {}", record.event.code(), record);
}

#[cfg(not(target_os = "none"))]
fn emit_warn(record: &TelemetryRecord) {
    println!("telemetry:{} WARN {}", record.event.code(), record);
}

#[cfg(not(target_os = "none"))]
fn emit_startup(transport: &'static str, baud_rate: u32, tick_us: u64) {
    println!("relay: up, {transport} transport at {baud_rate} baud, tick={tick_us}us");
}

#[cfg(not(target_os = "none"))]
fn emit_stats(received: u32, transmitted: u32, overruns: u32) {
    println!("uart: rx={received} tx={transmitted} overruns={overruns}");
}
