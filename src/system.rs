//! System points
//!
//! Derived and stored tags under the `sys.`, `rtc.`, `fault.`,
//! `firmware.`, and `storage.sd.` namespaces, plus the scan lifecycle
//! hooks that maintain them. Derived points are computed on read and never
//! stored in snapshots; command points self-clear after the scan; fault
//! bits pulse for a single scan unless re-triggered.

use crate::consts::*;
use crate::context::ScanContext;
use crate::state::MemValue;
use crate::tag::{Tag, TagKind};
use crate::value::{TagType, Value};

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

/// Firmware version advertised by `firmware.*`.
const FIRMWARE_VERSION: (i16, i16, i16, i16) = (0, 3, 0, 0);

/// Writable system tags: RTC staging/commands, mode commands, storage
/// commands. Everything else in the system namespaces is read-only.
const WRITABLE: &[&str] = &[
    "rtc.new_year4",
    "rtc.new_month",
    "rtc.new_day",
    "rtc.new_hour",
    "rtc.new_minute",
    "rtc.new_second",
    "rtc.apply_date",
    "rtc.apply_time",
    "sys.cmd_mode_stop",
    "sys.cmd_watchdog_reset",
    "storage.sd.save_cmd",
    "storage.sd.eject_cmd",
    "storage.sd.delete_all_cmd",
];

/// Points resolved from context on every read; never present in the
/// committed tag map.
const DERIVED: &[&str] = &[
    "sys.always_on",
    "sys.first_scan",
    "sys.scan_clock_toggle",
    "sys.clock_10ms",
    "sys.clock_100ms",
    "sys.clock_500ms",
    "sys.clock_1s",
    "sys.clock_1m",
    "sys.clock_1h",
    "sys.mode_switch_run",
    "sys.mode_run",
    "sys.fixed_scan_mode",
    "sys.scan_time_fixed_setup_ms",
    "sys.interrupt_scan_time_ms",
    "rtc.year4",
    "rtc.year2",
    "rtc.month",
    "rtc.day",
    "rtc.weekday",
    "rtc.hour",
    "rtc.minute",
    "rtc.second",
    "firmware.main_ver_low",
    "firmware.main_ver_high",
    "firmware.sub_ver_low",
    "firmware.sub_ver_high",
];

fn descriptor(name: &str) -> Option<(TagType, Value)> {
    let ty = match name {
        "sys.always_on"
        | "sys.first_scan"
        | "sys.scan_clock_toggle"
        | "sys.clock_10ms"
        | "sys.clock_100ms"
        | "sys.clock_500ms"
        | "sys.clock_1s"
        | "sys.clock_1m"
        | "sys.clock_1h"
        | "sys.mode_switch_run"
        | "sys.mode_run"
        | "sys.cmd_mode_stop"
        | "sys.cmd_watchdog_reset"
        | "sys.fixed_scan_mode"
        | "rtc.apply_date"
        | "rtc.apply_date_error"
        | "rtc.apply_time"
        | "rtc.apply_time_error"
        | "fault.plc_error"
        | "fault.division_error"
        | "fault.out_of_range"
        | "fault.address_error"
        | "fault.math_operation_error"
        | "storage.sd.save_cmd"
        | "storage.sd.eject_cmd"
        | "storage.sd.delete_all_cmd"
        | "storage.sd.write_status"
        | "storage.sd.error" => TagType::Bool,
        "storage.sd.ready" => return Some((TagType::Bool, Value::Bool(true))),
        "sys.scan_counter"
        | "sys.scan_time_current_ms"
        | "sys.scan_time_min_ms"
        | "sys.scan_time_max_ms"
        | "sys.scan_time_fixed_setup_ms"
        | "sys.interrupt_scan_time_ms"
        | "rtc.year4"
        | "rtc.year2"
        | "rtc.month"
        | "rtc.day"
        | "rtc.weekday"
        | "rtc.hour"
        | "rtc.minute"
        | "rtc.second"
        | "rtc.new_year4"
        | "rtc.new_month"
        | "rtc.new_day"
        | "rtc.new_hour"
        | "rtc.new_minute"
        | "rtc.new_second"
        | "fault.code"
        | "firmware.main_ver_low"
        | "firmware.main_ver_high"
        | "firmware.sub_ver_low"
        | "firmware.sub_ver_high"
        | "storage.sd.error_code" => TagType::Int,
        _ => return None,
    };
    Some((ty, ty.default_value()))
}

/// True when `name` belongs to a system namespace.
pub fn is_system_tag(name: &str) -> bool {
    descriptor(name).is_some()
}

/// True when logic writes, patches, and forces must refuse this tag.
pub fn is_read_only(name: &str) -> bool {
    is_system_tag(name) && !WRITABLE.contains(&name)
}

/// Resolve a system tag read against the scan context.
///
/// Returns `None` for non-system names. Stored system points fall back to
/// their type default when never written.
pub fn resolve(name: &str, ctx: &ScanContext) -> Option<Value> {
    let (_, default) = descriptor(name)?;

    if !DERIVED.contains(&name) {
        return Some(ctx.raw_tag(name).unwrap_or(default));
    }

    let value = match name {
        "sys.always_on" => Value::Bool(true),
        "sys.first_scan" => Value::Bool(ctx.scan_id() == 0),
        "sys.scan_clock_toggle" => {
            let counter = raw_i64(ctx, "sys.scan_counter");
            Value::Bool(counter % 2 == 1)
        }
        "sys.mode_switch_run" | "sys.mode_run" => Value::Bool(mode_run(ctx)),
        "sys.fixed_scan_mode" => Value::Bool(ctx.fixed_step().is_some()),
        "sys.scan_time_fixed_setup_ms" => {
            let ms = ctx.fixed_step().map(|dt| (dt * 1000.0).round() as i16);
            Value::Int(ms.unwrap_or(0))
        }
        "sys.interrupt_scan_time_ms" => Value::Int(0),
        "firmware.main_ver_high" => Value::Int(FIRMWARE_VERSION.0),
        "firmware.main_ver_low" => Value::Int(FIRMWARE_VERSION.1),
        "firmware.sub_ver_high" => Value::Int(FIRMWARE_VERSION.2),
        "firmware.sub_ver_low" => Value::Int(FIRMWARE_VERSION.3),
        _ => {
            if let Some(&(_, half)) = CLOCK_HALF_PERIODS.iter().find(|(n, _)| *n == name) {
                let phase = (ctx.timestamp() / half).floor() as i64;
                Value::Bool(phase % 2 == 1)
            } else {
                rtc_field(name, rtc_now(ctx))
            }
        }
    };
    Some(value)
}

fn raw_i64(ctx: &ScanContext, name: &str) -> i64 {
    ctx.raw_tag(name).map(|v| v.scalar().as_i64()).unwrap_or(0)
}

fn raw_bool(ctx: &ScanContext, name: &str) -> bool {
    ctx.raw_tag(name).map(|v| v.truthy()).unwrap_or(false)
}

fn mode_run(ctx: &ScanContext) -> bool {
    ctx.get_memory(MEM_MODE_RUN)
        .map(|m| m.as_bool())
        .unwrap_or(true)
}

fn rtc_anchor(ctx: &ScanContext) -> f64 {
    ctx.get_memory(MEM_RTC_ANCHOR)
        .map(|m| m.as_f64())
        .unwrap_or(RTC_DEFAULT_ANCHOR)
}

fn rtc_now(ctx: &ScanContext) -> OffsetDateTime {
    let seconds = rtc_anchor(ctx) + ctx.timestamp();
    OffsetDateTime::from_unix_timestamp(seconds as i64)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn rtc_field(name: &str, now: OffsetDateTime) -> Value {
    let v = match name {
        "rtc.year4" => now.year() as i64,
        "rtc.year2" => (now.year() % 100) as i64,
        "rtc.month" => u8::from(now.month()) as i64,
        "rtc.day" => now.day() as i64,
        // Sunday=1 .. Saturday=7.
        "rtc.weekday" => now.weekday().number_days_from_sunday() as i64 + 1,
        "rtc.hour" => now.hour() as i64,
        "rtc.minute" => now.minute() as i64,
        "rtc.second" => now.second() as i64,
        _ => 0,
    };
    Value::Int(v as i16)
}

/// Anchor value that makes the RTC read `target_unix_seconds` at the
/// given simulated timestamp.
pub(crate) fn anchor_for(target_unix_seconds: f64, timestamp: f64) -> f64 {
    target_unix_seconds - timestamp
}

/// Scan-start bookkeeping: memory defaults, transient-status clears, RTC
/// apply commands, mode commands, storage commands.
pub fn on_scan_start(ctx: &mut ScanContext) {
    if !ctx.has_memory(MEM_RTC_ANCHOR) {
        ctx.set_memory(MEM_RTC_ANCHOR, MemValue::Float(RTC_DEFAULT_ANCHOR));
    }
    if !ctx.has_memory(MEM_MODE_RUN) {
        ctx.set_memory(MEM_MODE_RUN, MemValue::Bool(true));
    }

    // The fault latches mode-stop below; sample it before the clear.
    let math_fault = raw_bool(ctx, "fault.math_operation_error");

    for name in [
        "fault.plc_error",
        "fault.division_error",
        "fault.out_of_range",
        "fault.address_error",
        "fault.math_operation_error",
        "rtc.apply_date_error",
        "rtc.apply_time_error",
        "storage.sd.write_status",
        "storage.sd.error",
    ] {
        ctx.set_tag_internal(name, Value::Bool(false));
    }
    ctx.set_tag_internal("fault.code", Value::Int(0));
    ctx.set_tag_internal("storage.sd.error_code", Value::Int(0));

    if raw_bool(ctx, "rtc.apply_date") {
        apply_rtc_date(ctx);
    }
    if raw_bool(ctx, "rtc.apply_time") {
        apply_rtc_time(ctx);
    }
    ctx.set_tag_internal("rtc.apply_date", Value::Bool(false));
    ctx.set_tag_internal("rtc.apply_time", Value::Bool(false));

    process_storage_commands(ctx);
    process_mode_commands(ctx, math_fault);
}

fn apply_rtc_date(ctx: &mut ScanContext) {
    let now = rtc_now(ctx);
    let year = raw_i64(ctx, "rtc.new_year4") as i32;
    let month = raw_i64(ctx, "rtc.new_month");
    let day = raw_i64(ctx, "rtc.new_day");

    let date = u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .zip(u8::try_from(day).ok())
        .and_then(|(m, d)| Date::from_calendar_date(year, m, d).ok());

    match date {
        Some(date) => {
            let target = PrimitiveDateTime::new(date, now.time()).assume_utc();
            let anchor = anchor_for(target.unix_timestamp() as f64, ctx.timestamp());
            ctx.set_memory(MEM_RTC_ANCHOR, MemValue::Float(anchor));
        }
        None => ctx.set_tag_internal("rtc.apply_date_error", Value::Bool(true)),
    }
}

fn apply_rtc_time(ctx: &mut ScanContext) {
    let now = rtc_now(ctx);
    let hour = raw_i64(ctx, "rtc.new_hour");
    let minute = raw_i64(ctx, "rtc.new_minute");
    let second = raw_i64(ctx, "rtc.new_second");

    let hms = u8::try_from(hour)
        .ok()
        .zip(u8::try_from(minute).ok())
        .zip(u8::try_from(second).ok())
        .and_then(|((h, m), s)| Time::from_hms(h, m, s).ok());

    match hms {
        Some(tod) => {
            let target = PrimitiveDateTime::new(now.date(), tod).assume_utc();
            let anchor = anchor_for(target.unix_timestamp() as f64, ctx.timestamp());
            ctx.set_memory(MEM_RTC_ANCHOR, MemValue::Float(anchor));
        }
        None => ctx.set_tag_internal("rtc.apply_time_error", Value::Bool(true)),
    }
}

fn process_storage_commands(ctx: &mut ScanContext) {
    if raw_bool(ctx, "storage.sd.save_cmd") || raw_bool(ctx, "storage.sd.delete_all_cmd") {
        ctx.set_tag_internal("storage.sd.write_status", Value::Bool(true));
    }
    if raw_bool(ctx, "storage.sd.eject_cmd") {
        ctx.set_tag_internal("storage.sd.ready", Value::Bool(false));
    }
    for cmd in [
        "storage.sd.save_cmd",
        "storage.sd.eject_cmd",
        "storage.sd.delete_all_cmd",
    ] {
        ctx.set_tag_internal(cmd, Value::Bool(false));
    }
}

fn process_mode_commands(ctx: &mut ScanContext, math_fault: bool) {
    let mut run = mode_run(ctx);
    if math_fault || raw_bool(ctx, "sys.cmd_mode_stop") {
        run = false;
    }
    ctx.set_memory(MEM_MODE_RUN, MemValue::Bool(run));
    ctx.set_tag_internal("sys.cmd_mode_stop", Value::Bool(false));
    ctx.set_tag_internal("sys.cmd_watchdog_reset", Value::Bool(false));
}

/// Scan-end bookkeeping: scan counter and scan-time statistics.
pub fn on_scan_end(ctx: &mut ScanContext) {
    let next_counter = raw_i64(ctx, "sys.scan_counter") + 1;
    ctx.set_tag_internal(
        "sys.scan_counter",
        Value::Int(next_counter.clamp(INT_MIN, INT_MAX) as i16),
    );

    let current_ms = (ctx.dt() * 1000.0).round() as i64;
    let current = current_ms.clamp(INT_MIN, INT_MAX) as i16;
    ctx.set_tag_internal("sys.scan_time_current_ms", Value::Int(current));

    let min = match ctx.raw_tag("sys.scan_time_min_ms") {
        Some(v) => (v.scalar().as_i64() as i16).min(current),
        None => current,
    };
    let max = match ctx.raw_tag("sys.scan_time_max_ms") {
        Some(v) => (v.scalar().as_i64() as i16).max(current),
        None => current,
    };
    ctx.set_tag_internal("sys.scan_time_min_ms", Value::Int(min));
    ctx.set_tag_internal("sys.scan_time_max_ms", Value::Int(max));
}

fn point(name: &str) -> Tag {
    let (ty, default) = descriptor(name).expect("known system point");
    Tag::new(name, ty, false, TagKind::Plain).with_default(default)
}

/// `sys.*` tag handles.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct SysPoints {
    pub always_on: Tag,
    pub first_scan: Tag,
    pub scan_clock_toggle: Tag,
    pub clock_10ms: Tag,
    pub clock_100ms: Tag,
    pub clock_500ms: Tag,
    pub clock_1s: Tag,
    pub clock_1m: Tag,
    pub clock_1h: Tag,
    pub mode_switch_run: Tag,
    pub mode_run: Tag,
    pub cmd_mode_stop: Tag,
    pub cmd_watchdog_reset: Tag,
    pub fixed_scan_mode: Tag,
    pub scan_counter: Tag,
    pub scan_time_current_ms: Tag,
    pub scan_time_min_ms: Tag,
    pub scan_time_max_ms: Tag,
    pub scan_time_fixed_setup_ms: Tag,
    pub interrupt_scan_time_ms: Tag,
}

/// `rtc.*` tag handles.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct RtcPoints {
    pub year4: Tag,
    pub year2: Tag,
    pub month: Tag,
    pub day: Tag,
    pub weekday: Tag,
    pub hour: Tag,
    pub minute: Tag,
    pub second: Tag,
    pub new_year4: Tag,
    pub new_month: Tag,
    pub new_day: Tag,
    pub new_hour: Tag,
    pub new_minute: Tag,
    pub new_second: Tag,
    pub apply_date: Tag,
    pub apply_date_error: Tag,
    pub apply_time: Tag,
    pub apply_time_error: Tag,
}

/// `fault.*` tag handles.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct FaultPoints {
    pub plc_error: Tag,
    pub division_error: Tag,
    pub out_of_range: Tag,
    pub address_error: Tag,
    pub math_operation_error: Tag,
    pub code: Tag,
}

/// `firmware.*` tag handles.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct FirmwarePoints {
    pub main_ver_low: Tag,
    pub main_ver_high: Tag,
    pub sub_ver_low: Tag,
    pub sub_ver_high: Tag,
}

/// `storage.sd.*` tag handles.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct StorageSdPoints {
    pub ready: Tag,
    pub save_cmd: Tag,
    pub eject_cmd: Tag,
    pub delete_all_cmd: Tag,
    pub write_status: Tag,
    pub error: Tag,
    pub error_code: Tag,
}

/// All system namespaces.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct SystemPoints {
    pub sys: SysPoints,
    pub rtc: RtcPoints,
    pub fault: FaultPoints,
    pub firmware: FirmwarePoints,
    pub storage_sd: StorageSdPoints,
}

impl Default for SystemPoints {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPoints {
    /// Tag handles for every system point.
    pub fn new() -> Self {
        Self {
            sys: SysPoints {
                always_on: point("sys.always_on"),
                first_scan: point("sys.first_scan"),
                scan_clock_toggle: point("sys.scan_clock_toggle"),
                clock_10ms: point("sys.clock_10ms"),
                clock_100ms: point("sys.clock_100ms"),
                clock_500ms: point("sys.clock_500ms"),
                clock_1s: point("sys.clock_1s"),
                clock_1m: point("sys.clock_1m"),
                clock_1h: point("sys.clock_1h"),
                mode_switch_run: point("sys.mode_switch_run"),
                mode_run: point("sys.mode_run"),
                cmd_mode_stop: point("sys.cmd_mode_stop"),
                cmd_watchdog_reset: point("sys.cmd_watchdog_reset"),
                fixed_scan_mode: point("sys.fixed_scan_mode"),
                scan_counter: point("sys.scan_counter"),
                scan_time_current_ms: point("sys.scan_time_current_ms"),
                scan_time_min_ms: point("sys.scan_time_min_ms"),
                scan_time_max_ms: point("sys.scan_time_max_ms"),
                scan_time_fixed_setup_ms: point("sys.scan_time_fixed_setup_ms"),
                interrupt_scan_time_ms: point("sys.interrupt_scan_time_ms"),
            },
            rtc: RtcPoints {
                year4: point("rtc.year4"),
                year2: point("rtc.year2"),
                month: point("rtc.month"),
                day: point("rtc.day"),
                weekday: point("rtc.weekday"),
                hour: point("rtc.hour"),
                minute: point("rtc.minute"),
                second: point("rtc.second"),
                new_year4: point("rtc.new_year4"),
                new_month: point("rtc.new_month"),
                new_day: point("rtc.new_day"),
                new_hour: point("rtc.new_hour"),
                new_minute: point("rtc.new_minute"),
                new_second: point("rtc.new_second"),
                apply_date: point("rtc.apply_date"),
                apply_date_error: point("rtc.apply_date_error"),
                apply_time: point("rtc.apply_time"),
                apply_time_error: point("rtc.apply_time_error"),
            },
            fault: FaultPoints {
                plc_error: point("fault.plc_error"),
                division_error: point("fault.division_error"),
                out_of_range: point("fault.out_of_range"),
                address_error: point("fault.address_error"),
                math_operation_error: point("fault.math_operation_error"),
                code: point("fault.code"),
            },
            firmware: FirmwarePoints {
                main_ver_low: point("firmware.main_ver_low"),
                main_ver_high: point("firmware.main_ver_high"),
                sub_ver_low: point("firmware.sub_ver_low"),
                sub_ver_high: point("firmware.sub_ver_high"),
            },
            storage_sd: StorageSdPoints {
                ready: point("storage.sd.ready"),
                save_cmd: point("storage.sd.save_cmd"),
                eject_cmd: point("storage.sd.eject_cmd"),
                delete_all_cmd: point("storage.sd.delete_all_cmd"),
                write_status: point("storage.sd.write_status"),
                error: point("storage.sd.error"),
                error_code: point("storage.sd.error_code"),
            },
        }
    }
}
