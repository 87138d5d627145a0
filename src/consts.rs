//! Engine-wide constants

/// Lower clamp bound for `TagType::Int` stores.
pub const INT_MIN: i64 = i16::MIN as i64;

/// Upper clamp bound for `TagType::Int` stores.
pub const INT_MAX: i64 = i16::MAX as i64;

/// Lower clamp bound for `TagType::Dint` stores.
pub const DINT_MIN: i64 = i32::MIN as i64;

/// Upper clamp bound for `TagType::Dint` stores.
pub const DINT_MAX: i64 = i32::MAX as i64;

/// Modulus for `TagType::Word` stores.
pub const WORD_MODULUS: i64 = 1 << 16;

/// Memory key prefix for previous-scan values used by edge conditions.
pub const MEM_PREV_PREFIX: &str = "_prev:";

/// Memory key prefix for per-instruction oneshot latches.
pub const MEM_ONESHOT_PREFIX: &str = "_ons:";

/// Memory key prefix for timer fractional carries.
pub const MEM_TIMER_PREFIX: &str = "_tmr:";

/// Memory key prefix for shift-register clock state.
pub const MEM_SHIFT_PREFIX: &str = "_shift:";

/// Memory key prefix for drum sequencer state.
pub const MEM_DRUM_PREFIX: &str = "_drum:";

/// Memory key holding the RTC anchor as Unix seconds at simulated t=0.
pub const MEM_RTC_ANCHOR: &str = "_sys.rtc.anchor";

/// Memory key holding the run/stop mode latch.
pub const MEM_MODE_RUN: &str = "_sys.mode.run";

/// Default Unix-seconds RTC anchor when none has been set.
pub const RTC_DEFAULT_ANCHOR: f64 = 0.0;

/// Half-periods, in seconds, of the free-running system clock points.
/// A clock tag reads true while `floor(timestamp / half)` is odd.
pub const CLOCK_HALF_PERIODS: &[(&str, f64)] = &[
    ("sys.clock_10ms", 0.005),
    ("sys.clock_100ms", 0.050),
    ("sys.clock_500ms", 0.250),
    ("sys.clock_1s", 0.500),
    ("sys.clock_1m", 30.0),
    ("sys.clock_1h", 1800.0),
];
