//! Fixed constants of the acquisition chain and the lock engine's default
//! tunables. The outlier and border guard defaults come from the reference
//! device's hardcoded values; they are exposed here as overridable defaults
//! rather than baked into the engine.

/// Samples per acquired trace (2^14).
pub const N_SAMPLES: usize = 1 << 14;

/// Base ADC sample period in nanoseconds, before decimation.
pub const SAMPLE_PERIOD_NS: u64 = 8;

/// Largest supported decimation factor (2^9).
pub const MAX_DEC: u32 = 1 << 9;

/// A peak must clear this fraction of its captured reference height to be
/// considered present rather than vanished.
pub const HEIGHT_FRACTION: f64 = 0.2;

/// Number of scans averaged to compute `FSR_ref` at lock start.
pub const FSR_REF_AVERAGES: usize = 20;

/// Number of steps run during the automatic sign-correction check.
pub const SIGN_CHECK_ITERS: usize = 100;

/// Minimum change in `|error|` over the sign-check window required to flip a
/// laser's sign.
pub const SIGN_CHECK_THRESHOLD: f64 = 5e-3;

/// Default maximum allowed jump (ms) between consecutive peak positions
/// before a step's feedback is rejected as an outlier.
pub const DEFAULT_OUTLIER_THRESHOLD_MS: f64 = 20e-3;

/// Default minimum distance (ms) a peak must keep from either border of its
/// search range.
pub const DEFAULT_BORDER_GUARD_MS: f64 = 5e-3;

/// Default primary (one-shot request/response) port.
pub const DEFAULT_PRIMARY_PORT: u16 = 5000;

/// Offset added to the primary port to derive the persistent loop port.
pub const LOOP_PORT_OFFSET: u16 = 65;

/// Default minimum polling interval for the error monitor, in milliseconds.
pub const DEFAULT_ERROR_MONITOR_T_MIN_MS: f64 = 10.0;

/// Maximum number of traces returned by a single `acquire_ch_n` call.
pub const MAX_ACQUIRE_BATCH: usize = 100;
