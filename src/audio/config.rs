// --- Engine Constants ---
/// Target output sample rate. Files at other rates play through the
/// effective-rate adjustment rather than being resampled on load.
pub const ENGINE_SAMPLE_RATE: u32 = 44100;
pub const OUTPUT_CHANNELS: u16 = 2;
pub const DEFAULT_BUFFER_SIZE: u32 = 1024;
/// Largest callback we pre-allocate scratch for. Covers every buffer size a
/// host is likely to negotiate (constrained hosts go up to 4096).
pub const MAX_BUFFER_FRAMES: usize = 8192;

// --- Filter Constants ---
pub const LOW_CROSSOVER_HZ: f32 = 200.0;
pub const HIGH_CROSSOVER_HZ: f32 = 2000.0;
/// EQ gain glide window. Long enough to avoid zipper noise under automation
/// bursts, short enough that a full band cut lands well inside 100 ms.
pub const EQ_GLIDE_SECONDS: f32 = 0.05;

// --- Deck Envelope Constants ---
pub const PLAY_RAMP_SECONDS: f32 = 0.010;
pub const STOP_RAMP_SECONDS: f32 = 0.020;
pub const CLEANUP_RAMP_SECONDS: f32 = 0.005;
/// Glide window for volume, rate and crossfade weight changes.
pub const PARAM_GLIDE_SECONDS: f32 = 0.010;

// --- Parameter Clamps ---
pub const VOLUME_MIN: f32 = 0.0;
pub const VOLUME_MAX: f32 = 1.0;
pub const RATE_MIN: f32 = 0.25;
pub const RATE_MAX: f32 = 4.0;

// --- Control Plane Constants ---
pub const DEFAULT_OSC_PORT: u16 = 57120;
/// Engine→audio command queue depth. Commands are dropped (and logged) rather
/// than blocking the control context when the queue is full.
pub const COMMAND_QUEUE_CAPACITY: usize = 64;
/// Bound on how long /start_group waits for outstanding stem loads.
pub const GROUP_START_LOAD_TIMEOUT_MS: u64 = 2000;

// --- Tempo Governor Defaults ---
pub const DEFAULT_BASE_BPM: f32 = 120.0;
pub const DEFAULT_MOVEMENT_MAX: f32 = 0.6;
pub const DEFAULT_THRESHOLD_VERY_VERY_LOW: f32 = 0.02;
pub const DEFAULT_THRESHOLD_VERY_LOW: f32 = 0.05;
pub const DEFAULT_THRESHOLD_LOW: f32 = 0.10;
pub const DEFAULT_THRESHOLD_MEDIUM: f32 = 0.10;
pub const DEFAULT_BPM_VERY_VERY_LOW: f32 = 105.0;
pub const DEFAULT_BPM_VERY_LOW: f32 = 110.0;
pub const DEFAULT_BPM_LOW: f32 = 115.0;
pub const DEFAULT_BPM_MEDIUM: f32 = 118.0;
pub const DEFAULT_BPM_HIGH_MAX: f32 = 130.0;
pub const DEFAULT_TRANSITION_SECONDS: f32 = 30.0;
pub const DEFAULT_MOVEMENT_RATE_HZ: f32 = 10.0;
/// Downward tempo moves settle faster than upward ones.
pub const DOWNWARD_TRANSITION_DIVISOR: f32 = 3.0;
/// Rolling window of combined movement values kept for status reporting.
pub const MOVEMENT_WINDOW_LEN: usize = 32;

// --- Callback Timing Constants ---
/// Length of one timing-statistics window, in seconds of rendered audio.
pub const STATS_WINDOW_SECONDS: f32 = 10.0;
/// Fraction of the callback budget at which we start warning.
pub const BUDGET_WARN_FRACTION: f32 = 0.9;
