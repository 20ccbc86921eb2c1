use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::audio::config::{DEFAULT_BASE_BPM, DEFAULT_BUFFER_SIZE, DEFAULT_OSC_PORT};

/// How playback tempo changes are realized. Only plain playback-rate scaling
/// runs inside the real-time path; the pitch-preserving methods would have to
/// happen as a pre-processing pass on load and are not built here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StretchMethod {
    #[value(name = "playback_rate")]
    PlaybackRate,
    #[value(name = "pyrubberband")]
    Pyrubberband,
    #[value(name = "audiotsm")]
    Audiotsm,
}

#[derive(Debug, Parser)]
#[command(name = "stemdeck", about = "Real-time four-deck stem mixing engine controlled over OSC")]
pub struct Cli {
    /// OSC listen port
    #[arg(long, default_value_t = DEFAULT_OSC_PORT)]
    pub port: u16,

    /// Frames per audio callback
    #[arg(long = "buffer-size", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: u32,

    /// Base BPM the tempo ratio is computed against
    #[arg(long, default_value_t = DEFAULT_BASE_BPM)]
    pub bpm: f32,

    /// Audio output device index (host default when omitted)
    #[arg(long)]
    pub device: Option<usize>,

    /// Enable the per-deck three-band EQ processing
    #[arg(long = "enable-filters")]
    pub enable_filters: bool,

    /// Force the block-vectorized filter backend
    #[arg(long = "optimized-filters")]
    pub optimized_filters: bool,

    /// JSON overrides for the movement→BPM table
    #[arg(long = "bpm-config")]
    pub bpm_config: Option<PathBuf>,

    /// Preload deck A with this stem, cued at the start
    #[arg(long)]
    pub a: Option<PathBuf>,

    /// Preload deck B with this stem, cued at the start
    #[arg(long)]
    pub b: Option<PathBuf>,

    /// Tempo change method
    #[arg(long = "stretch-method", value_enum, default_value_t = StretchMethod::PlaybackRate)]
    pub stretch_method: StretchMethod,

    /// Initial master gain
    #[arg(long = "master-volume", default_value_t = 1.0)]
    pub master_volume: f32,
}
