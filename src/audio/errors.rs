use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodingError {
    #[error("Failed to open file '{path}': {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Symphonia probe/format error for '{path}': {source}")]
    Format {
        path: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("No suitable audio track in '{path}'")]
    NoSuitableTrack { path: String },
    #[error("Sample rate missing in '{path}'")]
    MissingSampleRate { path: String },
    #[error("Channel info missing in '{path}'")]
    MissingChannelInfo { path: String },
    #[error("Failed to create decoder for '{path}': {source}")]
    DecoderCreation {
        path: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("Symphonia fatal decode error in '{path}': {source}")]
    FatalDecode {
        path: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("Symphonia I/O error reading packet for '{path}': {source}")]
    PacketRead {
        path: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("No samples decoded from '{path}'")]
    NoSamplesDecoded { path: String },
}

impl DecodingError {
    /// File-missing decode failures get the dedicated not-found treatment
    /// (requested and absolute paths in the log); everything else is a
    /// decode problem.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DecodingError::FileOpen { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

#[derive(Error, Debug)]
pub enum BufferStoreError {
    #[error("File not found: '{requested}' (resolved to '{absolute}')")]
    FileNotFound { requested: String, absolute: String },
    #[error("Decode failed for buffer {buffer_id}: {source}")]
    Decode {
        buffer_id: u32,
        #[source]
        source: DecodingError,
    },
    #[error("No buffer loaded under id {buffer_id}")]
    UnknownBuffer { buffer_id: u32 },
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Failed to calculate {band} crossover coefficients at {cutoff_hz} Hz")]
    Coefficients { band: &'static str, cutoff_hz: f32 },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No audio output device available")]
    NoDevice,
    #[error("Audio device index {index} out of range ({available} devices)")]
    DeviceIndexOutOfRange { index: usize, available: usize },
    #[error("Failed to enumerate output devices: {0}")]
    DeviceEnumeration(String),
    #[error("No usable stereo f32 output configuration on device '{device}'")]
    NoUsableConfig { device: String },
    #[error("Failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("Failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read tempo config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse tempo config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
