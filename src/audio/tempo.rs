use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::Deserialize;

use super::config::{
    DEFAULT_BPM_HIGH_MAX, DEFAULT_BPM_LOW, DEFAULT_BPM_MEDIUM, DEFAULT_BPM_VERY_LOW,
    DEFAULT_BPM_VERY_VERY_LOW, DEFAULT_MOVEMENT_MAX, DEFAULT_MOVEMENT_RATE_HZ,
    DEFAULT_THRESHOLD_LOW, DEFAULT_THRESHOLD_MEDIUM, DEFAULT_THRESHOLD_VERY_LOW,
    DEFAULT_THRESHOLD_VERY_VERY_LOW, DEFAULT_TRANSITION_SECONDS, DOWNWARD_TRANSITION_DIVISOR,
    MOVEMENT_WINDOW_LEN,
};
use super::errors::ConfigError;
use super::types::EngineShared;

// --- Configuration (bpm_config.json) ---

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TempoConfigFile {
    #[serde(default)]
    pub movement_bpm: MovementBpmConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MovementBpmConfig {
    pub movement_max_value: f32,
    pub thresholds: Thresholds,
    pub bpm_targets: BpmTargets,
    pub smoothing: Smoothing,
}

impl Default for MovementBpmConfig {
    fn default() -> Self {
        Self {
            movement_max_value: DEFAULT_MOVEMENT_MAX,
            thresholds: Thresholds::default(),
            bpm_targets: BpmTargets::default(),
            smoothing: Smoothing::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub very_very_low: f32,
    pub very_low: f32,
    pub low: f32,
    pub medium: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            very_very_low: DEFAULT_THRESHOLD_VERY_VERY_LOW,
            very_low: DEFAULT_THRESHOLD_VERY_LOW,
            low: DEFAULT_THRESHOLD_LOW,
            medium: DEFAULT_THRESHOLD_MEDIUM,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BpmTargets {
    pub very_very_low: f32,
    pub very_low: f32,
    pub low: f32,
    pub medium: f32,
    pub high_max: f32,
}

impl Default for BpmTargets {
    fn default() -> Self {
        Self {
            very_very_low: DEFAULT_BPM_VERY_VERY_LOW,
            very_low: DEFAULT_BPM_VERY_LOW,
            low: DEFAULT_BPM_LOW,
            medium: DEFAULT_BPM_MEDIUM,
            high_max: DEFAULT_BPM_HIGH_MAX,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Smoothing {
    pub transition_time_seconds: f32,
    pub audio_loop_rate_hz: f32,
    /// Explicit per-update factors override the ones derived from the
    /// transition time.
    pub smoothing_factor_up: Option<f32>,
    pub smoothing_factor_down: Option<f32>,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            transition_time_seconds: DEFAULT_TRANSITION_SECONDS,
            audio_loop_rate_hz: DEFAULT_MOVEMENT_RATE_HZ,
            smoothing_factor_up: None,
            smoothing_factor_down: None,
        }
    }
}

pub fn load_tempo_config(path: &Path) -> Result<MovementBpmConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    let file: TempoConfigFile = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(file.movement_bpm)
}

/// Per-update factor such that ~99% of a step completes in
/// `transition_seconds` at `rate_hz` updates per second.
fn smoothing_factor(transition_seconds: f32, rate_hz: f32) -> f32 {
    let updates = (transition_seconds * rate_hz).max(1.0);
    (0.01f32.ln() / updates).exp()
}

// --- Governor ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementPart {
    Head,
    Arms,
    Legs,
}

impl MovementPart {
    /// Parse the tail of a `/dance/...` address. Both the bare limb name and
    /// the `_movement` suffix form arrive on the wire.
    pub fn parse(suffix: &str) -> Option<MovementPart> {
        match suffix.trim_end_matches("_movement") {
            "head" => Some(MovementPart::Head),
            "arms" => Some(MovementPart::Arms),
            "legs" => Some(MovementPart::Legs),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            MovementPart::Head => 0,
            MovementPart::Arms => 1,
            MovementPart::Legs => 2,
        }
    }
}

/// Movement-driven tempo control. Runs entirely on the control context; the
/// audio context only ever reads the published `tempo_ratio` atomic.
pub struct TempoGovernor {
    config: MovementBpmConfig,
    base_bpm: f32,
    current_bpm: f32,
    target_bpm: f32,
    alpha_up: f32,
    alpha_down: f32,
    latest: [Option<f32>; 3],
    window: VecDeque<f32>,
    /// True while an explicit /set_tempo override is holding; cleared by the
    /// next movement update.
    forced: bool,
    shared: Arc<EngineShared>,
}

impl TempoGovernor {
    pub fn new(config: MovementBpmConfig, base_bpm: f32, shared: Arc<EngineShared>) -> Self {
        let s = &config.smoothing;
        let alpha_up = s
            .smoothing_factor_up
            .unwrap_or_else(|| smoothing_factor(s.transition_time_seconds, s.audio_loop_rate_hz));
        let alpha_down = s.smoothing_factor_down.unwrap_or_else(|| {
            smoothing_factor(
                s.transition_time_seconds / DOWNWARD_TRANSITION_DIVISOR,
                s.audio_loop_rate_hz,
            )
        });
        log::info!(
            "Tempo: base {} BPM, smoothing up {:.4} / down {:.4} at {} Hz",
            base_bpm,
            alpha_up,
            alpha_down,
            s.audio_loop_rate_hz
        );
        let governor = Self {
            config,
            base_bpm,
            current_bpm: base_bpm,
            target_bpm: base_bpm,
            alpha_up,
            alpha_down,
            latest: [None; 3],
            window: VecDeque::with_capacity(MOVEMENT_WINDOW_LEN),
            forced: false,
            shared,
        };
        governor.publish();
        governor
    }

    pub fn current_bpm(&self) -> f32 {
        self.current_bpm
    }

    pub fn tempo_ratio(&self) -> f32 {
        self.current_bpm / self.base_bpm
    }

    /// Mean of the rolling combined-movement window, for status reporting.
    pub fn recent_movement(&self) -> f32 {
        if self.window.is_empty() {
            0.0
        } else {
            self.window.iter().sum::<f32>() / self.window.len() as f32
        }
    }

    /// Feed one movement sample. Values in [0, 1] pass through; values that
    /// look like percentages ([0, 100]) are normalized.
    pub fn update_movement(&mut self, part: MovementPart, raw: f32) {
        if !raw.is_finite() {
            return;
        }
        let value = if raw > 1.0 { raw / 100.0 } else { raw }.clamp(0.0, 1.0);
        self.latest[part.index()] = Some(value);
        self.forced = false;

        let m = self.total_movement();
        if self.window.len() == MOVEMENT_WINDOW_LEN {
            self.window.pop_front();
        }
        self.window.push_back(m);

        self.target_bpm = self.target_for(m);
        let alpha = if self.target_bpm > self.current_bpm {
            self.alpha_up
        } else {
            self.alpha_down
        };
        self.current_bpm = alpha * self.current_bpm + (1.0 - alpha) * self.target_bpm;
        self.publish();
        log::trace!(
            "Tempo: m={:.3} target={:.1} current={:.2}",
            m,
            self.target_bpm,
            self.current_bpm
        );
    }

    /// Force the tempo. Holds until the next movement update arrives.
    pub fn force_bpm(&mut self, bpm: f32) {
        let bpm = bpm.clamp(40.0, 300.0);
        self.current_bpm = bpm;
        self.target_bpm = bpm;
        self.forced = true;
        self.publish();
        log::info!("Tempo: Forced to {} BPM", bpm);
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// Combined movement: mean of the latest value per limb that has
    /// reported so far.
    fn total_movement(&self) -> f32 {
        let mut sum = 0.0;
        let mut n = 0;
        for v in self.latest.iter().flatten() {
            sum += v;
            n += 1;
        }
        if n == 0 { 0.0 } else { sum / n as f32 }
    }

    fn target_for(&self, m: f32) -> f32 {
        let t = &self.config.thresholds;
        let b = &self.config.bpm_targets;
        if m < t.very_very_low {
            b.very_very_low
        } else if m < t.very_low {
            b.very_low
        } else if m < t.low {
            b.low
        } else if m < t.medium {
            b.medium
        } else {
            let span = (self.config.movement_max_value - t.medium).max(f32::EPSILON);
            let frac = ((m - t.medium) / span).clamp(0.0, 1.0);
            b.medium + frac * (b.high_max - b.medium)
        }
    }

    fn publish(&self) {
        self.shared
            .tempo_ratio
            .store(self.current_bpm / self.base_bpm, Ordering::Relaxed);
    }
}
