use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::audio::config::{VOLUME_MAX, VOLUME_MIN};

/// Lock-free f32 parameter cell. The control context stores, the audio
/// callback loads; the value crosses threads as raw IEEE-754 bits inside an
/// `AtomicU32`, so neither side ever takes a lock.
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn load(&self, ordering: Ordering) -> f32 {
        f32::from_bits(self.bits.load(ordering))
    }

    pub fn store(&self, value: f32, ordering: Ordering) {
        self.bits.store(value.to_bits(), ordering);
    }
}

// --- Deck Identity ---

pub const NUM_DECKS: usize = 4;

/// The four logical playback channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeckLabel {
    A,
    B,
    C,
    D,
}

impl DeckLabel {
    pub const ALL: [DeckLabel; NUM_DECKS] = [DeckLabel::A, DeckLabel::B, DeckLabel::C, DeckLabel::D];

    pub fn index(self) -> usize {
        match self {
            DeckLabel::A => 0,
            DeckLabel::B => 1,
            DeckLabel::C => 2,
            DeckLabel::D => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeckLabel::A => "A",
            DeckLabel::B => "B",
            DeckLabel::C => "C",
            DeckLabel::D => "D",
        }
    }

    /// First implicit buffer id in this deck's id range (A: 100.., B: 1100..,
    /// C: 2100.., D: 3100..).
    pub fn base_buffer_id(self) -> u32 {
        100 + 1000 * self.index() as u32
    }

    pub fn parse(s: &str) -> Option<DeckLabel> {
        match s.trim() {
            "A" | "a" => Some(DeckLabel::A),
            "B" | "b" => Some(DeckLabel::B),
            "C" | "c" => Some(DeckLabel::C),
            "D" | "d" => Some(DeckLabel::D),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeckLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three cut-only EQ bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub fn parse(s: &str) -> Option<EqBand> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "lo" | "bass" => Some(EqBand::Low),
            "mid" | "middle" => Some(EqBand::Mid),
            "high" | "hi" | "treble" => Some(EqBand::High),
            _ => None,
        }
    }
}

/// Deck lifecycle as published to the control context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeckPhase {
    Idle = 0,
    Cued = 1,
    Playing = 2,
    Stopping = 3,
}

impl DeckPhase {
    pub fn from_u8(v: u8) -> DeckPhase {
        match v {
            1 => DeckPhase::Cued,
            2 => DeckPhase::Playing,
            3 => DeckPhase::Stopping,
            _ => DeckPhase::Idle,
        }
    }
}

// --- Shared State ---

/// Per-deck parameter cells written by the control context and read by the
/// audio context each callback, plus feedback cells written back by audio.
pub struct DeckShared {
    /// Target linear gain, clamped to [0, 1].
    pub volume: AtomicF32,
    /// Target playback rate, 1.0 = native speed.
    pub rate: AtomicF32,
    /// Crossfade weight for this deck, [0, 1].
    pub weight: AtomicF32,
    /// Target band gains for the cut-only EQ, [0, 1] each.
    pub eq_low: AtomicF32,
    pub eq_mid: AtomicF32,
    pub eq_high: AtomicF32,
    /// Published by the audio context: current [`DeckPhase`] as a byte.
    pub phase: AtomicU8,
    /// Published by the audio context: integer playhead frame.
    pub playhead_frames: AtomicU64,
}

impl DeckShared {
    fn new() -> Self {
        Self {
            volume: AtomicF32::new(1.0),
            rate: AtomicF32::new(1.0),
            weight: AtomicF32::new(1.0),
            eq_low: AtomicF32::new(1.0),
            eq_mid: AtomicF32::new(1.0),
            eq_high: AtomicF32::new(1.0),
            phase: AtomicU8::new(DeckPhase::Idle as u8),
            playhead_frames: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> DeckPhase {
        DeckPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, v: f32) {
        self.volume
            .store(v.clamp(VOLUME_MIN, VOLUME_MAX), Ordering::Relaxed);
    }

    pub fn set_eq_gain(&self, band: EqBand, gain: f32) {
        let cell = match band {
            EqBand::Low => &self.eq_low,
            EqBand::Mid => &self.eq_mid,
            EqBand::High => &self.eq_high,
        };
        cell.store(gain.clamp(0.0, 1.0), Ordering::Relaxed);
    }
}

/// The lock-free block shared between the OSC context and the audio context.
/// Everything the render path consumes per chunk lives here as an atomic.
pub struct EngineShared {
    pub decks: [DeckShared; NUM_DECKS],
    pub master_gain: AtomicF32,
    /// current_bpm / base_bpm, written by the tempo governor.
    pub tempo_ratio: AtomicF32,
    /// Global EQ switch. When false the filter bank is bypassed entirely.
    pub filters_enabled: AtomicBool,
    /// Engine clock: total frames rendered since stream start.
    pub frames_rendered: AtomicU64,
    /// Count of callbacks that overran their wall-clock budget.
    pub budget_overruns: AtomicU64,
    pub sample_rate: u32,
}

impl EngineShared {
    pub fn new(sample_rate: u32, master_gain: f32, filters_enabled: bool) -> Self {
        Self {
            decks: [
                DeckShared::new(),
                DeckShared::new(),
                DeckShared::new(),
                DeckShared::new(),
            ],
            master_gain: AtomicF32::new(master_gain.clamp(0.0, 1.0)),
            tempo_ratio: AtomicF32::new(1.0),
            filters_enabled: AtomicBool::new(filters_enabled),
            frames_rendered: AtomicU64::new(0),
            budget_overruns: AtomicU64::new(0),
            sample_rate,
        }
    }

    pub fn deck(&self, label: DeckLabel) -> &DeckShared {
        &self.decks[label.index()]
    }

    pub fn now_frames(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deck_label_roundtrip() {
        for label in DeckLabel::ALL {
            assert_eq!(DeckLabel::parse(label.as_str()), Some(label));
        }
        assert_eq!(DeckLabel::parse("b"), Some(DeckLabel::B));
        assert_eq!(DeckLabel::parse("E"), None);
    }

    #[test]
    fn deck_id_ranges_do_not_overlap() {
        assert_eq!(DeckLabel::A.base_buffer_id(), 100);
        assert_eq!(DeckLabel::B.base_buffer_id(), 1100);
        assert_eq!(DeckLabel::C.base_buffer_id(), 2100);
        assert_eq!(DeckLabel::D.base_buffer_id(), 3100);
    }

    #[test]
    fn atomic_f32_preserves_bits() {
        let cell = AtomicF32::new(0.0);
        cell.store(0.12345, Ordering::Relaxed);
        assert_eq!(cell.load(Ordering::Relaxed), 0.12345);
    }

    #[test]
    fn shared_volume_clamps() {
        let shared = EngineShared::new(44100, 1.0, false);
        shared.deck(DeckLabel::A).set_volume(2.5);
        assert_eq!(shared.deck(DeckLabel::A).volume.load(Ordering::Relaxed), 1.0);
        shared.deck(DeckLabel::A).set_volume(-1.0);
        assert_eq!(shared.deck(DeckLabel::A).volume.load(Ordering::Relaxed), 0.0);
    }
}
