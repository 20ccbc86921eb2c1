use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::buffers::AudioBuffer;
use super::config::{
    PARAM_GLIDE_SECONDS, PLAY_RAMP_SECONDS, RATE_MAX, RATE_MIN, STOP_RAMP_SECONDS,
};
use super::errors::FilterError;
use super::filter::{FilterBackend, ThreeBandFilter};
use super::types::{DeckLabel, DeckPhase, DeckShared, EqBand};

/// Arguments carried by a play transition. Rate and volume travel through the
/// shared atomic cells; the queue only carries what must be applied exactly
/// once.
#[derive(Debug, Clone, Copy)]
pub struct PlayParams {
    pub looping: bool,
    pub start_frames: Option<usize>,
}

/// One deck as owned by the audio context. All mutation happens inside the
/// render callback; the control context talks to it through the command queue
/// and the shared atomic cells.
pub struct DeckVoice {
    label: DeckLabel,
    buffer: Option<Arc<AudioBuffer>>,
    /// Fractional frame offset into the bound buffer.
    playhead: f64,
    phase: DeckPhase,
    looping: bool,
    /// Engine frame at which a queued group start fires.
    queued_start_frame: Option<u64>,
    /// Play request received while a stop ramp was still running.
    pending_play: Option<PlayParams>,
    /// Drop the buffer binding when the current ramp-out completes.
    unbind_after_stop: bool,
    // Envelope (ramp in/out on top of volume).
    env_gain: f32,
    env_step: f32,
    // Glided parameter currents; targets live in the shared cells.
    vol_current: f32,
    rate_current: f32,
    weight_current: f32,
    /// file_rate / engine_rate, cached at bind time.
    rate_ratio: f32,
    param_step: f32,
    rate_step: f32,
    play_ramp_step: f32,
    stop_ramp_step: f32,
    pub filter: ThreeBandFilter,
}

impl DeckVoice {
    pub fn new(
        label: DeckLabel,
        sample_rate: f32,
        backend: FilterBackend,
    ) -> Result<Self, FilterError> {
        Ok(Self {
            label,
            buffer: None,
            playhead: 0.0,
            phase: DeckPhase::Idle,
            looping: false,
            queued_start_frame: None,
            pending_play: None,
            unbind_after_stop: false,
            env_gain: 0.0,
            env_step: 0.0,
            vol_current: 1.0,
            rate_current: 1.0,
            weight_current: 1.0,
            rate_ratio: 1.0,
            param_step: 1.0 / (PARAM_GLIDE_SECONDS * sample_rate),
            rate_step: (RATE_MAX - RATE_MIN) / (PARAM_GLIDE_SECONDS * sample_rate),
            play_ramp_step: 1.0 / (PLAY_RAMP_SECONDS * sample_rate),
            stop_ramp_step: 1.0 / (STOP_RAMP_SECONDS * sample_rate),
            filter: ThreeBandFilter::new(sample_rate, backend)?,
        })
    }

    pub fn label(&self) -> DeckLabel {
        self.label
    }

    pub fn phase(&self) -> DeckPhase {
        self.phase
    }

    pub fn buffer_id(&self) -> Option<u32> {
        self.buffer.as_ref().map(|b| b.id)
    }

    /// Bind a buffer and park the playhead. Replaces any previous binding; a
    /// deck that was mid-play is cut over without a ramp.
    pub fn cue(&mut self, buffer: Arc<AudioBuffer>, position_frames: usize, engine_rate: f32) {
        let frames = buffer.frames();
        self.playhead = position_frames.min(frames.saturating_sub(1)) as f64;
        self.rate_ratio = buffer.sample_rate / engine_rate;
        self.buffer = Some(buffer);
        self.phase = DeckPhase::Cued;
        self.looping = false;
        self.queued_start_frame = None;
        self.pending_play = None;
        self.unbind_after_stop = false;
        self.env_gain = 0.0;
        self.env_step = 0.0;
        self.filter.reset();
        log::debug!("Deck {}: Cued at frame {}", self.label, self.playhead);
    }

    /// Start playback now. From Stopping the request is queued and applied
    /// when the ramp-out completes (the deck-busy contract).
    pub fn play(&mut self, params: PlayParams, shared: &DeckShared) {
        if self.buffer.is_none() {
            log::debug!("Deck {}: Play ignored, no buffer cued", self.label);
            return;
        }
        if self.phase == DeckPhase::Stopping {
            log::debug!("Deck {}: Busy in ramp-out, play queued", self.label);
            self.pending_play = Some(params);
            return;
        }
        self.begin_play(params, shared);
    }

    fn begin_play(&mut self, params: PlayParams, shared: &DeckShared) {
        let frames = self.buffer.as_ref().map(|b| b.frames()).unwrap_or(0);
        if let Some(start) = params.start_frames {
            self.playhead = start.min(frames.saturating_sub(1)) as f64;
        }
        self.looping = params.looping;
        // Fresh start: snap the glided params to their targets so the stem
        // opens at the commanded rate and level, with only the ramp-in fade.
        self.vol_current = shared.volume.load(Ordering::Relaxed);
        self.rate_current = shared.rate.load(Ordering::Relaxed);
        self.env_gain = 0.0;
        self.env_step = self.play_ramp_step;
        self.phase = DeckPhase::Playing;
        self.queued_start_frame = None;
    }

    /// Queue a sample-accurate start at an absolute engine frame. Only valid
    /// from Cued; the transition happens inside the render callback.
    pub fn schedule_start(&mut self, start_frame: u64, params: PlayParams) {
        if self.phase != DeckPhase::Cued {
            log::debug!(
                "Deck {}: Group start ignored in phase {:?}",
                self.label,
                self.phase
            );
            return;
        }
        self.looping = params.looping;
        if let Some(start) = params.start_frames {
            let frames = self.buffer.as_ref().map(|b| b.frames()).unwrap_or(0);
            self.playhead = start.min(frames.saturating_sub(1)) as f64;
        }
        self.queued_start_frame = Some(start_frame);
    }

    /// Begin the ramp-out. Completes asynchronously inside render.
    pub fn stop(&mut self, ramp_step: Option<f32>) {
        match self.phase {
            DeckPhase::Playing => {
                self.phase = DeckPhase::Stopping;
                self.env_step = -ramp_step.unwrap_or(self.stop_ramp_step);
            }
            DeckPhase::Stopping => {}
            _ => {
                self.queued_start_frame = None;
                log::debug!("Deck {}: Stop in phase {:?} is a no-op", self.label, self.phase);
            }
        }
    }

    /// Immediate transition to Idle, dropping the buffer binding.
    pub fn unbind(&mut self) {
        self.buffer = None;
        self.phase = DeckPhase::Idle;
        self.playhead = 0.0;
        self.looping = false;
        self.queued_start_frame = None;
        self.pending_play = None;
        self.unbind_after_stop = false;
        self.env_gain = 0.0;
        self.env_step = 0.0;
    }

    /// Stop with the short safety ramp and drop the binding once the ramp
    /// completes. Decks with no audio in flight unbind immediately.
    pub fn halt(&mut self, ramp_step: f32) {
        match self.phase {
            DeckPhase::Playing | DeckPhase::Stopping => {
                self.phase = DeckPhase::Stopping;
                self.env_step = -ramp_step;
                self.pending_play = None;
                self.queued_start_frame = None;
                self.unbind_after_stop = true;
            }
            _ => self.unbind(),
        }
    }

    /// Render this deck's contribution into `out` (interleaved stereo,
    /// pre-zeroed). Returns true if any frames were written.
    pub fn render_into(
        &mut self,
        out: &mut [f32],
        frames: usize,
        chunk_start_frame: u64,
        shared: &DeckShared,
        tempo_ratio: f32,
        filters_enabled: bool,
    ) -> bool {
        let (span_start, active) = match self.phase {
            DeckPhase::Idle => (0, false),
            DeckPhase::Cued => match self.queued_start_frame {
                Some(start) if start < chunk_start_frame + frames as u64 => {
                    let offset = start.saturating_sub(chunk_start_frame) as usize;
                    self.env_gain = 0.0;
                    self.env_step = self.play_ramp_step;
                    self.vol_current = shared.volume.load(Ordering::Relaxed);
                    self.rate_current = shared.rate.load(Ordering::Relaxed);
                    self.phase = DeckPhase::Playing;
                    self.queued_start_frame = None;
                    (offset, true)
                }
                _ => (0, false),
            },
            DeckPhase::Playing | DeckPhase::Stopping => (0, true),
        };
        if !active {
            self.publish(shared);
            return false;
        }

        let written = self.pull_frames(out, span_start, frames, shared, tempo_ratio);
        if written > 0 {
            let span = &mut out[span_start * 2..(span_start + written) * 2];
            if filters_enabled {
                self.filter.set_gain(EqBand::Low, shared.eq_low.load(Ordering::Relaxed));
                self.filter.set_gain(EqBand::Mid, shared.eq_mid.load(Ordering::Relaxed));
                self.filter.set_gain(EqBand::High, shared.eq_high.load(Ordering::Relaxed));
                self.filter.process(span, written);
            }
            self.apply_gains(span, written, shared);
        }
        self.publish(shared);
        written > 0
    }

    /// Pass 1: advance the playhead and write raw interpolated frames.
    fn pull_frames(
        &mut self,
        out: &mut [f32],
        span_start: usize,
        frames: usize,
        shared: &DeckShared,
        tempo_ratio: f32,
    ) -> usize {
        let Some(buffer) = self.buffer.clone() else {
            self.phase = DeckPhase::Idle;
            return 0;
        };
        let samples = buffer.samples.as_slice();
        let len = buffer.frames();
        if len == 0 {
            self.phase = DeckPhase::Idle;
            return 0;
        }
        let rate_target = shared.rate.load(Ordering::Relaxed);
        let mut written = 0;
        for i in span_start..frames {
            // Wrap or finish before reading, so the frame at the boundary is
            // neither skipped nor doubled.
            if !self.resolve_boundary(len) {
                break;
            }
            if self.rate_current < rate_target {
                self.rate_current = (self.rate_current + self.rate_step).min(rate_target);
            } else if self.rate_current > rate_target {
                self.rate_current = (self.rate_current - self.rate_step).max(rate_target);
            }
            let idx = self.playhead as usize;
            let frac = (self.playhead - idx as f64) as f32;
            let next = if self.looping { (idx + 1) % len } else { (idx + 1).min(len - 1) };
            let l0 = samples[idx * 2];
            let r0 = samples[idx * 2 + 1];
            let l1 = samples[next * 2];
            let r1 = samples[next * 2 + 1];
            out[i * 2] = l0 + (l1 - l0) * frac;
            out[i * 2 + 1] = r0 + (r1 - r0) * frac;
            written = i - span_start + 1;
            let effective = self.rate_current * tempo_ratio * self.rate_ratio;
            self.playhead += effective as f64;
        }
        // The final advance can overshoot the end; resolve it here so the
        // playhead published after this chunk is always in bounds.
        self.resolve_boundary(len);
        written
    }

    /// Apply the wrap/end rules at a buffer boundary. Returns false when the
    /// deck left the playing phases (end of a non-looping stem).
    fn resolve_boundary(&mut self, len: usize) -> bool {
        if self.playhead < len as f64 {
            return true;
        }
        if self.looping {
            while self.playhead >= len as f64 {
                self.playhead -= len as f64;
            }
            true
        } else {
            self.playhead = 0.0;
            self.phase = if self.phase == DeckPhase::Stopping {
                DeckPhase::Idle
            } else {
                DeckPhase::Cued
            };
            log::debug!("Deck {}: Reached end of buffer", self.label);
            false
        }
    }

    /// Pass 3: envelope, deck volume and crossfade weight, per frame.
    fn apply_gains(&mut self, span: &mut [f32], frames: usize, shared: &DeckShared) {
        let vol_target = shared.volume.load(Ordering::Relaxed);
        let weight_target = shared.weight.load(Ordering::Relaxed);
        for i in 0..frames {
            if self.env_step > 0.0 {
                self.env_gain = (self.env_gain + self.env_step).min(1.0);
                if self.env_gain >= 1.0 {
                    self.env_step = 0.0;
                }
            } else if self.env_step < 0.0 {
                self.env_gain = (self.env_gain + self.env_step).max(0.0);
                if self.env_gain <= 0.0 && self.phase == DeckPhase::Stopping {
                    self.finish_stop(shared);
                }
            }
            if self.vol_current < vol_target {
                self.vol_current = (self.vol_current + self.param_step).min(vol_target);
            } else if self.vol_current > vol_target {
                self.vol_current = (self.vol_current - self.param_step).max(vol_target);
            }
            if self.weight_current < weight_target {
                self.weight_current = (self.weight_current + self.param_step).min(weight_target);
            } else if self.weight_current > weight_target {
                self.weight_current = (self.weight_current - self.param_step).max(weight_target);
            }
            let gain = self.env_gain * self.vol_current * self.weight_current;
            span[i * 2] *= gain;
            span[i * 2 + 1] *= gain;
        }
    }

    fn finish_stop(&mut self, shared: &DeckShared) {
        self.phase = DeckPhase::Idle;
        self.env_step = 0.0;
        log::debug!("Deck {}: Stop ramp complete", self.label);
        if self.unbind_after_stop {
            self.unbind();
            return;
        }
        if let Some(params) = self.pending_play.take() {
            log::debug!("Deck {}: Applying queued play", self.label);
            self.begin_play(params, shared);
        }
    }

    fn publish(&self, shared: &DeckShared) {
        shared.phase.store(self.phase as u8, Ordering::Relaxed);
        shared
            .playhead_frames
            .store(self.playhead as u64, Ordering::Relaxed);
    }
}
