use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use super::commands::EngineCommand;
use super::config::{
    BUDGET_WARN_FRACTION, CLEANUP_RAMP_SECONDS, MAX_BUFFER_FRAMES, PARAM_GLIDE_SECONDS,
    STATS_WINDOW_SECONDS,
};
use super::deck::DeckVoice;
use super::errors::FilterError;
use super::filter::FilterBackend;
use super::types::{DeckLabel, EngineShared, NUM_DECKS};

/// Per-window callback timing statistics. Updated on the render path but only
/// inspected (and possibly logged) when a ~10 s window closes; the nominal
/// case emits nothing.
struct CallbackStats {
    window_frames: u64,
    frames: u64,
    callbacks: u64,
    sum_ns: u64,
    max_ratio: f32,
}

impl CallbackStats {
    fn new(sample_rate: f32) -> Self {
        Self {
            window_frames: (STATS_WINDOW_SECONDS * sample_rate) as u64,
            frames: 0,
            callbacks: 0,
            sum_ns: 0,
            max_ratio: 0.0,
        }
    }

    fn record(&mut self, elapsed_ns: u64, frames: usize, sample_rate: f32, shared: &EngineShared) {
        let budget_ns = frames as f32 / sample_rate * 1e9;
        let ratio = elapsed_ns as f32 / budget_ns;
        if ratio > 1.0 {
            shared.budget_overruns.fetch_add(1, Ordering::Relaxed);
        }
        self.frames += frames as u64;
        self.callbacks += 1;
        self.sum_ns += elapsed_ns;
        if ratio > self.max_ratio {
            self.max_ratio = ratio;
        }
        if self.frames >= self.window_frames {
            if self.max_ratio >= BUDGET_WARN_FRACTION {
                let avg_us = self.sum_ns as f64 / self.callbacks as f64 / 1000.0;
                log::warn!(
                    "Audio: Callback budget pressure: max {:.0}% of budget (avg {:.1} us over {} callbacks)",
                    self.max_ratio * 100.0,
                    avg_us,
                    self.callbacks
                );
            }
            self.frames = 0;
            self.callbacks = 0;
            self.sum_ns = 0;
            self.max_ratio = 0.0;
        }
    }
}

/// The mixing core. Owned by the output callback: drains the command queue,
/// renders each deck through its filter and gain chain, sums into the device
/// buffer, clamps, and applies master gain. No locks, allocation or I/O here.
pub struct MixerEngine {
    decks: [DeckVoice; NUM_DECKS],
    commands: rtrb::Consumer<EngineCommand>,
    shared: Arc<EngineShared>,
    scratch: Vec<f32>,
    master_current: f32,
    master_step: f32,
    cleanup_ramp_step: f32,
    sample_rate: f32,
    stats: CallbackStats,
}

impl MixerEngine {
    pub fn new(
        shared: Arc<EngineShared>,
        commands: rtrb::Consumer<EngineCommand>,
        backend: FilterBackend,
    ) -> Result<Self, FilterError> {
        let sample_rate = shared.sample_rate as f32;
        let decks = [
            DeckVoice::new(DeckLabel::A, sample_rate, backend)?,
            DeckVoice::new(DeckLabel::B, sample_rate, backend)?,
            DeckVoice::new(DeckLabel::C, sample_rate, backend)?,
            DeckVoice::new(DeckLabel::D, sample_rate, backend)?,
        ];
        let master_current = shared.master_gain.load(Ordering::Relaxed);
        Ok(Self {
            decks,
            commands,
            shared,
            scratch: vec![0.0; MAX_BUFFER_FRAMES * 2],
            master_current,
            master_step: 1.0 / (PARAM_GLIDE_SECONDS * sample_rate),
            cleanup_ramp_step: 1.0 / (CLEANUP_RAMP_SECONDS * sample_rate),
            sample_rate,
            stats: CallbackStats::new(sample_rate),
        })
    }

    /// Render one device buffer of interleaved output with `channels`
    /// channels per frame. The stereo mix lands in channels 0 and 1; any
    /// further channels stay silent.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        let started = Instant::now();
        self.drain_commands();

        for sample in output.iter_mut() {
            *sample = 0.0;
        }
        if channels < 2 {
            return;
        }
        let frames = (output.len() / channels).min(MAX_BUFFER_FRAMES);
        let chunk_start = self.shared.now_frames();
        let tempo_ratio = self.shared.tempo_ratio.load(Ordering::Relaxed);
        let filters_enabled = self.shared.filters_enabled.load(Ordering::Relaxed);

        for deck in self.decks.iter_mut() {
            let scratch = &mut self.scratch[..frames * 2];
            for s in scratch.iter_mut() {
                *s = 0.0;
            }
            let deck_shared = self.shared.deck(deck.label());
            if deck.render_into(scratch, frames, chunk_start, deck_shared, tempo_ratio, filters_enabled) {
                for i in 0..frames {
                    output[i * channels] += scratch[i * 2];
                    output[i * channels + 1] += scratch[i * 2 + 1];
                }
            }
        }

        let master_target = self.shared.master_gain.load(Ordering::Relaxed);
        for i in 0..frames {
            if self.master_current < master_target {
                self.master_current = (self.master_current + self.master_step).min(master_target);
            } else if self.master_current > master_target {
                self.master_current = (self.master_current - self.master_step).max(master_target);
            }
            let l = output[i * channels].clamp(-1.0, 1.0);
            let r = output[i * channels + 1].clamp(-1.0, 1.0);
            output[i * channels] = l * self.master_current;
            output[i * channels + 1] = r * self.master_current;
        }

        self.shared
            .frames_rendered
            .fetch_add(frames as u64, Ordering::Release);
        let elapsed_ns = started.elapsed().as_nanos() as u64;
        self.stats
            .record(elapsed_ns, frames, self.sample_rate, &self.shared);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                EngineCommand::Cue { deck, buffer, position_frames } => {
                    self.decks[deck.index()].cue(buffer, position_frames, self.sample_rate);
                }
                EngineCommand::Play { deck, params } => {
                    let deck_shared = self.shared.deck(deck);
                    self.decks[deck.index()].play(params, deck_shared);
                }
                EngineCommand::StartGroup { deck, start_frame, params } => {
                    self.decks[deck.index()].schedule_start(start_frame, params);
                }
                EngineCommand::Stop { deck } => {
                    self.decks[deck.index()].stop(None);
                }
                EngineCommand::Unbind { deck } => {
                    self.decks[deck.index()].halt(self.cleanup_ramp_step);
                }
                EngineCommand::StopAll => {
                    for deck in self.decks.iter_mut() {
                        deck.halt(self.cleanup_ramp_step);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffers::AudioBuffer;
    use crate::audio::commands::command_channel;
    use crate::audio::deck::PlayParams;
    use crate::audio::types::DeckPhase;

    const SR: u32 = 44100;

    fn sine_buffer(id: u32, frames: usize, freq: f32, amp: f32) -> Arc<AudioBuffer> {
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin();
            samples.push(s);
            samples.push(s);
        }
        Arc::new(AudioBuffer {
            id,
            path: "sine.wav".into(),
            name: "sine".into(),
            sample_rate: SR as f32,
            samples,
        })
    }

    fn engine() -> (MixerEngine, rtrb::Producer<EngineCommand>, Arc<EngineShared>) {
        let shared = Arc::new(EngineShared::new(SR, 1.0, false));
        let (tx, rx) = command_channel();
        let engine = MixerEngine::new(shared.clone(), rx, FilterBackend::SampleLoop).unwrap();
        (engine, tx, shared)
    }

    fn run_chunks(engine: &mut MixerEngine, chunks: usize, frames: usize) -> Vec<f32> {
        let mut last = vec![0.0f32; frames * 2];
        for _ in 0..chunks {
            for s in last.iter_mut() {
                *s = 0.0;
            }
            engine.process(&mut last, 2);
        }
        last
    }

    #[test]
    fn silent_with_no_decks_playing() {
        let (mut engine, _tx, _shared) = engine();
        let out = run_chunks(&mut engine, 4, 512);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn unity_chain_passes_buffer_through() {
        let (mut engine, mut tx, shared) = engine();
        let buf = sine_buffer(100, SR as usize, 440.0, 0.8);
        tx.push(EngineCommand::Cue { deck: DeckLabel::A, buffer: buf.clone(), position_frames: 0 })
            .ok()
            .unwrap();
        tx.push(EngineCommand::Play {
            deck: DeckLabel::A,
            params: PlayParams { looping: false, start_frames: None },
        })
        .ok()
        .unwrap();
        // Render past the 10 ms ramp-in, then compare sample-for-sample.
        run_chunks(&mut engine, 2, 1024);
        let mut out = vec![0.0f32; 1024 * 2];
        engine.process(&mut out, 2);
        let playhead_before = 2 * 1024;
        for i in 0..1024 {
            let want = buf.samples[(playhead_before + i) * 2];
            assert!(
                (out[i * 2] - want).abs() <= 1e-6,
                "sample {i}: got {} want {want}",
                out[i * 2]
            );
            assert!((out[i * 2 + 1] - want).abs() <= 1e-6);
        }
        assert_eq!(shared.deck(DeckLabel::A).phase(), DeckPhase::Playing);
    }

    #[test]
    fn crossfade_weights_select_decks() {
        let (mut engine, mut tx, shared) = engine();
        tx.push(EngineCommand::Cue {
            deck: DeckLabel::A,
            buffer: sine_buffer(100, SR as usize, 440.0, 0.5),
            position_frames: 0,
        })
        .ok()
        .unwrap();
        tx.push(EngineCommand::Cue {
            deck: DeckLabel::B,
            buffer: sine_buffer(1100, SR as usize, 880.0, 0.5),
            position_frames: 0,
        })
        .ok()
        .unwrap();
        for deck in [DeckLabel::A, DeckLabel::B] {
            tx.push(EngineCommand::Play {
                deck,
                params: PlayParams { looping: true, start_frames: None },
            })
            .ok()
            .unwrap();
        }
        shared.deck(DeckLabel::A).weight.store(1.0, Ordering::Relaxed);
        shared.deck(DeckLabel::B).weight.store(0.0, Ordering::Relaxed);
        let out = run_chunks(&mut engine, 4, 1024);
        let rms_a_only = rms(&out);
        assert!(rms_a_only > 0.1, "deck A missing from the mix");

        // Flip the weights: B only.
        shared.deck(DeckLabel::A).weight.store(0.0, Ordering::Relaxed);
        shared.deck(DeckLabel::B).weight.store(1.0, Ordering::Relaxed);
        let out = run_chunks(&mut engine, 4, 1024);
        assert!(rms(&out) > 0.1, "deck B missing from the mix");

        // Both at 0.5: each contributes half.
        shared.deck(DeckLabel::A).weight.store(0.5, Ordering::Relaxed);
        shared.deck(DeckLabel::B).weight.store(0.5, Ordering::Relaxed);
        let out = run_chunks(&mut engine, 4, 1024);
        let rms_mid = rms(&out);
        assert!(rms_mid > 0.05 && rms_mid < rms_a_only);
    }

    #[test]
    fn output_is_clamped_before_master() {
        let (mut engine, mut tx, _shared) = engine();
        // Two full-scale stems on the same frequency sum past 1.0.
        for (deck, id) in [(DeckLabel::A, 100), (DeckLabel::B, 1100)] {
            tx.push(EngineCommand::Cue {
                deck,
                buffer: sine_buffer(id, SR as usize, 110.0, 1.0),
                position_frames: 0,
            })
            .ok()
            .unwrap();
            tx.push(EngineCommand::Play {
                deck,
                params: PlayParams { looping: true, start_frames: None },
            })
            .ok()
            .unwrap();
        }
        let out = run_chunks(&mut engine, 8, 1024);
        assert!(out.iter().all(|&s| (-1.0..=1.0).contains(&s)));
        assert!(out.iter().any(|&s| s.abs() > 0.99), "clamp never engaged");
    }

    #[test]
    fn master_gain_scales_the_mix() {
        let (mut engine, mut tx, shared) = engine();
        tx.push(EngineCommand::Cue {
            deck: DeckLabel::A,
            buffer: sine_buffer(100, SR as usize, 440.0, 0.5),
            position_frames: 0,
        })
        .ok()
        .unwrap();
        tx.push(EngineCommand::Play {
            deck: DeckLabel::A,
            params: PlayParams { looping: true, start_frames: None },
        })
        .ok()
        .unwrap();
        let loud = rms(&run_chunks(&mut engine, 4, 1024));
        shared.master_gain.store(0.25, Ordering::Relaxed);
        let quiet = rms(&run_chunks(&mut engine, 4, 1024));
        assert!(
            quiet < loud * 0.35,
            "master gain had no effect: {quiet} vs {loud}"
        );
    }

    #[test]
    fn stop_all_halts_and_unbinds_every_deck() {
        let (mut engine, mut tx, shared) = engine();
        for (deck, id) in [(DeckLabel::A, 100), (DeckLabel::C, 2100)] {
            tx.push(EngineCommand::Cue {
                deck,
                buffer: sine_buffer(id, SR as usize, 220.0, 0.5),
                position_frames: 0,
            })
            .ok()
            .unwrap();
            tx.push(EngineCommand::Play {
                deck,
                params: PlayParams { looping: true, start_frames: None },
            })
            .ok()
            .unwrap();
        }
        run_chunks(&mut engine, 2, 1024);
        tx.push(EngineCommand::StopAll).ok().unwrap();
        let out = run_chunks(&mut engine, 4, 1024);
        assert!(out.iter().all(|&s| s == 0.0), "audio survived cleanup");
        for deck in DeckLabel::ALL {
            assert_eq!(shared.deck(deck).phase(), DeckPhase::Idle);
        }
        assert!(engine.decks.iter().all(|d| d.buffer_id().is_none()));
    }

    #[test]
    fn engine_clock_advances_by_frames() {
        let (mut engine, _tx, shared) = engine();
        run_chunks(&mut engine, 3, 512);
        assert_eq!(shared.now_frames(), 3 * 512);
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }
}
