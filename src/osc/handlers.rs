use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rayon::prelude::*;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

use crate::audio::buffers::{AudioBuffer, BufferStore, absolute_path};
use crate::audio::commands::EngineCommand;
use crate::audio::config::{GROUP_START_LOAD_TIMEOUT_MS, RATE_MAX, RATE_MIN};
use crate::audio::deck::PlayParams;
use crate::audio::errors::BufferStoreError;
use crate::audio::filter::cut_gain_from_percent;
use crate::audio::tempo::{MovementPart, TempoGovernor};
use crate::audio::types::{DeckLabel, EngineShared, EqBand, NUM_DECKS};

/// A stem decode in flight for a deck's cue. The deck commits the cue when
/// the decode lands; /start_group waits on it with a bounded timeout.
struct PendingLoad {
    buffer_id: u32,
    path: String,
    position_seconds: f64,
    handle: JoinHandle<Result<AudioBuffer, BufferStoreError>>,
}

/// Everything the OSC router mutates. Owned by the single router task; the
/// audio context is reached only through the command queue and the shared
/// atomic cells.
pub struct ControlState {
    store: BufferStore,
    /// buffer id -> deck, fixed at /cue time. /play_stem resolves through
    /// this and rejects ids that were never bound.
    bindings: HashMap<u32, DeckLabel>,
    deck_buffer: [Option<u32>; NUM_DECKS],
    next_auto_id: [u32; NUM_DECKS],
    pending: [Option<PendingLoad>; NUM_DECKS],
    commands: rtrb::Producer<EngineCommand>,
    shared: Arc<EngineShared>,
    pub governor: TempoGovernor,
}

impl ControlState {
    pub fn new(
        commands: rtrb::Producer<EngineCommand>,
        shared: Arc<EngineShared>,
        governor: TempoGovernor,
    ) -> Self {
        Self {
            store: BufferStore::new(),
            bindings: HashMap::new(),
            deck_buffer: [None; NUM_DECKS],
            next_auto_id: [
                DeckLabel::A.base_buffer_id(),
                DeckLabel::B.base_buffer_id(),
                DeckLabel::C.base_buffer_id(),
                DeckLabel::D.base_buffer_id(),
            ],
            pending: [None, None, None, None],
            commands,
            shared,
            governor,
        }
    }

    pub fn filters_enabled(&self) -> bool {
        self.shared.filters_enabled.load(Ordering::Relaxed)
    }

    fn send(&mut self, command: EngineCommand, verb: &str) {
        if self.commands.push(command).is_err() {
            log::warn!("OSC: Command queue full, dropping {}", verb);
        }
    }

    // --- Buffer management ---

    pub async fn load_buffer(&mut self, id: u32, path: String, name: String) {
        if let Some(existing) = self.store.get(id) {
            if existing.path == Path::new(&path) {
                log::info!("OSC: Buffer {} already loaded from '{}'", id, path);
                return;
            }
        }
        let decode_path = path.clone();
        let decode_name = name.clone();
        let result =
            tokio::task::spawn_blocking(move || BufferStore::decode(id, &decode_path, &decode_name))
                .await;
        match result {
            Ok(Ok(buffer)) => {
                let frames = buffer.frames();
                self.store.insert(buffer);
                log::info!(
                    "OSC: Loaded buffer {} '{}' ({} frames from '{}')",
                    id,
                    name,
                    frames,
                    path
                );
            }
            Ok(Err(e)) => {
                log::error!("OSC: load_buffer {} failed: {}", id, e);
            }
            Err(join_error) => {
                log::error!("OSC: load_buffer {} decode task panicked: {}", id, join_error);
            }
        }
    }

    pub fn free_buffer(&mut self, id: u32) {
        if let Some(deck) = self.bindings.remove(&id) {
            log::info!("OSC: Buffer {} bound to deck {}, forcing idle first", id, deck);
            self.deck_buffer[deck.index()] = None;
            // An in-flight load for this id must not resurrect the buffer
            // when it lands.
            let in_flight = self.pending[deck.index()]
                .as_ref()
                .is_some_and(|p| p.buffer_id == id);
            if in_flight {
                if let Some(pending) = self.pending[deck.index()].take() {
                    pending.handle.abort();
                }
            }
            self.send(EngineCommand::Unbind { deck }, "unbind");
        }
        self.store.free(id);
    }

    pub fn mixer_cleanup(&mut self) {
        log::info!("OSC: Mixer cleanup: stopping all decks and freeing all buffers");
        self.send(EngineCommand::StopAll, "stop_all");
        self.bindings.clear();
        self.deck_buffer = [None; NUM_DECKS];
        for slot in self.pending.iter_mut() {
            if let Some(pending) = slot.take() {
                pending.handle.abort();
            }
        }
        self.store.free_all();
    }

    // --- Cue / play / stop ---

    pub fn cue(&mut self, deck: DeckLabel, path: String, position_seconds: f64) {
        if let Some(old) = self.pending[deck.index()].take() {
            log::warn!(
                "OSC: Deck {}: Replacing in-flight load of '{}'",
                deck,
                old.path
            );
            old.handle.abort();
            self.bindings.remove(&old.buffer_id);
        }
        // Fail before any state change when the file is plainly absent.
        if std::fs::metadata(&path).is_err() {
            log::error!(
                "OSC: cue {}: File does not exist: requested '{}', absolute '{}'",
                deck,
                path,
                absolute_path(&path)
            );
            return;
        }

        // Re-cue from the store when this deck already holds the same path.
        if let Some(id) = self.deck_buffer[deck.index()] {
            if let Some(buffer) = self.store.get(id) {
                if buffer.path == Path::new(&path) {
                    let position_frames = (position_seconds.max(0.0) * buffer.sample_rate as f64) as usize;
                    let buffer = buffer.clone();
                    log::info!("OSC: Deck {}: Re-cueing buffer {} at {:.3}s", deck, id, position_seconds);
                    self.send(
                        EngineCommand::Cue { deck, buffer, position_frames },
                        "cue",
                    );
                    return;
                }
            }
        }

        // Replacing a different stem: retire the previous binding so the old
        // id can no longer route to this deck, and drop its samples.
        if let Some(old_id) = self.deck_buffer[deck.index()].take() {
            self.bindings.remove(&old_id);
            if self.store.contains(old_id) {
                self.store.free(old_id);
            }
        }

        let id = self.next_auto_id[deck.index()];
        self.next_auto_id[deck.index()] += 1;
        let name = Path::new(&path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        log::info!(
            "OSC: Deck {}: Cue '{}' as buffer {} at {:.3}s",
            deck,
            path,
            id,
            position_seconds
        );
        let decode_path = path.clone();
        let handle =
            tokio::task::spawn_blocking(move || BufferStore::decode(id, &decode_path, &name));
        self.bindings.insert(id, deck);
        self.deck_buffer[deck.index()] = Some(id);
        self.pending[deck.index()] = Some(PendingLoad {
            buffer_id: id,
            path,
            position_seconds,
            handle,
        });
    }

    /// Commit any decodes that have finished, so a cued deck reaches the
    /// engine without waiting for the next play or group start.
    pub async fn settle_finished(&mut self) {
        for deck in DeckLabel::ALL {
            let finished = self.pending[deck.index()]
                .as_ref()
                .is_some_and(|p| p.handle.is_finished());
            if finished {
                let _ = self.settle_pending(deck, None).await;
            }
        }
    }

    /// Resolve a deck's in-flight load. With no wait budget, only a decode
    /// that has already finished is committed. Returns false while a load is
    /// still outstanding or after it failed.
    async fn settle_pending(&mut self, deck: DeckLabel, wait: Option<Duration>) -> bool {
        let slot = &mut self.pending[deck.index()];
        let Some(pending) = slot.as_mut() else {
            return true;
        };
        let finished = match wait {
            Some(budget) => timeout(budget, &mut pending.handle).await.ok(),
            None if pending.handle.is_finished() => Some((&mut pending.handle).await),
            None => return false,
        };
        let Some(join_result) = finished else {
            log::warn!(
                "OSC: Deck {}: Load of '{}' still running after wait budget",
                deck,
                pending.path
            );
            return false;
        };
        let pending = slot.take().expect("pending load present");
        match join_result {
            Ok(Ok(buffer)) => {
                let position_frames =
                    (pending.position_seconds.max(0.0) * buffer.sample_rate as f64) as usize;
                let buffer = self.store.insert(buffer);
                self.send(
                    EngineCommand::Cue { deck, buffer, position_frames },
                    "cue",
                );
                true
            }
            Ok(Err(e)) => {
                log::error!("OSC: Deck {}: Load of '{}' failed: {}", deck, pending.path, e);
                self.bindings.remove(&pending.buffer_id);
                self.deck_buffer[deck.index()] = None;
                false
            }
            Err(join_error) => {
                log::error!(
                    "OSC: Deck {}: Decode task panicked for '{}': {}",
                    deck,
                    pending.path,
                    join_error
                );
                self.bindings.remove(&pending.buffer_id);
                self.deck_buffer[deck.index()] = None;
                false
            }
        }
    }

    pub async fn play_stem(&mut self, id: u32, rate: f32, volume: f32, looping: bool, start: f64) {
        let Some(&deck) = self.bindings.get(&id) else {
            log::warn!("OSC: play_stem {}: id not bound to any deck, rejecting", id);
            return;
        };
        if !self.settle_pending(deck, None).await {
            log::warn!("OSC: play_stem {}: buffer not loaded yet, ignoring", id);
            return;
        }
        let Some(buffer) = self.store.get(id) else {
            log::warn!("OSC: play_stem {}: buffer not in store, ignoring", id);
            return;
        };
        let start_frames = (start.max(0.0) * buffer.sample_rate as f64) as usize;
        let deck_shared = self.shared.deck(deck);
        deck_shared.set_volume(volume);
        deck_shared
            .rate
            .store(rate.clamp(RATE_MIN, RATE_MAX), Ordering::Relaxed);
        log::info!(
            "OSC: Deck {}: Play buffer {} (rate {:.3}, vol {:.2}, loop {}, start {:.3}s)",
            deck,
            id,
            rate,
            volume,
            looping,
            start
        );
        self.send(
            EngineCommand::Play {
                deck,
                params: PlayParams { looping, start_frames: Some(start_frames) },
            },
            "play",
        );
    }

    pub fn stop_stem(&mut self, id: u32) {
        let Some(&deck) = self.bindings.get(&id) else {
            log::warn!("OSC: stop_stem {}: id not bound to any deck", id);
            return;
        };
        log::info!("OSC: Deck {}: Stop buffer {}", deck, id);
        self.send(EngineCommand::Stop { deck }, "stop");
    }

    pub fn stem_volume(&mut self, id: u32, volume: f32) {
        let Some(&deck) = self.bindings.get(&id) else {
            log::warn!("OSC: stem_volume {}: id not bound to any deck", id);
            return;
        };
        self.shared.deck(deck).set_volume(volume);
    }

    pub async fn start_group(&mut self, delay_seconds: f64, decks: Vec<DeckLabel>) {
        let deadline = Instant::now() + Duration::from_millis(GROUP_START_LOAD_TIMEOUT_MS);
        let mut ready = Vec::with_capacity(decks.len());
        for deck in decks {
            let budget = deadline.saturating_duration_since(Instant::now());
            if self.settle_pending(deck, Some(budget)).await {
                if self.deck_buffer[deck.index()].is_some() {
                    ready.push(deck);
                } else {
                    log::warn!("OSC: start_group: Deck {} has nothing cued, skipping", deck);
                }
            } else {
                log::warn!(
                    "OSC: start_group: Deck {} load incomplete, starting without it",
                    deck
                );
            }
        }
        // Commit the shared engine time only after every load settled, so the
        // first chunk past the start frame is sample accurate for all decks.
        let start_frame = self.shared.now_frames()
            + (delay_seconds.max(0.0) * self.shared.sample_rate as f64) as u64;
        for deck in ready {
            log::info!("OSC: start_group: Deck {} starts at engine frame {}", deck, start_frame);
            self.send(
                EngineCommand::StartGroup {
                    deck,
                    start_frame,
                    params: PlayParams { looping: false, start_frames: None },
                },
                "start_group",
            );
        }
    }

    // --- Mixer parameters ---

    pub fn crossfade_levels(&mut self, weights: &[f32]) {
        for (deck, &weight) in DeckLabel::ALL.iter().zip(weights.iter()) {
            self.shared
                .deck(*deck)
                .weight
                .store(weight.clamp(0.0, 1.0), Ordering::Relaxed);
        }
        log::debug!("OSC: Crossfade weights {:?}", weights);
    }

    pub fn master_volume(&mut self, volume: f32) {
        self.shared
            .master_gain
            .store(volume.clamp(0.0, 1.0), Ordering::Relaxed);
        log::debug!("OSC: Master volume {:.2}", volume);
    }

    pub fn deck_eq(&mut self, deck: DeckLabel, band: EqBand, percent: f32) {
        self.shared
            .deck(deck)
            .set_eq_gain(band, cut_gain_from_percent(percent));
    }

    pub fn deck_eq_all(&mut self, deck: DeckLabel, low: f32, mid: f32, high: f32) {
        let deck_shared = self.shared.deck(deck);
        deck_shared.set_eq_gain(EqBand::Low, cut_gain_from_percent(low));
        deck_shared.set_eq_gain(EqBand::Mid, cut_gain_from_percent(mid));
        deck_shared.set_eq_gain(EqBand::High, cut_gain_from_percent(high));
    }

    // --- Status ---

    /// Build the /status.reply payload: buffer count, per-deck phase bytes,
    /// current BPM, tempo ratio, recent combined movement.
    pub fn status_args(&self) -> Vec<rosc::OscType> {
        let mut args = vec![rosc::OscType::Int(self.store.len() as i32)];
        for deck in DeckLabel::ALL {
            args.push(rosc::OscType::Int(
                self.shared.deck(deck).phase.load(Ordering::Relaxed) as i32,
            ));
        }
        args.push(rosc::OscType::Float(self.governor.current_bpm()));
        args.push(rosc::OscType::Float(self.governor.tempo_ratio()));
        args.push(rosc::OscType::Float(self.governor.recent_movement()));
        args
    }

    pub fn dance(&mut self, part: MovementPart, value: f32) {
        self.governor.update_movement(part, value);
    }

    // --- CLI preload ---

    /// Decode the --a/--b stems in parallel and cue them at the start.
    pub fn preload(&mut self, stems: Vec<(DeckLabel, PathBuf)>) {
        if stems.is_empty() {
            return;
        }
        let decoded: Vec<(DeckLabel, Result<AudioBuffer, BufferStoreError>)> = stems
            .par_iter()
            .map(|(deck, path)| {
                let id = deck.base_buffer_id();
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                (*deck, BufferStore::decode(id, &path.display().to_string(), &name))
            })
            .collect();
        for (deck, result) in decoded {
            match result {
                Ok(buffer) => {
                    let id = buffer.id;
                    let buffer = self.store.insert(buffer);
                    self.bindings.insert(id, deck);
                    self.deck_buffer[deck.index()] = Some(id);
                    self.next_auto_id[deck.index()] = id + 1;
                    log::info!("OSC: Preloaded deck {} with buffer {}", deck, id);
                    self.send(
                        EngineCommand::Cue { deck, buffer, position_frames: 0 },
                        "cue",
                    );
                }
                Err(e) => log::error!("OSC: Preload for deck {} failed: {}", deck, e),
            }
        }
    }
}
