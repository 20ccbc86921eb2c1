use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::decoding;
use super::errors::BufferStoreError;

/// An immutable decoded stem. Never mutated after a successful load; decks
/// reference it through `Arc` clones handed out by the [`BufferStore`].
#[derive(Debug)]
pub struct AudioBuffer {
    pub id: u32,
    pub path: PathBuf,
    pub name: String,
    /// Native rate of the file. Playback folds `sample_rate / engine_rate`
    /// into the effective playhead step instead of resampling on load.
    pub sample_rate: f32,
    /// Interleaved stereo f32 frames.
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Resolve a requested path to its absolute form for error messages. Missing
/// files cannot be canonicalized, so fall back to cwd-joined.
pub fn absolute_path(requested: &str) -> String {
    let p = Path::new(requested);
    match p.canonicalize() {
        Ok(abs) => abs.display().to_string(),
        Err(_) => std::env::current_dir()
            .map(|cwd| cwd.join(p).display().to_string())
            .unwrap_or_else(|_| requested.to_string()),
    }
}

/// Owns every decoded stem, keyed by numeric buffer id. Lives on the control
/// context; the audio context only ever sees `Arc<AudioBuffer>` clones shipped
/// over the command queue.
#[derive(Default)]
pub struct BufferStore {
    entries: HashMap<u32, Arc<AudioBuffer>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Decode `path` and store it under `id`. Re-loading the same id with the
    /// same path is a no-op returning the cached buffer; a different path
    /// replaces the previous contents.
    pub fn load(&mut self, id: u32, path: &str, name: &str) -> Result<Arc<AudioBuffer>, BufferStoreError> {
        if let Some(existing) = self.entries.get(&id) {
            if existing.path == Path::new(path) {
                log::debug!("BufferStore: Buffer {} already loaded from '{}'", id, path);
                return Ok(existing.clone());
            }
            log::info!(
                "BufferStore: Replacing buffer {} ('{}' -> '{}')",
                id,
                existing.path.display(),
                path
            );
        }
        let buffer = Arc::new(Self::decode(id, path, name)?);
        self.entries.insert(id, buffer.clone());
        log::info!(
            "BufferStore: Loaded buffer {} '{}' ({} frames at {} Hz, '{}')",
            id,
            name,
            buffer.frames(),
            buffer.sample_rate,
            path
        );
        Ok(buffer)
    }

    /// Insert a buffer that was decoded elsewhere (the spawn_blocking path
    /// used by /cue and the CLI preloads).
    pub fn insert(&mut self, buffer: AudioBuffer) -> Arc<AudioBuffer> {
        let id = buffer.id;
        let arc = Arc::new(buffer);
        self.entries.insert(id, arc.clone());
        arc
    }

    /// Decode a file into a detached [`AudioBuffer`]. Does not touch the
    /// store; safe to call from a blocking task.
    pub fn decode(id: u32, path: &str, name: &str) -> Result<AudioBuffer, BufferStoreError> {
        match decoding::decode_file_to_stereo_samples(path) {
            Ok((samples, sample_rate)) => Ok(AudioBuffer {
                id,
                path: PathBuf::from(path),
                name: name.to_string(),
                sample_rate,
                samples,
            }),
            Err(e) if e.is_not_found() => {
                let absolute = absolute_path(path);
                log::error!(
                    "BufferStore: File not found for buffer {}: requested '{}', absolute '{}'",
                    id,
                    path,
                    absolute
                );
                Err(BufferStoreError::FileNotFound {
                    requested: path.to_string(),
                    absolute,
                })
            }
            Err(e) => {
                log::error!(
                    "BufferStore: Decode failed for buffer {} ('{}', absolute '{}'): {}",
                    id,
                    path,
                    absolute_path(path),
                    e
                );
                Err(BufferStoreError::Decode {
                    buffer_id: id,
                    source: e,
                })
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<&Arc<AudioBuffer>> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn free(&mut self, id: u32) -> bool {
        if self.entries.remove(&id).is_some() {
            log::info!("BufferStore: Freed buffer {}", id);
            true
        } else {
            log::warn!("BufferStore: Free for unknown buffer {}", id);
            false
        }
    }

    pub fn free_all(&mut self) {
        let n = self.entries.len();
        self.entries.clear();
        log::info!("BufferStore: Freed all {} buffers", n);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
