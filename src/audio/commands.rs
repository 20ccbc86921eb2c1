use std::sync::Arc;

use super::buffers::AudioBuffer;
use super::config::COMMAND_QUEUE_CAPACITY;
use super::deck::PlayParams;
use super::types::DeckLabel;

/// Structural changes shipped from the control context to the audio context.
/// Continuous parameters (volume, rate, EQ targets, weights, tempo ratio)
/// travel through the shared atomic cells instead; the queue carries only
/// what must be applied exactly once at a frame boundary.
pub enum EngineCommand {
    /// Bind a decoded stem to a deck and park the playhead.
    Cue {
        deck: DeckLabel,
        buffer: Arc<AudioBuffer>,
        position_frames: usize,
    },
    /// Immediate play transition.
    Play { deck: DeckLabel, params: PlayParams },
    /// Sample-accurate start at an absolute engine frame (group start).
    StartGroup {
        deck: DeckLabel,
        start_frame: u64,
        params: PlayParams,
    },
    /// Begin the ramp-out; the deck reaches Idle asynchronously.
    Stop { deck: DeckLabel },
    /// Force the deck idle and drop its buffer binding (buffer free path).
    Unbind { deck: DeckLabel },
    /// Stop everything with the short safety ramp (mixer cleanup).
    StopAll,
}

/// Create the SPSC command channel. Bounded; the control side drops and logs
/// rather than blocking when the audio side is not draining.
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
