use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};

use super::config::{ENGINE_SAMPLE_RATE, OUTPUT_CHANNELS};
use super::errors::EngineError;
use super::mixer::MixerEngine;

/// The output format negotiated with the device before the engine is built.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Pick the output device: by index into the host's output device list when
/// given, the host default otherwise.
pub fn open_device(device_index: Option<usize>) -> Result<(Device, NegotiatedConfig), EngineError> {
    let host = cpal::default_host();
    let device = match device_index {
        Some(index) => {
            let devices: Vec<Device> = host
                .output_devices()
                .map_err(|e| EngineError::DeviceEnumeration(e.to_string()))?
                .collect();
            let available = devices.len();
            devices
                .into_iter()
                .nth(index)
                .ok_or(EngineError::DeviceIndexOutOfRange { index, available })?
        }
        None => host.default_output_device().ok_or(EngineError::NoDevice)?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Audio: Using output device '{}'", device_name);

    let config = negotiate_config(&device, &device_name)?;
    log::info!(
        "Audio: Output format: {} channels at {} Hz",
        config.channels,
        config.sample_rate
    );
    Ok((device, config))
}

/// Find a usable f32 output configuration, preferring stereo at the engine
/// rate, then any f32 stereo layout, then the device default.
fn negotiate_config(device: &Device, device_name: &str) -> Result<NegotiatedConfig, EngineError> {
    let supported: Vec<SupportedStreamConfigRange> = match device.supported_output_configs() {
        Ok(configs) => configs.collect(),
        Err(e) => {
            log::warn!(
                "Audio: Could not enumerate configs for '{}', falling back to default: {}",
                device_name,
                e
            );
            vec![]
        }
    };

    let supports_engine_rate = |c: &SupportedStreamConfigRange| {
        c.min_sample_rate().0 <= ENGINE_SAMPLE_RATE && c.max_sample_rate().0 >= ENGINE_SAMPLE_RATE
    };
    let mut best: Option<&SupportedStreamConfigRange> = None;
    for candidate in &supported {
        if candidate.sample_format() != SampleFormat::F32 || !supports_engine_rate(candidate) {
            continue;
        }
        if candidate.channels() == OUTPUT_CHANNELS {
            best = Some(candidate);
            break;
        }
        if best.is_none() && candidate.channels() > OUTPUT_CHANNELS {
            best = Some(candidate);
        }
    }
    if let Some(best) = best {
        return Ok(NegotiatedConfig {
            sample_rate: ENGINE_SAMPLE_RATE,
            channels: best.channels(),
        });
    }

    // No config carries the engine rate; take the device default and let the
    // effective-rate adjustment absorb the difference.
    match device.default_output_config() {
        Ok(default) if default.sample_format() == SampleFormat::F32 => {
            log::warn!(
                "Audio: '{}' does not support {} Hz; using device default {} Hz",
                device_name,
                ENGINE_SAMPLE_RATE,
                default.sample_rate().0
            );
            Ok(NegotiatedConfig {
                sample_rate: default.sample_rate().0,
                channels: default.channels().max(OUTPUT_CHANNELS),
            })
        }
        _ => Err(EngineError::NoUsableConfig {
            device: device_name.to_string(),
        }),
    }
}

/// Build and start the output stream. The engine lives behind a try-lock the
/// callback takes uncontended; if the lock is ever unavailable the callback
/// emits silence for that chunk rather than blocking. Dropping the returned
/// stream stops audio.
pub fn start_stream(
    device: &Device,
    negotiated: NegotiatedConfig,
    requested_buffer_frames: u32,
    engine: MixerEngine,
) -> Result<Stream, EngineError> {
    let channels = negotiated.channels as usize;
    let engine = std::sync::Arc::new(std::sync::Mutex::new(engine));

    let build = |buffer_size: BufferSize| {
        let engine = engine.clone();
        let stream_config = StreamConfig {
            channels: negotiated.channels,
            sample_rate: cpal::SampleRate(negotiated.sample_rate),
            buffer_size,
        };
        let data_callback = move |output: &mut [f32], _info: &cpal::OutputCallbackInfo| {
            if let Ok(mut engine) = engine.try_lock() {
                engine.process(output, channels);
            } else {
                for sample in output.iter_mut() {
                    *sample = 0.0;
                }
            }
        };
        let error_callback = |err: cpal::StreamError| {
            log::error!("Audio: Stream error: {}", err);
        };
        device.build_output_stream(&stream_config, data_callback, error_callback, None)
    };

    let stream = match build(BufferSize::Fixed(requested_buffer_frames)) {
        Ok(stream) => stream,
        Err(e) => {
            // Some hosts reject fixed buffer sizes outright; retry with the
            // device-chosen size. The engine copes with any callback length
            // up to its pre-allocated maximum.
            log::warn!(
                "Audio: Fixed buffer of {} frames rejected ({}), retrying with device default",
                requested_buffer_frames,
                e
            );
            build(BufferSize::Default)?
        }
    };
    stream.play()?;
    log::info!(
        "Audio: Stream started ({} frames requested, ~{:.1} ms)",
        requested_buffer_frames,
        requested_buffer_frames as f32 / negotiated.sample_rate as f32 * 1000.0
    );
    Ok(stream)
}
