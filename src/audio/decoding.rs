use std::fs::File;

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use super::errors::DecodingError;

/// Initial allocation for decoded stems; roughly 3 s of stereo at 44.1 kHz.
const INITIAL_STEREO_CAPACITY: usize = 1024 * 256;

/// Decodes an audio file to interleaved stereo f32 frames at the file's
/// native rate. Mono sources are upmixed by duplication; sources with more
/// than two channels keep their first two.
pub fn decode_file_to_stereo_samples(path: &str) -> Result<(Vec<f32>, f32), DecodingError> {
    let file = File::open(path).map_err(|e| DecodingError::FileOpen {
        path: path.to_string(),
        source: e,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let hint = Hint::new();
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodingError::Format {
            path: path.to_string(),
            source: e,
        })?;
    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| DecodingError::NoSuitableTrack {
            path: path.to_string(),
        })?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodingError::MissingSampleRate {
            path: path.to_string(),
        })? as f32;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| DecodingError::MissingChannelInfo {
            path: path.to_string(),
        })?
        .count();
    let codec_params = track.codec_params.clone();
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodingError::DecoderCreation {
            path: path.to_string(),
            source: e,
        })?;

    let mut samples: Vec<f32> = Vec::with_capacity(INITIAL_STEREO_CAPACITY);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(audio_buf) => {
                        if sample_buf.is_none() {
                            sample_buf = Some(SampleBuffer::<f32>::new(
                                audio_buf.capacity() as u64,
                                *audio_buf.spec(),
                            ));
                        }
                        if let Some(buf) = sample_buf.as_mut() {
                            buf.copy_interleaved_ref(audio_buf);
                            let raw_samples = buf.samples();

                            match channels {
                                1 => {
                                    samples.reserve(raw_samples.len() * 2);
                                    for &s in raw_samples {
                                        samples.push(s);
                                        samples.push(s);
                                    }
                                }
                                2 => samples.extend_from_slice(raw_samples),
                                n => {
                                    samples.reserve((raw_samples.len() / n) * 2);
                                    for chunk in raw_samples.chunks_exact(n) {
                                        samples.push(chunk[0]);
                                        samples.push(chunk[1]);
                                    }
                                }
                            }
                        }
                    }
                    Err(SymphoniaError::DecodeError(err_desc)) => {
                        log::warn!("Decode: Ignoring decode error in '{}': {}", path, err_desc);
                    }
                    Err(e) => {
                        return Err(DecodingError::FatalDecode {
                            path: path.to_string(),
                            source: e,
                        });
                    }
                }
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::debug!("Decode: Reached EOF for '{}'", path);
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Decode: Decoder reset required unexpectedly for '{}'", path);
                break;
            }
            Err(e) => {
                return Err(DecodingError::PacketRead {
                    path: path.to_string(),
                    source: e,
                });
            }
        }
    }
    decoder.finalize();
    log::debug!(
        "Decode: Decoded {} stereo frames at {} Hz from '{}'",
        samples.len() / 2,
        sample_rate,
        path
    );
    if samples.is_empty() {
        return Err(DecodingError::NoSamplesDecoded {
            path: path.to_string(),
        });
    }
    Ok((samples, sample_rate))
}
