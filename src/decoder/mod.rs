// src/decoder/mod.rs

pub mod dsp;
pub mod resample;

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::{MixError, Result};

/// PCM produced by a decoder: interleaved samples plus format.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

/// Turns encoded bytes into PCM. Injected into the analysis service so the
/// engine itself stays format-agnostic. Implementations may block.
pub trait AudioDecoder: Send + Sync {
    /// `hint` is a file extension such as `"mp3"`, if known.
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<DecodedAudio>;
}

/// Decoder backed by symphonia (wav, mp3, flac, ogg, aac).
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<DecodedAudio> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
        let mut probe_hint = Hint::new();
        if let Some(ext) = hint {
            probe_hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(&probe_hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| MixError::UnsupportedFormat(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| MixError::UnsupportedFormat("no default audio track".into()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| MixError::UnsupportedFormat(e.to_string()))?;
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut out = Vec::<f32>::new();

        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
        let mut format_locked = false;

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::ResetRequired) => break,
                Err(_) => break,
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(SymphoniaError::IoError(_)) => continue,
                Err(e) => return Err(MixError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let current_channels = spec.channels.count();

            // Lock format on the first non-empty packet
            if !format_locked {
                if decoded.frames() == 0 {
                    continue;
                }
                sample_rate = spec.rate;
                channels = current_channels;
                format_locked = true;
                log::debug!("Locked format: {} Hz / {} ch", sample_rate, channels);
            }

            let needs_alloc = sample_buf
                .as_ref()
                .is_none_or(|b| b.capacity() < decoded.capacity());
            if needs_alloc {
                sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            if current_channels == channels {
                out.extend_from_slice(buf.samples());
            } else {
                out.extend(dsp::updown_mix_interleaved(buf.samples(), current_channels, channels));
            }
        }

        if out.is_empty() || channels == 0 || sample_rate == 0 {
            return Err(MixError::UnsupportedFormat("no PCM frames decoded".into()));
        }

        log::debug!("Decoded {} samples", out.len());
        Ok(DecodedAudio {
            samples: out,
            channels,
            sample_rate,
        })
    }
}
