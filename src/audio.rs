use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::AppError;

pub const WAV_HEADER_LEN: usize = 44;

/// Layout of headerless PCM as asserted by the engine that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub const fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// Synthesized audio as handed back by an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Audio {
    /// A complete RIFF/WAVE file.
    Wav(Vec<u8>),
    /// Raw little-endian PCM with no container.
    Pcm { data: Vec<u8>, format: PcmFormat },
}

impl Audio {
    /// Wrap headerless PCM in a canonical 44-byte RIFF header; WAV passes through.
    pub fn into_wav_bytes(self) -> Vec<u8> {
        match self {
            Audio::Wav(bytes) => bytes,
            Audio::Pcm { data, format } => {
                let mut wav = Vec::with_capacity(WAV_HEADER_LEN + data.len());
                wav.extend_from_slice(&wav_header(format, data.len() as u32));
                wav.extend_from_slice(&data);
                wav
            }
        }
    }
}

pub fn has_wav_header(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Canonical PCM header: RIFF chunk, 16-byte `fmt ` sub-chunk, `data` sub-chunk.
pub fn wav_header(format: PcmFormat, data_len: u32) -> [u8; WAV_HEADER_LEN] {
    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Convert f32 [-1.0, 1.0] samples to 16-bit little-endian PCM, applying `gain`.
pub fn samples_to_pcm16(samples: &[f32], gain: f32) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let scaled = (sample * gain * 32767.0).clamp(-32768.0, 32767.0) as i16;
        pcm.extend_from_slice(&scaled.to_le_bytes());
    }
    pcm
}

/// Write interleaved 16-bit samples to a WAV file on disk.
pub fn write_wav_file(path: &Path, samples: &[i16], format: PcmFormat) -> Result<(), AppError> {
    let mut writer = WavWriter::create(path, wav_spec(format))
        .map_err(|e| AppError::Synthesis(format!("Failed to create WAV file: {}", e)))?;
    for sample in samples {
        writer
            .write_sample(*sample)
            .map_err(|e| AppError::Synthesis(format!("Failed to write sample: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| AppError::Synthesis(format!("Failed to finalize WAV: {}", e)))
}

/// Decode an MP3 stream into interleaved 16-bit samples.
pub fn decode_mp3(mp3: &[u8]) -> Result<(Vec<i16>, PcmFormat), AppError> {
    use minimp3::{Decoder, Frame};

    let mut decoder = Decoder::new(Cursor::new(mp3));
    let mut samples = Vec::new();
    let mut format = None;

    loop {
        match decoder.next_frame() {
            Ok(Frame {
                data,
                sample_rate,
                channels,
                ..
            }) => {
                format.get_or_insert(PcmFormat {
                    sample_rate: sample_rate as u32,
                    channels: channels as u16,
                    bits_per_sample: 16,
                });
                samples.extend(data);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(AppError::Synthesis(format!("MP3 decode failed: {:?}", e))),
        }
    }

    let format = format.ok_or_else(|| AppError::Synthesis("MP3 stream has no frames".into()))?;
    Ok((samples, format))
}

/// Playback length of an in-memory WAV file.
pub fn wav_duration_secs(bytes: &[u8]) -> Option<f32> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    Some(reader.duration() as f32 / spec.sample_rate as f32)
}

fn wav_spec(format: PcmFormat) -> WavSpec {
    WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: SampleFormat::Int,
    }
}
