use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;

use super::voice::{display_name, Voice};
use super::{SynthesisOptions, TtsEngine, VoiceInfo};
use crate::audio::{samples_to_pcm16, write_wav_file, Audio, PcmFormat};
use crate::error::AppError;

const ENGINE: &str = "SherpaOnnxTTS";
const OUTPUT_GAIN: f32 = 2.0;

/// Offline engine running a Piper-format ONNX voice model.
pub struct PiperEngine {
    voices_dir: PathBuf,
    voice: Voice,
    session: Mutex<Session>,
    noise_scale: f32,
    length_scale: f32,
    noise_w: f32,
}

impl PiperEngine {
    /// Load `voice_id` from `voices_dir`; an empty id picks the first model found.
    pub fn load(voices_dir: &Path, voice_id: &str) -> Result<Self, AppError> {
        let voice_id = if voice_id.is_empty() {
            Voice::discover(voices_dir)
                .map_err(|e| AppError::engine_init(ENGINE, e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    AppError::engine_init(
                        ENGINE,
                        format!("no voice models found in {}", voices_dir.display()),
                    )
                })?
        } else {
            voice_id.to_string()
        };

        let voice = Voice::load(voices_dir, &voice_id)
            .map_err(|e| AppError::engine_init(ENGINE, e.to_string()))?;

        tracing::info!("Loading voice model {}", voice.model_path.display());
        let session = Session::builder()
            .map_err(|e| init_error(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| init_error(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| init_error(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&voice.model_path)
            .map_err(|e| init_error(format!("Failed to load model: {}", e)))?;

        let inference = voice.config.inference.clone().unwrap_or_default();

        Ok(Self {
            voices_dir: voices_dir.to_path_buf(),
            voice,
            session: Mutex::new(session),
            noise_scale: inference.noise_scale,
            length_scale: inference.length_scale,
            noise_w: inference.noise_w,
        })
    }

    fn format(&self) -> PcmFormat {
        PcmFormat::mono16(self.voice.config.audio.sample_rate)
    }

    fn render(&self, text: &str, opts: &SynthesisOptions) -> Result<Vec<f32>, AppError> {
        let phonemes = phonemize(text, &self.voice.language())?;
        let ids = phonemes_to_ids(&phonemes, &self.voice.config.phoneme_id_map);
        self.infer(&ids, length_scale_for_rate(self.length_scale, opts.rate))
    }

    fn infer(&self, phoneme_ids: &[i64], length_scale: f32) -> Result<Vec<f32>, AppError> {
        if phoneme_ids.is_empty() {
            return Ok(Vec::new());
        }

        let input_len = phoneme_ids.len();

        // input: [batch, sequence] = [1, phoneme_count]
        let input_value = Value::from_array((vec![1, input_len], phoneme_ids.to_vec()))
            .map_err(|e| synth_error(format!("Failed to create input tensor: {}", e)))?;

        let lengths_value = Value::from_array((vec![1], vec![input_len as i64]))
            .map_err(|e| synth_error(format!("Failed to create lengths tensor: {}", e)))?;

        // scales: [noise_scale, length_scale, noise_w]
        let scales_value = Value::from_array((
            vec![3],
            vec![self.noise_scale, length_scale, self.noise_w],
        ))
        .map_err(|e| synth_error(format!("Failed to create scales tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| synth_error("voice model session poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![input_value, lengths_value, scales_value])
            .map_err(|e| synth_error(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get("output")
            .or_else(|| outputs.get("audio"))
            .ok_or_else(|| synth_error("Missing output tensor".to_string()))?;

        let output_view = output
            .try_extract_tensor::<f32>()
            .map_err(|e| synth_error(format!("Failed to extract output tensor: {}", e)))?;

        Ok(output_view.1.iter().copied().collect())
    }
}

impl TtsEngine for PiperEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn synthesize_to_bytes(&self, text: &str, opts: &SynthesisOptions) -> Result<Audio, AppError> {
        let samples = self.render(text, opts)?;
        Ok(Audio::Pcm {
            data: samples_to_pcm16(&samples, volume_gain(opts.volume)),
            format: self.format(),
        })
    }

    fn synthesize_to_file(
        &self,
        text: &str,
        opts: &SynthesisOptions,
        path: &Path,
    ) -> Result<(), AppError> {
        let samples = self.render(text, opts)?;
        let pcm: Vec<i16> = samples_to_pcm16(&samples, volume_gain(opts.volume))
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        write_wav_file(path, &pcm, self.format())
    }

    fn list_voices(&self) -> Result<Vec<VoiceInfo>, AppError> {
        let mut voices = Vec::new();
        for id in Voice::discover(&self.voices_dir)? {
            match Voice::load(&self.voices_dir, &id) {
                Ok(voice) => voices.push(VoiceInfo::new(&id, display_name(&id), voice.language())),
                Err(e) => tracing::warn!("Skipping voice {}: {}", id, e),
            }
        }
        Ok(voices)
    }
}

fn init_error(reason: String) -> AppError {
    AppError::engine_init(ENGINE, reason)
}

fn synth_error(reason: String) -> AppError {
    AppError::Synthesis(reason)
}

/// Faster speech means shorter phoneme durations.
fn length_scale_for_rate(base: f32, rate: Option<i32>) -> f32 {
    let rate = rate.unwrap_or(0).clamp(-10, 10) as f32;
    base / (1.0 + rate * 0.05)
}

fn volume_gain(volume: Option<u32>) -> f32 {
    OUTPUT_GAIN * volume.unwrap_or(100).min(100) as f32 / 100.0
}

/// Convert text to phonemes using espeak-ng
pub fn phonemize(text: &str, voice: &str) -> Result<String, AppError> {
    if text.is_empty() {
        return Ok(String::new());
    }

    let output = Command::new("espeak-ng")
        .args(["--ipa", "-q", "-v", voice, text])
        .output()
        .map_err(|e| synth_error(format!("Failed to run espeak-ng (is it installed?): {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(synth_error(format!("espeak-ng failed: {}", stderr)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Convert phonemes to IDs using the voice's phoneme map
pub fn phonemes_to_ids(phonemes: &str, id_map: &HashMap<String, Vec<i64>>) -> Vec<i64> {
    let mut ids = Vec::new();

    // BOS
    if let Some(bos) = id_map.get("^") {
        ids.extend(bos);
    } else {
        ids.push(0);
    }

    for ch in phonemes.chars() {
        if let Some(mapped) = id_map.get(&ch.to_string()) {
            ids.extend(mapped);
        }
        if let Some(pad) = id_map.get("_") {
            ids.extend(pad);
        }
    }

    // EOS
    if let Some(eos) = id_map.get("$") {
        ids.extend(eos);
    } else {
        ids.push(0);
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phonemes_to_ids_empty() {
        let map = HashMap::new();
        let ids = phonemes_to_ids("", &map);
        assert_eq!(ids, vec![0, 0]);
    }

    #[test]
    fn test_phonemes_to_ids_pads_between_symbols() {
        let map: HashMap<String, Vec<i64>> = [
            ("^".to_string(), vec![1]),
            ("$".to_string(), vec![2]),
            ("_".to_string(), vec![0]),
            ("a".to_string(), vec![14]),
            ("b".to_string(), vec![15]),
        ]
        .into_iter()
        .collect();

        assert_eq!(phonemes_to_ids("ab", &map), vec![1, 14, 0, 15, 0, 2]);
    }

    #[test]
    fn test_rate_shortens_length_scale() {
        assert_eq!(length_scale_for_rate(1.0, None), 1.0);
        assert!(length_scale_for_rate(1.0, Some(10)) < 1.0);
        assert!(length_scale_for_rate(1.0, Some(-10)) > 1.0);
    }

    #[test]
    fn test_volume_gain() {
        assert_eq!(volume_gain(None), OUTPUT_GAIN);
        assert_eq!(volume_gain(Some(50)), OUTPUT_GAIN / 2.0);
        assert_eq!(volume_gain(Some(400)), OUTPUT_GAIN);
    }

    #[test]
    fn test_phonemize_empty_text_skips_espeak() {
        assert_eq!(phonemize("", "en").unwrap(), "");
    }
}
