use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// The `.onnx.json` sidecar of a local voice model.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub audio: AudioConfig,
    pub espeak: Option<EspeakConfig>,
    #[serde(default)]
    pub phoneme_id_map: HashMap<String, Vec<i64>>,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EspeakConfig {
    pub voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,
    #[serde(default = "default_length_scale")]
    pub length_scale: f32,
    #[serde(default = "default_noise_w")]
    pub noise_w: f32,
}

fn default_noise_scale() -> f32 {
    0.667
}

fn default_length_scale() -> f32 {
    1.0
}

fn default_noise_w() -> f32 {
    0.8
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            noise_scale: default_noise_scale(),
            length_scale: default_length_scale(),
            noise_w: default_noise_w(),
        }
    }
}

#[derive(Debug)]
pub struct Voice {
    pub id: String,
    pub config: VoiceConfig,
    pub model_path: PathBuf,
}

impl Voice {
    pub fn load(voices_dir: &Path, voice_id: &str) -> Result<Self, AppError> {
        let model_path = voices_dir.join(format!("{}.onnx", voice_id));
        let config_path = voices_dir.join(format!("{}.onnx.json", voice_id));

        if !model_path.exists() {
            return Err(AppError::VoiceNotFound(voice_id.to_string()));
        }

        if !config_path.exists() {
            return Err(AppError::VoiceNotFound(format!(
                "{} (missing config file)",
                voice_id
            )));
        }

        let config: VoiceConfig = serde_json::from_reader(File::open(&config_path)?)?;

        Ok(Self {
            id: voice_id.to_string(),
            config,
            model_path,
        })
    }

    /// Ids of every model in `voices_dir` that has both files, sorted.
    pub fn discover(voices_dir: &Path) -> Result<Vec<String>, AppError> {
        let mut ids = Vec::new();

        if !voices_dir.exists() {
            return Ok(ids);
        }

        for entry in std::fs::read_dir(voices_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "onnx").unwrap_or(false) {
                let Some(stem) = path.file_stem() else {
                    continue;
                };
                let id = stem.to_string_lossy().to_string();
                if voices_dir.join(format!("{}.onnx.json", id)).exists() {
                    ids.push(id);
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    pub fn language(&self) -> String {
        self.config
            .espeak
            .as_ref()
            .map(|e| e.voice.clone())
            .unwrap_or_else(|| "en".to_string())
    }
}

/// Human name from a voice id (e.g., en_GB-alba-medium -> Alba).
pub fn display_name(id: &str) -> String {
    let parts: Vec<&str> = id.split('-').collect();
    if parts.len() >= 2 {
        let name = parts[1];
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => id.to_string(),
        }
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{"audio":{"sample_rate":22050},"espeak":{"voice":"en-gb"}}"#;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("en_GB-alba-medium"), "Alba");
        assert_eq!(display_name("plain"), "plain");
    }

    #[test]
    fn test_discover_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b-voice-low.onnx"), b"").unwrap();
        std::fs::write(dir.path().join("b-voice-low.onnx.json"), CONFIG).unwrap();
        std::fs::write(dir.path().join("a-voice-low.onnx"), b"").unwrap();
        std::fs::write(dir.path().join("a-voice-low.onnx.json"), CONFIG).unwrap();
        std::fs::write(dir.path().join("orphan.onnx"), b"").unwrap();

        let ids = Voice::discover(dir.path()).unwrap();
        assert_eq!(ids, vec!["a-voice-low", "b-voice-low"]);
    }

    #[test]
    fn test_load_reads_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("en_GB-alba-medium.onnx"), b"").unwrap();
        std::fs::write(dir.path().join("en_GB-alba-medium.onnx.json"), CONFIG).unwrap();

        let voice = Voice::load(dir.path(), "en_GB-alba-medium").unwrap();
        assert_eq!(voice.config.audio.sample_rate, 22050);
        assert_eq!(voice.language(), "en-gb");
        assert!(voice.config.inference.is_none());
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let err = Voice::load(dir.path(), "nope").unwrap_err();
        assert_eq!(err.code(), "VOICE_NOT_FOUND");
    }
}
