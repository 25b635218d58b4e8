use serde_json::json;

use super::http::{self, AGENT, USER_AGENT};
use super::{SynthesisOptions, TtsEngine, VoiceInfo};
use crate::audio::{Audio, PcmFormat};
use crate::config::ConfigMap;
use crate::error::AppError;

const ENGINE: &str = "OpenAITTS";
const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const DEFAULT_MODEL: &str = "tts-1";
const DEFAULT_VOICE: &str = "alloy";
/// `response_format: pcm` is 24 kHz 16-bit mono without a header.
const SAMPLE_RATE: u32 = 24000;

const VOICES: [&str; 9] = [
    "alloy", "ash", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer",
];

pub struct OpenAiEngine {
    api_key: String,
    voice: String,
    model: String,
}

impl OpenAiEngine {
    pub fn new(config: &ConfigMap, voice: &str) -> Result<Self, AppError> {
        Ok(Self {
            api_key: http::require(ENGINE, config.get_non_empty(ENGINE, "api_key"), "api_key")?,
            voice: if voice.is_empty() {
                DEFAULT_VOICE.to_string()
            } else {
                voice.to_string()
            },
            model: config
                .get_non_empty(ENGINE, "model")
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
        })
    }
}

fn speed_for_rate(rate: Option<i32>) -> f32 {
    (1.0 + rate.unwrap_or(0) as f32 * 0.1).clamp(0.25, 4.0)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl TtsEngine for OpenAiEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn synthesize_to_bytes(&self, text: &str, opts: &SynthesisOptions) -> Result<Audio, AppError> {
        let data = AGENT
            .post(SPEECH_URL)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("User-Agent", USER_AGENT)
            .send_json(json!({
                "model": self.model,
                "input": text,
                "voice": self.voice,
                "response_format": "pcm",
                "speed": speed_for_rate(opts.rate),
            }))
            .map_err(|e| http::call_error(ENGINE, e))?
            .into_body()
            .read_to_vec()
            .map_err(|e| http::call_error(ENGINE, e))?;

        Ok(Audio::Pcm {
            data,
            format: PcmFormat::mono16(SAMPLE_RATE),
        })
    }

    fn list_voices(&self) -> Result<Vec<VoiceInfo>, AppError> {
        Ok(VOICES
            .iter()
            .map(|v| VoiceInfo::new(*v, capitalize(v), "en"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_is_clamped() {
        assert_eq!(speed_for_rate(None), 1.0);
        assert_eq!(speed_for_rate(Some(-10)), 0.25);
    }

    #[test]
    fn test_fixed_voice_list() {
        let mut config = ConfigMap::new();
        config.set(ENGINE, "api_key", "k");
        let voices = OpenAiEngine::new(&config, "").unwrap().list_voices().unwrap();
        assert_eq!(voices.len(), VOICES.len());
        assert_eq!(voices[0].id, "alloy");
        assert_eq!(voices[0].name, "Alloy");
    }
}
