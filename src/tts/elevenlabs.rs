use serde::Deserialize;
use serde_json::json;

use super::http::{self, AGENT, USER_AGENT};
use super::{SynthesisOptions, TtsEngine, VoiceInfo};
use crate::audio::{Audio, PcmFormat};
use crate::config::ConfigMap;
use crate::error::AppError;

const ENGINE: &str = "ElevenLabsTTS";
const API: &str = "https://api.elevenlabs.io/v1";
const DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
const SAMPLE_RATE: u32 = 22050;

pub struct ElevenLabsEngine {
    api_key: String,
    voice: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<ElevenLabsVoice>,
}

#[derive(Debug, Deserialize)]
struct ElevenLabsVoice {
    voice_id: String,
    name: String,
    #[serde(default)]
    labels: ElevenLabsLabels,
}

#[derive(Debug, Default, Deserialize)]
struct ElevenLabsLabels {
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

impl ElevenLabsEngine {
    pub fn new(config: &ConfigMap, voice: &str) -> Result<Self, AppError> {
        Ok(Self {
            api_key: http::require(ENGINE, config.get_non_empty(ENGINE, "api_key"), "api_key")?,
            voice: if voice.is_empty() {
                DEFAULT_VOICE.to_string()
            } else {
                voice.to_string()
            },
            model: config
                .get_non_empty(ENGINE, "model_id")
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
        })
    }
}

impl TtsEngine for ElevenLabsEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    /// The `pcm_22050` output format is headerless 16-bit mono.
    fn synthesize_to_bytes(&self, text: &str, _opts: &SynthesisOptions) -> Result<Audio, AppError> {
        let data = AGENT
            .post(&format!("{}/text-to-speech/{}", API, self.voice))
            .query("output_format", format!("pcm_{}", SAMPLE_RATE))
            .header("xi-api-key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .send_json(json!({ "text": text, "model_id": self.model }))
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
        let response: VoicesResponse = AGENT
            .get(&format!("{}/voices", API))
            .header("xi-api-key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| http::call_error(ENGINE, e))?
            .into_body()
            .read_json()
            .map_err(|e| http::call_error(ENGINE, e))?;

        Ok(response
            .voices
            .into_iter()
            .map(|v| {
                let language = v.labels.language.unwrap_or_else(|| "en".to_string());
                VoiceInfo::new(v.voice_id, v.name, language).with_gender(v.labels.gender)
            })
            .collect())
    }
}
