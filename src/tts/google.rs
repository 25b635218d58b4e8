use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use super::http::{self, AGENT, USER_AGENT};
use super::{ssml, SynthesisOptions, TtsEngine, VoiceInfo};
use crate::audio::{has_wav_header, Audio, PcmFormat};
use crate::config::ConfigMap;
use crate::error::AppError;

const ENGINE: &str = "googleTTS";
const API: &str = "https://texttospeech.googleapis.com/v1";
const DEFAULT_VOICE: &str = "en-US-Wavenet-C";
const SAMPLE_RATE: u32 = 24000;

/// Google Cloud Text-to-Speech with an API key.
pub struct GoogleEngine {
    api_key: String,
    voice: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<GoogleVoice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleVoice {
    name: String,
    #[serde(default)]
    language_codes: Vec<String>,
    #[serde(default)]
    ssml_gender: Option<String>,
}

impl GoogleEngine {
    pub fn new(config: &ConfigMap, voice: &str) -> Result<Self, AppError> {
        let api_key = match (
            config.get_non_empty(ENGINE, "api_key"),
            config.get_non_empty(ENGINE, "creds"),
        ) {
            (Some(key), _) => key.to_string(),
            (None, Some(creds)) if creds.ends_with(".json") => {
                return Err(AppError::engine_init(
                    ENGINE,
                    "service-account credentials are not supported; set api_key",
                ))
            }
            (None, Some(creds)) => creds.to_string(),
            (None, None) => http::require(ENGINE, None, "api_key")?,
        };
        let voice = if voice.is_empty() {
            DEFAULT_VOICE.to_string()
        } else {
            voice.to_string()
        };
        Ok(Self { api_key, voice })
    }

    fn request_body(&self, text: &str, opts: &SynthesisOptions) -> serde_json::Value {
        let rate = opts.rate.unwrap_or(0).clamp(-10, 10) as f32;
        // 0..100 volume onto the API's -96..16 dB gain range, 100 being unity.
        let volume = opts.volume.unwrap_or(100).min(100) as f32;
        let gain_db = if volume >= 100.0 {
            0.0
        } else {
            20.0 * (volume.max(1.0) / 100.0).log10()
        };

        json!({
            "input": { "text": text },
            "voice": {
                "languageCode": ssml::language_of(&self.voice),
                "name": self.voice,
            },
            "audioConfig": {
                "audioEncoding": "LINEAR16",
                "sampleRateHertz": SAMPLE_RATE,
                "speakingRate": 1.0 + rate * 0.1,
                "volumeGainDb": gain_db,
            }
        })
    }
}

impl TtsEngine for GoogleEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn synthesize_to_bytes(&self, text: &str, opts: &SynthesisOptions) -> Result<Audio, AppError> {
        let response: SynthesizeResponse = AGENT
            .post(&format!("{}/text:synthesize", API))
            .query("key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .send_json(self.request_body(text, opts))
            .map_err(|e| http::call_error(ENGINE, e))?
            .into_body()
            .read_json()
            .map_err(|e| http::call_error(ENGINE, e))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(response.audio_content)
            .map_err(|e| AppError::Synthesis(format!("Invalid audio content: {}", e)))?;

        // LINEAR16 normally carries a WAV header; treat anything else as raw PCM.
        if has_wav_header(&bytes) {
            Ok(Audio::Wav(bytes))
        } else {
            Ok(Audio::Pcm {
                data: bytes,
                format: PcmFormat::mono16(SAMPLE_RATE),
            })
        }
    }

    fn list_voices(&self) -> Result<Vec<VoiceInfo>, AppError> {
        let response: VoicesResponse = AGENT
            .get(&format!("{}/voices", API))
            .query("key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| http::call_error(ENGINE, e))?
            .into_body()
            .read_json()
            .map_err(|e| http::call_error(ENGINE, e))?;

        Ok(response
            .voices
            .into_iter()
            .map(|v| VoiceInfo {
                id: v.name.clone(),
                name: v.name,
                language_codes: v.language_codes,
                gender: None,
            }
            .with_gender(v.ssml_gender))
            .collect())
    }
}
