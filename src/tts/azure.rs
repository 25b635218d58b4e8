use serde::Deserialize;

use super::http::{self, AGENT, USER_AGENT};
use super::{ssml, SynthesisOptions, TtsEngine, VoiceInfo};
use crate::audio::{has_wav_header, Audio};
use crate::config::ConfigMap;
use crate::error::AppError;

const ENGINE: &str = "azureTTS";
const DEFAULT_LOCATION: &str = "uksouth";
const DEFAULT_VOICE: &str = "en-GB-LibbyNeural";
const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

/// Azure Cognitive Services speech over REST.
pub struct AzureEngine {
    key: String,
    location: String,
    voice: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AzureVoice {
    short_name: String,
    #[serde(default)]
    display_name: Option<String>,
    locale: String,
    #[serde(default)]
    gender: Option<String>,
}

impl AzureEngine {
    /// Validate the subscription by exchanging the key for an access token.
    pub fn connect(config: &ConfigMap, voice: &str) -> Result<Self, AppError> {
        let key = http::require(ENGINE, config.get_non_empty(ENGINE, "key"), "key")?;
        let location = config
            .get_non_empty(ENGINE, "location")
            .unwrap_or(DEFAULT_LOCATION)
            .to_string();
        let voice = if voice.is_empty() {
            DEFAULT_VOICE.to_string()
        } else {
            voice.to_string()
        };

        let token_url = format!(
            "https://{}.api.cognitive.microsoft.com/sts/v1.0/issueToken",
            location
        );
        AGENT
            .post(&token_url)
            .header("Ocp-Apim-Subscription-Key", &key)
            .header("User-Agent", USER_AGENT)
            .send_empty()
            .map_err(|e| http::init_error(ENGINE, e))?;

        tracing::info!("Azure TTS ready - location: {}, voice: {}", location, voice);
        Ok(Self {
            key,
            location,
            voice,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/{}",
            self.location, path
        )
    }
}

impl TtsEngine for AzureEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn synthesize_to_bytes(&self, text: &str, opts: &SynthesisOptions) -> Result<Audio, AppError> {
        let document = ssml::document(&self.voice, text, opts);

        let bytes = AGENT
            .post(&self.endpoint("v1"))
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", USER_AGENT)
            .send(document.as_bytes())
            .map_err(|e| http::call_error(ENGINE, e))?
            .into_body()
            .read_to_vec()
            .map_err(|e| http::call_error(ENGINE, e))?;

        if !has_wav_header(&bytes) {
            return Err(AppError::Synthesis(
                "Azure returned audio without a RIFF header".into(),
            ));
        }
        Ok(Audio::Wav(bytes))
    }

    fn list_voices(&self) -> Result<Vec<VoiceInfo>, AppError> {
        let voices: Vec<AzureVoice> = AGENT
            .get(&self.endpoint("voices/list"))
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| http::call_error(ENGINE, e))?
            .into_body()
            .read_json()
            .map_err(|e| http::call_error(ENGINE, e))?;

        Ok(voices.into_iter().map(AzureVoice::into_info).collect())
    }
}

impl AzureVoice {
    fn into_info(self) -> VoiceInfo {
        let name = self
            .display_name
            .unwrap_or_else(|| self.short_name.clone());
        VoiceInfo::new(self.short_name, name, self.locale).with_gender(self.gender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_fails_before_any_request() {
        let err = AzureEngine::connect(&ConfigMap::new(), "").err().unwrap();
        assert_eq!(err.code(), "ENGINE_INIT_ERROR");
        assert!(err.to_string().contains("key not configured"));
    }

    #[test]
    fn test_voice_list_parsing() {
        let raw = r#"[{"Name":"x","ShortName":"en-GB-LibbyNeural","DisplayName":"Libby","Locale":"en-GB","Gender":"Female"}]"#;
        let voices: Vec<AzureVoice> = serde_json::from_str(raw).unwrap();
        let info = voices.into_iter().next().unwrap().into_info();
        assert_eq!(info.id, "en-GB-LibbyNeural");
        assert_eq!(info.name, "Libby");
        assert_eq!(info.language_codes, vec!["en-GB"]);
        assert_eq!(info.gender.as_deref(), Some("Female"));
    }
}
