pub mod azure;
pub mod elevenlabs;
pub mod google;
pub mod google_trans;
mod http;
pub mod openai;
pub mod piper;
pub mod registry;
pub mod ssml;
pub mod voice;

use std::path::Path;

use serde::Serialize;

use crate::audio::Audio;
use crate::error::AppError;

pub use piper::PiperEngine;
pub use registry::{BuiltinEngines, EngineFactory, EngineKey, EngineRegistry};

/// Every engine identifier a client may name in `config.TTS.engine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    SherpaOnnx,
    Azure,
    Google,
    GoogleTrans,
    ElevenLabs,
    OpenAi,
    Sapi5,
    Polly,
    Watson,
    PlayHt,
    WitAi,
}

impl EngineKind {
    pub const ALL: [EngineKind; 11] = [
        EngineKind::SherpaOnnx,
        EngineKind::Azure,
        EngineKind::Google,
        EngineKind::GoogleTrans,
        EngineKind::ElevenLabs,
        EngineKind::OpenAi,
        EngineKind::Sapi5,
        EngineKind::Polly,
        EngineKind::Watson,
        EngineKind::PlayHt,
        EngineKind::WitAi,
    ];

    pub const fn identifier(self) -> &'static str {
        match self {
            EngineKind::SherpaOnnx => "SherpaOnnxTTS",
            EngineKind::Azure => "azureTTS",
            EngineKind::Google => "googleTTS",
            EngineKind::GoogleTrans => "googleTransTTS",
            EngineKind::ElevenLabs => "ElevenLabsTTS",
            EngineKind::OpenAi => "OpenAITTS",
            EngineKind::Sapi5 => "sapi5",
            EngineKind::Polly => "PollyTTS",
            EngineKind::Watson => "WatsonTTS",
            EngineKind::PlayHt => "PlayHTTTS",
            EngineKind::WitAi => "WitAiTTS",
        }
    }

    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.identifier() == identifier)
    }

    /// Resolve a short engine name sent by a legacy client, or a full identifier.
    pub fn resolve_alias(alias: &str) -> Option<Self> {
        match alias.trim().to_ascii_lowercase().as_str() {
            "sherpaonnx" | "sherpa" | "onnx" => Some(EngineKind::SherpaOnnx),
            "azure" => Some(EngineKind::Azure),
            "google" => Some(EngineKind::Google),
            "googletrans" | "gtts" => Some(EngineKind::GoogleTrans),
            "elevenlabs" => Some(EngineKind::ElevenLabs),
            "openai" => Some(EngineKind::OpenAi),
            _ => Self::from_identifier(alias.trim()),
        }
    }

    /// Like [`EngineKind::resolve_alias`]; unrecognized names select the local engine.
    pub fn from_alias(alias: &str) -> Self {
        Self::resolve_alias(alias).unwrap_or(EngineKind::SherpaOnnx)
    }
}

/// Per-request rendering options. The voice is bound to the engine handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisOptions {
    /// SAPI-style rate, -10 (slowest) to 10 (fastest), 0 is normal.
    pub rate: Option<i32>,
    /// 0 to 100.
    pub volume: Option<u32>,
    pub style: Option<String>,
    pub style_degree: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub language_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl VoiceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            language_codes: vec![language.into()],
            gender: None,
        }
    }

    pub fn with_gender(mut self, gender: Option<String>) -> Self {
        self.gender = gender.filter(|g| !g.is_empty());
        self
    }
}

/// A synthesis backend. Engines implement the subset of capabilities they
/// have; the defaults report the capability as unsupported.
pub trait TtsEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Engines without direct-bytes synthesis go through [`synthesize`]'s
    /// temporary-file path.
    fn supports_bytes(&self) -> bool {
        true
    }

    fn synthesize_to_bytes(&self, _text: &str, _opts: &SynthesisOptions) -> Result<Audio, AppError> {
        Err(AppError::Unsupported {
            engine: self.name().to_string(),
            capability: "direct synthesis",
        })
    }

    /// Render `text` as a WAV file at `path`.
    fn synthesize_to_file(
        &self,
        _text: &str,
        _opts: &SynthesisOptions,
        _path: &Path,
    ) -> Result<(), AppError> {
        Err(AppError::Unsupported {
            engine: self.name().to_string(),
            capability: "file synthesis",
        })
    }

    fn list_voices(&self) -> Result<Vec<VoiceInfo>, AppError>;
}

/// Synthesize through whichever capability the engine has.
pub fn synthesize(
    engine: &dyn TtsEngine,
    text: &str,
    opts: &SynthesisOptions,
) -> Result<Audio, AppError> {
    if engine.supports_bytes() {
        return engine.synthesize_to_bytes(text, opts);
    }

    let temp = tempfile::Builder::new()
        .prefix("tts-")
        .suffix(".wav")
        .tempfile()?;
    engine.synthesize_to_file(text, opts, temp.path())?;

    let bytes = std::fs::read(temp.path())?;
    if bytes.is_empty() {
        return Err(AppError::Synthesis(format!(
            "{} produced an empty audio file",
            engine.name()
        )));
    }
    Ok(Audio::Wav(bytes))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::audio::PcmFormat;
    use crate::config::ConfigMap;

    /// Deterministic engine used across the crate's tests.
    pub struct FakeEngine {
        pub bytes_capable: bool,
        pub calls: Arc<AtomicUsize>,
        pub delay: Duration,
    }

    impl FakeEngine {
        pub fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                bytes_capable: true,
                calls,
                delay: Duration::ZERO,
            }
        }
    }

    /// Builds [`FakeEngine`]s for any engine name except `BrokenTTS`.
    #[derive(Default)]
    pub struct FakeFactory {
        pub builds: Arc<AtomicUsize>,
        pub calls: Arc<AtomicUsize>,
        pub delay: Duration,
    }

    impl EngineFactory for FakeFactory {
        fn create(&self, key: &EngineKey, _config: &ConfigMap) -> Result<Arc<dyn TtsEngine>, AppError> {
            if key.engine == "BrokenTTS" {
                return Err(AppError::engine_init(&key.engine, "model files missing"));
            }
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeEngine {
                bytes_capable: true,
                calls: Arc::clone(&self.calls),
                delay: self.delay,
            }))
        }
    }

    impl TtsEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "FakeTTS"
        }

        fn supports_bytes(&self) -> bool {
            self.bytes_capable
        }

        fn synthesize_to_bytes(&self, text: &str, _opts: &SynthesisOptions) -> Result<Audio, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(Audio::Pcm {
                data: text.bytes().flat_map(|b| [b, 0]).collect(),
                format: PcmFormat::mono16(16000),
            })
        }

        fn synthesize_to_file(
            &self,
            text: &str,
            _opts: &SynthesisOptions,
            path: &Path,
        ) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let samples: Vec<i16> = text.bytes().map(i16::from).collect();
            crate::audio::write_wav_file(path, &samples, PcmFormat::mono16(16000))
        }

        fn list_voices(&self) -> Result<Vec<VoiceInfo>, AppError> {
            Ok(vec![VoiceInfo::new("fake-voice", "Fake", "en")])
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::testing::FakeEngine;
    use super::*;
    use crate::audio::has_wav_header;

    #[test]
    fn test_alias_mapping() {
        assert_eq!(EngineKind::from_alias("azure"), EngineKind::Azure);
        assert_eq!(EngineKind::from_alias("SherpaOnnxTTS"), EngineKind::SherpaOnnx);
        assert_eq!(EngineKind::from_alias("ElevenLabsTTS"), EngineKind::ElevenLabs);
        assert_eq!(EngineKind::from_alias("whatever"), EngineKind::SherpaOnnx);
        assert_eq!(EngineKind::resolve_alias("whatever"), None);
    }

    #[test]
    fn test_identifiers_round_trip() {
        for kind in EngineKind::ALL {
            assert_eq!(EngineKind::from_identifier(kind.identifier()), Some(kind));
        }
        assert_eq!(EngineKind::from_identifier("azure"), None);
    }

    #[test]
    fn test_direct_bytes_path() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = FakeEngine::new(calls.clone());
        let audio = synthesize(&engine, "hi", &SynthesisOptions::default()).unwrap();
        assert!(matches!(audio, Audio::Pcm { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_fallback_path() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = FakeEngine::new(calls.clone());
        engine.bytes_capable = false;

        let audio = synthesize(&engine, "hello", &SynthesisOptions::default()).unwrap();
        match audio {
            Audio::Wav(bytes) => assert!(has_wav_header(&bytes)),
            other => panic!("expected WAV, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_voice_info_serialization_skips_missing_gender() {
        let json = serde_json::to_value(VoiceInfo::new("a", "A", "en-GB")).unwrap();
        assert_eq!(json["language_codes"][0], "en-GB");
        assert!(json.get("gender").is_none());
    }
}
