use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{PROTOCOL_VERSION, VERSIONED_HEADER_LEN, VERSIONED_MAGIC};
use crate::config::{parse_bool, ConfigMap};
use crate::error::AppError;
use crate::tts::EngineKind;

/// How the JSON document was located inside the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    DirectJson,
    LengthPrefixed,
    Versioned(u8),
    /// No recognizable framing; the whole buffer is taken as JSON text.
    LegacyText,
}

/// A request after framing detection and text decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub framing: Framing,
    pub json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// `{clipboard_text, config, args}`
    Current,
    /// `{text, args}`
    Legacy,
}

/// A request normalized to the current schema.
#[derive(Debug, Clone)]
pub struct Message {
    pub schema: Schema,
    pub text: String,
    pub config: ConfigMap,
    pub args: RequestArgs,
}

/// The `args` object. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestArgs {
    pub engine: Option<String>,
    pub voice: Option<String>,
    pub rate: Option<Value>,
    pub volume: Option<Value>,
    #[serde(deserialize_with = "lenient_bool")]
    pub listvoices: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub return_audio_bytes: bool,
    pub style: Option<String>,
    pub styledegree: Option<Value>,
}

impl RequestArgs {
    pub fn rate(&self) -> Option<i32> {
        self.rate.as_ref().and_then(value_as_f64).map(|v| v as i32)
    }

    pub fn volume(&self) -> Option<u32> {
        self.volume
            .as_ref()
            .and_then(value_as_f64)
            .map(|v| v.max(0.0) as u32)
    }

    /// Whether `engine` (default `sherpaonnx`) is a recognized legacy name.
    pub fn names_known_engine(&self) -> bool {
        EngineKind::resolve_alias(self.engine.as_deref().unwrap_or("sherpaonnx")).is_some()
    }

    pub fn style_degree(&self) -> Option<f32> {
        self.styledegree
            .as_ref()
            .and_then(value_as_f64)
            .map(|v| v as f32)
    }
}

/// Locate and decode the JSON document inside one pipe read.
pub fn decode(raw: &[u8]) -> Result<Request, AppError> {
    if raw.is_empty() {
        return Err(AppError::Decode("empty message".into()));
    }

    let (framing, body) = detect_framing(raw)?;
    match framing {
        Framing::DirectJson => tracing::debug!("Detected direct JSON message"),
        Framing::LengthPrefixed => {
            tracing::debug!("Detected length-prefixed message, length: {}", body.len())
        }
        Framing::Versioned(v) => tracing::debug!("Detected versioned message v{}", v),
        Framing::LegacyText => tracing::debug!("No framing detected, decoding whole buffer"),
    }

    let json = match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(e) => {
            tracing::warn!("Failed to decode message as UTF-8 ({}), replacing invalid bytes", e);
            String::from_utf8_lossy(body).into_owned()
        }
    };

    Ok(Request { framing, json })
}

fn detect_framing(raw: &[u8]) -> Result<(Framing, &[u8]), AppError> {
    if raw[0] == b'{' {
        return Ok((Framing::DirectJson, raw));
    }

    // Under the legacy rules this prefix reads as a length far beyond any
    // pipe read, so such a buffer could never have decoded before.
    if raw.starts_with(VERSIONED_MAGIC) {
        return detect_versioned(raw);
    }

    if raw.len() >= 4 {
        let declared = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        if declared > 0 && declared <= raw.len() - 4 {
            return Ok((Framing::LengthPrefixed, &raw[4..4 + declared]));
        }
    }

    Ok((Framing::LegacyText, raw))
}

fn detect_versioned(raw: &[u8]) -> Result<(Framing, &[u8]), AppError> {
    if raw.len() < VERSIONED_HEADER_LEN {
        return Err(AppError::Decode("truncated versioned header".into()));
    }
    let version = raw[4];
    if version == 0 || version > PROTOCOL_VERSION {
        return Err(AppError::Decode(format!(
            "unsupported protocol version {}",
            version
        )));
    }
    let declared = u32::from_le_bytes([raw[5], raw[6], raw[7], raw[8]]) as usize;
    if declared == 0 || declared > raw.len() - VERSIONED_HEADER_LEN {
        return Err(AppError::Decode(format!(
            "versioned length {} does not fit in {} bytes",
            declared,
            raw.len() - VERSIONED_HEADER_LEN
        )));
    }
    Ok((Framing::Versioned(version), &raw[VERSIONED_HEADER_LEN..VERSIONED_HEADER_LEN + declared]))
}

impl Request {
    /// Parse the JSON and normalize both schemas into a [`Message`].
    pub fn parse(&self) -> Result<Message, AppError> {
        let value: Value = serde_json::from_str(&self.json)
            .map_err(|e| AppError::Decode(format!("invalid JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| AppError::Schema("message must be a JSON object".into()))?;

        let args: RequestArgs = match object.get("args") {
            Some(args) => serde_json::from_value(args.clone())
                .map_err(|e| AppError::Schema(format!("invalid args: {}", e)))?,
            None => RequestArgs::default(),
        };

        if let (Some(text), Some(config)) = (object.get("clipboard_text"), object.get("config")) {
            let text = text
                .as_str()
                .ok_or_else(|| AppError::Schema("clipboard_text must be a string".into()))?;
            return Ok(Message {
                schema: Schema::Current,
                text: text.to_string(),
                config: ConfigMap::from_json(config)?,
                args,
            });
        }

        if let (Some(text), true) = (object.get("text"), object.contains_key("args")) {
            let text = text
                .as_str()
                .ok_or_else(|| AppError::Schema("text must be a string".into()))?;
            tracing::info!("Converting legacy message format");
            let config = legacy_config(&args);
            let mut args = args;
            if !args.names_known_engine() {
                // Unknown engines speak at the stock rate and volume.
                args.rate = None;
                args.volume = None;
            }
            return Ok(Message {
                schema: Schema::Legacy,
                text: text.to_string(),
                config,
                args,
            });
        }

        Err(AppError::Schema(
            "message must contain either (clipboard_text, config, args) or (text, args)".into(),
        ))
    }
}

/// Default configuration for legacy clients, which send no `config` object.
/// Unrecognized engines fall back to the local engine at rate 0, volume 100.
pub fn legacy_config(args: &RequestArgs) -> ConfigMap {
    let alias = args.engine.as_deref().unwrap_or("sherpaonnx");
    let (engine, rate, volume) = match EngineKind::resolve_alias(alias) {
        Some(kind) => (kind, args.rate().unwrap_or(0), args.volume().unwrap_or(100)),
        None => {
            tracing::info!("Unknown legacy engine '{}'; using local defaults", alias);
            (EngineKind::SherpaOnnx, 0, 100)
        }
    };
    let identifier = engine.identifier();

    let mut config = ConfigMap::new();
    config.set("TTS", "engine", identifier);
    config.set("TTS", "bypass_tts", "False");
    config.set("TTS", "save_audio_file", "True");
    config.set("TTS", "rate", rate.to_string());
    config.set("TTS", "volume", volume.to_string());
    config.set("translate", "no_translate", "True");
    if let Some(voice) = args.voice.as_deref().filter(|v| !v.is_empty()) {
        config.set(identifier, "voice_id", voice);
    }
    config
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        Value::String(s) => parse_bool(&s).unwrap_or(false),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{length_prefixed, versioned};

    #[test]
    fn test_brace_means_whole_buffer() {
        let raw = br#"{"text":"hi","args":{}}"#;
        let request = decode(raw).unwrap();
        assert_eq!(request.framing, Framing::DirectJson);
        assert_eq!(request.json.as_bytes(), raw);
    }

    #[test]
    fn test_brace_wins_even_when_prefix_would_fit() {
        // '{' '"' 0 0 reads as a small little-endian length; the brace rule applies first.
        let raw = b"{\"\0\0xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";
        assert_eq!(decode(raw).unwrap().framing, Framing::DirectJson);
    }

    #[test]
    fn test_length_prefix_extracts_payload() {
        let json = br#"{"text":"hi","args":{}}"#;
        let mut raw = length_prefixed(json);
        raw.extend_from_slice(b"trailing garbage");

        let request = decode(&raw).unwrap();
        assert_eq!(request.framing, Framing::LengthPrefixed);
        assert_eq!(request.json.as_bytes(), json);
    }

    #[test]
    fn test_zero_length_prefix_falls_back() {
        let raw = [0u8, 0, 0, 0, b'x'];
        let request = decode(&raw).unwrap();
        assert_eq!(request.framing, Framing::LegacyText);
        assert_eq!(request.json.len(), 5);
    }

    #[test]
    fn test_oversized_prefix_falls_back() {
        let mut raw = 100u32.to_le_bytes().to_vec();
        raw.extend_from_slice(b"{}");
        assert_eq!(decode(&raw).unwrap().framing, Framing::LegacyText);
    }

    #[test]
    fn test_short_buffer_is_text() {
        let request = decode(b"ab").unwrap();
        assert_eq!(request.framing, Framing::LegacyText);
        assert!(request.parse().is_err());
    }

    #[test]
    fn test_empty_buffer_is_decode_error() {
        assert_eq!(decode(b"").unwrap_err().code(), "DECODE_ERROR");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let raw = b"{\"text\":\"a\xffb\",\"args\":{}}";
        let message = decode(raw).unwrap().parse().unwrap();
        assert_eq!(message.text, "a\u{FFFD}b");
    }

    #[test]
    fn test_versioned_framing() {
        let json = br#"{"text":"hi","args":{}}"#;
        let request = decode(&versioned(json)).unwrap();
        assert_eq!(request.framing, Framing::Versioned(1));
        assert_eq!(request.json.as_bytes(), json);

        let mut future = versioned(json);
        future[4] = 9;
        assert!(decode(&future).is_err());
    }

    #[test]
    fn test_current_schema() {
        let raw = br#"{"clipboard_text":"Hello","config":{"TTS":{"engine":"azureTTS"}},"args":{"listvoices":"True","style":"cheerful","styledegree":"1.5"}}"#;
        let message = decode(raw).unwrap().parse().unwrap();
        assert_eq!(message.schema, Schema::Current);
        assert_eq!(message.text, "Hello");
        assert_eq!(message.config.get("TTS", "engine"), Some("azureTTS"));
        assert!(message.args.listvoices);
        assert_eq!(message.args.style.as_deref(), Some("cheerful"));
        assert_eq!(message.args.style_degree(), Some(1.5));
    }

    #[test]
    fn test_legacy_schema_synthesizes_config() {
        let raw = br#"{"text":"Hi","args":{"engine":"azure","voice":"en-GB-LibbyNeural","rate":3}}"#;
        let message = decode(raw).unwrap().parse().unwrap();
        assert_eq!(message.schema, Schema::Legacy);
        assert_eq!(message.config.get("TTS", "engine"), Some("azureTTS"));
        assert_eq!(message.config.get("TTS", "rate"), Some("3"));
        assert_eq!(message.config.get("TTS", "volume"), Some("100"));
        assert_eq!(
            message.config.get("azureTTS", "voice_id"),
            Some("en-GB-LibbyNeural")
        );
        assert!(message.config.get_bool("translate", "no_translate", false));
    }

    #[test]
    fn test_legacy_unknown_engine_defaults_to_local() {
        let raw = br#"{"text":"Hi","args":{"engine":"mystery","rate":5,"volume":20}}"#;
        let message = decode(raw).unwrap().parse().unwrap();
        assert_eq!(message.config.get("TTS", "engine"), Some("SherpaOnnxTTS"));
        assert_eq!(message.config.get("TTS", "rate"), Some("0"));
        assert_eq!(message.config.get("TTS", "volume"), Some("100"));
        assert_eq!(message.args.rate(), None);
        assert_eq!(message.args.volume(), None);
    }

    #[test]
    fn test_missing_fields_is_schema_error() {
        let err = decode(br#"{"hello":"world"}"#).unwrap().parse().unwrap_err();
        assert_eq!(err.code(), "SCHEMA_ERROR");
    }
}
