use crate::audio::Audio;
use crate::error::AppError;
use crate::tts::VoiceInfo;

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    VoiceList(Vec<VoiceInfo>),
    Audio(Audio),
    /// Nothing is written; the client sees the connection close.
    Empty,
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::VoiceList(_) => "voice list",
            Response::Audio(_) => "audio",
            Response::Empty => "empty",
        }
    }
}

/// Frame a response for the wire.
pub fn encode(response: Response) -> Result<Vec<u8>, AppError> {
    match response {
        Response::VoiceList(voices) => Ok(serde_json::to_vec(&voices)?),
        Response::Audio(audio) => {
            let wav = audio.into_wav_bytes();
            let mut framed = Vec::with_capacity(4 + wav.len());
            framed.extend_from_slice(&(wav.len() as u32).to_le_bytes());
            framed.extend_from_slice(&wav);
            Ok(framed)
        }
        Response::Empty => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{has_wav_header, PcmFormat, WAV_HEADER_LEN};

    #[test]
    fn test_voice_list_is_bare_json() {
        let voices = vec![VoiceInfo::new("en_GB-alba-medium", "Alba", "en")];
        let bytes = encode(Response::VoiceList(voices)).unwrap();
        assert_eq!(bytes[0], b'[');
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed[0]["id"], "en_GB-alba-medium");
    }

    #[test]
    fn test_pcm_audio_is_wrapped_and_prefixed() {
        let bytes = encode(Response::Audio(Audio::Pcm {
            data: vec![1u8; 20],
            format: PcmFormat::mono16(22050),
        }))
        .unwrap();

        let declared = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        assert_eq!(declared, bytes.len() - 4);
        assert_eq!(declared, WAV_HEADER_LEN + 20);
        assert!(has_wav_header(&bytes[4..]));
    }

    #[test]
    fn test_empty_writes_nothing() {
        assert!(encode(Response::Empty).unwrap().is_empty());
    }
}
