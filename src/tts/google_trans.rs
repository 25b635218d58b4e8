//! Unauthenticated Google Translate speech. The endpoint only returns MP3,
//! so the engine writes files and the shared adapter reads them back.

use std::path::Path;

use super::http::{self, AGENT};
use super::{SynthesisOptions, TtsEngine, VoiceInfo};
use crate::audio::{decode_mp3, write_wav_file};
use crate::error::AppError;

const ENGINE: &str = "googleTransTTS";
const URL: &str = "https://translate.google.com/translate_tts";
const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
/// The endpoint rejects longer `q` values.
const MAX_CHUNK_CHARS: usize = 200;

const LANGUAGES: [(&str, &str); 12] = [
    ("en", "English"),
    ("en-gb", "English (UK)"),
    ("fr", "French"),
    ("de", "German"),
    ("es", "Spanish"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("nl", "Dutch"),
    ("ru", "Russian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("zh", "Chinese"),
];

pub struct GoogleTransEngine {
    lang: String,
}

impl GoogleTransEngine {
    pub fn new(voice: &str) -> Self {
        let lang = if voice.is_empty() { "en" } else { voice };
        Self {
            lang: lang.to_string(),
        }
    }

    fn fetch(&self, chunk: &str, slow: bool) -> Result<Vec<u8>, AppError> {
        AGENT
            .get(URL)
            .query("ie", "UTF-8")
            .query("client", "tw-ob")
            .query("tl", &self.lang)
            .query("ttsspeed", if slow { "0.3" } else { "1" })
            .query("q", chunk)
            .header("User-Agent", BROWSER_AGENT)
            .call()
            .map_err(|e| http::call_error(ENGINE, e))?
            .into_body()
            .read_to_vec()
            .map_err(|e| http::call_error(ENGINE, e))
    }
}

/// Split on whitespace into pieces of at most `max` characters. Words longer
/// than `max` are cut.
fn chunk_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word;
        while word.chars().count() > max {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let split = word
                .char_indices()
                .nth(max)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            chunks.push(word[..split].to_string());
            word = &word[split..];
        }
        if word.is_empty() {
            continue;
        }

        let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if needed > max {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

impl TtsEngine for GoogleTransEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn supports_bytes(&self) -> bool {
        false
    }

    fn synthesize_to_file(
        &self,
        text: &str,
        opts: &SynthesisOptions,
        path: &Path,
    ) -> Result<(), AppError> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(AppError::Synthesis("Nothing to speak".into()));
        }

        let slow = opts.rate.map_or(false, |r| r < 0);
        let mut mp3 = Vec::new();
        for chunk in &chunks {
            mp3.extend(self.fetch(chunk, slow)?);
        }
        tracing::debug!("Fetched {} chunk(s), {} MP3 bytes", chunks.len(), mp3.len());

        let (samples, format) = decode_mp3(&mp3)?;
        write_wav_file(path, &samples, format)
    }

    fn list_voices(&self) -> Result<Vec<VoiceInfo>, AppError> {
        Ok(LANGUAGES
            .iter()
            .map(|(code, name)| VoiceInfo::new(*code, *name, *code))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking_respects_limit() {
        let text = "word ".repeat(100);
        let chunks = chunk_text(&text, 20);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
        assert_eq!(chunks.join(" "), text.trim_end());
    }

    #[test]
    fn test_long_word_is_cut() {
        let chunks = chunk_text("abcdefghij xy", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij", "xy"]);
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_text("   ", MAX_CHUNK_CHARS).is_empty());
    }

    #[test]
    fn test_file_only_engine() {
        let engine = GoogleTransEngine::new("");
        assert!(!engine.supports_bytes());
        assert_eq!(engine.lang, "en");
        assert_eq!(engine.list_voices().unwrap().len(), LANGUAGES.len());
    }
}
