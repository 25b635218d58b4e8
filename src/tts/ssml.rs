//! SSML helpers for engines that accept markup.

use std::collections::HashSet;

use lazy_static::lazy_static;

use super::SynthesisOptions;

lazy_static! {
    /// Speaking styles accepted by `mstts:express-as`.
    pub static ref VALID_STYLES: HashSet<&'static str> = [
        "advertisement_upbeat",
        "affectionate",
        "angry",
        "assistant",
        "calm",
        "chat",
        "cheerful",
        "customerservice",
        "depressed",
        "disgruntled",
        "documentary-narration",
        "embarrassed",
        "empathetic",
        "envious",
        "excited",
        "fearful",
        "friendly",
        "gentle",
        "hopeful",
        "lyrical",
        "narration-professional",
        "narration-relaxed",
        "newscast",
        "newscast-casual",
        "newscast-formal",
        "poetry-reading",
        "sad",
        "serious",
        "shouting",
        "sports_commentary",
        "sports_commentary_excited",
        "whispering",
        "terrified",
        "unfriendly",
    ]
    .into_iter()
    .collect();
}

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Wrap already-escaped text in an express-as element when the style is known.
/// Unknown styles leave the text untouched.
pub fn express_as(text: &str, style: Option<&str>, degree: Option<f32>) -> String {
    match style {
        Some(style) if VALID_STYLES.contains(style) => {
            let mut ssml = format!("<mstts:express-as style=\"{}\"", style);
            if let Some(degree) = degree {
                ssml.push_str(&format!(" styledegree=\"{}\"", degree));
            }
            ssml.push('>');
            ssml.push_str(text);
            ssml.push_str("</mstts:express-as>");
            ssml
        }
        _ => text.to_string(),
    }
}

/// Full `<speak>` document for a named voice.
pub fn document(voice: &str, text: &str, opts: &SynthesisOptions) -> String {
    let lang = language_of(voice);
    let mut body = escape(text);

    let rate = opts.rate.unwrap_or(0).clamp(-10, 10);
    let volume = opts.volume.unwrap_or(100).min(100);
    if rate != 0 || volume != 100 {
        body = format!(
            "<prosody rate=\"{:+}%\" volume=\"{}\">{}</prosody>",
            rate * 10,
            volume,
            body
        );
    }

    body = express_as(&body, opts.style.as_deref(), opts.style_degree);

    format!(
        "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" \
         xmlns:mstts=\"https://www.w3.org/2001/mstts\" xml:lang=\"{}\">\
         <voice name=\"{}\">{}</voice></speak>",
        lang,
        escape(voice),
        body
    )
}

/// Locale prefix of a voice name such as `en-GB-LibbyNeural`.
pub fn language_of(voice: &str) -> String {
    let parts: Vec<&str> = voice.split('-').collect();
    if parts.len() >= 2 {
        format!("{}-{}", parts[0], parts[1])
    } else {
        "en-US".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("a < b & 'c'"), "a &lt; b &amp; &apos;c&apos;");
    }

    #[test]
    fn test_express_as_valid_style() {
        assert_eq!(
            express_as("Hi", Some("cheerful"), Some(1.5)),
            "<mstts:express-as style=\"cheerful\" styledegree=\"1.5\">Hi</mstts:express-as>"
        );
    }

    #[test]
    fn test_express_as_ignores_unknown_style() {
        assert_eq!(express_as("Hi", Some("grumpy"), None), "Hi");
    }

    #[test]
    fn test_document_includes_prosody_only_when_needed() {
        let plain = document("en-GB-LibbyNeural", "Hello", &SynthesisOptions::default());
        assert!(plain.contains("xml:lang=\"en-GB\""));
        assert!(plain.contains("<voice name=\"en-GB-LibbyNeural\">Hello</voice>"));
        assert!(!plain.contains("prosody"));

        let fast = document(
            "en-GB-LibbyNeural",
            "Hello",
            &SynthesisOptions {
                rate: Some(2),
                ..Default::default()
            },
        );
        assert!(fast.contains("<prosody rate=\"+20%\" volume=\"100\">Hello</prosody>"));
    }
}
