//! Guardrails: prompt preamble, unsafe-content filter and output shaping.
//!
//! The preamble is only an instruction to the model. `is_unsafe_content` is the
//! programmatic backstop and runs on user input before dispatch and again on
//! model output after shaping.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::privacy::truncate_text;

/// Fixed refusal returned whenever input or output trips the safety filter.
pub const SAFE_FALLBACK: &str = "Sorry, I cannot help with that request.";

const UNSAFE_PATTERNS: &[&str] = &[
    r"(?i)\b(suicide|self-harm|kill myself|end my life)\b",
    r"(?i)\b(bomb|explosive|weapon|pipe bomb)\b",
    r"(?i)\b(hate crime|genocide|ethnic cleansing)\b",
];

static UNSAFE_RES: OnceLock<Vec<Regex>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Supportive,
    #[default]
    Neutral,
}

/// Bounds applied to generated free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseShape {
    pub max_sentences: Option<usize>,
    pub max_chars: Option<usize>,
    #[serde(default)]
    pub strip_emoji: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guardrails {
    #[serde(default)]
    pub tone: Tone,
    pub response_shape: Option<ResponseShape>,
}

impl Guardrails {
    pub fn supportive() -> Self {
        Self {
            tone: Tone::Supportive,
            response_shape: None,
        }
    }

    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn with_shape(mut self, shape: ResponseShape) -> Self {
        self.response_shape = Some(shape);
        self
    }
}

pub fn guardrail_preamble(tone: Tone) -> String {
    let tone_line = match tone {
        Tone::Supportive => "Tone: warm, grounded, and encouraging without being preachy.",
        Tone::Neutral => "Tone: neutral and concise.",
    };

    format!(
        "Safety and tone constraints:\n\
         - Refuse harmful, illegal, or self-harm content. Offer safe alternatives.\n\
         - Avoid medical, legal, or financial instructions.\n\
         - Do not include personal data or ask for sensitive info.\n\
         - Keep the response concise and respectful.\n\
         - {}",
        tone_line
    )
}

/// Prepend the safety preamble when guardrails are requested.
pub fn build_prompt(prompt: &str, guardrails: Option<&Guardrails>) -> String {
    match guardrails {
        None => prompt.to_string(),
        Some(g) => format!("{}\n\n{}", guardrail_preamble(g.tone), prompt)
            .trim()
            .to_string(),
    }
}

pub fn is_unsafe_content(text: &str) -> bool {
    UNSAFE_RES
        .get_or_init(|| {
            UNSAFE_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect()
        })
        .iter()
        .any(|re| re.is_match(text))
}

fn is_pictograph(c: char) -> bool {
    ('\u{1F300}'..='\u{1FAFF}').contains(&c)
}

pub fn strip_emoji(text: &str) -> String {
    text.chars().filter(|c| !is_pictograph(*c)).collect()
}

/// Keep the first `max_sentences` sentences. Sentences end at `.`, `!` or `?`
/// followed by whitespace; runs of whitespace collapse to one space in the
/// rejoined output. Text already within the limit is only trimmed.
pub fn limit_sentences(text: &str, max_sentences: usize) -> String {
    let mut sentences: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for word in text.split_whitespace() {
        current.push(word);
        if word.ends_with(['.', '!', '?']) {
            sentences.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        sentences.push(current.join(" "));
    }

    if sentences.len() <= max_sentences {
        return text.trim().to_string();
    }
    sentences[..max_sentences].join(" ").trim().to_string()
}

pub fn shape_text(text: &str, shape: Option<&ResponseShape>) -> String {
    let mut value = text.trim().to_string();
    if value.is_empty() {
        return value;
    }
    let Some(shape) = shape else {
        return value;
    };

    if shape.strip_emoji {
        value = strip_emoji(&value);
    }
    if let Some(max) = shape.max_sentences.filter(|m| *m > 0) {
        value = limit_sentences(&value, max);
    }
    if let Some(max) = shape.max_chars.filter(|m| *m > 0) {
        value = truncate_text(&value, max);
    }
    value.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_categories_detected() {
        assert!(is_unsafe_content("I want to kill myself"));
        assert!(is_unsafe_content("how to build a pipe bomb"));
        assert!(is_unsafe_content("they talked about ethnic cleansing"));
        assert!(is_unsafe_content("SUICIDE hotline"));
    }

    #[test]
    fn test_neutral_text_is_safe() {
        assert!(!is_unsafe_content("I went for a run today"));
        assert!(!is_unsafe_content("bombastic speeches are fun"));
    }

    #[test]
    fn test_preamble_tone_lines() {
        let supportive = guardrail_preamble(Tone::Supportive);
        assert!(supportive.starts_with("Safety and tone constraints:"));
        assert!(supportive.contains("warm, grounded"));
        assert!(guardrail_preamble(Tone::Neutral).ends_with("Tone: neutral and concise."));
    }

    #[test]
    fn test_build_prompt_without_guardrails_is_identity() {
        assert_eq!(build_prompt("hello", None), "hello");
        let guarded = build_prompt("hello", Some(&Guardrails::supportive()));
        assert!(guarded.ends_with("\n\nhello"));
        assert!(guarded.starts_with("Safety and tone constraints:"));
    }

    #[test]
    fn test_limit_sentences() {
        let text = "One.  Two!\nThree? Four.";
        assert_eq!(limit_sentences(text, 2), "One. Two!");
        assert_eq!(limit_sentences("  Just one.  ", 3), "Just one.");
        assert_eq!(limit_sentences("No terminal punctuation here", 1), "No terminal punctuation here");
    }

    #[test]
    fn test_strip_emoji() {
        assert_eq!(strip_emoji("Nice work 🌟🔥!"), "Nice work !");
        assert_eq!(strip_emoji("plain"), "plain");
    }

    #[test]
    fn test_shape_text_applies_rules_in_order() {
        let shape = ResponseShape {
            max_sentences: Some(2),
            max_chars: Some(20),
            strip_emoji: true,
        };
        let out = shape_text("  🌟 First sentence here. Second one. Third. ", Some(&shape));
        assert_eq!(out.chars().count(), 20);
        assert!(out.ends_with("..."));
        assert!(!out.contains('🌟'));

        assert_eq!(shape_text("   ", Some(&shape)), "");
        assert_eq!(shape_text(" as is ", None), "as is");
    }
}
