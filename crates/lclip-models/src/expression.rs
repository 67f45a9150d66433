//! Expression records produced by the language-analysis collaborator.
//!
//! Dialogue and translation text arrive in several shapes (a bare string, a
//! list of lines, or a language -> lines map). They are normalized at this
//! boundary into one ordered mapping so downstream code never branches on the
//! wire representation.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::timestamp::{parse_range_ms, TimestampError};
use crate::subtitle::TimeRange;

/// Language key used when the producer did not name one.
pub const DEFAULT_LANGUAGE: &str = "und";

/// Canonical dialogue text keyed by language code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct Dialogue(BTreeMap<String, Vec<String>>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDialogue {
    Text(String),
    Lines(Vec<String>),
    ByLanguage(BTreeMap<String, RawLines>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLines {
    Text(String),
    Lines(Vec<String>),
}

impl RawLines {
    fn into_lines(self) -> Vec<String> {
        match self {
            RawLines::Text(text) => vec![text],
            RawLines::Lines(lines) => lines,
        }
    }
}

impl From<RawDialogue> for Dialogue {
    fn from(raw: RawDialogue) -> Self {
        let mut map = BTreeMap::new();
        match raw {
            RawDialogue::Text(text) => {
                map.insert(DEFAULT_LANGUAGE.to_string(), vec![text]);
            }
            RawDialogue::Lines(lines) => {
                map.insert(DEFAULT_LANGUAGE.to_string(), lines);
            }
            RawDialogue::ByLanguage(by_lang) => {
                for (lang, lines) in by_lang {
                    map.insert(lang.to_lowercase(), lines.into_lines());
                }
            }
        }
        // Drop blank lines so "has text" checks stay simple.
        for lines in map.values_mut() {
            lines.retain(|l| !l.trim().is_empty());
        }
        map.retain(|_, lines| !lines.is_empty());
        Dialogue(map)
    }
}

impl<'de> Deserialize<'de> for Dialogue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(RawDialogue::deserialize(deserializer)?.into())
    }
}

impl Dialogue {
    /// Single-language dialogue.
    pub fn single(language: impl Into<String>, lines: Vec<String>) -> Self {
        RawDialogue::ByLanguage(
            [(language.into(), RawLines::Lines(lines))]
                .into_iter()
                .collect(),
        )
        .into()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn lines(&self, language: &str) -> Option<&[String]> {
        self.0.get(&language.to_lowercase()).map(Vec::as_slice)
    }

    /// Lines for `language`, falling back to the unnamed entry, then to the
    /// first language in code order.
    pub fn preferred(&self, language: &str) -> Option<&[String]> {
        self.lines(language)
            .or_else(|| self.lines(DEFAULT_LANGUAGE))
            .or_else(|| self.0.values().next().map(Vec::as_slice))
    }

    /// All lines of the preferred language joined by a space.
    pub fn joined(&self, language: &str) -> Option<String> {
        self.preferred(language).map(|lines| lines.join(" "))
    }
}

/// Expression selected for teaching, with its dialogue context.
///
/// Consumed read-only by the composition engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExpressionRecord {
    /// Target phrase or idiom, e.g. "cut him loose"
    pub expression: String,

    /// Full dialogue around the expression, by language
    #[serde(default)]
    pub dialogue: Dialogue,

    /// Translation of the dialogue, by language
    #[serde(default)]
    pub translation: Dialogue,

    /// Short translation of the expression itself
    #[serde(default)]
    pub expression_translation: Option<String>,

    /// Related phrasings shown as keywords
    #[serde(default)]
    pub similar_expressions: Vec<String>,

    /// Approximate context start (hint, not authoritative)
    #[serde(default)]
    pub context_start: Option<String>,

    /// Approximate context end (hint, not authoritative)
    #[serde(default)]
    pub context_end: Option<String>,

    /// Language of the expression and dialogue
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Language of the translations
    #[serde(default)]
    pub target_language: Option<String>,
}

fn default_source_language() -> String {
    "en".to_string()
}

impl ExpressionRecord {
    /// Minimal record for an expression.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            dialogue: Dialogue::default(),
            translation: Dialogue::default(),
            expression_translation: None,
            similar_expressions: Vec::new(),
            context_start: None,
            context_end: None,
            source_language: default_source_language(),
            target_language: None,
        }
    }

    pub fn with_hints(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.context_start = Some(start.into());
        self.context_end = Some(end.into());
        self
    }

    /// Parse the timing hints, if both are present and well formed.
    pub fn hint_range(&self) -> Option<Result<TimeRange, TimestampError>> {
        let start = self.context_start.as_deref()?;
        let end = self.context_end.as_deref()?;
        Some(parse_range_ms(start, end).map(|(s, e)| TimeRange::new(s, e)))
    }

    /// Source-language dialogue sentence, if any.
    pub fn dialogue_sentence(&self) -> Option<String> {
        self.dialogue.joined(&self.source_language)
    }

    /// Translated dialogue sentence, if any.
    pub fn translated_sentence(&self) -> Option<String> {
        let lang = self.target_language.as_deref().unwrap_or(DEFAULT_LANGUAGE);
        self.translation.joined(lang)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialogue_from_string() {
        let d: Dialogue = serde_json::from_str(r#""We have to cut him loose.""#).unwrap();
        assert_eq!(
            d.preferred("en").unwrap(),
            &["We have to cut him loose.".to_string()]
        );
    }

    #[test]
    fn test_dialogue_from_list_and_map_share_representation() {
        let list: Dialogue = serde_json::from_str(r#"["Line one", "Line two"]"#).unwrap();
        let map: Dialogue =
            serde_json::from_str(r#"{"EN": ["Line one", "Line two"], "ko": "줄 하나"}"#).unwrap();

        assert_eq!(list.joined("en").unwrap(), "Line one Line two");
        assert_eq!(map.joined("en").unwrap(), "Line one Line two");
        assert_eq!(map.lines("ko").unwrap(), &["줄 하나".to_string()]);
        assert_eq!(map.languages().collect::<Vec<_>>(), vec!["en", "ko"]);
    }

    #[test]
    fn test_dialogue_drops_blank_lines() {
        let d: Dialogue = serde_json::from_str(r#"{"en": ["", "  "], "fr": ["Bonjour"]}"#).unwrap();
        assert!(d.lines("en").is_none());
        assert_eq!(d.preferred("en").unwrap(), &["Bonjour".to_string()]);
    }

    #[test]
    fn test_expression_record_deserializes_with_defaults() {
        let json = r#"{
            "expression": "cut him loose",
            "dialogue": ["We need to cut him", "loose before sunrise."],
            "translation": {"ko": ["그를 풀어줘야 해"]},
            "target_language": "ko",
            "context_start": "00:12:28,000",
            "context_end": "00:12:36,000"
        }"#;
        let record: ExpressionRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.source_language, "en");
        assert!(record.similar_expressions.is_empty());
        assert_eq!(
            record.dialogue_sentence().unwrap(),
            "We need to cut him loose before sunrise."
        );
        assert_eq!(record.translated_sentence().unwrap(), "그를 풀어줘야 해");
        assert_eq!(
            record.hint_range().unwrap().unwrap(),
            TimeRange::new(748_000, 756_000)
        );
    }

    #[test]
    fn test_hint_range_missing_or_invalid() {
        assert!(ExpressionRecord::new("x").hint_range().is_none());
        let bad = ExpressionRecord::new("x").with_hints("00:00:05", "00:00:01");
        assert!(bad.hint_range().unwrap().is_err());
    }
}
