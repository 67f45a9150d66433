//! Overlay planning for one expression clip.
//!
//! The composed clip is `[context][expression x repeats]`; dialogue text
//! belongs to the context segment and the teaching text to the expression
//! segment. Offsets are relative to the composed clip.

use lclip_models::{ExpressionRecord, OverlayConfig, OverlayItem, OverlayRole};

/// Segment lengths of the composed clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipTiming {
    /// Context segment, zero when the clip has none
    pub context_ms: u64,
    /// Expression segment after looping
    pub expression_ms: u64,
}

impl ClipTiming {
    pub fn total_ms(&self) -> u64 {
        self.context_ms + self.expression_ms
    }
}

/// Keyword line separator.
const KEYWORD_SEPARATOR: &str = " · ";

/// Build the timed overlays for `record`.
pub fn plan_overlays(
    record: &ExpressionRecord,
    config: &OverlayConfig,
    title: Option<&str>,
    timing: ClipTiming,
) -> Vec<OverlayItem> {
    let source_lang = record.source_language.as_str();
    let target_lang = record.target_language.as_deref().unwrap_or(source_lang);
    let expression_start = timing.context_ms;
    let end = timing.total_ms();

    let item = |role: OverlayRole, text: &str, language: &str, start_ms: u64, end_ms: u64| {
        let text = text.trim();
        (!text.is_empty() && end_ms > start_ms).then(|| OverlayItem {
            role,
            text: text.to_string(),
            start_ms,
            end_ms,
            position: config.style(role).position,
            font: config.font_spec(role, language),
        })
    };

    let keywords = record
        .similar_expressions
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(config.max_keywords)
        .collect::<Vec<_>>()
        .join(KEYWORD_SEPARATOR);

    let dialogue = record.dialogue_sentence().unwrap_or_default();
    let translated = record.translated_sentence().unwrap_or_default();
    let expression_translation = record.expression_translation.clone().unwrap_or_default();

    [
        item(OverlayRole::Title, title.unwrap_or_default(), source_lang, 0, end),
        item(OverlayRole::Dialogue, &dialogue, source_lang, 0, timing.context_ms),
        item(OverlayRole::Translation, &translated, target_lang, 0, timing.context_ms),
        item(OverlayRole::Expression, &record.expression, source_lang, expression_start, end),
        item(
            OverlayRole::Translation,
            &expression_translation,
            target_lang,
            expression_start,
            end,
        ),
        item(OverlayRole::Keyword, &keywords, source_lang, expression_start, end),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lclip_models::Dialogue;
    use std::path::PathBuf;

    fn record() -> ExpressionRecord {
        let mut record = ExpressionRecord::new("cut him loose");
        record.dialogue = Dialogue::single("en", vec!["We have to cut him loose.".into()]);
        record.translation = Dialogue::single("ko", vec!["그를 풀어줘야 해.".into()]);
        record.expression_translation = Some("풀어주다".into());
        record.similar_expressions = vec!["let him go".into(), " ".into(), "set him free".into(), "release him".into(), "drop him".into()];
        record.target_language = Some("ko".into());
        record
    }

    #[test]
    fn test_overlays_follow_segments() {
        let timing = ClipTiming {
            context_ms: 6_000,
            expression_ms: 10_200,
        };
        let items = plan_overlays(&record(), &OverlayConfig::default(), Some("Episode 1"), timing);

        let title = items.iter().find(|i| i.role == OverlayRole::Title).unwrap();
        assert_eq!((title.start_ms, title.end_ms), (0, 16_200));

        let dialogue = items.iter().find(|i| i.role == OverlayRole::Dialogue).unwrap();
        assert_eq!((dialogue.start_ms, dialogue.end_ms), (0, 6_000));

        let expression = items.iter().find(|i| i.role == OverlayRole::Expression).unwrap();
        assert_eq!((expression.start_ms, expression.end_ms), (6_000, 16_200));
        assert_eq!(expression.font.size, 64);

        let translations: Vec<_> = items.iter().filter(|i| i.role == OverlayRole::Translation).collect();
        assert_eq!(translations.len(), 2);
    }

    #[test]
    fn test_keywords_are_capped_and_blank_entries_skipped() {
        let timing = ClipTiming {
            context_ms: 0,
            expression_ms: 5_000,
        };
        let items = plan_overlays(&record(), &OverlayConfig::default(), None, timing);

        let keyword = items.iter().find(|i| i.role == OverlayRole::Keyword).unwrap();
        assert_eq!(keyword.text, "let him go · set him free · release him");
        // No context segment, so no dialogue overlays and no title.
        assert!(items.iter().all(|i| i.role != OverlayRole::Dialogue && i.role != OverlayRole::Title));
    }

    #[test]
    fn test_translation_font_uses_target_language() {
        let mut config = OverlayConfig::default();
        config.fonts.insert("ko".into(), PathBuf::from("/fonts/NotoSansKR.ttf"));
        config.fonts.insert("en".into(), PathBuf::from("/fonts/Inter.ttf"));
        let timing = ClipTiming {
            context_ms: 0,
            expression_ms: 5_000,
        };
        let items = plan_overlays(&record(), &config, None, timing);

        let translation = items.iter().find(|i| i.role == OverlayRole::Translation).unwrap();
        assert_eq!(translation.font.file, Some(PathBuf::from("/fonts/NotoSansKR.ttf")));
        let expression = items.iter().find(|i| i.role == OverlayRole::Expression).unwrap();
        assert_eq!(expression.font.file, Some(PathBuf::from("/fonts/Inter.ttf")));
    }
}
