//! Subtitle text cleanup and normalization.
//!
//! The same `normalize` is applied to expression text and subtitle text so
//! scores are comparable across both sides.

use std::sync::LazyLock;

use regex::Regex;

/// HTML-style formatting tags (`<i>`, `<font color=...>`).
static MARKUP_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// ASS/SSA override blocks (`{\an8}`).
static ASS_OVERRIDES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^}]*\}").unwrap());

/// Bracketed or parenthesized cues (`[door slams]`, `(laughs)`).
static BRACKETED_CUES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)").unwrap());

/// Sung lines after a note marker, or between a pair of `#` markers.
static MUSIC_SPANS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[♪♫][^♪♫]*[♪♫]?|#[^#\n]*#").unwrap());

/// Upper-case speaker labels at the start of a line (`JOHN:`, `MAN 2:`).
static SPEAKER_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[A-Z][A-Z0-9 .'\-]{0,30}:\s+").unwrap());

/// Leading dialogue dashes.
static DIALOGUE_DASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*[-‐–]\s*").unwrap());

/// Sync, credit and advertising markers inserted by subtitle groups.
static CREDIT_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(subtitles?|subs|captions?|captioned|translated|transcribed)\s+(by|from)\b").unwrap(),
        Regex::new(r"(?i)\b(re)?sync(ed|hronized)?\s*(&|and\b|by\b)").unwrap(),
        Regex::new(r"(?i)\bcorrected\s+by\b").unwrap(),
        Regex::new(r"(?i)\b(opensubtitles|addic7ed|subscene|podnapisi)\b").unwrap(),
        Regex::new(r"(?i)(www\.|https?://|\.(com|org|net)\b)").unwrap(),
        Regex::new(r"(?i)\b(downloaded|encoded|ripped)\s+(from|by)\b").unwrap(),
    ]
});

/// Remove inline non-speech material and formatting, joining lines with a space.
pub fn strip_inline_cues(text: &str) -> String {
    let text = MARKUP_TAGS.replace_all(text, "");
    let text = ASS_OVERRIDES.replace_all(&text, "");
    let text = text.replace("\\N", "\n").replace("\\n", "\n");
    let text = BRACKETED_CUES.replace_all(&text, " ");
    let text = MUSIC_SPANS.replace_all(&text, " ");
    let text = SPEAKER_LABEL.replace_all(&text, "");
    let text = DIALOGUE_DASH.replace_all(&text, "");
    collapse_whitespace(&text)
}

/// Whether a subtitle entry carries no spoken dialogue.
///
/// Stage directions, sound effects, sung lyrics and sync/credit markers are
/// non-speech and are excluded from candidate text before scoring.
pub fn is_non_speech(text: &str) -> bool {
    if CREDIT_MARKERS.iter().any(|re| re.is_match(text)) {
        return true;
    }
    !strip_inline_cues(text).chars().any(char::is_alphanumeric)
}

/// Case-folded text with whitespace collapsed and punctuation kept.
pub fn fold(text: &str) -> String {
    collapse_whitespace(&text.to_lowercase())
}

/// Scoring normalization: case folding, apostrophes dropped, every other
/// non-alphanumeric character treated as a separator, whitespace collapsed.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if is_apostrophe(c) {
            continue;
        }
        if c.is_alphanumeric() {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
    collapse_whitespace(&out)
}

/// Tokens of an already normalized string.
pub fn tokens(normalized: &str) -> Vec<String> {
    normalized.split_whitespace().map(str::to_string).collect()
}

/// Whether `needle` tokens appear in `haystack` tokens in order.
pub fn is_token_subsequence(needle: &[String], haystack: &[String]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|n| rest.any(|h| h == n))
}

fn is_apostrophe(c: char) -> bool {
    matches!(c, '\'' | '’' | '‘' | '`' | 'ʼ')
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_punctuation_and_case() {
        assert_eq!(normalize("  Cut him -- LOOSE!! "), "cut him loose");
        assert_eq!(normalize("We've got to cut 'em loose."), "weve got to cut em loose");
        assert_eq!(normalize("cut-him\nloose"), "cut him loose");
    }

    #[test]
    fn test_normalize_keeps_non_latin_text() {
        assert_eq!(normalize("그를 풀어줘!"), "그를 풀어줘");
    }

    #[test]
    fn test_strip_inline_cues() {
        assert_eq!(
            strip_inline_cues("<i>[sighs] We have to</i>\n- cut him loose."),
            "We have to cut him loose."
        );
        assert_eq!(strip_inline_cues("{\\an8}JOHN: Get down!"), "Get down!");
        assert_eq!(strip_inline_cues("♪ la la la ♪ Okay, stop."), "Okay, stop.");
        assert_eq!(strip_inline_cues("# la la la # Okay, stop."), "Okay, stop.");
        assert_eq!(strip_inline_cues("We're #1 now."), "We're #1 now.");
    }

    #[test]
    fn test_is_non_speech() {
        assert!(is_non_speech("[door slams]"));
        assert!(is_non_speech("(GUNSHOTS)"));
        assert!(is_non_speech("♪ Upbeat music playing ♪"));
        assert!(is_non_speech("Subtitles by explosiveskull"));
        assert!(is_non_speech("Synced & corrected by -robot-"));
        assert!(is_non_speech("www.opensubtitles.org"));
        assert!(is_non_speech("<i></i>"));

        assert!(!is_non_speech("We have to cut him loose."));
        assert!(!is_non_speech("[sighs] Fine."));
    }

    #[test]
    fn test_token_subsequence() {
        let hay = tokens("we have to cut him loose before sunrise");
        assert!(is_token_subsequence(&tokens("cut him loose"), &hay));
        assert!(is_token_subsequence(&tokens("have loose"), &hay));
        assert!(!is_token_subsequence(&tokens("loose him"), &hay));
    }
}
