//! Expression-to-dialogue alignment.
//!
//! Every strategy scores every candidate window; the single best candidate
//! wins and is accepted only against one shared threshold. The matcher holds
//! configuration only, so one instance can serve concurrent jobs. Positional
//! bias is an explicit `search_from` argument.

use lclip_models::matching::DEFAULT_MATCH_THRESHOLD;
use lclip_models::{
    DialogueRange, ExpressionRecord, MatchResult, MatchStrategy, ResolvedTiming, SubtitleEntry,
    TimeRange,
};
use tracing::{debug, info, warn};

use crate::error::{MatchError, MatchOutcome, NoMatch};
use crate::strategy::{score, PreparedText};
use crate::text::{is_non_speech, strip_inline_cues};

/// Scores closer than this are ties.
const SCORE_EPSILON: f64 = 1e-9;

/// Matcher tuning. `threshold` is the only acceptance gate.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    /// Minimum score for any strategy's candidate to be accepted
    pub threshold: f64,
    /// Maximum consecutive speech entries joined into one window
    pub max_window_entries: usize,
    /// Speech entries added on each side of the context window
    pub context_padding_entries: usize,
    /// Hint windows are merged into the context only if the result stays
    /// within this duration
    pub max_context_ms: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            max_window_entries: 3,
            context_padding_entries: 1,
            max_context_ms: 30_000,
        }
    }
}

/// Best candidate of one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub range: DialogueRange,
    pub time: TimeRange,
    pub score: f64,
    pub strategy: MatchStrategy,
}

/// Entry that carries speech, with its cleaned text.
struct SpeechLine<'a> {
    index: usize,
    entry: &'a SubtitleEntry,
    text: String,
}

/// Consecutive speech lines `[first, last]` (positions into the line list).
struct Window {
    first: usize,
    last: usize,
    text: PreparedText,
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    first: usize,
    last: usize,
    score: f64,
    strategy: MatchStrategy,
}

#[derive(Debug, Clone, Default)]
pub struct DialogueMatcher {
    config: MatcherConfig,
}

impl DialogueMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Best candidate of each strategy, in `MatchStrategy::ALL` order.
    ///
    /// Strategies with no positive score anywhere are omitted.
    pub fn candidates(
        &self,
        expression: &str,
        entries: &[SubtitleEntry],
        search_from: usize,
    ) -> Vec<Candidate> {
        let query = PreparedText::new(expression);
        let lines = speech_lines(entries);
        let windows = self.windows(&lines, search_from);

        best_per_strategy(&query, &lines, &windows)
            .into_iter()
            .map(|c| candidate(&lines, c))
            .collect()
    }

    /// Align the record's expression to the subtitle entries.
    ///
    /// Only entries at or after `search_from` are considered as match starts.
    pub fn match_expression(
        &self,
        record: &ExpressionRecord,
        entries: &[SubtitleEntry],
        search_from: usize,
    ) -> Result<MatchResult, NoMatch> {
        let no_match = |best: Option<Scored>| NoMatch {
            best_score: best.map(|b| b.score).unwrap_or(0.0),
            best_strategy: best.map(|b| b.strategy),
            threshold: self.config.threshold,
        };

        let query = PreparedText::new(&record.expression);
        if query.is_empty() {
            return Err(no_match(None));
        }

        let lines = speech_lines(entries);
        let windows = self.windows(&lines, search_from);
        let per_strategy = best_per_strategy(&query, &lines, &windows);

        for c in &per_strategy {
            debug!(
                strategy = %c.strategy,
                score = c.score,
                first = lines[c.first].index,
                last = lines[c.last].index,
                "Strategy candidate"
            );
        }

        let best = per_strategy
            .into_iter()
            .reduce(|best, c| if outranks(&lines, &c, &best) { c } else { best });

        let Some(best) = best else {
            return Err(no_match(None));
        };
        if best.score + SCORE_EPSILON < self.config.threshold {
            return Err(no_match(Some(best)));
        }

        let best = tighten(&query, &lines, best);
        let hint = match record.hint_range() {
            Some(Ok(range)) => Some(range),
            Some(Err(e)) => {
                warn!(error = %e, "Ignoring malformed timing hint for context resolution");
                None
            }
            None => None,
        };
        let (ctx_first, ctx_last) = self.context_window(&lines, best.first, best.last, hint);

        let result = MatchResult {
            range: DialogueRange::new(lines[best.first].index, lines[best.last].index),
            time: line_span(&lines, best.first, best.last),
            context: DialogueRange::new(lines[ctx_first].index, lines[ctx_last].index),
            context_time: line_span(&lines, ctx_first, ctx_last),
            score: best.score,
            strategy: best.strategy,
        };

        info!(
            expression = %record.expression,
            strategy = %result.strategy,
            score = result.score,
            time = %result.time,
            "Dialogue matched"
        );

        Ok(result)
    }

    /// Resolve clip timing, falling back to the record's hints on `NoMatch`.
    pub fn resolve(
        &self,
        record: &ExpressionRecord,
        entries: &[SubtitleEntry],
        search_from: usize,
    ) -> MatchOutcome<ResolvedTiming> {
        if PreparedText::new(&record.expression).is_empty() {
            return Err(MatchError::EmptyExpression);
        }

        let no_match = match self.match_expression(record, entries, search_from) {
            Ok(result) => return Ok(ResolvedTiming::Matched(result)),
            Err(no_match) => no_match,
        };

        match record.hint_range() {
            Some(Ok(hint)) => {
                warn!(
                    expression = %record.expression,
                    best_score = no_match.best_score,
                    hint = %hint,
                    "No dialogue match, falling back to timing hints"
                );
                Ok(ResolvedTiming::HintFallback {
                    expression: hint,
                    context: hint,
                    best_score: no_match.best_score,
                })
            }
            Some(Err(e)) => Err(MatchError::InvalidHint(e)),
            None => Err(MatchError::NoMatch(no_match)),
        }
    }

    fn windows(&self, lines: &[SpeechLine<'_>], search_from: usize) -> Vec<Window> {
        let max_len = self.config.max_window_entries.max(1);
        let mut windows = Vec::new();

        for first in 0..lines.len() {
            if lines[first].index < search_from {
                continue;
            }
            let last_max = (first + max_len - 1).min(lines.len() - 1);
            for last in first..=last_max {
                windows.push(Window {
                    first,
                    last,
                    text: window_text(lines, first, last),
                });
            }
        }

        windows
    }

    /// Widen the matched lines with overlapping hint lines, then pad.
    fn context_window(
        &self,
        lines: &[SpeechLine<'_>],
        first: usize,
        last: usize,
        hint: Option<TimeRange>,
    ) -> (usize, usize) {
        let (mut ctx_first, mut ctx_last) = (first, last);

        if let Some(hint) = hint {
            let overlapping: Vec<usize> = (0..lines.len())
                .filter(|&i| lines[i].entry.range().overlaps(&hint))
                .collect();
            if let (Some(&h_first), Some(&h_last)) = (overlapping.first(), overlapping.last()) {
                let merged_first = ctx_first.min(h_first);
                let merged_last = ctx_last.max(h_last);
                if line_span(lines, merged_first, merged_last).duration_ms()
                    <= self.config.max_context_ms
                {
                    ctx_first = merged_first;
                    ctx_last = merged_last;
                } else {
                    debug!(hint = %hint, "Timing hint too far from match, not merged into context");
                }
            }
        }

        let pad = self.config.context_padding_entries;
        (
            ctx_first.saturating_sub(pad),
            (ctx_last + pad).min(lines.len() - 1),
        )
    }
}

fn speech_lines(entries: &[SubtitleEntry]) -> Vec<SpeechLine<'_>> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| !is_non_speech(&e.text))
        .filter_map(|(index, entry)| {
            let text = strip_inline_cues(&entry.text);
            (!text.is_empty()).then_some(SpeechLine { index, entry, text })
        })
        .collect()
}

fn window_text(lines: &[SpeechLine<'_>], first: usize, last: usize) -> PreparedText {
    PreparedText::joined(lines[first..=last].iter().map(|l| l.text.as_str()))
}

fn line_span(lines: &[SpeechLine<'_>], first: usize, last: usize) -> TimeRange {
    let start = lines[first].entry.start_ms;
    let end = lines[first..=last]
        .iter()
        .map(|l| l.entry.end_ms)
        .max()
        .unwrap_or(start);
    TimeRange::new(start, end.max(start))
}

fn best_per_strategy(
    query: &PreparedText,
    lines: &[SpeechLine<'_>],
    windows: &[Window],
) -> Vec<Scored> {
    MatchStrategy::ALL
        .iter()
        .filter_map(|&strategy| {
            windows
                .iter()
                .map(|w| Scored {
                    first: w.first,
                    last: w.last,
                    score: score(strategy, query, &w.text),
                    strategy,
                })
                .filter(|s| s.score > 0.0)
                .reduce(|best, c| if outranks(lines, &c, &best) { c } else { best })
        })
        .collect()
}

/// Score descending, then earliest start, then fewest entries.
fn outranks(lines: &[SpeechLine<'_>], a: &Scored, b: &Scored) -> bool {
    if (a.score - b.score).abs() > SCORE_EPSILON {
        return a.score > b.score;
    }
    let a_start = lines[a.first].entry.start_ms;
    let b_start = lines[b.first].entry.start_ms;
    if a_start != b_start {
        return a_start < b_start;
    }
    (a.last - a.first) < (b.last - b.first)
}

/// Drop edge lines that do not contribute to the winning score.
fn tighten(query: &PreparedText, lines: &[SpeechLine<'_>], mut best: Scored) -> Scored {
    while best.first < best.last {
        let without_first = score(best.strategy, query, &window_text(lines, best.first + 1, best.last));
        if without_first + SCORE_EPSILON >= best.score {
            best.first += 1;
            best.score = without_first;
            continue;
        }
        let without_last = score(best.strategy, query, &window_text(lines, best.first, best.last - 1));
        if without_last + SCORE_EPSILON >= best.score {
            best.last -= 1;
            best.score = without_last;
            continue;
        }
        break;
    }
    best
}

fn candidate(lines: &[SpeechLine<'_>], s: Scored) -> Candidate {
    Candidate {
        range: DialogueRange::new(lines[s.first].index, lines[s.last].index),
        time: line_span(lines, s.first, s.last),
        score: s.score,
        strategy: s.strategy,
    }
}
