//! Style pass: counts, dialogue, tension and readability hotspots

use crate::analysis::traits::ChunkAnalyzer;
use crate::analysis::types::{AnalysisError, AnalysisFragment, RiskHotspot};

const TENSION_WORDS: &[&str] = &[
    "blood", "scream", "screamed", "fear", "afraid", "terror", "gun", "knife", "dead", "death",
    "danger", "panic", "shouted", "ran", "run", "chase", "trapped", "fire", "hunted", "threat",
    "trembled", "pounding", "desperate", "alarm", "attack", "fled",
];

/// Sentences longer than this many words are flagged
const LONG_SENTENCE_WORDS: usize = 40;

/// This many `-ly` adverbs in one sentence are flagged
const ADVERB_CLUSTER: usize = 3;

/// Computes word/sentence counts, dialogue ratio, tension and risk hotspots
pub struct StyleAnalyzer;

impl StyleAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StyleAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn has_word(piece: &str) -> bool {
    piece.chars().any(char::is_alphanumeric)
}

fn normalize(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Byte ranges of sentences that contain at least one word
fn sentences(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if start.is_none() && !c.is_whitespace() {
            start = Some(i);
        }
        let terminal = matches!(c, '.' | '!' | '?')
            && chars
                .peek()
                .map_or(true, |(_, next)| next.is_whitespace() || matches!(next, '"' | '\u{201d}'));
        if terminal {
            if let Some(s) = start.take() {
                out.push((s, i + c.len_utf8()));
            }
        }
    }
    if let Some(s) = start {
        out.push((s, text.len()));
    }
    out.retain(|&(s, e)| has_word(&text[s..e]));
    out
}

/// Words that begin inside quoted dialogue
fn dialogue_words(text: &str) -> usize {
    let mut in_quote = false;
    let mut counted = false;
    let mut count = 0;
    for c in text.chars() {
        match c {
            '"' => in_quote = !in_quote,
            '\u{201c}' => in_quote = true,
            '\u{201d}' => in_quote = false,
            _ => {}
        }
        if c.is_whitespace() {
            counted = false;
        } else if c.is_alphanumeric() && !counted {
            counted = true;
            if in_quote {
                count += 1;
            }
        }
    }
    count
}

fn hotspots(text: &str, chunk_id: &str, sentence_ranges: &[(usize, usize)]) -> Vec<RiskHotspot> {
    let mut found = Vec::new();
    for &(start, end) in sentence_ranges {
        let sentence = &text[start..end];
        let words: Vec<&str> = sentence.split_whitespace().filter(|w| has_word(w)).collect();

        if words.len() > LONG_SENTENCE_WORDS {
            let over = (words.len() - LONG_SENTENCE_WORDS) as f64;
            found.push(RiskHotspot {
                chunk_id: chunk_id.to_string(),
                start,
                end,
                score: (0.5 + over / 80.0).min(1.0),
                reason: format!("long sentence ({} words)", words.len()),
            });
        }

        let adverbs = words
            .iter()
            .map(|w| normalize(w))
            .filter(|w| w.len() > 4 && w.ends_with("ly"))
            .count();
        if adverbs >= ADVERB_CLUSTER {
            found.push(RiskHotspot {
                chunk_id: chunk_id.to_string(),
                start,
                end,
                score: (0.4 + 0.1 * (adverbs - ADVERB_CLUSTER) as f64).min(1.0),
                reason: format!("adverb cluster ({adverbs})"),
            });
        }
    }
    found.sort_by(|a, b| b.score.total_cmp(&a.score));
    found
}

impl ChunkAnalyzer for StyleAnalyzer {
    fn id(&self) -> &str {
        "style"
    }

    fn name(&self) -> &str {
        "Style Analyzer"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
        let mut fragment = AnalysisFragment::empty(chunk_id);
        let words: Vec<&str> = text.split_whitespace().filter(|w| has_word(w)).collect();
        if words.is_empty() {
            return Ok(fragment);
        }

        let sentence_ranges = sentences(text);
        let tension_hits = words
            .iter()
            .filter(|w| TENSION_WORDS.contains(&normalize(w).as_str()))
            .count();

        fragment.word_count = words.len();
        fragment.sentence_count = sentence_ranges.len();
        fragment.dialogue_ratio = dialogue_words(text) as f64 / words.len() as f64;
        fragment.tension = (tension_hits as f64 / words.len() as f64 * 12.0).min(1.0);
        fragment.risk_hotspots = hotspots(text, chunk_id, &sentence_ranges);
        Ok(fragment)
    }
}
