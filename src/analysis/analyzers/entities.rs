//! Entity extraction: capitalized proper nouns with mention offsets
//!
//! A word is a name candidate when it is capitalized somewhere other than
//! the start of a sentence and is not a common English word. Once a name is
//! known, every occurrence is recorded, sentence-initial ones included.
//! Locations come from prepositional phrases ("in the Old Harbor", "at
//! Kestrel").

use crate::analysis::traits::ChunkAnalyzer;
use crate::analysis::types::{AnalysisError, AnalysisFragment, EntityMention};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

static LOCATION_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:in|at|inside|outside|near|across) (?:the )?([A-Z][a-z]+(?: [A-Z][a-z]+)*)")
        .expect("location pattern is valid")
});

static COMMON_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "The", "This", "That", "These", "Those", "When", "Where", "What", "Which", "While",
        "With", "From", "Into", "Upon", "About", "After", "Before", "During", "Between",
        "Through", "Against", "Without", "Within", "Along", "Beyond", "Under", "Above",
        "Below", "Behind", "Here", "There", "Then", "Thus", "Also", "Even", "Just", "Only",
        "Some", "Many", "Much", "Most", "Other", "Such", "Each", "Every", "Both", "Either",
        "Neither", "All", "Any", "Few", "More", "Less", "But", "And", "For", "Nor", "Not",
        "Yet", "His", "Her", "Its", "Our", "Your", "Their", "Who", "How", "Why", "Can", "May",
        "Will", "Shall", "Should", "Would", "Could", "Must", "Has", "Have", "Had", "Was",
        "Were", "Been", "Being", "Are", "Now", "New", "Old", "Good", "Great", "Long", "First",
        "Last", "Next", "Like", "Over", "Still", "Back", "Well", "Down", "Off", "Come", "Made",
        "See", "One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Nine", "Ten",
        "Act", "Scene", "Part", "Chapter", "Section", "She", "He", "They", "We", "It", "You",
        "Yes", "No", "Oh", "Mr", "Mrs", "Ms", "Dr", "Sir", "Lady", "Lord", "POV", "Location",
        "Setting", "God", "I'm", "I'd", "I'll", "I've",
    ]
    .into_iter()
    .collect()
});

/// A word with its byte offset and whether it opens a sentence
struct Token<'a> {
    word: &'a str,
    offset: usize,
    sentence_initial: bool,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut sentence_initial = true;
    let mut line_start = true;

    let mut index = 0;
    for piece in text.split_inclusive(char::is_whitespace) {
        let raw = piece.trim_end();
        let lead = raw.len() - raw.trim_start_matches(|c: char| !c.is_alphanumeric()).len();
        let word = raw
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .trim_end_matches(|c: char| !c.is_alphanumeric());
        if !word.is_empty() {
            tokens.push(Token {
                word,
                offset: index + lead,
                sentence_initial: sentence_initial || line_start,
            });
            sentence_initial = raw.ends_with(['.', '!', '?'])
                || raw.ends_with(".\"")
                || raw.ends_with("?\"")
                || raw.ends_with("!\"");
            line_start = false;
        }
        if piece.ends_with('\n') {
            line_start = true;
        }
        index += piece.len();
    }
    tokens
}

fn is_name_shaped(word: &str) -> bool {
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    word.len() >= 2
        && first.is_uppercase()
        && chars.clone().any(|c| c.is_lowercase())
        && chars.all(|c| c.is_alphabetic() || c == '\'')
}

/// Extracts proper nouns and locations
pub struct EntityAnalyzer;

impl EntityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn extract(&self, text: &str) -> Vec<EntityMention> {
        let tokens = tokenize(text);
        let candidates: HashSet<&str> = tokens
            .iter()
            .filter(|t| !t.sentence_initial)
            .filter(|t| is_name_shaped(t.word) && !COMMON_WORDS.contains(t.word))
            .map(|t| t.word)
            .collect();

        let mut mentions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for token in &tokens {
            if candidates.contains(token.word) {
                mentions.entry(token.word).or_default().push(token.offset);
            }
        }

        mentions
            .into_iter()
            .map(|(name, offsets)| EntityMention {
                name: name.to_string(),
                offsets,
            })
            .collect()
    }
}

impl Default for EntityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAnalyzer for EntityAnalyzer {
    fn id(&self) -> &str {
        "entities"
    }

    fn name(&self) -> &str {
        "Entity Extractor"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
        let mut fragment = AnalysisFragment::empty(chunk_id);

        for capture in LOCATION_PHRASE.captures_iter(text) {
            if let Some(place) = capture.get(1) {
                let place = place.as_str().to_string();
                if !COMMON_WORDS.contains(place.as_str()) && !fragment.locations.contains(&place) {
                    fragment.locations.push(place);
                }
            }
        }

        let entities = self.extract(text);
        // The most-mentioned character (not a place) stands in for POV.
        fragment.pov = entities
            .iter()
            .filter(|e| e.count() >= 2)
            .filter(|e| !fragment.locations.iter().any(|l| l.split(' ').any(|w| w == e.name)))
            .max_by(|a, b| a.count().cmp(&b.count()).then_with(|| b.name.cmp(&a.name)))
            .map(|e| e.name.clone());
        fragment.location = fragment.locations.first().cloned();
        fragment.entities = entities;
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_found_with_all_offsets() {
        let text = "Mara waited. She called for Tomas twice. Mara sighed when Tomas came.";
        let fragment = EntityAnalyzer::new().analyze(text, "s").unwrap();
        let names: Vec<_> = fragment.entities.iter().map(|e| e.name.as_str()).collect();
        // Mara only ever opens a sentence, so she is never a candidate.
        assert_eq!(names, vec!["Tomas"]);
        let tomas = &fragment.entities[0];
        assert_eq!(tomas.offsets.len(), 2);
        assert_eq!(&text[tomas.offsets[0]..tomas.offsets[0] + 5], "Tomas");
    }

    #[test]
    fn sentence_initial_mentions_count_once_name_is_known() {
        let text = "The boat belonged to Ilse. Ilse never sold it.";
        let fragment = EntityAnalyzer::new().analyze(text, "s").unwrap();
        assert_eq!(fragment.entities[0].name, "Ilse");
        assert_eq!(fragment.entities[0].offsets, vec![21, 27]);
    }

    #[test]
    fn quoted_words_keep_their_offsets() {
        let text = "He said \"Ravel\" and left.";
        let fragment = EntityAnalyzer::new().analyze(text, "s").unwrap();
        assert_eq!(fragment.entities[0].offsets, vec![9]);
    }

    #[test]
    fn locations_and_pov() {
        let text = "They met in the Old Harbor at dawn. Later, Mara found Tomas near Kestrel. \
                    Tomas was tired, and Tomas said so.";
        let fragment = EntityAnalyzer::new().analyze(text, "s").unwrap();
        assert_eq!(fragment.locations, vec!["Old Harbor".to_string(), "Kestrel".to_string()]);
        assert_eq!(fragment.location.as_deref(), Some("Old Harbor"));
        assert_eq!(fragment.pov.as_deref(), Some("Tomas"));
    }

    #[test]
    fn empty_text_is_empty_fragment() {
        let fragment = EntityAnalyzer::new().analyze("", "s").unwrap();
        assert!(fragment.entities.is_empty());
        assert!(fragment.locations.is_empty());
    }
}
