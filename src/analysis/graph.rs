//! Entity relationship graph for one chapter
//!
//! Built from a chapter's analysis fragment: every entity with its mention
//! offsets, and a co-mention edge between two entities whenever they are
//! mentioned within `CO_MENTION_WINDOW` bytes of each other. Edges carry
//! accumulated evidence and a lexical sentiment score that the incremental
//! policy preserves across edits that do not touch them.

use super::types::AnalysisFragment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Two mentions closer than this (in bytes) count as a co-mention
pub const CO_MENTION_WINDOW: usize = 250;

const POSITIVE_WORDS: &[&str] = &[
    "love", "loved", "smiled", "laughed", "trust", "trusted", "kind", "gentle", "friend",
    "embraced", "grateful", "warm", "together", "helped", "saved",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "hated", "betrayed", "lied", "angry", "fought", "struck", "cold", "enemy",
    "feared", "cursed", "glared", "threatened", "killed", "abandoned",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    pub name: String,
    pub mentions: Vec<usize>,
}

/// A relationship between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub source: String,
    pub target: String,
    /// Number of co-mentions backing this edge
    pub evidence: u32,
    /// -1.0 (hostile) to 1.0 (warm)
    pub sentiment: f64,
}

impl RelationEdge {
    pub fn touches(&self, entity: &str) -> bool {
        self.source == entity || self.target == entity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityGraph {
    pub entities: BTreeMap<String, EntityNode>,
    pub edges: BTreeMap<String, RelationEdge>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical key for the undirected edge between `a` and `b`
    pub fn edge_key(a: &str, b: &str) -> String {
        if a <= b {
            format!("{a}::{b}")
        } else {
            format!("{b}::{a}")
        }
    }

    /// Build the graph from a fragment of `text`.
    pub fn from_fragment(fragment: &AnalysisFragment, text: &str) -> Self {
        let mut graph = Self::new();
        for mention in &fragment.entities {
            graph
                .entities
                .entry(mention.name.clone())
                .or_insert_with(|| EntityNode {
                    name: mention.name.clone(),
                    mentions: Vec::new(),
                })
                .mentions
                .extend(mention.offsets.iter().copied());
        }

        // BTreeMap order, so `a.name < b.name` for every pair below
        let names: Vec<&EntityNode> = graph.entities.values().collect();
        let mut edges = BTreeMap::new();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                let mut evidence = 0u32;
                let mut sentiment_sum = 0.0;
                for &ma in &a.mentions {
                    for &mb in &b.mentions {
                        if ma.abs_diff(mb) <= CO_MENTION_WINDOW {
                            evidence += 1;
                            sentiment_sum += window_sentiment(text, ma.min(mb), ma.max(mb));
                        }
                    }
                }
                if evidence > 0 {
                    edges.insert(
                        Self::edge_key(&a.name, &b.name),
                        RelationEdge {
                            source: a.name.clone(),
                            target: b.name.clone(),
                            evidence,
                            sentiment: sentiment_sum / f64::from(evidence),
                        },
                    );
                }
            }
        }
        graph.edges = edges;
        graph
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&RelationEdge> {
        self.edges.get(&Self::edge_key(a, b))
    }
}

/// Lexical sentiment of the text between two mentions (plus a little context)
fn window_sentiment(text: &str, start: usize, end: usize) -> f64 {
    let from = floor_boundary(text, start);
    let to = floor_boundary(text, (end + 80).min(text.len()));
    let window = &text[from..to.max(from)];

    let (mut positive, mut negative) = (0i32, 0i32);
    for word in window.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if POSITIVE_WORDS.contains(&word.as_str()) {
            positive += 1;
        } else if NEGATIVE_WORDS.contains(&word.as_str()) {
            negative += 1;
        }
    }
    if positive + negative == 0 {
        0.0
    } else {
        f64::from(positive - negative) / f64::from(positive + negative)
    }
}

pub(crate) fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::EntityMention;

    fn fragment_with(mentions: &[(&str, &[usize])]) -> AnalysisFragment {
        let mut fragment = AnalysisFragment::empty("chapter-1");
        fragment.entities = mentions
            .iter()
            .map(|(name, offsets)| EntityMention {
                name: name.to_string(),
                offsets: offsets.to_vec(),
            })
            .collect();
        fragment
    }

    #[test]
    fn co_mentions_create_edges() {
        let text = "Mara smiled at Tomas. ".repeat(40);
        let fragment = fragment_with(&[("Mara", &[0, 2000]), ("Tomas", &[15]), ("Ilse", &[700])]);
        let graph = EntityGraph::from_fragment(&fragment, &text);

        assert_eq!(graph.entity_count(), 3);
        let edge = graph.edge("Tomas", "Mara").expect("edge");
        assert_eq!(edge.evidence, 1);
        assert!(edge.sentiment > 0.0);
        assert!(graph.edge("Mara", "Ilse").is_none());
    }

    #[test]
    fn edge_key_is_order_independent() {
        assert_eq!(EntityGraph::edge_key("b", "a"), EntityGraph::edge_key("a", "b"));
    }

    #[test]
    fn hostile_window_scores_negative() {
        let text = "Mara glared at Tomas and cursed him.";
        let fragment = fragment_with(&[("Mara", &[0]), ("Tomas", &[15])]);
        let graph = EntityGraph::from_fragment(&fragment, text);
        assert!(graph.edge("Mara", "Tomas").unwrap().sentiment < 0.0);
    }
}
