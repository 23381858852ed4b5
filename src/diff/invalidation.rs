//! Invalidation helpers derived from a set of text changes

use super::text::TextChange;
use crate::analysis::EntityGraph;
use std::collections::BTreeSet;

/// Width of one invalidation section in bytes
pub const SECTION_SIZE: usize = 500;

/// Slack around a change within which an entity mention counts as touched
pub const ENTITY_BUFFER: usize = 100;

/// Section indices touched by `changes`, with one buffer section either side
pub fn invalidated_sections(changes: &[TextChange], text_length: usize) -> Vec<usize> {
    invalidated_sections_with(changes, text_length, SECTION_SIZE)
}

pub fn invalidated_sections_with(
    changes: &[TextChange],
    text_length: usize,
    section_size: usize,
) -> Vec<usize> {
    let section_size = section_size.max(1);
    let last_section = text_length.saturating_sub(1) / section_size;

    let mut sections = BTreeSet::new();
    for change in changes {
        let first = change.start / section_size;
        let last = change.end.max(change.start + 1).saturating_sub(1) / section_size;
        let from = first.saturating_sub(1).min(last_section);
        let to = (last + 1).min(last_section);
        sections.extend(from..=to.max(from));
    }
    sections.into_iter().collect()
}

/// Entities with a mention inside `[start - buffer, end + buffer]` of any change
pub fn affected_entities(changes: &[TextChange], graph: &EntityGraph) -> Vec<String> {
    affected_entities_with(changes, graph, ENTITY_BUFFER)
}

pub fn affected_entities_with(
    changes: &[TextChange],
    graph: &EntityGraph,
    buffer: usize,
) -> Vec<String> {
    graph
        .entities
        .values()
        .filter(|entity| {
            changes.iter().any(|change| {
                let low = change.start.saturating_sub(buffer);
                let high = change.end + buffer;
                entity.mentions.iter().any(|&m| m >= low && m <= high)
            })
        })
        .map(|entity| entity.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::EntityNode;

    #[test]
    fn single_change_gets_buffer_sections() {
        let change = TextChange::insert(1_200, "x");
        assert_eq!(invalidated_sections(&[change], 5_000), vec![1, 2, 3]);
    }

    #[test]
    fn sections_clamp_to_text() {
        let change = TextChange::insert(0, "abc");
        assert_eq!(invalidated_sections(&[change.clone()], 3), vec![0]);
        assert_eq!(invalidated_sections(&[change], 900), vec![0, 1]);
    }

    #[test]
    fn change_spanning_sections_covers_all() {
        let change = TextChange::modify(400, "a", "b".repeat(700));
        assert_eq!(invalidated_sections(&[change], 10_000), vec![0, 1, 2, 3]);
    }

    #[test]
    fn entities_near_change_are_affected() {
        let mut graph = EntityGraph::new();
        for (name, mentions) in [("Mara", vec![10, 900]), ("Tomas", vec![2_000]), ("Ilse", vec![1_080])] {
            graph.entities.insert(
                name.to_string(),
                EntityNode {
                    name: name.to_string(),
                    mentions,
                },
            );
        }
        let change = TextChange::insert(1_000, "hello");
        let affected = affected_entities(&[change], &graph);
        assert_eq!(affected, vec!["Ilse".to_string(), "Mara".to_string()]);
    }
}
