//! Entity graph patching

use crate::analysis::EntityGraph;
use std::collections::BTreeSet;

/// Merge a freshly extracted graph with the previous one.
///
/// Entities and edges come from `fresh`. An edge neither of whose
/// endpoints is in `affected` keeps its previous `evidence` and
/// `sentiment`; if the fresh extraction lost such an edge while both
/// endpoints still exist, the previous edge is kept as is.
pub fn patch_entity_graph(prev: &EntityGraph, fresh: EntityGraph, affected: &[String]) -> EntityGraph {
    let affected: BTreeSet<&str> = affected.iter().map(String::as_str).collect();
    let untouched = |a: &str, b: &str| !affected.contains(a) && !affected.contains(b);

    let mut patched = fresh;
    for (key, old_edge) in &prev.edges {
        if !untouched(&old_edge.source, &old_edge.target) {
            continue;
        }
        match patched.edges.get_mut(key) {
            Some(edge) => {
                edge.evidence = old_edge.evidence;
                edge.sentiment = old_edge.sentiment;
            }
            None => {
                let both_present = patched.entities.contains_key(&old_edge.source)
                    && patched.entities.contains_key(&old_edge.target);
                if both_present {
                    patched.edges.insert(key.clone(), old_edge.clone());
                }
            }
        }
    }
    patched
}
