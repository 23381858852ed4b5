//! Change detection between two versions of a chunk
//!
//! - [`diff`]: single-hunk prefix/suffix diff
//! - [`invalidated_sections`] / [`affected_entities`]: what a change touches
//! - [`new_promise_hints`] / [`resolved_promise_hints`]: plot-promise heuristics
//! - [`Delta`]: the per-commit summary of all of the above

mod delta;
mod hints;
mod invalidation;
mod text;

pub use delta::Delta;
pub use hints::{
    find_resolutions, find_setups, new_promise_hints, resolved_promise_hints, PromiseHint,
    PROMISE_LOOKAHEAD,
};
pub use invalidation::{
    affected_entities, affected_entities_with, invalidated_sections, invalidated_sections_with,
    ENTITY_BUFFER, SECTION_SIZE,
};
pub use text::{diff, ChangeKind, DiffResult, TextChange};
