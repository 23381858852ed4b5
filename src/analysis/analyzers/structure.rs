//! Structural pass: scene boundaries and scene metadata markers
//!
//! Scenes are separated by break lines (`***`, `* * *`, `#`, `---`, `~~~`)
//! or start at a markdown heading. Whitespace-only segments are dropped.
//! A scene may declare its metadata on its own lines:
//!
//! ```text
//! POV: Mara
//! Location: The Lighthouse
//! ```

use crate::analysis::traits::ChunkAnalyzer;
use crate::analysis::types::{AnalysisError, AnalysisFragment, SceneBoundary, SceneKind};
use once_cell::sync::Lazy;
use regex::Regex;

static BREAK_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:\*\s*){3,}|#|-{3,}|~{3,})\s*$").expect("break pattern is valid")
});

static POV_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*pov:\s*(.+?)\s*$").expect("pov pattern is valid"));

static LOCATION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:location|setting):\s*(.+?)\s*$").expect("location pattern is valid")
});

/// Cheap structural parser that splits a chapter into scenes
#[derive(Debug, Clone, Default)]
pub struct SceneParser;

impl SceneParser {
    pub fn new() -> Self {
        Self
    }

    /// Split `text` into scenes. Empty or whitespace-only text has none.
    pub fn parse(&self, text: &str) -> Vec<SceneBoundary> {
        let mut segments: Vec<(usize, usize, SceneKind)> = Vec::new();
        let mut current_start = 0;
        let mut current_kind = SceneKind::Opening;
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let line_start = offset;
            let line_end = offset + line.len();
            offset = line_end;

            if BREAK_LINE.is_match(line) {
                segments.push((current_start, line_start, current_kind));
                current_start = line_end;
                current_kind = SceneKind::Break;
            } else if is_heading(line) {
                segments.push((current_start, line_start, current_kind));
                current_start = line_start;
                current_kind = SceneKind::Heading;
            }
        }
        segments.push((current_start, text.len(), current_kind));

        segments
            .into_iter()
            .filter(|(start, end, _)| !text[*start..*end].trim().is_empty())
            .enumerate()
            .map(|(index, (start, end, kind))| {
                let body = &text[start..end];
                SceneBoundary {
                    index,
                    kind,
                    start,
                    end,
                    pov: pov_marker(body),
                    location: location_marker(body),
                }
            })
            .collect()
    }
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes)
        && trimmed[hashes..].starts_with(' ')
        && !trimmed[hashes..].trim().is_empty()
}

/// `POV:` marker value, if the text declares one
pub fn pov_marker(text: &str) -> Option<String> {
    POV_MARKER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `Location:` / `Setting:` marker value, if the text declares one
pub fn location_marker(text: &str) -> Option<String> {
    LOCATION_MARKER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reports scene structure and declared metadata
pub struct StructureAnalyzer {
    parser: SceneParser,
}

impl StructureAnalyzer {
    pub fn new() -> Self {
        Self {
            parser: SceneParser::new(),
        }
    }
}

impl Default for StructureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAnalyzer for StructureAnalyzer {
    fn id(&self) -> &str {
        "structure"
    }

    fn name(&self) -> &str {
        "Scene Structure Analyzer"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
        let mut fragment = AnalysisFragment::empty(chunk_id);
        fragment.scenes = self.parser.parse(text);
        fragment.pov = pov_marker(text);
        fragment.location = location_marker(text);
        Ok(fragment)
    }
}
