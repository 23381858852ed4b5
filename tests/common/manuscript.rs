//! Deterministic manuscript text

pub const SCENE_BREAK: &str = "\n***\n";

const SENTENCES: [&str; 6] = [
    "The tide came in slowly over the grey stones.",
    "Nobody on the pier said a word about the boat.",
    "Lanterns swung in the wind above the harbor wall.",
    "It was late, and the bell had stopped ringing.",
    "Gulls circled the empty market in wide loops.",
    "Somewhere a door banged twice and then fell quiet.",
];

/// Distinct character names, one per scene
pub fn scene_names() -> [&'static str; 5] {
    ["Mara", "Tomas", "Ilse", "Bram", "Odile"]
}

/// At least `len` bytes of prose opening with `name`
pub fn prose(name: &str, len: usize) -> String {
    let mut out = format!("{name} waited by the water. The others watched {name} from the pier.");
    let mut i = 0;
    while out.len() < len {
        out.push(' ');
        out.push_str(SENTENCES[i % SENTENCES.len()]);
        i += 1;
    }
    out
}

/// Scenes joined by `***` break lines
pub fn chapter(scenes: &[String]) -> String {
    scenes.join(SCENE_BREAK)
}

/// `text` with `insert` placed at byte `at`
pub fn insert_at(text: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(text.len() + insert.len());
    out.push_str(&text[..at]);
    out.push_str(insert);
    out.push_str(&text[at..]);
    out
}
