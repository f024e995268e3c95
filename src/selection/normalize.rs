//! Cleanup of selected text before it is spoken.
//!
//! Selections copied from terminals, PDFs or wrapped paragraphs carry hard line
//! breaks in the middle of sentences. Those would make the engine pause at
//! odd places, so single breaks are joined while paragraph breaks survive.

/// Normalize whitespace for speech.
///
/// - `\r\n` and lone `\r` count as line breaks
/// - a single line break becomes a space
/// - two or more line breaks become one blank line (`"\n\n"`) when
///   `preserve_paragraphs` is set, otherwise a space
/// - runs of spaces and tabs collapse to one space
/// - the result is trimmed
///
/// Returns `None` when nothing but whitespace remains.
pub fn normalize_for_speech(text: &str, preserve_paragraphs: bool) -> Option<String> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(join_words(&current));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(join_words(&current));
    }

    let separator = if preserve_paragraphs { "\n\n" } else { " " };
    let joined = paragraphs
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(separator);

    if joined.is_empty() { None } else { Some(joined) }
}

fn join_words(lines: &[&str]) -> String {
    lines
        .iter()
        .flat_map(|line| line.split([' ', '\t']))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
