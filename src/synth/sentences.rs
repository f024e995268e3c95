//! Sentence segmentation for incremental synthesis.
//!
//! Each returned unit becomes one synthesis request and therefore one audio
//! chunk. Short units keep time-to-first-sound low; `max_chars` bounds the
//! latency of any single request.

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '»' | '”' | '’')
}

/// Split text into sentence-sized units of at most `max_chars` characters.
///
/// Paragraphs (separated by a blank line) never share a unit. Single line
/// breaks inside a paragraph are treated as spaces.
pub fn split_sentences(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut units = Vec::new();
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
        if paragraph.is_empty() {
            continue;
        }
        for sentence in sentences_in(&paragraph) {
            push_bounded(&mut units, &sentence, max_chars);
        }
    }
    units
}

fn sentences_in(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !is_terminator(c) {
            continue;
        }
        while let Some(&next) = chars.peek() {
            if is_terminator(next) || is_closing(next) {
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }
        // "3.14" and "example.com" stay together
        if chars.peek().is_none_or(|next| next.is_whitespace()) {
            flush(&mut sentences, &mut current);
        }
    }
    flush(&mut sentences, &mut current);
    sentences
}

fn flush(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        let speakable = trimmed.chars().any(char::is_alphanumeric);
        match sentences.last_mut() {
            // stray punctuation such as a lone "..." rides along with the previous sentence
            Some(last) if !speakable => {
                last.push(' ');
                last.push_str(trimmed);
            }
            _ => sentences.push(trimmed.to_string()),
        }
    }
    current.clear();
}

fn push_bounded(units: &mut Vec<String>, sentence: &str, max_chars: usize) {
    let mut rest = sentence.trim();
    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..limit];
        let cut = window
            .rfind([',', ';', ':'])
            .map(|i| i + 1)
            .or_else(|| window.rfind(char::is_whitespace))
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        let (head, tail) = rest.split_at(cut);
        let head = head.trim();
        if !head.is_empty() {
            units.push(head.to_string());
        }
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        units.push(rest.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sentence() {
        assert_eq!(split_sentences("Hello world.", 400), vec!["Hello world."]);
    }

    #[test]
    fn splits_on_terminators() {
        assert_eq!(
            split_sentences("One. Two! Three? Four", 400),
            vec!["One.", "Two!", "Three?", "Four"]
        );
    }

    #[test]
    fn keeps_decimal_numbers_together() {
        assert_eq!(
            split_sentences("Pi is 3.14 exactly. Next.", 400),
            vec!["Pi is 3.14 exactly.", "Next."]
        );
    }

    #[test]
    fn ellipsis_and_closing_quotes_stay_with_sentence() {
        assert_eq!(
            split_sentences("Wait... what? He said \"go.\" Then left.", 400),
            vec!["Wait...", "what?", "He said \"go.\"", "Then left."]
        );
    }

    #[test]
    fn lone_punctuation_merges_into_previous() {
        assert_eq!(split_sentences("Done. ...", 400), vec!["Done. ..."]);
    }

    #[test]
    fn paragraphs_are_separate_units() {
        assert_eq!(
            split_sentences("First line\ncontinues\n\nSecond paragraph", 400),
            vec!["First line continues", "Second paragraph"]
        );
    }

    #[test]
    fn long_sentence_splits_at_clause_boundary() {
        let text = "alpha beta gamma, delta epsilon zeta eta theta";
        let units = split_sentences(text, 20);
        assert_eq!(units[0], "alpha beta gamma,");
        assert!(units.iter().all(|u| u.chars().count() <= 20), "{units:?}");
        assert_eq!(units.join(" "), text);
    }

    #[test]
    fn long_word_is_hard_split() {
        let units = split_sentences("abcdefghij", 4);
        assert_eq!(units, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let units = split_sentences("äöü äöü äöü", 5);
        assert_eq!(units, vec!["äöü", "äöü", "äöü"]);
    }

    #[test]
    fn blank_text_has_no_units() {
        assert!(split_sentences("  \n\n \t", 400).is_empty());
    }
}
