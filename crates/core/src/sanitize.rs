use crate::errors::PipelineError;

pub const SEARCH_TERMS_MAX_CHARS: usize = 100;

const SEARCH_PUNCTUATION: &[char] = &[
    '*', '#', '@', '$', '%', '^', '&', '(', ')', '{', '}', '[', ']', '|', '\\', ':', ';', '"', '\'',
    '<', '>', '?', '/', '+', '=', '~', '`',
];

/// Normalises user text into a single line of at most `max_chars` characters.
pub fn sanitize(raw: &str, max_chars: usize) -> Result<String, PipelineError> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !is_invisible_format(*ch))
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect();
    let collapsed = collapse_whitespace(&cleaned);
    if collapsed.is_empty() {
        return Err(PipelineError::InvalidQuery("question is empty after sanitisation".to_owned()));
    }
    if max_chars == 0 {
        return Err(PipelineError::InvalidQuery("query length limit is zero".to_owned()));
    }

    Ok(truncate_at_word_boundary(&collapsed, max_chars).to_owned())
}

/// Strips characters that search APIs treat as operators and caps the length.
pub fn search_terms(sanitized: &str) -> String {
    let stripped: String = sanitized
        .chars()
        .map(|ch| if SEARCH_PUNCTUATION.contains(&ch) { ' ' } else { ch })
        .collect();
    let collapsed = collapse_whitespace(&stripped);
    truncate_at_word_boundary(&collapsed, SEARCH_TERMS_MAX_CHARS).to_owned()
}

fn is_invisible_format(ch: char) -> bool {
    matches!(ch, '\u{200B}'..='\u{200F}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}' | '\u{00AD}')
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Expects single-spaced input.
fn truncate_at_word_boundary(text: &str, max_chars: usize) -> &str {
    let Some((cut, next)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let head = &text[..cut];
    if next == ' ' {
        return head.trim_end();
    }

    match head.rfind(' ') {
        Some(space) if space > 0 => head[..space].trim_end(),
        _ => head,
    }
}
