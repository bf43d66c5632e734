use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::domain::answer::{AnswerProvenance, Citation, SynthesizedAnswer};
use crate::domain::message::{Footnote, FormattedMessage};
use crate::domain::search::host_of;
use crate::errors::PipelineError;

pub const DEFAULT_MAX_FOOTNOTES: usize = 3;
pub const SOURCES_HEADING: &str = "*Sources:*";

const TRAILING_URL_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"', '*', '_'];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatOptions {
    pub max_footnotes: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self { max_footnotes: DEFAULT_MAX_FOOTNOTES }
    }
}

/// Turns synthesized answers into Slack mrkdwn with numbered source links.
#[derive(Clone, Debug, Default)]
pub struct ResponseFormatter {
    options: FormatOptions,
}

impl ResponseFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    pub fn format(&self, answer: &SynthesizedAnswer) -> Result<FormattedMessage, PipelineError> {
        let mut message = format_answer(&answer.text, &answer.citations, &self.options)?;
        message.degraded = answer.provenance == AnswerProvenance::Fallback;
        Ok(message)
    }
}

/// Rewrites citation markers, bare URLs and existing Slack links to
/// `<url|[n]>` and appends a `*Sources:*` block.
///
/// Numbers are assigned per distinct URL in order of first appearance. Only
/// the first `max_footnotes` URLs are numbered; later ones are rendered as
/// `<url|host>` so that every numbered token has a footnote.
pub fn format_answer(
    text: &str,
    citations: &[Citation],
    options: &FormatOptions,
) -> Result<FormattedMessage, PipelineError> {
    let by_index = index_citations(citations)?;
    let titles_by_url: HashMap<&str, Cow<'_, str>> = citations
        .iter()
        .map(|citation| (citation.result.url.as_str(), citation.result.display_title()))
        .collect();
    let title_for = |url: &str| titles_by_url.get(url).map(|title| &**title);

    let normalized = normalize_markdown(text);
    let mut links = LinkTable::new(options.max_footnotes);
    let mut body = String::with_capacity(normalized.len());
    let mut cursor = 0;

    for captures in token_pattern().captures_iter(&normalized) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        body.push_str(&normalized[cursor..whole.start()]);
        cursor = whole.end();

        if let Some(marker) = captures.name("marker") {
            let citation = marker
                .as_str()
                .parse::<usize>()
                .ok()
                .and_then(|index| by_index.get(&index))
                .ok_or_else(|| {
                    PipelineError::MalformedAnswer(format!(
                        "citation marker [{}] has no matching source",
                        marker.as_str()
                    ))
                })?;
            let title = citation.result.display_title();
            let rendered = links.link(&citation.result.url, Some(&*title));
            body.push_str(&rendered);
        } else if let Some(url) = captures.name("slack_url") {
            let url = url.as_str();
            let title = descriptive_label(captures.name("slack_label").map(|label| label.as_str()))
                .or_else(|| title_for(url));
            body.push_str(&links.link(url, title));
        } else if let Some(url) = captures.name("md_url") {
            let url = url.as_str();
            let label = descriptive_label(captures.name("md_label").map(|label| label.as_str()));
            let title = label.or_else(|| title_for(url));
            if let Some(label) = label {
                body.push_str(label);
                body.push(' ');
            }
            body.push_str(&links.link(url, title));
        } else if let Some(url) = captures.name("bare_url") {
            let (url, trailing) = split_trailing_punctuation(url.as_str());
            body.push_str(&links.link(url, title_for(url)));
            body.push_str(trailing);
        }
    }
    body.push_str(&normalized[cursor..]);

    let mut body = body.trim().to_owned();
    let footnotes = links.into_footnotes();
    if !footnotes.is_empty() {
        body.push_str("\n\n");
        body.push_str(SOURCES_HEADING);
        for footnote in &footnotes {
            body.push_str(&format!(
                "\n[{}] <{}|{}>",
                footnote.number,
                footnote.url,
                escape_mrkdwn(&footnote.title)
            ));
        }
    }

    Ok(FormattedMessage { body, footnotes, suppress_link_previews: true, degraded: false })
}

/// Escapes the three characters Slack treats as control sequences.
pub fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn index_citations(citations: &[Citation]) -> Result<HashMap<usize, &Citation>, PipelineError> {
    let mut by_index = HashMap::with_capacity(citations.len());
    for citation in citations {
        if citation.index == 0 {
            return Err(PipelineError::MalformedAnswer("citation index 0 is not valid".to_owned()));
        }
        if by_index.insert(citation.index, citation).is_some() {
            return Err(PipelineError::MalformedAnswer(format!(
                "duplicate citation index {}",
                citation.index
            )));
        }
    }
    Ok(by_index)
}

struct LinkTable {
    max_numbered: usize,
    entries: Vec<(String, Option<String>)>,
    positions: HashMap<String, usize>,
}

impl LinkTable {
    fn new(max_numbered: usize) -> Self {
        Self { max_numbered, entries: Vec::new(), positions: HashMap::new() }
    }

    fn link(&mut self, url: &str, title: Option<&str>) -> String {
        let position = match self.positions.get(url) {
            Some(position) => {
                let position = *position;
                if let Some((_, slot @ None)) = self.entries.get_mut(position) {
                    *slot = title.map(str::to_owned);
                }
                position
            }
            None => {
                let position = self.entries.len();
                self.entries.push((url.to_owned(), title.map(str::to_owned)));
                self.positions.insert(url.to_owned(), position);
                position
            }
        };

        if position < self.max_numbered {
            format!("<{url}|[{}]>", position + 1)
        } else {
            format!("<{url}|{}>", host_of(url).unwrap_or_else(|| url.to_owned()))
        }
    }

    fn into_footnotes(self) -> Vec<Footnote> {
        self.entries
            .into_iter()
            .take(self.max_numbered)
            .enumerate()
            .map(|(position, (url, title))| {
                let title = title.or_else(|| host_of(&url)).unwrap_or_else(|| url.clone());
                Footnote { number: position + 1, url, title }
            })
            .collect()
    }
}

fn descriptive_label(label: Option<&str>) -> Option<&str> {
    let label = label?.trim();
    let bare = label.trim_start_matches('[').trim_end_matches(']');
    if label.is_empty() || bare.chars().all(|ch| ch.is_ascii_digit()) {
        None
    } else {
        Some(label)
    }
}

fn split_trailing_punctuation(url: &str) -> (&str, &str) {
    let trimmed = url.trim_end_matches(TRAILING_URL_PUNCTUATION);
    url.split_at(trimmed.len())
}

fn normalize_markdown(text: &str) -> String {
    let without_references = strip_reference_section(text);
    let headings = heading_pattern().replace_all(without_references, |caps: &Captures| {
        format!("*{}*", caps[1].trim_matches('*').trim())
    });
    bold_pattern().replace_all(&headings, "*$1*").into_owned()
}

fn strip_reference_section(text: &str) -> &str {
    for heading in reference_heading_pattern().find_iter(text) {
        let tail = &text[heading.end()..];
        if tail.lines().all(is_reference_line) {
            return &text[..heading.start()];
        }
    }
    text
}

fn is_reference_line(line: &str) -> bool {
    let line = line.trim();
    line.is_empty()
        || line.starts_with(['-', '*', '•', '['])
        || line.starts_with(|ch: char| ch.is_ascii_digit())
        || line.contains("http://")
        || line.contains("https://")
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"<(?P<slack_url>https?://[^|>\s]+)(?:\|(?P<slack_label>[^>]*))?>",
            r"|\[(?P<md_label>[^\]\n]+)\]\((?P<md_url>https?://(?:[^()\s]|\([^()\s]*\))+)\)",
            r"|\[(?P<marker>\d{1,3})\]",
            // One level of balanced parentheses, as in wiki-style paths.
            r"|(?P<bare_url>https?://(?:[^\s<>|()\[\]]|\([^\s<>|()\[\]]*\))+)",
        ))
        .expect("valid link token regex")
    })
}

fn bold_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\*\*([^*\n]+)\*\*").expect("valid bold regex"))
}

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t]*$").expect("valid heading regex"))
}

fn reference_heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?\*{0,2}(?:references|sources)\*{0,2}[ \t]*:?[ \t]*\*{0,2}[ \t]*$",
        )
        .expect("valid reference heading regex")
    })
}
