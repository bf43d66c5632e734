use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use url::Url;

/// Hard ceiling on results fetched per query, regardless of configuration.
pub const MAX_SEARCH_RESULTS: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
    /// 1-based position reported by the upstream provider.
    pub rank: u32,
}

impl SearchResult {
    /// Returns `None` when the URL is not an absolute http(s) URL.
    pub fn new(
        title: impl Into<String>,
        snippet: impl Into<String>,
        url: impl Into<String>,
        rank: u32,
    ) -> Option<Self> {
        let url = url.into();
        parse_http_url(&url)?;

        Some(Self { title: title.into().trim().to_owned(), snippet: snippet.into(), url, rank })
    }

    pub fn host(&self) -> String {
        host_of(&self.url).unwrap_or_else(|| self.url.clone())
    }

    /// Title for display, falling back to the host when upstream sent none.
    pub fn display_title(&self) -> Cow<'_, str> {
        if self.title.is_empty() {
            Cow::Owned(self.host())
        } else {
            Cow::Borrowed(&self.title)
        }
    }
}

/// Parses `url` as an absolute http(s) URL with a host. Characters that would
/// break Slack's `<url|label>` syntax are rejected before parsing.
pub fn parse_http_url(url: &str) -> Option<Url> {
    if url.chars().any(|ch| ch.is_whitespace() || ch.is_control() || matches!(ch, '<' | '>' | '|')) {
        return None;
    }

    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str().filter(|host| !host.is_empty())?;
    Some(parsed)
}

pub fn is_absolute_http_url(url: &str) -> bool {
    parse_http_url(url).is_some()
}

/// Host of an http(s) URL, without userinfo or port. IPv6 literals keep their
/// brackets.
pub fn host_of(url: &str) -> Option<String> {
    parse_http_url(url).and_then(|parsed| parsed.host_str().map(str::to_owned))
}

#[cfg(test)]
mod tests {
    use super::{host_of, is_absolute_http_url, SearchResult};

    #[test]
    fn rejects_relative_and_non_http_urls() {
        assert!(SearchResult::new("Doc", "", "/docs/recipes", 1).is_none());
        assert!(SearchResult::new("Doc", "", "ftp://files.example.com/a", 1).is_none());
        assert!(SearchResult::new("Doc", "", "https://", 1).is_none());
        assert!(SearchResult::new("Doc", "", "https://exa mple.com", 1).is_none());
    }

    #[test]
    fn accepts_absolute_urls_and_trims_titles() {
        let result = SearchResult::new("  Visual recipes ", "Intro", "https://doc.example.com/r", 2)
            .expect("valid result");

        assert_eq!(result.title, "Visual recipes");
        assert_eq!(result.rank, 2);
        assert_eq!(result.host(), "doc.example.com");
    }

    #[test]
    fn host_strips_userinfo_and_port() {
        assert_eq!(host_of("https://user:pw@docs.example.com:8443/a?b#c").as_deref(), Some("docs.example.com"));
        assert_eq!(host_of("http://localhost").as_deref(), Some("localhost"));
        assert_eq!(host_of("mailto:someone@example.com"), None);
    }

    #[test]
    fn display_title_falls_back_to_host() {
        let result = SearchResult::new("", "", "https://community.example.com/t/1", 1)
            .expect("valid result");
        assert_eq!(result.display_title(), "community.example.com");
        assert!(is_absolute_http_url(&result.url));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let result = SearchResult::new("Doc", "", "Https://doc.example.com/a", 1).expect("mixed-case scheme");
        assert_eq!(result.url, "Https://doc.example.com/a");
        assert_eq!(result.host(), "doc.example.com");
        assert!(is_absolute_http_url("HTTP://DOC.EXAMPLE.COM/b"));
    }

    #[test]
    fn ipv6_hosts_keep_their_brackets() {
        let result = SearchResult::new("", "", "https://[2001:db8::1]:8443/x", 1).expect("ipv6 literal");
        assert_eq!(result.host(), "[2001:db8::1]");
        assert_eq!(result.display_title(), "[2001:db8::1]");
    }

    #[test]
    fn invalid_hosts_are_rejected() {
        assert!(!is_absolute_http_url("https://exa\"mple%zz.com/a"));
        assert!(!is_absolute_http_url("https://[not-an-address]/a"));
        assert!(SearchResult::new("Doc", "", "https://doc.example.com/a|b", 1).is_none());
    }
}
