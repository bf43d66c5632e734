use serde::{Deserialize, Serialize};

use crate::domain::message::{FormattedMessage, PipelineOutcome};
use crate::errors::FailureKind;
use crate::format::escape_mrkdwn;

pub const QUERY_PREVIEW_CHARS: usize = 200;

/// A canned answer served when the live pipeline cannot produce one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackTopic {
    pub title: String,
    /// Case-insensitive phrases; any match selects the topic.
    pub keywords: Vec<String>,
    pub body: String,
}

impl FallbackTopic {
    pub fn matches(&self, query_lower: &str) -> bool {
        self.keywords
            .iter()
            .map(|keyword| keyword.trim().to_lowercase())
            .any(|keyword| !keyword.is_empty() && query_lower.contains(&keyword))
    }

    fn render(&self) -> String {
        format!("*{}*\n\n{}", self.title.trim(), self.body.trim())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackTable {
    topics: Vec<FallbackTopic>,
}

impl FallbackTable {
    pub fn new(topics: Vec<FallbackTopic>) -> Self {
        Self { topics }
    }

    /// First topic in table order whose keywords appear in the query.
    pub fn find(&self, query: &str) -> Option<&FallbackTopic> {
        let query_lower = query.to_lowercase();
        self.topics.iter().find(|topic| topic.matches(&query_lower))
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self::new(default_topics())
    }
}

#[derive(Clone, Debug, Default)]
pub struct FallbackGenerator {
    table: FallbackTable,
}

impl FallbackGenerator {
    pub fn new(table: FallbackTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &FallbackTable {
        &self.table
    }

    pub fn fallback(&self, query: &str, kind: FailureKind) -> PipelineOutcome {
        match kind {
            FailureKind::InvalidQuery => PipelineOutcome::TotalFailure(rephrase_message()),
            FailureKind::NoSearchResults => match self.table.find(query) {
                Some(topic) => PipelineOutcome::PartialFailure(FormattedMessage::degraded(topic.render())),
                None => PipelineOutcome::TotalFailure(no_results_message()),
            },
            FailureKind::SearchUnavailable
            | FailureKind::SynthesisUnavailable
            | FailureKind::MalformedAnswer
            | FailureKind::PostFailed => match self.table.find(query) {
                Some(topic) => PipelineOutcome::PartialFailure(FormattedMessage::degraded(topic.render())),
                None => PipelineOutcome::TotalFailure(unavailable_message(query)),
            },
        }
    }
}

fn rephrase_message() -> String {
    "I couldn't find a question in that message.\n\n\
     Try asking something specific, for example _How do I create a visual recipe?_"
        .to_owned()
}

fn no_results_message() -> String {
    "I couldn't find any relevant information about your query. Please try rephrasing your \
     question or being more specific.\n\n\
     *Tips for better results:*\n\
     • Use specific Dataiku feature names\n\
     • Include error messages if troubleshooting\n\
     • Ask about specific use cases or workflows"
        .to_owned()
}

fn unavailable_message(query: &str) -> String {
    format!(
        "🤖 *Search temporarily unavailable*\n\n\
         I couldn't complete this search right now, but these resources may help:\n\n\
         *Quick help:*\n\
         • <https://doc.dataiku.com/|Dataiku documentation>\n\
         • <https://community.dataiku.com/|Dataiku community>\n\
         • Contact your Dataiku administrator for account-specific issues\n\
         • Try rephrasing your question with more specific terms\n\n\
         *Your query:* `{}`\n\n\
         Please try again in a few minutes.",
        query_preview(query)
    )
}

fn query_preview(query: &str) -> String {
    let mut preview: String = query.chars().take(QUERY_PREVIEW_CHARS).collect();
    if query.chars().count() > QUERY_PREVIEW_CHARS {
        preview.push_str("...");
    }
    escape_mrkdwn(&preview.replace('`', "'"))
}

fn topic(title: &str, keywords: &[&str], body: &str) -> FallbackTopic {
    FallbackTopic {
        title: title.to_owned(),
        keywords: keywords.iter().map(|keyword| (*keyword).to_owned()).collect(),
        body: body.to_owned(),
    }
}

fn default_topics() -> Vec<FallbackTopic> {
    vec![
        topic(
            "🔒 Dataiku user profile and permissions",
            &["not allowed", "permission", "profile", "visual machine learning", "prediction model"],
            "This usually means your user profile lacks the permissions for the feature you tried.\n\n\
             *Immediate solutions:*\n\
             • Ask your Dataiku administrator for a profile upgrade\n\
             • Ask to join a group with Data Scientist or ML Practitioner permissions\n\
             • Check whether your instance has Visual ML licenses available\n\n\
             *Profile types:*\n\
             • *Reader*: view projects and dashboards\n\
             • *Analyst*: create basic recipes and datasets\n\
             • *Data Scientist*: Visual ML, code recipes and advanced features\n\
             • *Admin*: full platform access\n\n\
             💡 Most Visual ML features require the Data Scientist profile or higher.",
        ),
        topic(
            "🔐 Dataiku authentication",
            &["authentication", "login", "access denied", "unauthorized"],
            "*Common solutions:*\n\
             • Clear browser cache and cookies for Dataiku\n\
             • Try logging in from a private browsing window\n\
             • Check LDAP or SSO configuration with your administrator\n\
             • Verify your username and password\n\
             • Check whether your account has been deactivated\n\n\
             *If you use SSO:*\n\
             • Make sure you go through the correct SSO portal\n\
             • Ask your IT team about SSO token expiration",
        ),
        topic(
            "📊 Dataiku datasets and connections",
            &["dataset", "connection", "cannot connect", "data source"],
            "*Troubleshooting steps:*\n\
             • Check the connection settings on the dataset settings page\n\
             • Verify database credentials and network connectivity\n\
             • Use *Test &amp; Get Schema* to test the connection\n\
             • Check that the source system is reachable\n\
             • Review the connection logs for detailed errors\n\n\
             *Common causes:*\n\
             • Expired database credentials\n\
             • Network or firewall restrictions\n\
             • Source system maintenance\n\
             • Changed schema or table structure",
        ),
        topic(
            "⚙️ Dataiku recipe and job failures",
            &["recipe failed", "job failed", "build failed", "error in recipe"],
            "*Debugging steps:*\n\
             • Read the job logs for the detailed error\n\
             • Review the recipe configuration and input datasets\n\
             • Verify that required columns exist in the input data\n\
             • Look for data quality issues such as nulls or bad formats\n\
             • Make sure enough compute resources are available\n\n\
             *Common fixes:*\n\
             • Refresh input dataset schemas\n\
             • Clear the recipe cache and rebuild\n\
             • Check SQL syntax in SQL recipes\n\
             • Check Python or R syntax in code recipes",
        ),
        topic(
            "⚡ Dataiku performance",
            &["slow", "performance", "timeout", "hanging"],
            "*Optimization tips:*\n\
             • Sample large datasets during development\n\
             • Add filters to reduce data volume\n\
             • Push SQL operations down to the database\n\
             • Check cluster resource allocation\n\
             • Review recipe memory and CPU settings\n\n\
             *For visual recipes:*\n\
             • Use a Limit step while iterating\n\
             • Pick the right join type\n\
             • Partition large datasets",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::{FallbackGenerator, FallbackTable, FallbackTopic, QUERY_PREVIEW_CHARS};
    use crate::domain::message::PipelineOutcome;
    use crate::errors::FailureKind;

    const ALL_KINDS: [FailureKind; 6] = [
        FailureKind::InvalidQuery,
        FailureKind::NoSearchResults,
        FailureKind::SearchUnavailable,
        FailureKind::SynthesisUnavailable,
        FailureKind::MalformedAnswer,
        FailureKind::PostFailed,
    ];

    fn has_bare_url(text: &str) -> bool {
        text.match_indices("http").any(|(start, _)| !text[..start].ends_with('<'))
    }

    #[test]
    fn keyword_match_yields_degraded_partial_failure() {
        let generator = FallbackGenerator::default();
        let outcome = generator.fallback("My job FAILED, says Recipe Failed", FailureKind::SearchUnavailable);

        let PipelineOutcome::PartialFailure(message) = outcome else {
            panic!("expected partial failure");
        };
        assert!(message.degraded);
        assert!(message.body.contains("recipe and job failures"));
    }

    #[test]
    fn no_match_yields_generic_message_with_escaped_preview() {
        let generator = FallbackGenerator::default();
        let outcome = generator.fallback("what is <b>`flow`</b> & zone?", FailureKind::SynthesisUnavailable);

        let PipelineOutcome::TotalFailure(text) = outcome else {
            panic!("expected total failure");
        };
        assert!(text.contains("&lt;b&gt;'flow'&lt;/b&gt; &amp; zone?"));
        assert!(text.contains("<https://doc.dataiku.com/|Dataiku documentation>"));
    }

    #[test]
    fn query_preview_is_truncated() {
        let generator = FallbackGenerator::default();
        let long = "z".repeat(QUERY_PREVIEW_CHARS + 50);
        let PipelineOutcome::TotalFailure(text) = generator.fallback(&long, FailureKind::SearchUnavailable)
        else {
            panic!("expected total failure");
        };
        assert!(text.contains(&format!("`{}...`", "z".repeat(QUERY_PREVIEW_CHARS))));
    }

    #[test]
    fn no_results_and_invalid_query_have_dedicated_messages() {
        let generator = FallbackGenerator::default();
        let no_results = generator.fallback("zzz", FailureKind::NoSearchResults).into_message();
        assert!(no_results.body.starts_with("I couldn't find any relevant information"));

        let invalid = generator.fallback("slow dataset", FailureKind::InvalidQuery).into_message();
        assert!(invalid.body.contains("couldn't find a question"));
    }

    #[test]
    fn every_failure_kind_produces_one_degraded_message_without_raw_urls() {
        let generator = FallbackGenerator::default();
        for query in ["", "permission denied", "how do joins work"] {
            for kind in ALL_KINDS {
                let message = generator.fallback(query, kind).into_message();
                assert!(message.degraded, "{kind} / {query}");
                assert!(!message.body.is_empty(), "{kind} / {query}");
                assert!(!has_bare_url(&message.body), "{kind} / {query}");
            }
        }
    }

    #[test]
    fn table_is_replaceable() {
        let generator = FallbackGenerator::new(FallbackTable::new(vec![FallbackTopic {
            title: "Billing".to_owned(),
            keywords: vec!["Invoice".to_owned()],
            body: "Ask finance.".to_owned(),
        }]));

        let message = generator.fallback("where is my invoice", FailureKind::SearchUnavailable).into_message();
        assert_eq!(message.body, "*Billing*\n\nAsk finance.");
        assert!(matches!(
            generator.fallback("permission denied", FailureKind::SearchUnavailable),
            PipelineOutcome::TotalFailure(_)
        ));
    }
}
