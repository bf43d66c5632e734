use relay_core::FormattedMessage;
use serde::Serialize;

pub const WELCOME_TEXT: &str = "👋 Hi! I'm your Dataiku AI assistant. I can help you with questions about \
Dataiku's features, best practices, and troubleshooting.";

pub const SUGGESTED_PROMPTS_TITLE: &str = "Here are some things I can help you with:";

pub const THREAD_TITLE_CHARS: usize = 50;

/// `chat.postMessage` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostMessage {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    pub text: String,
    pub mrkdwn: bool,
    pub unfurl_links: bool,
    pub unfurl_media: bool,
}

impl PostMessage {
    pub fn reply(channel: &str, thread_ts: &str, message: &FormattedMessage) -> Self {
        Self {
            channel: channel.to_owned(),
            thread_ts: Some(thread_ts.to_owned()),
            text: message.body.clone(),
            mrkdwn: true,
            unfurl_links: !message.suppress_link_previews,
            unfurl_media: !message.suppress_link_previews,
        }
    }

    pub fn welcome(channel: &str, thread_ts: &str) -> Self {
        Self::reply(channel, thread_ts, &FormattedMessage::plain(WELCOME_TEXT))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SuggestedPrompt {
    pub title: String,
    pub message: String,
}

impl SuggestedPrompt {
    fn new(title: &str, message: &str) -> Self {
        Self { title: title.to_owned(), message: message.to_owned() }
    }
}

/// `assistant.threads.setSuggestedPrompts` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SuggestedPrompts {
    pub channel_id: String,
    pub thread_ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub prompts: Vec<SuggestedPrompt>,
}

impl SuggestedPrompts {
    pub fn starter_set(channel_id: &str, thread_ts: &str) -> Self {
        Self {
            channel_id: channel_id.to_owned(),
            thread_ts: thread_ts.to_owned(),
            title: Some(SUGGESTED_PROMPTS_TITLE.to_owned()),
            prompts: vec![
                SuggestedPrompt::new("Getting Started", "How do I create my first project in Dataiku?"),
                SuggestedPrompt::new(
                    "Data Preparation",
                    "What are the best practices for data preparation in Dataiku?",
                ),
                SuggestedPrompt::new("Machine Learning", "How do I build and deploy a machine learning model?"),
                SuggestedPrompt::new("Visual Recipes", "What are visual recipes and how do I use them?"),
            ],
        }
    }
}

/// Title for a new assistant thread, built from the opening question.
pub fn thread_title(question: &str) -> String {
    let question = question.trim();
    let mut chars = question.chars();
    let head: String = chars.by_ref().take(THREAD_TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("Q: {head}...")
    } else {
        format!("Q: {head}")
    }
}

#[cfg(test)]
mod tests {
    use relay_core::FormattedMessage;
    use serde_json::json;

    use super::{thread_title, PostMessage, SuggestedPrompts};

    #[test]
    fn replies_are_threaded_mrkdwn_without_unfurls() {
        let message = PostMessage::reply("C1", "1.0", &FormattedMessage::plain("*hi*"));
        assert_eq!(
            serde_json::to_value(&message).expect("serializes"),
            json!({
                "channel": "C1",
                "thread_ts": "1.0",
                "text": "*hi*",
                "mrkdwn": true,
                "unfurl_links": false,
                "unfurl_media": false
            })
        );
    }

    #[test]
    fn starter_prompts_cover_four_topics() {
        let prompts = SuggestedPrompts::starter_set("D1", "2.0");
        let titles: Vec<_> = prompts.prompts.iter().map(|prompt| prompt.title.as_str()).collect();
        assert_eq!(titles, ["Getting Started", "Data Preparation", "Machine Learning", "Visual Recipes"]);
        assert_eq!(prompts.title.as_deref(), Some("Here are some things I can help you with:"));
    }

    #[test]
    fn thread_titles_truncate_long_questions() {
        assert_eq!(thread_title("  How do joins work? "), "Q: How do joins work?");

        let long = "é".repeat(60);
        let title = thread_title(&long);
        assert_eq!(title, format!("Q: {}...", "é".repeat(50)));
    }
}
