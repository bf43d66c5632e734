//! In-memory Slack API double shared by this crate's tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::api::{PostedMessage, SlackApi, SlackApiError};
use crate::message::{PostMessage, SuggestedPrompts};

#[derive(Default)]
pub struct RecordingSlackApi {
    state: Mutex<RecordedState>,
}

#[derive(Default)]
struct RecordedState {
    calls: Vec<String>,
    posts: Vec<PostMessage>,
    statuses: Vec<String>,
    titles: Vec<(String, String)>,
    prompts: Vec<SuggestedPrompts>,
    post_errors: VecDeque<SlackApiError>,
    status_error: Option<SlackApiError>,
}

impl RecordingSlackApi {
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn posts(&self) -> Vec<PostMessage> {
        self.state.lock().await.posts.clone()
    }

    pub async fn statuses(&self) -> Vec<String> {
        self.state.lock().await.statuses.clone()
    }

    pub async fn titles(&self) -> Vec<(String, String)> {
        self.state.lock().await.titles.clone()
    }

    pub async fn prompts(&self) -> Vec<SuggestedPrompts> {
        self.state.lock().await.prompts.clone()
    }

    pub async fn fail_next_post(&self, error: SlackApiError) {
        self.state.lock().await.post_errors.push_back(error);
    }

    pub async fn fail_status(&self, error: SlackApiError) {
        self.state.lock().await.status_error = Some(error);
    }
}

#[async_trait]
impl SlackApi for RecordingSlackApi {
    async fn post_message(&self, message: &PostMessage) -> Result<PostedMessage, SlackApiError> {
        let mut state = self.state.lock().await;
        state.calls.push("chat.postMessage".to_owned());
        state.posts.push(message.clone());
        if let Some(error) = state.post_errors.pop_front() {
            return Err(error);
        }
        Ok(PostedMessage { channel: message.channel.clone(), ts: format!("9000.{:06}", state.posts.len()) })
    }

    async fn set_status(&self, _channel_id: &str, _thread_ts: &str, status: &str) -> Result<(), SlackApiError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("assistant.threads.setStatus:{status}"));
        state.statuses.push(status.to_owned());
        match &state.status_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn set_suggested_prompts(&self, prompts: &SuggestedPrompts) -> Result<(), SlackApiError> {
        let mut state = self.state.lock().await;
        state.calls.push("assistant.threads.setSuggestedPrompts".to_owned());
        state.prompts.push(prompts.clone());
        Ok(())
    }

    async fn set_title(&self, _channel_id: &str, thread_ts: &str, title: &str) -> Result<(), SlackApiError> {
        let mut state = self.state.lock().await;
        state.calls.push("assistant.threads.setTitle".to_owned());
        state.titles.push((thread_ts.to_owned(), title.to_owned()));
        Ok(())
    }
}
