use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::SlackApi;

/// Sets the assistant "working" indicator on a thread.
#[derive(Clone)]
pub struct StatusNotifier {
    api: Arc<dyn SlackApi>,
}

impl StatusNotifier {
    pub fn new(api: Arc<dyn SlackApi>) -> Self {
        Self { api }
    }

    /// Status failures are logged and never fail the caller. The returned
    /// guard clears the indicator when dropped if `clear` was not awaited.
    pub async fn begin(&self, channel_id: &str, thread_ts: &str, text: &str) -> StatusGuard {
        let active = match self.api.set_status(channel_id, thread_ts, text).await {
            Ok(()) => {
                debug!(event_name = "slack.status.set", channel_id, thread_id = thread_ts, "status set");
                true
            }
            Err(error) => {
                warn!(
                    event_name = "slack.status.set_failed",
                    channel_id,
                    thread_id = thread_ts,
                    error = %error,
                    "could not set assistant status"
                );
                false
            }
        };

        StatusGuard {
            api: Arc::clone(&self.api),
            channel_id: channel_id.to_owned(),
            thread_ts: thread_ts.to_owned(),
            active,
        }
    }
}

#[must_use = "dropping the guard clears the status in the background"]
pub struct StatusGuard {
    api: Arc<dyn SlackApi>,
    channel_id: String,
    thread_ts: String,
    active: bool,
}

impl StatusGuard {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub async fn clear(mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        clear_status(self.api.as_ref(), &self.channel_id, &self.thread_ts).await;
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                event_name = "slack.status.clear_skipped",
                channel_id = %self.channel_id,
                thread_id = %self.thread_ts,
                "no runtime available to clear assistant status"
            );
            return;
        };

        let api = Arc::clone(&self.api);
        let channel_id = std::mem::take(&mut self.channel_id);
        let thread_ts = std::mem::take(&mut self.thread_ts);
        runtime.spawn(async move {
            clear_status(api.as_ref(), &channel_id, &thread_ts).await;
        });
    }
}

async fn clear_status(api: &dyn SlackApi, channel_id: &str, thread_ts: &str) {
    match api.set_status(channel_id, thread_ts, "").await {
        Ok(()) => debug!(event_name = "slack.status.cleared", channel_id, thread_id = thread_ts, "status cleared"),
        Err(error) => warn!(
            event_name = "slack.status.clear_failed",
            channel_id,
            thread_id = thread_ts,
            error = %error,
            "could not clear assistant status"
        ),
    }
}
