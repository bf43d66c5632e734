use std::fmt;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventState {
    Received,
    Acknowledged,
    Processing,
    Completed,
    Failed,
}

impl EventState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Acknowledged => "acknowledged",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("event {event_id} cannot move from {from} to {to}")]
pub struct LifecycleError {
    pub event_id: String,
    pub from: EventState,
    pub to: EventState,
}

/// Tracks one inbound event from receipt to its terminal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventLifecycle {
    event_id: String,
    state: EventState,
}

impl EventLifecycle {
    pub fn received(event_id: impl Into<String>) -> Self {
        Self { event_id: event_id.into(), state: EventState::Received }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn can_transition_to(&self, next: EventState) -> bool {
        matches!(
            (self.state, next),
            (EventState::Received, EventState::Acknowledged)
                | (EventState::Acknowledged, EventState::Processing)
                | (EventState::Processing, EventState::Completed)
                | (EventState::Processing, EventState::Failed)
        )
    }

    pub fn transition_to(&mut self, next: EventState) -> Result<(), LifecycleError> {
        if self.can_transition_to(next) {
            self.state = next;
            return Ok(());
        }

        Err(LifecycleError { event_id: self.event_id.clone(), from: self.state, to: next })
    }
}
