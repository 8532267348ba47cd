use std::sync::Arc;

use protocol::{ChannelEvent, ChannelName, Member, MemberSchema};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::error;

use crate::error::{Error, Result};
use crate::presence::{PresenceEvent, PresenceState};

pub(crate) type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Identifies one registered handler; returned by `on`, consumed by `off`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId {
    pub(crate) channel: String,
    pub(crate) seq: u64,
}

pub(crate) struct HandlerEntry {
    pub seq: u64,
    pub event: String,
    pub callback: EventCallback,
}

/// Everything the dispatcher keeps per joined channel: the presence read
/// model, the handler registry and the event pump.
pub(crate) struct ChannelSub {
    pub channel: ChannelName,
    pub presence: PresenceState,
    member_schema: Option<MemberSchema>,
    pub handlers: Mutex<Vec<HandlerEntry>>,
    pub error_handlers: Mutex<Vec<ErrorCallback>>,
    pub pump: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelSub {
    pub fn new(channel: ChannelName, member_schema: Option<MemberSchema>) -> Self {
        Self {
            channel,
            presence: PresenceState::new(),
            member_schema,
            handlers: Mutex::new(Vec::new()),
            error_handlers: Mutex::new(Vec::new()),
            pump: Mutex::new(None),
        }
    }

    fn validate_member(&self, value: Value) -> Result<Member> {
        if let Some(schema) = &self.member_schema {
            schema.validate(&value)?;
        }
        Ok(Member::from_value(value)?)
    }

    /// Folds one broker frame: presence events update the member list after
    /// schema validation, application messages fan out to handlers in
    /// registration order.
    pub async fn ingest(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::SubscriptionSucceeded { members } => {
                let mut validated = Vec::with_capacity(members.len());
                for value in members {
                    match self.validate_member(value) {
                        Ok(member) => validated.push(member),
                        Err(e) => self.surface(&e).await,
                    }
                }
                self.presence.apply(&PresenceEvent::Snapshot(validated));
            }
            ChannelEvent::MemberAdded { member } => match self.validate_member(member) {
                Ok(member) => self.presence.apply(&PresenceEvent::Added(member)),
                Err(e) => self.surface(&e).await,
            },
            ChannelEvent::MemberRemoved { id } => {
                self.presence.apply(&PresenceEvent::Removed(id));
            }
            ChannelEvent::Message { event, payload } => {
                let callbacks: Vec<EventCallback> = self
                    .handlers
                    .lock()
                    .await
                    .iter()
                    .filter(|h| h.event == event)
                    .map(|h| h.callback.clone())
                    .collect();

                for callback in callbacks {
                    callback(&payload);
                }
            }
        }
    }

    /// Mismatching payloads are surfaced, never coerced or swallowed.
    pub async fn surface(&self, err: &Error) {
        error!(channel = %self.channel, err = ?err, "inbound payload rejected");
        let callbacks: Vec<ErrorCallback> = self.error_handlers.lock().await.clone();
        for callback in callbacks {
            callback(err);
        }
    }
}

/// Caller-facing view of a joined channel.
#[derive(Clone)]
pub struct ChannelHandle {
    pub(crate) sub: Arc<ChannelSub>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel", &self.sub.channel)
            .finish()
    }
}

impl ChannelHandle {
    pub fn channel(&self) -> &ChannelName {
        &self.sub.channel
    }

    /// Current member list, in join order.
    pub fn members(&self) -> Vec<Member> {
        self.sub.presence.members()
    }

    /// Change-notification stream over the member list.
    pub fn watch_members(&self) -> watch::Receiver<Vec<Member>> {
        self.sub.presence.watch()
    }
}
