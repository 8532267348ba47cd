use async_trait::async_trait;
use protocol::{ChannelEvent, ChannelName};
use tracing::debug;

use crate::error::Result;

/// Publish side of the broker: fire an event at a channel. Constructed once
/// per process and passed explicitly so tests can substitute their own.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &ChannelName, event: &ChannelEvent) -> Result<()>;
}

/// Redis pub/sub standing in for the hosted push service. Channel names map
/// onto redis topics via [`ChannelName::topic`].
#[derive(Clone)]
pub struct RedisBroker {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &ChannelName, event: &ChannelEvent) -> Result<()> {
        let payload = event.to_bytes()?;
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel.topic())
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(channel = %channel, event = event.name(), "event published");
        Ok(())
    }
}
