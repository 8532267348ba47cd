use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use protocol::{AuthGrant, ChannelEvent, ChannelName, ChannelType, Member};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Live subscription to one channel: decoded events in delivery order.
pub struct BrokerSubscription {
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Subscribe side of the broker connection, one per client process. The
/// socket id identifies this connection in authorization requests and is
/// what grants are signed against.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn socket_id(&self) -> String;

    async fn subscribe(
        &self,
        channel: &ChannelName,
        grant: &AuthGrant,
    ) -> Result<BrokerSubscription>;

    async fn unsubscribe(&self, channel: &ChannelName) -> Result<()>;
}

struct ActiveChannel {
    member_id: Option<String>,
    task: JoinHandle<()>,
}

/// Redis-backed broker edge. Presence membership lives in a redis hash per
/// channel; joins and leaves are announced on the channel topic so every
/// subscriber folds the same event stream.
pub struct RedisBrokerLink {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
    app_key: String,
    socket_id: String,
    active: Mutex<HashMap<String, ActiveChannel>>,
}

fn members_key(channel: &ChannelName) -> String {
    format!("prpc:members:{channel}")
}

impl RedisBrokerLink {
    pub async fn connect(url: &str, app_key: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            client,
            conn,
            app_key: app_key.to_string(),
            socket_id: Uuid::new_v4().to_string(),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// The checks the hosted broker would run before accepting a join. The
    /// signature itself is only verifiable with the server-side secret, so
    /// the redis edge checks shape and expiry.
    fn check_grant(&self, grant: &AuthGrant) -> Result<()> {
        if grant.expires_at < Utc::now().timestamp() {
            return Err(Error::Authorization("grant expired".to_string()));
        }
        if !grant.auth.starts_with(&format!("{}:", self.app_key)) {
            return Err(Error::Authorization(
                "grant was issued for another app".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for RedisBrokerLink {
    fn socket_id(&self) -> String {
        self.socket_id.clone()
    }

    async fn subscribe(
        &self,
        channel: &ChannelName,
        grant: &AuthGrant,
    ) -> Result<BrokerSubscription> {
        self.check_grant(grant)?;

        let mut active = self.active.lock().await;
        if active.contains_key(&channel.to_string()) {
            return Err(Error::Subscription(format!(
                "already subscribed to '{channel}'"
            )));
        }

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel.topic()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut member_id = None;

        if channel.channel_type() == ChannelType::Presence {
            let member: Option<serde_json::Value> = grant
                .channel_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?;

            let mut conn = self.conn.clone();
            if let Some(member) = &member {
                let parsed = Member::from_value(member.clone())?;
                redis::cmd("HSET")
                    .arg(members_key(channel))
                    .arg(&parsed.id)
                    .arg(serde_json::to_string(member)?)
                    .query_async::<()>(&mut conn)
                    .await?;
                member_id = Some(parsed.id);
            }

            let snapshot: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(members_key(channel))
                .query_async(&mut conn)
                .await?;
            let members = snapshot
                .into_values()
                .filter_map(|raw| serde_json::from_str(&raw).ok())
                .collect();
            let _ = tx.send(ChannelEvent::SubscriptionSucceeded { members });

            // announced after the snapshot; subscribers fold the duplicate
            // add idempotently
            if let Some(member) = &member {
                let event = ChannelEvent::MemberAdded {
                    member: member.clone(),
                };
                redis::cmd("PUBLISH")
                    .arg(channel.topic())
                    .arg(event.to_bytes()?)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
        } else {
            let _ = tx.send(ChannelEvent::SubscriptionSucceeded {
                members: Vec::new(),
            });
        }

        let topic = channel.topic();
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                match ChannelEvent::from_bytes(&payload) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(topic = %topic, err = ?e, "dropped undecodable frame"),
                }
            }
        });

        active.insert(channel.to_string(), ActiveChannel { member_id, task });
        Ok(BrokerSubscription { events: rx })
    }

    async fn unsubscribe(&self, channel: &ChannelName) -> Result<()> {
        let Some(entry) = self.active.lock().await.remove(&channel.to_string()) else {
            return Ok(());
        };
        entry.task.abort();

        if let Some(id) = entry.member_id {
            let mut conn = self.conn.clone();
            redis::cmd("HDEL")
                .arg(members_key(channel))
                .arg(&id)
                .query_async::<()>(&mut conn)
                .await?;

            let event = ChannelEvent::MemberRemoved { id };
            redis::cmd("PUBLISH")
                .arg(channel.topic())
                .arg(event.to_bytes()?)
                .query_async::<()>(&mut conn)
                .await?;
        }

        Ok(())
    }
}
