use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use protocol::{AuthRequest, ChannelName, ChannelType, RouteCatalog, RouteSpec};
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::broker::BrokerConnection;
use crate::error::{Error, Result};
use crate::subscription::{ChannelHandle, ChannelSub, HandlerEntry, HandlerId};
use crate::transport::CallTransport;

/// Client behavior switches. `log` gates debug traces of every outbound
/// call and inbound event; never on by default.
#[derive(Debug, Clone, Default)]
pub struct PrpcClientConfig {
    pub log: bool,
}

enum ChannelEntry {
    /// Join in flight; waiters are notified when it settles.
    Joining(Vec<oneshot::Sender<std::result::Result<Arc<ChannelSub>, String>>>),
    Active(Arc<ChannelSub>),
}

/// The typed client surface over the shared route catalog: `call` for plain
/// procedures, `join` for presence routes, `on`/`off` for channel events.
#[derive(Clone)]
pub struct PrpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    catalog: RouteCatalog,
    transport: Arc<dyn CallTransport>,
    broker: Arc<dyn BrokerConnection>,
    channels: Mutex<HashMap<String, ChannelEntry>>,
    next_seq: AtomicU64,
    log: bool,
}

impl PrpcClient {
    pub fn new(
        catalog: RouteCatalog,
        transport: Arc<dyn CallTransport>,
        broker: Arc<dyn BrokerConnection>,
        config: PrpcClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                catalog,
                transport,
                broker,
                channels: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                log: config.log,
            }),
        }
    }

    /// Invokes a route's procedure without touching any channel.
    pub async fn call(&self, route: &str, input: Value) -> Result<Value> {
        if self.inner.catalog.get(route).is_none() {
            return Err(Error::UnknownRoute(route.to_string()));
        }

        if self.inner.log {
            debug!(route = %route, input = %summary(&input), "call");
        }
        self.inner.transport.call(route, input).await
    }

    /// Calls a presence route and joins its channel. The procedure call and
    /// the authorization handshake race concurrently; the join resolves only
    /// when both succeed, and any partial failure tears the subscription
    /// down.
    ///
    /// `member_data` carries the client-supplied partial member fields the
    /// auth callback may consult; pass `Value::Null` for none.
    pub async fn join(
        &self,
        route: &str,
        resource_id: &str,
        input: Value,
        member_data: Value,
    ) -> Result<(Value, ChannelHandle)> {
        let spec = self
            .inner
            .catalog
            .get(route)
            .ok_or_else(|| Error::UnknownRoute(route.to_string()))?;
        if spec.channel_type() != ChannelType::Presence {
            return Err(Error::NotPresence(route.to_string()));
        }
        let channel = spec.channel(Some(resource_id))?;

        if self.inner.log {
            debug!(route = %route, channel = %channel, input = %summary(&input), "join");
        }

        let (call_result, join_result) = tokio::join!(
            self.inner.transport.call(route, input),
            self.ensure_subscribed(&channel, spec, member_data),
        );

        match (call_result, join_result) {
            (Ok(output), Ok(sub)) => Ok((output, ChannelHandle { sub })),
            (Err(e), Ok(_)) => {
                let _ = self.leave(&channel).await;
                Err(e)
            }
            (Ok(_) | Err(_), Err(e)) => {
                let _ = self.leave(&channel).await;
                Err(e)
            }
        }
    }

    /// Handle to an already-joined channel.
    pub async fn channel(&self, channel: &ChannelName) -> Option<ChannelHandle> {
        let channels = self.inner.channels.lock().await;
        match channels.get(&channel.to_string()) {
            Some(ChannelEntry::Active(sub)) => Some(ChannelHandle { sub: sub.clone() }),
            _ => None,
        }
    }

    /// Registers an event handler on a joined channel. Handlers stack: all
    /// of them run, in registration order, for every matching event.
    pub async fn on<F>(&self, channel: &ChannelName, event: &str, callback: F) -> Result<HandlerId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let key = channel.to_string();
        let channels = self.inner.channels.lock().await;
        let Some(ChannelEntry::Active(sub)) = channels.get(&key) else {
            return Err(Error::NotSubscribed(key));
        };

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        sub.handlers.lock().await.push(HandlerEntry {
            seq,
            event: event.to_string(),
            callback: Arc::new(callback),
        });

        Ok(HandlerId { channel: key, seq })
    }

    /// Registers a callback for surfaced payload failures on a channel.
    pub async fn on_error<F>(&self, channel: &ChannelName, callback: F) -> Result<()>
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        let channels = self.inner.channels.lock().await;
        let Some(ChannelEntry::Active(sub)) = channels.get(&channel.to_string()) else {
            return Err(Error::NotSubscribed(channel.to_string()));
        };

        sub.error_handlers.lock().await.push(Arc::new(callback));
        Ok(())
    }

    /// Removes one handler. When the last handler on a channel goes, the
    /// underlying subscription is released; the channels lock makes that
    /// release happen exactly once however many removals race.
    pub async fn off(&self, id: &HandlerId) -> Result<bool> {
        let mut channels = self.inner.channels.lock().await;
        let Some(ChannelEntry::Active(sub)) = channels.get(&id.channel) else {
            return Ok(false);
        };
        let sub = sub.clone();

        let (removed, now_empty) = {
            let mut handlers = sub.handlers.lock().await;
            let before = handlers.len();
            handlers.retain(|h| h.seq != id.seq);
            (handlers.len() < before, handlers.is_empty())
        };

        if removed && now_empty {
            channels.remove(&id.channel);
            drop(channels);
            self.release(&sub).await;
        }

        Ok(removed)
    }

    /// Explicitly releases a channel subscription. In-flight procedure calls
    /// are not cancelled.
    pub async fn leave(&self, channel: &ChannelName) -> Result<()> {
        let entry = self.inner.channels.lock().await.remove(&channel.to_string());
        match entry {
            Some(ChannelEntry::Active(sub)) => {
                self.release(&sub).await;
            }
            Some(ChannelEntry::Joining(waiters)) => {
                for tx in waiters {
                    let _ = tx.send(Err("subscription torn down".to_string()));
                }
                if let Err(e) = self.inner.broker.unsubscribe(channel).await {
                    warn!(channel = %channel, err = ?e, "failed to release broker subscription");
                }
            }
            None => {}
        }
        Ok(())
    }

    async fn release(&self, sub: &Arc<ChannelSub>) {
        if let Some(pump) = sub.pump.lock().await.take() {
            pump.abort();
        }
        sub.presence.clear();

        if let Err(e) = self.inner.broker.unsubscribe(&sub.channel).await {
            warn!(channel = %sub.channel, err = ?e, "failed to release broker subscription");
        }
    }

    /// Subscribes to `channel`, reusing an active or in-flight subscription.
    /// Exactly one authorization round-trip happens per join attempt.
    async fn ensure_subscribed(
        &self,
        channel: &ChannelName,
        spec: &RouteSpec,
        member_data: Value,
    ) -> Result<Arc<ChannelSub>> {
        let key = channel.to_string();

        let waiter = {
            let mut channels = self.inner.channels.lock().await;
            match channels.get_mut(&key) {
                Some(ChannelEntry::Active(sub)) => return Ok(sub.clone()),
                Some(ChannelEntry::Joining(waiters)) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    channels.insert(key.clone(), ChannelEntry::Joining(Vec::new()));
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(Ok(sub)) => Ok(sub),
                Ok(Err(message)) => Err(Error::Subscription(message)),
                Err(_) => Err(Error::ChannelClosed),
            };
        }

        match self.establish(channel, spec, member_data).await {
            Ok(sub) => {
                let waiters = {
                    let mut channels = self.inner.channels.lock().await;
                    match channels.remove(&key) {
                        Some(ChannelEntry::Joining(waiters)) => {
                            channels.insert(key, ChannelEntry::Active(sub.clone()));
                            Some(waiters)
                        }
                        Some(other) => {
                            channels.insert(key, other);
                            None
                        }
                        None => None,
                    }
                };

                match waiters {
                    Some(waiters) => {
                        for tx in waiters {
                            let _ = tx.send(Ok(sub.clone()));
                        }
                        Ok(sub)
                    }
                    // the channel was left while the join settled
                    None => {
                        self.release(&sub).await;
                        Err(Error::Subscription("subscription torn down".to_string()))
                    }
                }
            }
            Err(e) => {
                let waiters = {
                    let mut channels = self.inner.channels.lock().await;
                    match channels.remove(&key) {
                        Some(ChannelEntry::Joining(waiters)) => waiters,
                        _ => Vec::new(),
                    }
                };
                for tx in waiters {
                    let _ = tx.send(Err(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// The authorization handshake plus broker subscribe, then the per-channel
    /// event pump. Events for one channel are folded in delivery order.
    async fn establish(
        &self,
        channel: &ChannelName,
        spec: &RouteSpec,
        member_data: Value,
    ) -> Result<Arc<ChannelSub>> {
        let data = match member_data {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map,
            _ => {
                return Err(Error::Protocol(protocol::ProtocolError::SchemaMismatch(
                    "member data must be an object".to_string(),
                )));
            }
        };

        let request = AuthRequest {
            socket_id: self.inner.broker.socket_id(),
            channel_name: channel.to_string(),
            data,
        };
        let grant = self.inner.transport.authorize(&request).await?;
        let mut subscription = self.inner.broker.subscribe(channel, &grant).await?;

        let sub = Arc::new(ChannelSub::new(
            channel.clone(),
            spec.member_schema().cloned(),
        ));

        let pump_sub = sub.clone();
        let log = self.inner.log;
        let pump = tokio::spawn(async move {
            while let Some(event) = subscription.events.recv().await {
                if log {
                    debug!(channel = %pump_sub.channel, event = event.name(), "event received");
                }
                pump_sub.ingest(event).await;
            }
            // broker stream ended: connection gone, membership is stale
            pump_sub.presence.clear();
        });
        *sub.pump.lock().await = Some(pump);

        Ok(sub)
    }
}

fn summary(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 120 {
        let truncated: String = rendered.chars().take(120).collect();
        format!("{truncated}…")
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use protocol::{
        AuthGrant, AuthRequest, ChannelEvent, ChannelName, FieldKind, FieldSpec, MemberSchema,
        RouteCatalog, RouteSpec,
    };
    use serde_json::{Value, json};
    use tokio::sync::{Mutex, mpsc};

    use super::{PrpcClient, PrpcClientConfig};
    use crate::broker::{BrokerConnection, BrokerSubscription};
    use crate::error::{Error, Result};
    use crate::transport::CallTransport;

    struct FakeTransport {
        authorize_calls: AtomicUsize,
        authorize_delay: Duration,
        fail_call: bool,
        fail_authorize: bool,
    }

    impl FakeTransport {
        fn new(authorize_delay: Duration, fail_call: bool, fail_authorize: bool) -> Arc<Self> {
            Arc::new(Self {
                authorize_calls: AtomicUsize::new(0),
                authorize_delay,
                fail_call,
                fail_authorize,
            })
        }

        fn ok() -> Arc<Self> {
            Self::new(Duration::ZERO, false, false)
        }

        fn slow_authorize() -> Arc<Self> {
            Self::new(Duration::from_millis(20), false, false)
        }

        fn failing_call() -> Arc<Self> {
            Self::new(Duration::ZERO, true, false)
        }

        fn failing_authorize() -> Arc<Self> {
            Self::new(Duration::ZERO, false, true)
        }

        fn grants(&self) -> usize {
            self.authorize_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CallTransport for FakeTransport {
        async fn call(&self, _route: &str, input: Value) -> Result<Value> {
            if self.fail_call {
                return Err(Error::Transport("procedure exploded".to_string()));
            }
            Ok(input)
        }

        async fn authorize(&self, _request: &AuthRequest) -> Result<AuthGrant> {
            self.authorize_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.authorize_delay).await;
            if self.fail_authorize {
                return Err(Error::Authorization("authorization failed".to_string()));
            }

            Ok(AuthGrant {
                auth: "app-key:signature".to_string(),
                channel_data: Some(json!({"id": "me", "name": "Me"}).to_string()),
                expires_at: i64::MAX,
            })
        }
    }

    #[derive(Default)]
    struct FakeBroker {
        senders: Mutex<HashMap<String, mpsc::UnboundedSender<ChannelEvent>>>,
        unsubscribes: AtomicUsize,
    }

    impl FakeBroker {
        async fn emit(&self, channel: &ChannelName, event: ChannelEvent) {
            let senders = self.senders.lock().await;
            let tx = senders
                .get(&channel.to_string())
                .expect("channel not subscribed");
            tx.send(event).unwrap();
        }

        fn released(&self) -> usize {
            self.unsubscribes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BrokerConnection for FakeBroker {
        fn socket_id(&self) -> String {
            "socket-1".to_string()
        }

        async fn subscribe(
            &self,
            channel: &ChannelName,
            grant: &AuthGrant,
        ) -> Result<BrokerSubscription> {
            let (tx, rx) = mpsc::unbounded_channel();

            let members = grant
                .channel_data
                .as_deref()
                .map(|raw| serde_json::from_str(raw).unwrap())
                .into_iter()
                .collect();
            tx.send(ChannelEvent::SubscriptionSucceeded { members })
                .unwrap();

            self.senders.lock().await.insert(channel.to_string(), tx);
            Ok(BrokerSubscription { events: rx })
        }

        async fn unsubscribe(&self, channel: &ChannelName) -> Result<()> {
            if self
                .senders
                .lock()
                .await
                .remove(&channel.to_string())
                .is_some()
            {
                self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn catalog() -> RouteCatalog {
        let schema = MemberSchema::new(vec![
            FieldSpec::required("id", FieldKind::String),
            FieldSpec::required("name", FieldKind::String),
        ]);
        RouteCatalog::new(vec![
            RouteSpec::presence("game", schema),
            RouteSpec::public("echo"),
        ])
        .unwrap()
    }

    fn client(transport: Arc<FakeTransport>, broker: Arc<FakeBroker>) -> PrpcClient {
        PrpcClient::new(catalog(), transport, broker, PrpcClientConfig::default())
    }

    fn game_channel() -> ChannelName {
        ChannelName::presence("game", "abc").unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn call_public_route_passes_through() {
        let client = client(FakeTransport::ok(), Arc::new(FakeBroker::default()));
        let output = client.call("echo", json!({"n": 1})).await.unwrap();
        assert_eq!(output, json!({"n": 1}));
    }

    #[tokio::test]
    async fn call_unknown_route_fails() {
        let client = client(FakeTransport::ok(), Arc::new(FakeBroker::default()));
        assert!(matches!(
            client.call("nope", json!({})).await,
            Err(Error::UnknownRoute(_))
        ));
    }

    #[tokio::test]
    async fn join_public_route_fails() {
        let client = client(FakeTransport::ok(), Arc::new(FakeBroker::default()));
        assert!(matches!(
            client.join("echo", "abc", json!({}), Value::Null).await,
            Err(Error::NotPresence(_))
        ));
    }

    #[tokio::test]
    async fn join_resolves_when_both_legs_succeed() {
        let transport = FakeTransport::ok();
        let client = client(transport.clone(), Arc::new(FakeBroker::default()));

        let (output, handle) = client
            .join("game", "abc", json!({"party_id": "abc"}), Value::Null)
            .await
            .unwrap();

        assert_eq!(output, json!({"party_id": "abc"}));
        assert_eq!(handle.channel().to_string(), "presence-game-abc");
        assert_eq!(transport.grants(), 1);

        settle().await;
        let members = handle.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "me");
    }

    #[tokio::test]
    async fn concurrent_joins_share_one_grant_request() {
        let transport = FakeTransport::slow_authorize();
        let client = client(transport.clone(), Arc::new(FakeBroker::default()));

        let (a, b) = tokio::join!(
            client.join("game", "abc", json!({}), Value::Null),
            client.join("game", "abc", json!({}), Value::Null),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(transport.grants(), 1);
    }

    #[tokio::test]
    async fn repeated_join_reuses_active_subscription() {
        let transport = FakeTransport::ok();
        let client = client(transport.clone(), Arc::new(FakeBroker::default()));

        client
            .join("game", "abc", json!({}), Value::Null)
            .await
            .unwrap();
        client
            .join("game", "abc", json!({}), Value::Null)
            .await
            .unwrap();

        assert_eq!(transport.grants(), 1);
    }

    #[tokio::test]
    async fn procedure_failure_tears_down_subscription() {
        let broker = Arc::new(FakeBroker::default());
        let client = client(FakeTransport::failing_call(), broker.clone());

        let result = client.join("game", "abc", json!({}), Value::Null).await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(broker.released(), 1);
        assert!(client.channel(&game_channel()).await.is_none());
    }

    #[tokio::test]
    async fn authorization_failure_fails_join_without_subscription() {
        let broker = Arc::new(FakeBroker::default());
        let client = client(FakeTransport::failing_authorize(), broker.clone());

        let result = client.join("game", "abc", json!({}), Value::Null).await;

        assert!(matches!(result, Err(Error::Authorization(_))));
        assert_eq!(broker.released(), 0);
        assert!(client.channel(&game_channel()).await.is_none());
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let broker = Arc::new(FakeBroker::default());
        let client = client(FakeTransport::ok(), broker.clone());
        client
            .join("game", "abc", json!({}), Value::Null)
            .await
            .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in [1u32, 2, 3] {
            let order = order.clone();
            client
                .on(&game_channel(), "round_started", move |_payload| {
                    order.try_lock().unwrap().push(tag);
                })
                .await
                .unwrap();
        }

        broker
            .emit(
                &game_channel(),
                ChannelEvent::Message {
                    event: "round_started".to_string(),
                    payload: json!({"round": 1}),
                },
            )
            .await;
        settle().await;

        assert_eq!(*order.lock().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn off_removes_only_the_target_handler() {
        let broker = Arc::new(FakeBroker::default());
        let client = client(FakeTransport::ok(), broker.clone());
        client
            .join("game", "abc", json!({}), Value::Null)
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = seen.clone();
            client
                .on(&game_channel(), "x", move |_| {
                    seen.try_lock().unwrap().push("first");
                })
                .await
                .unwrap()
        };
        {
            let seen = seen.clone();
            client
                .on(&game_channel(), "x", move |_| {
                    seen.try_lock().unwrap().push("second");
                })
                .await
                .unwrap();
        }

        assert!(client.off(&first).await.unwrap());
        broker
            .emit(
                &game_channel(),
                ChannelEvent::Message {
                    event: "x".to_string(),
                    payload: Value::Null,
                },
            )
            .await;
        settle().await;

        assert_eq!(*seen.lock().await, vec!["second"]);
        assert_eq!(broker.released(), 0);
    }

    #[tokio::test]
    async fn last_handler_removal_releases_subscription_once() {
        let broker = Arc::new(FakeBroker::default());
        let client = client(FakeTransport::ok(), broker.clone());
        client
            .join("game", "abc", json!({}), Value::Null)
            .await
            .unwrap();

        let first = client.on(&game_channel(), "x", |_| {}).await.unwrap();
        let second = client.on(&game_channel(), "x", |_| {}).await.unwrap();

        let (a, b) = tokio::join!(client.off(&first), client.off(&second));
        assert!(a.unwrap());
        assert!(b.unwrap());
        assert_eq!(broker.released(), 1);

        // further removals are no-ops
        assert!(!client.off(&second).await.unwrap());
        assert_eq!(broker.released(), 1);
        assert!(client.channel(&game_channel()).await.is_none());
    }

    #[tokio::test]
    async fn member_folding_is_idempotent_across_duplicate_events() {
        let broker = Arc::new(FakeBroker::default());
        let client = client(FakeTransport::ok(), broker.clone());
        let (_, handle) = client
            .join("game", "abc", json!({}), Value::Null)
            .await
            .unwrap();

        let added = ChannelEvent::MemberAdded {
            member: json!({"id": "u2", "name": "Bob"}),
        };
        broker.emit(&game_channel(), added.clone()).await;
        broker.emit(&game_channel(), added).await;
        settle().await;

        let ids: Vec<String> = handle.members().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["me", "u2"]);

        broker
            .emit(
                &game_channel(),
                ChannelEvent::MemberRemoved {
                    id: "ghost".to_string(),
                },
            )
            .await;
        settle().await;
        assert_eq!(handle.members().len(), 2);
    }

    #[tokio::test]
    async fn invalid_member_payload_is_surfaced_not_folded() {
        let broker = Arc::new(FakeBroker::default());
        let client = client(FakeTransport::ok(), broker.clone());
        let (_, handle) = client
            .join("game", "abc", json!({}), Value::Null)
            .await
            .unwrap();

        let surfaced = Arc::new(AtomicUsize::new(0));
        {
            let surfaced = surfaced.clone();
            client
                .on_error(&game_channel(), move |_err| {
                    surfaced.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }

        broker
            .emit(
                &game_channel(),
                ChannelEvent::MemberAdded {
                    member: json!({"name": "NoId"}),
                },
            )
            .await;
        settle().await;

        assert_eq!(surfaced.load(Ordering::SeqCst), 1);
        assert_eq!(handle.members().len(), 1);
    }

    #[tokio::test]
    async fn leave_clears_presence_and_releases() {
        let broker = Arc::new(FakeBroker::default());
        let client = client(FakeTransport::ok(), broker.clone());
        let (_, handle) = client
            .join("game", "abc", json!({}), Value::Null)
            .await
            .unwrap();
        settle().await;
        assert_eq!(handle.members().len(), 1);

        client.leave(&game_channel()).await.unwrap();

        assert!(handle.members().is_empty());
        assert_eq!(broker.released(), 1);
        assert!(client.channel(&game_channel()).await.is_none());
    }
}
