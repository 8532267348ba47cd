use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use protocol::{ChannelEvent, ChannelType, RouteSpec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::session::Session;

pub(crate) type HandlerFn =
    Arc<dyn Fn(PrpcContext, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub(crate) type AuthFn =
    Arc<dyn Fn(AuthArgs, PrpcContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Per-invocation context handed to handlers and auth callbacks: the caller's
/// session merged with a broker handle scoped to the route's channels.
pub struct PrpcContext {
    pub session: Session,
    pub broker: RouteBroker,
}

/// Broker handle bound to one route; handlers publish without ever touching
/// channel-name derivation.
#[derive(Clone)]
pub struct RouteBroker {
    broker: Arc<dyn Broker>,
    spec: RouteSpec,
}

impl RouteBroker {
    pub(crate) fn new(broker: Arc<dyn Broker>, spec: RouteSpec) -> Self {
        Self { broker, spec }
    }

    pub async fn trigger(
        &self,
        resource_id: Option<&str>,
        event: &str,
        payload: Value,
    ) -> Result<()> {
        let channel = self.spec.channel(resource_id)?;
        self.broker
            .publish(
                &channel,
                &ChannelEvent::Message {
                    event: event.to_string(),
                    payload,
                },
            )
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub channel_type: ChannelType,
    pub name: String,
    pub id: Option<String>,
}

/// Arguments handed to a presence route's auth callback: the joining socket,
/// the parsed channel, and any client-supplied partial member fields.
#[derive(Debug, Clone)]
pub struct AuthArgs {
    pub socket_id: String,
    pub channel: ChannelInfo,
    pub data: Value,
}

/// The business-logic half of a route: an erased async handler over JSON
/// values, with serde carrying the typed contract at the edges.
pub struct Procedure {
    handler: HandlerFn,
    protected: bool,
}

impl Procedure {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(PrpcContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |ctx, input| Box::pin(handler(ctx, input))),
            protected: false,
        }
    }

    /// Builds a procedure whose input and output ride serde instead of raw
    /// JSON values.
    pub fn typed<I, O, F, Fut>(handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
        F: Fn(PrpcContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self::new(move |ctx, input| {
            let parsed =
                serde_json::from_value::<I>(input).map_err(|e| Error::Input(e.to_string()));
            let fut = parsed.map(|input| handler(ctx, input));
            async move {
                let output = fut?.await?;
                Ok(serde_json::to_value(output)?)
            }
        })
    }

    /// Requires a session user; anonymous callers are rejected before the
    /// handler runs.
    pub fn protect(mut self) -> Self {
        self.protected = true;
        self
    }

    pub(crate) async fn invoke(&self, ctx: PrpcContext, input: Value) -> Result<Value> {
        if self.protected && ctx.session.user.is_none() {
            return Err(Error::Authorization(
                "procedure requires a session user".to_string(),
            ));
        }
        (self.handler)(ctx, input).await
    }
}
