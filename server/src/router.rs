use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use protocol::{AuthRequest, ChannelName, ChannelType, MemberSchema, RouteCatalog, RouteSpec};
use serde_json::Value;

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::procedure::{AuthArgs, AuthFn, ChannelInfo, Procedure, PrpcContext, RouteBroker};
use crate::session::Session;

struct PendingRoute {
    spec: RouteSpec,
    procedure: Procedure,
    auth: Option<AuthFn>,
}

/// Declarative router construction. Routes are registered up front and frozen
/// by [`RouterBuilder::build`]; misconfiguration fails there, never at
/// request time.
pub struct RouterBuilder {
    broker: Arc<dyn Broker>,
    entries: Vec<PendingRoute>,
}

impl RouterBuilder {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            entries: Vec::new(),
        }
    }

    pub fn public_route(mut self, key: &str, procedure: Procedure) -> Self {
        self.entries.push(PendingRoute {
            spec: RouteSpec::public(key),
            procedure,
            auth: None,
        });
        self
    }

    /// Registers a presence route. The returned builder expects `.auth()`;
    /// leaving it off is caught by `build`.
    pub fn presence_route(
        mut self,
        key: &str,
        procedure: Procedure,
        member_schema: MemberSchema,
    ) -> PresenceRouteBuilder {
        self.entries.push(PendingRoute {
            spec: RouteSpec::presence(key, member_schema),
            procedure,
            auth: None,
        });
        PresenceRouteBuilder { inner: self }
    }

    pub fn build(self) -> Result<PrpcRouter> {
        let specs = self.entries.iter().map(|e| e.spec.clone()).collect();
        let catalog =
            RouteCatalog::new(specs).map_err(|e| Error::Configuration(e.to_string()))?;

        let mut routes = HashMap::with_capacity(self.entries.len());
        for entry in self.entries {
            if entry.spec.channel_type() == ChannelType::Presence && entry.auth.is_none() {
                return Err(Error::Configuration(format!(
                    "presence route '{}' registered without an auth callback",
                    entry.spec.key()
                )));
            }

            routes.insert(
                entry.spec.key().to_string(),
                Route {
                    spec: entry.spec,
                    procedure: entry.procedure,
                    auth: entry.auth,
                },
            );
        }

        Ok(PrpcRouter {
            routes,
            catalog,
            broker: self.broker,
        })
    }
}

pub struct PresenceRouteBuilder {
    inner: RouterBuilder,
}

impl PresenceRouteBuilder {
    /// Attaches the join-authorization callback to the presence route that
    /// was just registered.
    pub fn auth<F, Fut>(mut self, callback: F) -> RouterBuilder
    where
        F: Fn(AuthArgs, PrpcContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let entry = self
            .inner
            .entries
            .last_mut()
            .expect("presence entry was just pushed");
        entry.auth = Some(Arc::new(move |args, ctx| Box::pin(callback(args, ctx))));
        self.inner
    }

    pub fn public_route(self, key: &str, procedure: Procedure) -> RouterBuilder {
        self.inner.public_route(key, procedure)
    }

    pub fn presence_route(
        self,
        key: &str,
        procedure: Procedure,
        member_schema: MemberSchema,
    ) -> Self {
        self.inner.presence_route(key, procedure, member_schema)
    }

    pub fn build(self) -> Result<PrpcRouter> {
        self.inner.build()
    }
}

struct Route {
    spec: RouteSpec,
    procedure: Procedure,
    auth: Option<AuthFn>,
}

/// The frozen route table. Procedure calls and channel authorizations both
/// dispatch through here.
pub struct PrpcRouter {
    routes: HashMap<String, Route>,
    catalog: RouteCatalog,
    broker: Arc<dyn Broker>,
}

impl PrpcRouter {
    pub const fn catalog(&self) -> &RouteCatalog {
        &self.catalog
    }

    fn context(&self, spec: &RouteSpec, session: Session) -> PrpcContext {
        PrpcContext {
            session,
            broker: RouteBroker::new(self.broker.clone(), spec.clone()),
        }
    }

    pub async fn call(&self, key: &str, session: Session, input: Value) -> Result<Value> {
        let route = self
            .routes
            .get(key)
            .ok_or_else(|| Error::UnknownRoute(key.to_string()))?;
        let ctx = self.context(&route.spec, session);
        route.procedure.invoke(ctx, input).await
    }

    /// Runs the channel-authorization steps for a join request and returns
    /// the parsed channel plus the schema-validated member data. Signing is
    /// the gateway's job.
    pub async fn authorize(
        &self,
        request: &AuthRequest,
        session: Session,
    ) -> Result<(ChannelName, Value)> {
        let channel = ChannelName::parse(&request.channel_name)?;

        let route = self
            .routes
            .get(channel.route_key())
            .filter(|route| route.spec.channel_type() == channel.channel_type())
            .ok_or_else(|| {
                Error::Authorization(format!(
                    "no route for channel '{}'",
                    request.channel_name
                ))
            })?;

        let (Some(schema), Some(auth)) = (route.spec.member_schema(), route.auth.as_ref())
        else {
            return Err(Error::Authorization(format!(
                "channel '{}' is not a presence channel",
                request.channel_name
            )));
        };

        let args = AuthArgs {
            socket_id: request.socket_id.clone(),
            channel: ChannelInfo {
                channel_type: channel.channel_type(),
                name: request.channel_name.clone(),
                id: channel.resource_id().map(ToString::to_string),
            },
            data: Value::Object(request.data.clone()),
        };
        let ctx = self.context(&route.spec, session);

        let member = auth(args, ctx).await?;
        schema.validate(&member)?;

        Ok((channel, member))
    }
}
