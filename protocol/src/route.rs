use std::collections::HashMap;

use crate::channel::{validate_route_key, ChannelName, ChannelType};
use crate::error::ProtocolError;
use crate::member::MemberSchema;

/// The contract half of a route: key, channel kind and, for presence routes,
/// the member shape. Handlers and auth callbacks bind to these on the server;
/// the client imports the same values to type its surface.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    key: String,
    channel_type: ChannelType,
    member_schema: Option<MemberSchema>,
}

impl RouteSpec {
    pub fn public(key: &str) -> Self {
        Self {
            key: key.to_string(),
            channel_type: ChannelType::Public,
            member_schema: None,
        }
    }

    pub fn presence(key: &str, member_schema: MemberSchema) -> Self {
        Self {
            key: key.to_string(),
            channel_type: ChannelType::Presence,
            member_schema: Some(member_schema),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub const fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub const fn member_schema(&self) -> Option<&MemberSchema> {
        self.member_schema.as_ref()
    }

    pub fn channel(&self, resource_id: Option<&str>) -> Result<ChannelName, ProtocolError> {
        ChannelName::new(self.channel_type, &self.key, resource_id)
    }
}

/// Immutable set of route specs shared by server and client. Built once at
/// startup; construction fails fast on any contract-level misconfiguration.
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    routes: HashMap<String, RouteSpec>,
}

impl RouteCatalog {
    pub fn new(specs: Vec<RouteSpec>) -> Result<Self, ProtocolError> {
        let mut routes = HashMap::with_capacity(specs.len());

        for spec in specs {
            validate_route_key(&spec.key)?;

            if let Some(schema) = &spec.member_schema {
                if !schema.declares_id() {
                    return Err(ProtocolError::SchemaMismatch(format!(
                        "member schema for '{}' must declare a required string 'id'",
                        spec.key
                    )));
                }
            }

            if routes.contains_key(&spec.key) {
                return Err(ProtocolError::DuplicateRoute(spec.key));
            }
            routes.insert(spec.key.clone(), spec);
        }

        Ok(Self { routes })
    }

    pub fn get(&self, key: &str) -> Option<&RouteSpec> {
        self.routes.get(key)
    }

    /// Resolves a parsed channel name back to its route; the channel type
    /// must match the registered one.
    pub fn resolve(&self, channel: &ChannelName) -> Option<&RouteSpec> {
        self.routes
            .get(channel.route_key())
            .filter(|spec| spec.channel_type == channel.channel_type())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
