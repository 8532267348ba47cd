use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Prefix reserved for presence channels; never a valid route key.
pub const PRESENCE_PREFIX: &str = "presence";

/// Separator between channel name segments. Route keys must not contain it;
/// resource ids may, because parsing only splits off the first segments.
pub const SEPARATOR: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Public,
    Presence,
}

/// A broker channel address, derived deterministically from a route key and
/// an optional resource id.
///
/// Presence channels render as `presence-<routeKey>-<resourceId>`, public
/// channels as `<routeKey>-<resourceId>` or the bare route key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName {
    channel_type: ChannelType,
    route_key: String,
    resource_id: Option<String>,
}

pub(crate) fn validate_route_key(key: &str) -> Result<(), ProtocolError> {
    if key.is_empty() {
        return Err(ProtocolError::InvalidRouteKey(
            key.to_string(),
            "route key must not be empty",
        ));
    }
    if key.contains(SEPARATOR) {
        return Err(ProtocolError::InvalidRouteKey(
            key.to_string(),
            "route key must not contain the channel separator",
        ));
    }
    if key == PRESENCE_PREFIX {
        return Err(ProtocolError::InvalidRouteKey(
            key.to_string(),
            "route key collides with the presence prefix",
        ));
    }
    Ok(())
}

impl ChannelName {
    pub fn new(
        channel_type: ChannelType,
        route_key: &str,
        resource_id: Option<&str>,
    ) -> Result<Self, ProtocolError> {
        validate_route_key(route_key)?;
        if resource_id.is_some_and(str::is_empty) {
            return Err(ProtocolError::MalformedChannel(format!(
                "{route_key}-<empty>"
            )));
        }

        Ok(Self {
            channel_type,
            route_key: route_key.to_string(),
            resource_id: resource_id.map(ToString::to_string),
        })
    }

    pub fn public(route_key: &str, resource_id: Option<&str>) -> Result<Self, ProtocolError> {
        Self::new(ChannelType::Public, route_key, resource_id)
    }

    pub fn presence(route_key: &str, resource_id: &str) -> Result<Self, ProtocolError> {
        Self::new(ChannelType::Presence, route_key, Some(resource_id))
    }

    /// Inverts [`fmt::Display`]: recovers channel type, route key and
    /// resource id from a rendered channel name.
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedChannel(name.to_string());

        let presence_marker = format!("{PRESENCE_PREFIX}{SEPARATOR}");
        let (channel_type, rest) = name.strip_prefix(&presence_marker).map_or(
            (ChannelType::Public, name),
            |rest| (ChannelType::Presence, rest),
        );

        let (route_key, resource_id) = match rest.split_once(SEPARATOR) {
            Some((key, id)) => (key, Some(id)),
            None => (rest, None),
        };

        if route_key.is_empty() || resource_id.is_some_and(str::is_empty) {
            return Err(malformed());
        }

        Self::new(channel_type, route_key, resource_id).map_err(|_| malformed())
    }

    pub const fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn route_key(&self) -> &str {
        &self.route_key
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Broker-side topic for this channel.
    pub fn topic(&self) -> String {
        format!("prpc:{self}")
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.channel_type == ChannelType::Presence {
            write!(f, "{PRESENCE_PREFIX}{SEPARATOR}")?;
        }
        write!(f, "{}", self.route_key)?;
        if let Some(id) = &self.resource_id {
            write!(f, "{SEPARATOR}{id}")?;
        }
        Ok(())
    }
}

impl FromStr for ChannelName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
