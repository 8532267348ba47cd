use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub image: String,
}

/// Caller identity for one request. Empty for anonymous callers.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user: Option<SessionUser>,
}

impl Session {
    pub const fn anonymous() -> Self {
        Self { user: None }
    }

    pub const fn for_user(user: SessionUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn require_user(&self) -> Result<&SessionUser> {
        self.user
            .as_ref()
            .ok_or_else(|| Error::Authorization("caller has no session user".to_string()))
    }
}

/// Resolves request identity. The exchange against the auth provider is an
/// external collaborator; implementations stay thin.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn session(&self, headers: &HeaderMap) -> Result<Session>;
}

/// Development provider reading identity from `x-user-*` headers.
pub struct HeaderSessions;

#[async_trait]
impl SessionProvider for HeaderSessions {
    async fn session(&self, headers: &HeaderMap) -> Result<Session> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };

        let Some(id) = header("x-user-id") else {
            return Ok(Session::anonymous());
        };

        Ok(Session::for_user(SessionUser {
            id,
            name: header("x-user-name").unwrap_or_default(),
            image: header("x-user-image").unwrap_or_default(),
        }))
    }
}
