use async_trait::async_trait;
use protocol::{AuthGrant, AuthRequest};
use serde_json::Value;

use crate::error::Result;

/// The RPC transport boundary: plain procedure calls and channel
/// authorization round-trips against the gateway. The HTTP layer behind it
/// is an external collaborator; tests wire this straight into a router.
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn call(&self, route: &str, input: Value) -> Result<Value>;

    async fn authorize(&self, request: &AuthRequest) -> Result<AuthGrant>;
}
