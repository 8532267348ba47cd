use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::error::ProtocolError;

type HmacSha256 = Hmac<Sha256>;

/// Signed payload authorizing one socket to join one channel. For presence
/// channels `channel_data` carries the validated member data as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthGrant {
    /// `<app_key>:<hex HMAC-SHA256 signature>`.
    pub auth: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
    /// Unix timestamp after which the grant is no longer accepted.
    pub expires_at: i64,
}

/// Issues and checks grants. One per process on the server; the signing
/// secret never travels to clients.
#[derive(Clone)]
pub struct GrantSigner {
    app_key: String,
    secret: String,
    ttl_secs: i64,
}

impl GrantSigner {
    pub fn new(app_key: &str, secret: &str, ttl_secs: i64) -> Self {
        Self {
            app_key: app_key.to_string(),
            secret: secret.to_string(),
            ttl_secs,
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn sign(
        &self,
        socket_id: &str,
        channel_name: &str,
        member: Option<&Value>,
    ) -> Result<AuthGrant, ProtocolError> {
        let channel_data = member.map(serde_json::to_string).transpose()?;
        let expires_at = Utc::now().timestamp() + self.ttl_secs;
        let signature = hex::encode(self.mac(
            socket_id,
            channel_name,
            expires_at,
            channel_data.as_deref(),
        ));

        Ok(AuthGrant {
            auth: format!("{}:{signature}", self.app_key),
            channel_data,
            expires_at,
        })
    }

    pub fn verify(
        &self,
        socket_id: &str,
        channel_name: &str,
        grant: &AuthGrant,
    ) -> Result<(), ProtocolError> {
        if grant.expires_at < Utc::now().timestamp() {
            return Err(ProtocolError::GrantExpired);
        }

        let signature = grant
            .auth
            .strip_prefix(&format!("{}:", self.app_key))
            .ok_or(ProtocolError::GrantSignature)?;
        let provided = hex::decode(signature).map_err(|_| ProtocolError::GrantSignature)?;

        let expected = self.mac(
            socket_id,
            channel_name,
            grant.expires_at,
            grant.channel_data.as_deref(),
        );
        if expected.as_slice() != provided.as_slice() {
            return Err(ProtocolError::GrantSignature);
        }

        Ok(())
    }

    fn mac(
        &self,
        socket_id: &str,
        channel_name: &str,
        expires_at: i64,
        channel_data: Option<&str>,
    ) -> Vec<u8> {
        // HMAC-SHA256 accepts any key length, so this cannot fail.
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(format!("{socket_id}:{channel_name}:{expires_at}").as_bytes());
        if let Some(data) = channel_data {
            mac.update(b":");
            mac.update(data.as_bytes());
        }
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::GrantSigner;
    use crate::error::ProtocolError;
    use serde_json::json;

    fn signer() -> GrantSigner {
        GrantSigner::new("app-key", "top-secret", 60)
    }

    #[test]
    fn sign_verify_succeeds() {
        let member = json!({"id": "u1", "name": "Alice"});
        let grant = signer()
            .sign("123.456", "presence-game-abc", Some(&member))
            .unwrap();

        assert!(grant.auth.starts_with("app-key:"));
        assert!(grant.channel_data.as_deref().unwrap().contains("u1"));
        signer()
            .verify("123.456", "presence-game-abc", &grant)
            .unwrap();
    }

    #[test]
    fn tampered_member_data_fails() {
        let member = json!({"id": "u1", "isHost": false});
        let mut grant = signer()
            .sign("123.456", "presence-game-abc", Some(&member))
            .unwrap();
        grant.channel_data = Some(r#"{"id":"u1","isHost":true}"#.to_string());

        assert!(matches!(
            signer().verify("123.456", "presence-game-abc", &grant),
            Err(ProtocolError::GrantSignature)
        ));
    }

    #[test]
    fn wrong_channel_fails() {
        let grant = signer().sign("123.456", "presence-game-abc", None).unwrap();

        assert!(
            signer()
                .verify("123.456", "presence-game-xyz", &grant)
                .is_err()
        );
    }

    #[test]
    fn wrong_secret_fails() {
        let grant = signer().sign("123.456", "presence-game-abc", None).unwrap();
        let other = GrantSigner::new("app-key", "other-secret", 60);

        assert!(other.verify("123.456", "presence-game-abc", &grant).is_err());
    }

    #[test]
    fn expired_grant_fails() {
        let expired = GrantSigner::new("app-key", "top-secret", -10);
        let grant = expired.sign("123.456", "presence-game-abc", None).unwrap();

        assert!(matches!(
            expired.verify("123.456", "presence-game-abc", &grant),
            Err(ProtocolError::GrantExpired)
        ));
    }
}
