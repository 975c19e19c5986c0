use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use kondate_core::types::UserId;

/// Seam to the external identity provider.
///
/// Every inbound request carries a bearer token; the verifier maps it to
/// the owning user or rejects it. Tests substitute a static verifier.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// `None` means the token is missing, expired, or forged.
    async fn verify(&self, token: &str) -> Option<UserId>;
}

/// Production verifier: asks the identity endpoint who the token belongs
/// to. Any non-200 reply rejects the request; nothing about the failure
/// is leaked to the client.
pub struct IdentityVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl IdentityVerifier {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[derive(Deserialize)]
struct UserReply {
    user_id: String,
}

#[async_trait]
impl AuthVerifier for IdentityVerifier {
    async fn verify(&self, token: &str) -> Option<UserId> {
        let url = format!("{}/auth/user", self.base_url);
        let response = match self.client.get(&url).bearer_auth(token).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "identity provider unreachable");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "token rejected");
            return None;
        }
        response
            .json::<UserReply>()
            .await
            .ok()
            .map(|reply| UserId::from(reply.user_id))
    }
}

/// Bearer value from the `Authorization` header.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
