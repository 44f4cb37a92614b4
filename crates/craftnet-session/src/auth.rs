//! Identity service client.
//!
//! Identity is advisory, not load-bearing: a player claims a name from
//! the service and receives a token + uuid; hosts can ask the service
//! to verify a joiner's claim. Every path degrades gracefully — if the
//! service is down, players get an offline identity and hosts treat
//! verification as inconclusive.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A claimed player identity, possibly offline.
#[derive(Debug, Clone)]
pub struct ClaimedIdentity {
    pub name: String,
    /// Bearer token proving the claim, absent for offline identities.
    pub token: Option<String>,
    /// Stable account uuid, absent for offline identities.
    pub uuid: Option<String>,
}

impl ClaimedIdentity {
    /// An identity nobody vouches for.
    pub fn offline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: None,
            uuid: None,
        }
    }
}

/// What the identity service said about a joiner's claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The service vouches for the claim.
    Verified,
    /// The service rejected the claim.
    Failed,
    /// The service could not be reached; treat as inconclusive.
    Unreachable,
}

#[derive(Serialize)]
struct ClaimRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct ClaimResponse {
    token: String,
    uuid: String,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    name: &'a str,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<&'a str>,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// HTTP client for the identity service.
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    /// Claims `name`, falling back to an offline identity if the
    /// service is unreachable or refuses.
    pub async fn claim(&self, name: &str) -> ClaimedIdentity {
        let url = format!("{}/auth/claim", self.base_url);
        let result = self
            .http
            .post(&url)
            .json(&ClaimRequest { name })
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<ClaimResponse>().await {
                    Ok(body) => ClaimedIdentity {
                        name: name.to_string(),
                        token: Some(body.token),
                        uuid: Some(body.uuid),
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed claim response, going offline");
                        ClaimedIdentity::offline(name)
                    }
                }
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "identity claim refused, going offline");
                ClaimedIdentity::offline(name)
            }
            Err(e) => {
                tracing::debug!(error = %e, "identity service unreachable, going offline");
                ClaimedIdentity::offline(name)
            }
        }
    }

    /// Asks the service whether a joiner's claimed identity holds up.
    pub async fn verify(
        &self,
        name: &str,
        token: &str,
        uuid: Option<&str>,
    ) -> VerifyOutcome {
        let url = format!("{}/auth/verify", self.base_url);
        let result = self
            .http
            .post(&url)
            .json(&VerifyRequest { name, token, uuid })
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<VerifyResponse>().await {
                    Ok(body) if body.valid => VerifyOutcome::Verified,
                    Ok(_) => VerifyOutcome::Failed,
                    Err(_) => VerifyOutcome::Unreachable,
                }
            }
            Ok(_) => VerifyOutcome::Failed,
            Err(_) => VerifyOutcome::Unreachable,
        }
    }
}
