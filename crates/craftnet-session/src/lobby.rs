//! Lobby directory client.
//!
//! Public hosts advertise themselves to the lobby service so players
//! can browse joinable games. Everything here is best-effort: a dead
//! lobby service never blocks hosting or joining by id.

use std::time::Duration;

use craftnet_protocol::EndpointId;
use serde::{Deserialize, Serialize};

use crate::SessionError;

/// One advertised game, as listed by the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LobbyEntry {
    /// The hosting peer's endpoint id; what `join_game` takes.
    pub id: EndpointId,
    /// Display name of the game.
    pub name: String,
    /// Current player count.
    pub players: u32,
    /// Whether a password is required.
    pub has_password: bool,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    id: &'a EndpointId,
    name: &'a str,
    has_password: bool,
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    id: &'a EndpointId,
    players: u32,
}

/// HTTP client for the lobby directory.
#[derive(Debug, Clone)]
pub struct LobbyClient {
    http: reqwest::Client,
    base_url: String,
}

impl LobbyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    /// Advertises a newly hosted game. Best-effort.
    pub async fn register(&self, id: &EndpointId, name: &str, has_password: bool) {
        let url = format!("{}/host", self.base_url);
        let body = RegisterRequest {
            id,
            name,
            has_password,
        };
        if let Err(e) = self.http.post(&url).json(&body).send().await {
            tracing::debug!(error = %e, "lobby registration failed");
        }
    }

    /// Heartbeats current occupancy. Best-effort.
    pub async fn report(&self, id: &EndpointId, players: u32) {
        let url = format!("{}/report", self.base_url);
        let body = ReportRequest { id, players };
        if let Err(e) = self.http.post(&url).json(&body).send().await {
            tracing::debug!(error = %e, "lobby report failed");
        }
    }

    /// Lists currently advertised games.
    pub async fn lobbies(&self) -> Result<Vec<LobbyEntry>, SessionError> {
        let url = format!("{}/lobbies", self.base_url);
        let resp = self.http.get(&url).send().await?;
        Ok(resp.json().await?)
    }

    /// Withdraws our advertisement on teardown. Best-effort.
    pub async fn unregister(&self, id: &EndpointId) {
        let url = format!("{}/host/{}", self.base_url, id);
        if let Err(e) = self.http.delete(&url).send().await {
            tracing::debug!(error = %e, "lobby unregister failed");
        }
    }
}
