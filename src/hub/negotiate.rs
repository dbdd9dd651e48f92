//! Negotiate round-trip and WebSocket URL construction.
//!
//! Before opening the socket the client asks `POST {hub}/negotiate` which
//! transports the server offers and receives a connection token. The
//! server may instead redirect to another hub URL with its own access
//! token; one redirect hop is followed.

use serde::Deserialize;

use super::HubError;
use crate::ws::http_to_ws_scheme;

/// Negotiate protocol version requested by this client.
const NEGOTIATE_VERSION: u32 = 1;

/// One transport offered by the server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    /// Transport name (`WebSockets`, `ServerSentEvents`, `LongPolling`).
    pub transport: String,
    /// Supported transfer formats (`Text`, `Binary`).
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Server response to `POST /negotiate`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    /// Connection id (version 0 servers).
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Connection token to pass as `id` (version 1 servers).
    #[serde(default)]
    pub connection_token: Option<String>,
    /// Negotiate version the server speaks.
    #[serde(default)]
    pub negotiate_version: u32,
    /// Transports the server offers.
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    /// Redirect target hub URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Token to use with the redirect target.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Server-side refusal.
    #[serde(default)]
    pub error: Option<String>,
}

impl NegotiateResponse {
    /// Identifier to send as the `id` query parameter.
    #[must_use]
    pub fn connection_id_param(&self) -> Option<&str> {
        if self.negotiate_version >= 1 {
            self.connection_token
                .as_deref()
                .or(self.connection_id.as_deref())
        } else {
            self.connection_id.as_deref()
        }
    }

    /// Whether a text WebSocket transport is on offer.
    #[must_use]
    pub fn supports_websockets(&self) -> bool {
        self.available_transports.iter().any(|t| {
            t.transport.eq_ignore_ascii_case("WebSockets")
                && (t.transfer_formats.is_empty()
                    || t.transfer_formats.iter().any(|f| f.eq_ignore_ascii_case("Text")))
        })
    }
}

/// Result of negotiation: where to connect and with which token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedEndpoint {
    /// Hub URL to open the socket against (may differ after a redirect).
    pub hub_url: String,
    /// Bearer token for that hub.
    pub token: String,
    /// Connection id for the `id` query parameter.
    pub connection_id: Option<String>,
}

/// Run the negotiate round-trip, following at most one redirect.
pub async fn negotiate(
    client: &reqwest::Client,
    hub_url: &str,
    token: &str,
) -> Result<NegotiatedEndpoint, HubError> {
    let mut target = hub_url.to_string();
    let mut bearer = token.to_string();

    for _hop in 0..2 {
        let response = request_negotiate(client, &target, &bearer).await?;

        if let Some(error) = response.error {
            return Err(HubError::Negotiation(error));
        }

        if let Some(redirect) = response.url {
            log::info!("[Hub] Negotiate redirected to {}", redirect);
            target = redirect;
            if let Some(access_token) = response.access_token {
                bearer = access_token;
            }
            continue;
        }

        if !response.supports_websockets() {
            return Err(HubError::TransportUnavailable);
        }

        return Ok(NegotiatedEndpoint {
            hub_url: target,
            token: bearer,
            connection_id: response.connection_id_param().map(str::to_string),
        });
    }

    Err(HubError::Negotiation("too many redirects".to_string()))
}

async fn request_negotiate(
    client: &reqwest::Client,
    hub_url: &str,
    token: &str,
) -> Result<NegotiateResponse, HubError> {
    let url = negotiate_url(hub_url);
    let response = client
        .post(&url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| HubError::Transport(format!("negotiate request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HubError::from_status(status.as_u16(), "negotiate"));
    }

    response
        .json::<NegotiateResponse>()
        .await
        .map_err(|e| HubError::Negotiation(format!("invalid negotiate response: {e}")))
}

/// `{hub}/negotiate?negotiateVersion=1`, preserving any existing query.
#[must_use]
pub fn negotiate_url(hub_url: &str) -> String {
    let (base, query) = match hub_url.split_once('?') {
        Some((base, query)) => (base.trim_end_matches('/'), Some(query)),
        None => (hub_url.trim_end_matches('/'), None),
    };
    match query {
        Some(query) => format!("{base}/negotiate?{query}&negotiateVersion={NEGOTIATE_VERSION}"),
        None => format!("{base}/negotiate?negotiateVersion={NEGOTIATE_VERSION}"),
    }
}

/// Build the `ws(s)://` URL carrying the connection id and access token.
pub fn websocket_url(
    hub_url: &str,
    connection_id: Option<&str>,
    token: &str,
) -> Result<String, HubError> {
    let mut url = reqwest::Url::parse(&http_to_ws_scheme(hub_url))
        .map_err(|e| HubError::Transport(format!("invalid hub URL: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(id) = connection_id {
            query.append_pair("id", id);
        }
        query.append_pair("access_token", token);
    }
    Ok(url.into())
}
