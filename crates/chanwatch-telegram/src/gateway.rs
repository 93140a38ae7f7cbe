//! Client for the session bridge, the process that owns the worker accounts'
//! protocol sessions and exposes them over JSON/HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chanwatch_core::SessionError;
use chanwatch_core::session::{EntityRef, FetchedMessage, ProtocolSession, ResolvedChannel, SessionConnector};
use chanwatch_types::models::Account;

/// Wait used when a rate limit response carries no hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);
/// Longest wait honoured from a rate limit hint.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Which bridge call produced a response; decides how errors are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Connect,
    Resolve,
    History,
}

#[derive(Serialize)]
struct OpenSession<'a> {
    api_id: &'a str,
    api_hash: &'a str,
    phone: &'a str,
    session: Option<&'a str>,
}

#[derive(Deserialize)]
struct OpenedSession {
    session_id: String,
    authorized: bool,
}

#[derive(Serialize)]
struct ResolveBody<'a> {
    kind: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct ResolvedBody {
    peer_id: i64,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Serialize)]
struct HistoryBody {
    peer_id: i64,
    min_id: i64,
    limit: usize,
}

#[derive(Deserialize)]
struct HistoryPage {
    messages: Vec<BridgeMessage>,
}

#[derive(Deserialize)]
struct BridgeMessage {
    id: i64,
    #[serde(default)]
    text: Option<String>,
    date: DateTime<Utc>,
    #[serde(default)]
    media_type: Option<String>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Map a non-success bridge response onto the session error taxonomy.
pub fn classify(call: Call, status: StatusCode, body: &str) -> SessionError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let reason = parsed
        .error
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| format!("bridge returned {}", status));

    match (status.as_u16(), call) {
        (401, _) | (403, Call::Connect) => SessionError::Auth(reason),
        // Denied access to one channel, the account itself is fine.
        (403, Call::Resolve | Call::History) => SessionError::Resolve(reason),
        (420 | 429, _) => SessionError::RateLimited(
            parsed
                .retry_after
                .map(Duration::from_secs)
                .map_or(DEFAULT_RETRY_AFTER, |wait| wait.min(MAX_RETRY_AFTER)),
        ),
        (s, _) if s >= 500 => SessionError::Network(reason),
        (_, Call::Connect) => SessionError::Connect(reason),
        (_, Call::Resolve | Call::History) => SessionError::Resolve(reason),
    }
}

fn transport(e: reqwest::Error) -> SessionError {
    SessionError::Network(e.to_string())
}

async fn read_json<T: for<'de> Deserialize<'de>>(call: Call, response: Response) -> Result<T, SessionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify(call, status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| SessionError::Network(format!("malformed bridge response: {}", e)))
}

/// Opens worker sessions through the bridge.
#[derive(Clone)]
pub struct GatewayConnector {
    client: Client,
    base_url: String,
}

impl GatewayConnector {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SessionConnector for GatewayConnector {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn ProtocolSession>, SessionError> {
        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&OpenSession {
                api_id: &account.api_id,
                api_hash: &account.api_hash,
                phone: &account.phone,
                session: account.session_blob.as_deref(),
            })
            .send()
            .await
            .map_err(transport)?;

        let opened: OpenedSession = read_json(Call::Connect, response).await?;
        let session = GatewaySession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id: opened.session_id,
        };

        if !opened.authorized {
            session.disconnect().await;
            return Err(SessionError::Auth(format!("account {} is not authorized", account.id)));
        }

        debug!("Bridge session {} opened for account {}", session.session_id, account.id);
        Ok(Arc::new(session))
    }
}

/// One live session held by the bridge.
pub struct GatewaySession {
    client: Client,
    base_url: String,
    session_id: String,
}

impl GatewaySession {
    fn url(&self, tail: &str) -> String {
        format!("{}/sessions/{}{}", self.base_url, self.session_id, tail)
    }
}

#[async_trait]
impl ProtocolSession for GatewaySession {
    async fn resolve(&self, target: &EntityRef) -> Result<ResolvedChannel, SessionError> {
        let response = self
            .client
            .post(self.url("/resolve"))
            .json(&ResolveBody {
                kind: target.kind().as_str(),
                value: target.value(),
            })
            .send()
            .await
            .map_err(transport)?;

        let resolved: ResolvedBody = read_json(Call::Resolve, response).await?;
        Ok(ResolvedChannel {
            peer_id: resolved.peer_id,
            title: resolved.title,
        })
    }

    async fn fetch_after(
        &self,
        channel: &ResolvedChannel,
        min_id: i64,
        limit: usize,
    ) -> Result<Vec<FetchedMessage>, SessionError> {
        let response = self
            .client
            .post(self.url("/history"))
            .json(&HistoryBody {
                peer_id: channel.peer_id,
                min_id,
                limit,
            })
            .send()
            .await
            .map_err(transport)?;

        let page: HistoryPage = read_json(Call::History, response).await?;
        Ok(page
            .messages
            .into_iter()
            .map(|m| FetchedMessage {
                id: m.id,
                text: m.text.unwrap_or_default(),
                date: m.date,
                media_type: m.media_type,
            })
            .collect())
    }

    async fn disconnect(&self) {
        match self.client.delete(self.url("")).send().await {
            Ok(response) if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => {}
            Ok(response) => warn!("Bridge refused to close session {}: {}", self.session_id, response.status()),
            Err(e) => warn!("Could not close bridge session {}: {}", self.session_id, e),
        }
    }
}
