use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, header::HeaderValue, Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_CHAIN_API_URL: &str = "https://api.whatsonchain.com/v1/bsv/main";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A spendable output as reported by the funds index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_hash: String,
    pub tx_pos: u32,
    pub value: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("broadcast rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChainError::Timeout
        } else if err.is_decode() {
            ChainError::InvalidResponse(err.to_string())
        } else {
            ChainError::Transport(err.to_string())
        }
    }
}

/// The ledger collaborators the inscription builder talks to
///
/// Every call is a suspend point and must give up within a bounded time.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `GET /address/{address}/unspent`
    async fn unspent(&self, address: &str) -> Result<Vec<Utxo>, ChainError>;

    /// `GET /tx/{txid}/hex`
    async fn raw_transaction(&self, txid: &str) -> Result<String, ChainError>;

    /// `POST /broadcast`, returning the txid the relay reports
    async fn broadcast(&self, raw_hex: &str) -> Result<String, ChainError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ChainClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CHAIN_API_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastRequest<'a> {
    raw_hex: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BroadcastResponse {
    Error { error: String },
    Accepted { txid: String },
    Bare(String),
}

/// [`ChainClient`] over the relay's HTTP API
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    remote: Url,
    client: Client,
    timeout: Duration,
}

impl HttpChainClient {
    pub fn new(config: &ChainClientConfig) -> Result<Self, ChainError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Accept", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(config.timeout)
            .build()?;

        // keep the base path when joining relative endpoints
        let mut remote = Url::parse(&config.base_url)?;
        if !remote.path().ends_with('/') {
            let path = format!("{}/", remote.path());
            remote.set_path(&path);
        }

        Ok(Self {
            remote,
            client,
            timeout: config.timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.remote
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChainError> {
        Ok(self.remote.join(path)?)
    }

    /// Send with an outer deadline on top of the client's own timeout, so a
    /// stalled body read is bounded as well
    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String), ChainError> {
        tokio::time::timeout(self.timeout, async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, ChainError>((status, body))
        })
        .await
        .map_err(|_| ChainError::Timeout)?
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn unspent(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        let url = self.endpoint(&format!("address/{}/unspent", address))?;
        let (status, body) = self.send(self.client.get(url)).await?;
        if !status.is_success() {
            return Err(status_error("unspent lookup", status, &body));
        }
        serde_json::from_str(&body).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    async fn raw_transaction(&self, txid: &str) -> Result<String, ChainError> {
        let url = self.endpoint(&format!("tx/{}/hex", txid))?;
        let (status, body) = self.send(self.client.get(url)).await?;
        if !status.is_success() {
            return Err(status_error("transaction fetch", status, &body));
        }
        // some relays quote the hex as a json string
        Ok(body.trim().trim_matches('"').to_string())
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, ChainError> {
        let url = self.endpoint("broadcast")?;
        let request = self
            .client
            .post(url)
            .json(&BroadcastRequest { raw_hex });
        let (status, body) = self.send(request).await?;
        if is_transient(status) {
            return Err(status_error("broadcast", status, &body));
        }

        let parsed = serde_json::from_str::<BroadcastResponse>(&body);
        match (status.is_success(), parsed) {
            (_, Ok(BroadcastResponse::Error { error })) => Err(ChainError::Rejected(error)),
            (true, Ok(BroadcastResponse::Accepted { txid }))
            | (true, Ok(BroadcastResponse::Bare(txid))) => Ok(txid),
            (true, Err(_)) if is_txid(body.trim()) => Ok(body.trim().to_string()),
            (true, Err(e)) => Err(ChainError::InvalidResponse(e.to_string())),
            (false, _) => Err(ChainError::Rejected(format!("{}: {}", status, body.trim()))),
        }
    }
}

/// Overload and server faults, as opposed to answers about the request itself
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn status_error(call: &str, status: StatusCode, body: &str) -> ChainError {
    let detail = format!("{} returned {}: {}", call, status, body.trim());
    if is_transient(status) {
        ChainError::Transport(detail)
    } else {
        ChainError::InvalidResponse(detail)
    }
}

fn is_txid(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
