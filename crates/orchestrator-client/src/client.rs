//! HTTP client for the orchestrator API.

use crate::error::Error;
use crate::types::*;
use crate::websocket::LogStreamClient;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use url::Url;

#[cfg(test)]
mod tests;

/// Header carrying the tenant API key.
pub(crate) const API_KEY_HEADER: &str = "X-API-Key";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., "http://localhost:8000").
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Tenant API key sent with every request.
    pub api_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(30),
            api_key: None,
        }
    }
}

/// HTTP client for the Tradebot Orchestrator API.
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OrchestratorClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the API key is not a valid header value or the HTTP
    /// client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| Error::InvalidRequest("API key is not a valid header".to_string()))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    /// Creates a client for `base_url` authenticating with `api_key`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn with_api_key(base_url: &str, api_key: &str) -> Result<Self, Error> {
        Self::new(ClientConfig {
            base_url: base_url.to_string(),
            api_key: Some(api_key.to_string()),
            ..Default::default()
        })
    }

    /// Returns a client for the same server using a different key.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn for_key(&self, api_key: &str) -> Result<Self, Error> {
        Self::with_api_key(&self.base_url, api_key)
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Performs a health check.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn health_check(&self) -> Result<HealthResponse, Error> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;
        handle_response(resp).await
    }

    // ========================================================================
    // Bots
    // ========================================================================

    /// Provisions a bot for the key's tenant.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn create_bot(&self, config: &BotConfig) -> Result<BotResponse, Error> {
        let url = format!("{}/api/v1/bots", self.base_url);
        let resp = self.client.post(&url).json(config).send().await?;
        handle_response(resp).await
    }

    /// Lists the tenant's bots.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn list_bots(&self, query: &ListBotsQuery) -> Result<BotsListResponse, Error> {
        let url = with_query(format!("{}/api/v1/bots", self.base_url), query)?;
        let resp = self.client.get(&url).send().await?;
        handle_response(resp).await
    }

    /// Gets a bot's registry record.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_bot(&self, bot_id: &str) -> Result<BotResponse, Error> {
        let url = format!("{}/api/v1/bots/{}", self.base_url, bot_id);
        let resp = self.client.get(&url).send().await?;
        handle_response(resp).await
    }

    /// Deprovisions a bot. Succeeds with `removed == false` when it did not exist.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn delete_bot(&self, bot_id: &str) -> Result<DeleteBotResponse, Error> {
        let url = format!("{}/api/v1/bots/{}", self.base_url, bot_id);
        let resp = self.client.delete(&url).send().await?;
        handle_response(resp).await
    }

    /// Gets a bot's live runtime status.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_bot_status(&self, bot_id: &str) -> Result<BotStatusResponse, Error> {
        let url = format!("{}/api/v1/bots/{}/status", self.base_url, bot_id);
        let resp = self.client.get(&url).send().await?;
        handle_response(resp).await
    }

    /// Gets a bot's recent output.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_bot_logs(
        &self,
        bot_id: &str,
        tail: Option<usize>,
    ) -> Result<BotLogsResponse, Error> {
        let url = with_query(
            format!("{}/api/v1/bots/{}/logs", self.base_url, bot_id),
            &TailQuery { tail },
        )?;
        let resp = self.client.get(&url).send().await?;
        handle_response(resp).await
    }

    /// Starts a stopped or failed bot.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn start_bot(&self, bot_id: &str) -> Result<BotResponse, Error> {
        self.lifecycle_action(bot_id, "start").await
    }

    /// Stops a running bot, keeping its artifacts.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn stop_bot(&self, bot_id: &str) -> Result<BotResponse, Error> {
        self.lifecycle_action(bot_id, "stop").await
    }

    /// Restarts a bot.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn restart_bot(&self, bot_id: &str) -> Result<BotResponse, Error> {
        self.lifecycle_action(bot_id, "restart").await
    }

    async fn lifecycle_action(&self, bot_id: &str, action: &str) -> Result<BotResponse, Error> {
        let url = format!("{}/api/v1/bots/{}/{}", self.base_url, bot_id, action);
        let resp = self.client.post(&url).send().await?;
        handle_response(resp).await
    }

    // ========================================================================
    // API Keys
    // ========================================================================

    /// Mints a key for the caller's tenant.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn create_api_key(
        &self,
        request: &CreateApiKeyRequest,
    ) -> Result<CreateApiKeyResponse, Error> {
        let url = format!("{}/api/v1/auth/keys", self.base_url);
        let resp = self.client.post(&url).json(request).send().await?;
        handle_response(resp).await
    }

    /// Lists the caller's tenant keys.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn list_api_keys(&self) -> Result<ApiKeysListResponse, Error> {
        let url = format!("{}/api/v1/auth/keys", self.base_url);
        let resp = self.client.get(&url).send().await?;
        handle_response(resp).await
    }

    /// Revokes a key.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn delete_api_key(&self, key_id: &str) -> Result<(), Error> {
        let url = format!("{}/api/v1/auth/keys/{}", self.base_url, key_id);
        let resp = self.client.delete(&url).send().await?;
        handle_empty_response(resp).await
    }

    // ========================================================================
    // WebSocket
    // ========================================================================

    /// Returns the WebSocket URL that follows `bot_id`'s output.
    ///
    /// # Errors
    /// Returns error if the base URL cannot be converted.
    pub fn logs_ws_url(&self, bot_id: &str, tail: Option<usize>) -> Result<Url, Error> {
        let mut url = Url::parse(&format!(
            "{}/api/v1/bots/{}/logs/ws",
            self.base_url, bot_id
        ))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::InvalidRequest(format!("cannot use {} for WebSocket", scheme)))?;
        if let Some(tail) = tail {
            url.query_pairs_mut().append_pair("tail", &tail.to_string());
        }
        Ok(url)
    }

    /// Opens a log stream for `bot_id`.
    ///
    /// # Errors
    /// Returns error if the connection or upgrade fails.
    pub async fn follow_logs(
        &self,
        bot_id: &str,
        tail: Option<usize>,
    ) -> Result<LogStreamClient, Error> {
        let url = self.logs_ws_url(bot_id, tail)?;
        LogStreamClient::connect(url.as_str(), self.api_key.as_deref()).await
    }
}

// ============================================================================
// Internal Helpers
// ============================================================================

#[derive(Serialize)]
struct TailQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    tail: Option<usize>,
}

fn with_query<Q: Serialize>(url: String, query: &Q) -> Result<String, Error> {
    let encoded = serde_urlencoded::to_string(query)
        .map_err(|e| Error::InvalidRequest(e.to_string()))?;
    if encoded.is_empty() {
        Ok(url)
    } else {
        Ok(format!("{}?{}", url, encoded))
    }
}

async fn error_from(resp: Response) -> Error {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.error),
        Err(_) => (String::new(), text),
    };

    if status == StatusCode::NOT_FOUND {
        Error::NotFound(message)
    } else {
        Error::Api {
            status: status.as_u16(),
            code,
            message,
        }
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, Error> {
    if resp.status().is_success() {
        Ok(resp.json().await?)
    } else {
        Err(error_from(resp).await)
    }
}

async fn handle_empty_response(resp: Response) -> Result<(), Error> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(error_from(resp).await)
    }
}
