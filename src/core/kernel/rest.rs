use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::Signer;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Request, Response, Url};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{instrument, trace};

/// Query or body parameters. Values keep their JSON type so the encoder can
/// apply the per-type rules.
pub type Params = Map<String, Value>;

/// A single exchange call before signing
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub endpoint: String,
    pub query: Params,
    pub body: Params,
    pub authenticated: bool,
}

impl RestRequest {
    pub fn public_get(endpoint: impl Into<String>, query: Params) -> Self {
        Self {
            method: Method::GET,
            endpoint: endpoint.into(),
            query,
            body: Params::new(),
            authenticated: false,
        }
    }

    pub fn private_post(endpoint: impl Into<String>, body: Params) -> Self {
        Self {
            method: Method::POST,
            endpoint: endpoint.into(),
            query: Params::new(),
            body,
            authenticated: true,
        }
    }
}

/// REST client trait for making HTTP requests
///
/// Implementations handle transport, query encoding and signing. Response
/// envelopes are interpreted by the exchange layer.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Execute a request and return the JSON body
    async fn execute(&self, request: RestRequest) -> Result<Value, ExchangeError>;

    /// Make an unauthenticated GET request
    async fn get(&self, endpoint: &str, query: Params) -> Result<Value, ExchangeError> {
        self.execute(RestRequest::public_get(endpoint, query)).await
    }

    /// Make a signed POST request; a nonce is added to the body when absent
    async fn post_signed(&self, endpoint: &str, body: Params) -> Result<Value, ExchangeError> {
        self.execute(RestRequest::private_post(endpoint, body)).await
    }
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            user_agent: "KrakenRelay/0.1.0".to_string(),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

/// Append `query` to `url` following the exchange's encoding rules: string
/// arrays become repeated parameters, strings pass through, anything else is
/// sent as its JSON text. Keys are emitted in sorted order.
pub fn append_query(url: &mut Url, query: &Params) -> Result<(), ExchangeError> {
    if query.is_empty() {
        return Ok(());
    }

    let mut keys: Vec<&String> = query.keys().collect();
    keys.sort();

    let mut pairs = url.query_pairs_mut();
    for key in keys {
        match &query[key] {
            Value::String(s) => {
                pairs.append_pair(key, s);
            }
            Value::Array(items) if items.iter().all(Value::is_string) => {
                for item in items.iter().filter_map(Value::as_str) {
                    pairs.append_pair(key, item);
                }
            }
            other => {
                pairs.append_pair(key, &serde_json::to_string(other)?);
            }
        }
    }
    Ok(())
}

impl ReqwestRest {
    /// Build the full URL for an endpoint
    fn build_url(&self, endpoint: &str) -> Result<Url, ExchangeError> {
        let raw = format!("{}{}", self.config.base_url, endpoint);
        Url::parse(&raw).map_err(|e| ExchangeError::ParseError(format!("Invalid URL {}: {}", raw, e)))
    }

    /// Build the signed HTTP request without sending it
    pub fn prepare(&self, request: RestRequest) -> Result<Request, ExchangeError> {
        let mut url = self.build_url(&request.endpoint)?;
        append_query(&mut url, &request.query)?;
        let query_string = url.query().unwrap_or_default().to_string();

        let mut body = request.body;
        let signer = if request.authenticated {
            Some(self.signer.as_ref().ok_or_else(|| {
                ExchangeError::AuthError("Authentication required but no signer provided".to_string())
            })?)
        } else {
            None
        };

        let nonce = signer.map(|signer| {
            match body
                .entry("nonce")
                .or_insert_with(|| Value::String(signer.next_nonce().to_string()))
            {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        });

        let body_bytes = if body.is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(&body)?
        };

        let mut builder = self.client.request(request.method, url);

        if let (Some(signer), Some(nonce)) = (signer, nonce) {
            let headers =
                signer.sign_request(&request.endpoint, &query_string, &body_bytes, &nonce)?;
            for (key, value) in headers {
                builder = builder.header(key, value);
            }
        }

        if !body_bytes.is_empty() {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body_bytes);
        }

        Ok(builder.build()?)
    }

    /// Handle the response and extract JSON
    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", response_text);

        if status.is_success() {
            Ok(serde_json::from_str(&response_text)?)
        } else {
            Err(ExchangeError::ApiError {
                code: i32::from(status.as_u16()),
                message: response_text,
            })
        }
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    #[instrument(skip(self, request), fields(exchange = %self.config.exchange_name, method = %request.method, endpoint = %request.endpoint))]
    async fn execute(&self, request: RestRequest) -> Result<Value, ExchangeError> {
        let prepared = self.prepare(request)?;
        let response = self
            .client
            .execute(prepared)
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Request failed: {}", e)))?;

        self.handle_response(response).await
    }
}
