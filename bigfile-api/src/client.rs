use crate::error::{ApiError, ApiResult};
use crate::models::Envelope;
use reqwest::multipart::Form;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Header carrying a per-request trace id
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the upload service
    pub base_url: String,
    /// Timeout for JSON requests
    pub timeout: Duration,
    /// Timeout for chunk uploads
    pub upload_timeout: Duration,
    /// Optional bearer token
    pub access_token: Option<String>,
}

impl ClientConfig {
    /// Create a config with default timeouts
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(60),
            upload_timeout: Duration::from_secs(300),
            access_token: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// HTTP client for the upload service
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    config: ClientConfig,
}

impl Client {
    /// Create a new client
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve a service path against the base URL
    pub fn url(&self, path: &str) -> ApiResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn decorate(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(TRACE_ID_HEADER, uuid::Uuid::new_v4().to_string());
        match &self.config.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET a JSON payload
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = self.url(path)?;
        tracing::debug!(target: "api", method = "GET", url = %url, "Sending request");
        let response = self.decorate(self.http.get(url)).send().await?;
        Self::decode(response).await
    }

    /// POST a JSON body and decode the payload
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let url = self.url(path)?;
        tracing::debug!(target: "api", method = "POST", url = %url, "Sending request");
        let response = self
            .decorate(self.http.post(url))
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// POST a multipart form using the upload timeout
    pub async fn post_multipart<T: DeserializeOwned>(&self, path: &str, form: Form) -> ApiResult<T> {
        let url = self.url(path)?;
        tracing::debug!(target: "api", method = "POST", url = %url, "Sending multipart request");
        let response = self
            .decorate(self.http.post(url))
            .timeout(self.config.upload_timeout)
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|body| Envelope::read(&body).message)
                .unwrap_or(text);
            tracing::warn!(target: "api", status = status.as_u16(), error = %message, "Request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        let payload = match Envelope::unwrap_payload(body)? {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            payload => payload,
        };
        Ok(serde_json::from_value(payload)?)
    }
}
