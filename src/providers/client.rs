use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::providers::error::{ProviderError, ProviderResult};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Thin HTTP client shared by the adapters: JSON in/out, bearer auth,
/// uniform timeout. Adapters stay stateless beyond config + this client.
#[derive(Debug, Clone)]
pub struct ProviderHttpClient {
    inner: reqwest::Client,
}

impl ProviderHttpClient {
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("client init: {e}")))?;
        Ok(Self { inner })
    }

    pub fn with_default_timeout() -> ProviderResult<Self> {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub async fn request_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        body: Option<&B>,
    ) -> ProviderResult<R> {
        let mut req = self.inner.request(method, url);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                code: status.as_u16().to_string(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
                retryable: status.is_server_error(),
            });
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::InvalidPayload(format!("response decode: {e}")))
    }
}
