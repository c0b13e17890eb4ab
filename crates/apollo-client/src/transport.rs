use apollo_config::TimeoutSettings;
use apollo_core::{ApolloError, HttpRequest, HttpResponse, HttpTransport, Result};
use async_trait::async_trait;
use tracing::debug;

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish()
    }
}

impl ReqwestTransport {
    pub fn new(timeouts: &TimeoutSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect_timeout())
            .build()
            .map_err(|e| ApolloError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(url = %request.url, "GET");

        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| ApolloError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| ApolloError::Transport {
            url: request.url.clone(),
            message: format!("failed to read body: {}", e),
        })?;

        Ok(HttpResponse { status, body })
    }
}
