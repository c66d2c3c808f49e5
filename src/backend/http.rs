//! Native [`HttpTransport`] backed by `reqwest`.

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};

use super::{BackendError, BackendRequest, BackendResponse, CancellationSignal, HttpTransport};

/// `reqwest` client without a cookie store, so no ambient credentials are sent.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: BackendRequest,
        _signal: &CancellationSignal,
    ) -> Result<BackendResponse, BackendError> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(CACHE_CONTROL, "no-store")
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(BackendResponse {
            status,
            content_type,
            body,
        })
    }
}
