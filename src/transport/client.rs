//! HTTP transport over hyper

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use super::Transport;
use crate::interaction::{HeaderMap, Request, Response};
use crate::{Result, TapedeckError};

/// Plain-HTTP transport backed by a pooled hyper client
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Option<Duration>,
}

impl HyperTransport {
    /// Create a new transport without a request timeout
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self {
            client,
            timeout: None,
        }
    }

    /// Fail requests that take longer than `timeout` to complete
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn send(
        client: Client<HttpConnector, Full<Bytes>>,
        request: Request,
    ) -> Result<Response> {
        let uri = request
            .url
            .parse::<Uri>()
            .map_err(|e| TapedeckError::Transport(format!("Invalid URI '{}': {e}", request.url)))?;

        let method = request.method.parse::<Method>().map_err(|e| {
            TapedeckError::Transport(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        debug!("Performing {} {}", method, uri);

        let mut request_builder = hyper::Request::builder().method(method).uri(uri);
        for (name, value) in &request.headers {
            request_builder = request_builder.header(name, value);
        }

        let body = request.body.map(Bytes::from).unwrap_or_default();
        let http_request = request_builder
            .body(Full::new(body))
            .map_err(|e| TapedeckError::Transport(format!("Failed to build request: {e}")))?;

        let response = client.request(http_request).await.map_err(|e| {
            warn!("Request failed: {e}");
            TapedeckError::Transport(format!("Request failed: {e}"))
        })?;

        let status = response.status().as_u16();
        let headers: HeaderMap = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TapedeckError::Transport(format!("Failed to read response body: {e}")))?
            .to_bytes();

        Ok(Response {
            status,
            headers,
            body: Some(body.to_vec()),
        })
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn perform(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
        let client = self.client.clone();
        let timeout = self.timeout;

        async move {
            let url = request.url.clone();
            let exchange = Self::send(client, request);

            match timeout {
                Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                    TapedeckError::Transport(format!("Request to {url} timed out after {limit:?}"))
                })?,
                None => exchange.await,
            }
        }
        .boxed()
    }
}
