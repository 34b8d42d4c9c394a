//! HTTP transport with timeouts and a shared session cookie jar

use crate::config::HttpConfig;
use crate::error::{PortalError, PortalResult};
use crate::session::SessionJar;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Response, Url};
use std::sync::Arc;
use std::time::Duration;

/// A fully read response, after redirects were followed
#[derive(Debug, Clone)]
pub struct PortalResponse {
    /// Where the redirect chain ended
    pub final_url: Url,
    pub status: u16,
    pub body: String,
}

impl PortalResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_success(self) -> PortalResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PortalError::Status {
                status: self.status,
                url: self.final_url.to_string(),
            })
        }
    }
}

/// Incrementally delivered response body
#[async_trait]
pub trait ChunkSource: Send {
    /// Wait for the next chunk; `None` once the server closed the body
    async fn next_chunk(&mut self) -> PortalResult<Option<Vec<u8>>>;
}

/// Everything the portal client needs from the network
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get(&self, url: &str, headers: HeaderMap) -> PortalResult<PortalResponse>;

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: HeaderMap,
    ) -> PortalResult<PortalResponse>;

    /// Open a long-lived response without reading it to the end
    async fn open_stream(&self, url: &str, headers: HeaderMap)
        -> PortalResult<Box<dyn ChunkSource>>;
}

pub struct HttpClient {
    inner: Client,
    streaming: Client,
}

impl HttpClient {
    pub fn new(settings: &HttpConfig, user_agent: &str) -> PortalResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let jar = Arc::new(SessionJar::new());
        let connect_timeout = Duration::from_secs(settings.connect_timeout);

        let inner = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(settings.timeout))
            .connect_timeout(connect_timeout)
            .default_headers(headers.clone())
            .build()?;

        // No overall timeout: the speed feed never ends on its own and is
        // closed by cancelling the reader instead.
        let streaming = Client::builder()
            .cookie_provider(jar)
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { inner, streaming })
    }

    async fn read(resp: Response) -> PortalResult<PortalResponse> {
        let final_url = resp.url().clone();
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        tracing::debug!("{} -> {} ({} bytes)", final_url, status, body.len());

        Ok(PortalResponse {
            final_url,
            status,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, url: &str, headers: HeaderMap) -> PortalResult<PortalResponse> {
        tracing::debug!("GET {}", url);
        let resp = self.inner.get(url).headers(headers).send().await?;
        Self::read(resp).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: HeaderMap,
    ) -> PortalResult<PortalResponse> {
        tracing::debug!("POST {}", url);
        let resp = self
            .inner
            .post(url)
            .headers(headers)
            .form(form)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn open_stream(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> PortalResult<Box<dyn ChunkSource>> {
        tracing::debug!("GET {} (stream)", url);
        let resp = self.streaming.get(url).headers(headers).send().await?;
        if !resp.status().is_success() {
            return Err(PortalError::Status {
                status: resp.status().as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(Box::new(ResponseChunks(resp)))
    }
}

/// Dropping this closes the underlying connection
struct ResponseChunks(Response);

#[async_trait]
impl ChunkSource for ResponseChunks {
    async fn next_chunk(&mut self) -> PortalResult<Option<Vec<u8>>> {
        Ok(self.0.chunk().await?.map(|bytes| bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> PortalResponse {
        PortalResponse {
            final_url: Url::parse("https://selfcare.example.net/customer/totalUsage").unwrap(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_into_success() {
        assert!(response(200).into_success().is_ok());

        let err = response(503).into_success().unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_client_builds_with_config() {
        assert!(HttpClient::new(&HttpConfig::default(), "Mozilla/5.0 test").is_ok());
    }

    #[test]
    fn test_rejects_unusable_user_agent() {
        assert!(HttpClient::new(&HttpConfig::default(), "bad\nagent").is_err());
    }
}
