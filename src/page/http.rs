use super::{FetchRequest, FetchResponse, PageFetch};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::debug;

/// Page network layer backed by reqwest.
///
/// `session_headers` stand in for the state a browser attaches implicitly to
/// every call of a loaded page (cookies, client tokens).
pub struct HttpFetch {
    client: Client,
    session_headers: HeaderMap,
}

impl HttpFetch {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            session_headers: HeaderMap::new(),
        }
    }

    pub fn with_session_headers<'a, I>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("invalid header name {}: {}", name, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("invalid value for header {}: {}", name, e))?;
            map.insert(name, value);
        }
        Ok(Self {
            client: Client::new(),
            session_headers: map,
        })
    }
}

impl Default for HttpFetch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetch for HttpFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| anyhow!("invalid method {}: {}", request.method, e))?;
        let mut builder = self
            .client
            .request(method, request.url.as_str())
            .headers(self.session_headers.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        debug!("page fetch {} -> {}", request.url, status);
        Ok(FetchResponse { status, body })
    }
}
