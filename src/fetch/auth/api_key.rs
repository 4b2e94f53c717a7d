use crate::error::ConfigError;
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// `header_name` is the header field to set (e.g. `"Authorization"` or a
/// provider-specific name such as `"x-api-key"`). The key is written raw,
/// without any scheme prefix, and marked sensitive so it never shows up in
/// request debug output.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, ConfigError> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeaderName(header_name.to_string()))?;
        let mut key = HeaderValue::from_str(key).map_err(|_| ConfigError::InvalidHeaderValue)?;
        key.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            key,
        })
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}
