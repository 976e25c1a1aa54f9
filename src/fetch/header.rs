use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};

/// An [`HttpClient`] wrapper that sets a fixed header on every request.
pub struct WithHeader<C> {
    pub inner: C,
    name: HeaderName,
    value: HeaderValue,
}

impl<C> WithHeader<C> {
    pub fn new(inner: C, name: HeaderName, value: HeaderValue) -> Self {
        Self { inner, name, value }
    }

    /// Identifies the application, as required by the Nominatim usage policy.
    pub fn user_agent(inner: C, agent: &'static str) -> Self {
        Self::new(inner, USER_AGENT, HeaderValue::from_static(agent))
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for WithHeader<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut().insert(self.name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}
