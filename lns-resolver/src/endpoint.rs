use std::time::Duration;

// ---

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

// ---

use super::ResolverError;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Base URL, access code and pooled HTTP client shared by the resolver and
/// the device connector.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct Endpoint {
    // ---
    /// Normalised without a trailing slash.
    base_url: String,

    auth_code: Option<String>,

    client: reqwest::Client,
}

// ---

impl Endpoint {
    // ---
    /// `timeout` bounds every request end to end.  Retrying is left to the
    /// caller's caller: the network server treats each call as one attempt.
    pub fn new(
        base_url: impl Into<String>,
        auth_code: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ResolverError> {
        // ---
        let base_url = base_url.into().trim_end_matches('/').to_owned();

        let parsed = reqwest::Url::parse(&base_url)
            .map_err(|_| ResolverError::InvalidEndpoint(base_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolverError::InvalidEndpoint(base_url));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url,
            auth_code: auth_code.filter(|c| !c.is_empty()),
            client,
        })
    }

    // ---

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route.trim_start_matches('/'))
    }

    // ---

    /// Start a request on `route`, attaching the access code if configured.
    pub(crate) fn request(&self, method: Method, route: &str) -> RequestBuilder {
        // ---
        let builder = self.client.request(method, self.url(route));
        match &self.auth_code {
            Some(code) => builder.query(&[("code", code)]),
            None => builder,
        }
    }

    // ---

    /// Send and map any non-2xx status to [`ResolverError::Status`].
    ///
    /// `allow` lists extra statuses the caller handles itself (e.g. `404`
    /// for an empty directory search).
    pub(crate) async fn send(
        &self,
        route: &str,
        builder: RequestBuilder,
        allow: &[StatusCode],
    ) -> Result<Response, ResolverError> {
        // ---
        let resp = builder.send().await?;
        let status = resp.status();

        if status.is_success() || allow.contains(&status) {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        tracing::debug!(route, status = status.as_u16(), "resolver call rejected");
        Err(ResolverError::Status {
            route: route.to_owned(),
            status: status.as_u16(),
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read the body and decode it as JSON, attributing failures to `route`.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    route: &str,
    resp: Response,
) -> Result<T, ResolverError> {
    // ---
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ResolverError::Decode {
        route: route.to_owned(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
