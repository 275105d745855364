use async_trait::async_trait;
use reqwest::{Method, StatusCode};

// ---

use lns_domain::{
    // ---
    DevAddr,
    Eui64,
    NetworkServerService,
    PreferredGatewayResult,
    Result,
    SearchDevicesResult,
    UplinkClaim,
};

// ---

use super::endpoint::{decode_json, Endpoint};
use super::ResolverError;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

const PREFERRED_GATEWAY: &str = "PreferredGateway";
const NEXT_FCNT_DOWN: &str = "NextFCntDown";
const GET_DEVICE: &str = "GetDevice";

// ---------------------------------------------------------------------------
// HttpResolver
// ---------------------------------------------------------------------------

/// Production [`NetworkServerService`] backed by the cluster's HTTP facade.
pub struct HttpResolver {
    // ---
    endpoint: Endpoint,
}

// ---

impl HttpResolver {
    // ---
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    // ---

    async fn fetch_next_fcnt_down(
        &self,
        dev_eui: Eui64,
        fcnt_down: u32,
        fcnt_up: u32,
        gateway_id: &str,
    ) -> std::result::Result<u32, ResolverError> {
        // ---
        let builder = self.endpoint.request(Method::GET, NEXT_FCNT_DOWN).query(&[
            ("DevEUI", dev_eui.to_string()),
            ("FCntDown", fcnt_down.to_string()),
            ("FCntUp", fcnt_up.to_string()),
            ("GatewayId", gateway_id.to_owned()),
        ]);

        let resp = self.endpoint.send(NEXT_FCNT_DOWN, builder, &[]).await?;
        let body = resp.text().await?;

        parse_counter(&body).ok_or_else(|| ResolverError::Decode {
            route: NEXT_FCNT_DOWN.into(),
            reason: format!("expected an integer, got `{body}`"),
        })
    }

    // ---

    async fn fetch_preferred_gateway(
        &self,
        claim: &UplinkClaim,
    ) -> std::result::Result<PreferredGatewayResult, ResolverError> {
        // ---
        let builder = self
            .endpoint
            .request(Method::POST, PREFERRED_GATEWAY)
            .json(claim);

        let resp = self.endpoint.send(PREFERRED_GATEWAY, builder, &[]).await?;
        decode_json(PREFERRED_GATEWAY, resp).await
    }

    // ---

    async fn fetch_devices(
        &self,
        dev_addr: DevAddr,
    ) -> std::result::Result<SearchDevicesResult, ResolverError> {
        // ---
        let builder = self
            .endpoint
            .request(Method::GET, GET_DEVICE)
            .query(&[("DevAddr", dev_addr.to_string())]);

        let resp = self
            .endpoint
            .send(GET_DEVICE, builder, &[StatusCode::NOT_FOUND])
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(SearchDevicesResult::new(None));
        }
        decode_json(GET_DEVICE, resp).await
    }
}

// ---

#[async_trait]
impl NetworkServerService for HttpResolver {
    // ---
    async fn next_fcnt_down(
        &self,
        dev_eui: Eui64,
        fcnt_down: u32,
        fcnt_up: u32,
        gateway_id: &str,
    ) -> Result<u32> {
        // ---
        let next = self
            .fetch_next_fcnt_down(dev_eui, fcnt_down, fcnt_up, gateway_id)
            .await?;
        tracing::debug!(%dev_eui, fcnt_down = next, "next downlink counter");
        Ok(next)
    }

    // ---

    async fn resolve_preferred_gateway(&self, claim: &UplinkClaim) -> Result<PreferredGatewayResult> {
        Ok(self.fetch_preferred_gateway(claim).await?)
    }

    // ---

    async fn search_devices(&self, dev_addr: DevAddr) -> Result<SearchDevicesResult> {
        // ---
        let result = self.fetch_devices(dev_addr).await?;
        tracing::debug!(%dev_addr, found = result.len(), "directory search");
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The facade answers `NextFCntDown` with a bare integer, sometimes quoted.
fn parse_counter(body: &str) -> Option<u32> {
    body.trim().trim_matches('"').parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
