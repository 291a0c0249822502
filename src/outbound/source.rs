//! Candidate address sources for the proxy pool

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use tracing::debug;
use url::Url;

use crate::error::{GatewayError, Result};
use crate::outbound::headers::random_user_agent;

/// Supplies raw candidate addresses for the pool on demand
///
/// A failing source is non-fatal to a running pool: the refresh simply keeps
/// the endpoints it already has.
#[async_trait]
pub trait EndpointSource: Send + Sync {
    /// Fetch the current list of candidate addresses
    async fn fetch_candidate_addresses(&self) -> Result<Vec<String>>;
}

/// Fetches addresses from an HTTP endpoint returning one address per line
pub struct HttpAddressSource {
    url: Url,
    client: reqwest::Client,
}

impl HttpAddressSource {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EndpointSource for HttpAddressSource {
    async fn fetch_candidate_addresses(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url.clone())
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT, "text/plain")
            .send()
            .await
            .map_err(|e| GatewayError::EndpointSource(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::EndpointSource(format!(
                "address list request failed: {}",
                response.status()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::EndpointSource(e.to_string()))?;

        let addresses: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        debug!("Fetched {} candidate addresses", addresses.len());
        Ok(addresses)
    }
}
