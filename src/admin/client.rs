//! HTTP client for the engine's admin API.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use url::Url;

use crate::admin::determine_api_address;
use crate::config::Config;
use crate::error::{Error, Result};

pub struct AdminClient {
    client: Client,
    address: SocketAddr,
    base: Url,
}

impl AdminClient {
    pub fn new(address: SocketAddr, timeout: Duration) -> Result<Self> {
        let base = Url::parse(&format!("http://{address}/"))
            .map_err(|e| Error::AdminAddress(format!("{address}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|source| Error::AdminRequest { path: "/", source })?;

        Ok(Self { client, address, base })
    }

    /// Client for the admin address and timeout named by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let address = determine_api_address(config)?;
        Self::new(address, Duration::from_secs(config.admin.timeout_secs))
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// `POST /stop`.
    pub async fn stop(&self) -> Result<()> {
        let request = self.client.post(self.url("stop"));
        self.send("/stop", request).await.map(drop)
    }

    /// `POST /load`, forcing a reload even when the document is unchanged.
    pub async fn load(&self, document: Vec<u8>) -> Result<String> {
        let request = self
            .client
            .post(self.url("load"))
            .header(CACHE_CONTROL, "must-revalidate")
            .header(CONTENT_TYPE, "application/json")
            .body(document);
        self.send("/load", request).await
    }

    /// `GET /config`.
    pub async fn config(&self) -> Result<String> {
        let request = self.client.get(self.url("config"));
        self.send("/config", request).await
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    async fn send(&self, path: &'static str, request: RequestBuilder) -> Result<String> {
        let response = request.send().await.map_err(|source| {
            if source.is_connect() {
                Error::NotReachable { address: self.address }
            } else {
                Error::AdminRequest { path, source }
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| Error::AdminRequest { path, source })?;

        if !status.is_success() {
            return Err(Error::AdminStatus { path, status, body });
        }
        tracing::debug!(path, status = %status, "Admin API responded");
        Ok(body)
    }
}
