use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::dirt::snapshot::DecaySnapshot;

use super::error::DirtError;
use super::types::{CleanSpotRequest, CleanSpotResponse, DirtData, Envelope, InitializeRequest};
use super::DirtApi;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// `reqwest` implementation of the dirt service contract. Retries and
/// backoff are left to the caller's schedule.
#[derive(Clone)]
pub struct HttpDirtApi {
    client: Client,
    base_url: String,
}

impl HttpDirtApi {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("aquadirt/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn aquarium_url(&self, aquarium_id: &str, suffix: &str) -> String {
        format!("{}/dirt/aquarium/{}{}", self.base_url, aquarium_id, suffix)
    }
}

#[async_trait]
impl DirtApi for HttpDirtApi {
    async fn fetch_dirt(&self, aquarium_id: &str) -> Result<DecaySnapshot, DirtError> {
        let url = self.aquarium_url(aquarium_id, "");
        log_debug!("GET {url}");
        let response = self.client.get(&url).send().await?;
        let data: DirtData = parse_envelope(response).await?;
        DecaySnapshot::try_from(data)
    }

    async fn clean_spot(
        &self,
        aquarium_id: &str,
        spot_id: &str,
    ) -> Result<CleanSpotResponse, DirtError> {
        let url = self.aquarium_url(aquarium_id, "/clean-spot");
        log_debug!("POST {url} spot={spot_id}");
        let response = self
            .client
            .post(&url)
            .json(&CleanSpotRequest { spot_id })
            .send()
            .await?;
        let data: CleanSpotResponse = parse_envelope(response).await?;
        data.validated()
    }

    async fn initialize(
        &self,
        aquarium_id: &str,
        config: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, DirtError> {
        let url = self.aquarium_url(aquarium_id, "/initialize");
        log_debug!("POST {url}");
        let response = self
            .client
            .post(&url)
            .json(&InitializeRequest { config })
            .send()
            .await?;
        parse_envelope(response).await
    }
}

async fn parse_envelope<T>(response: Response) -> Result<T, DirtError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unavailable>".to_string());
        return Err(DirtError::Network {
            status: Some(status.as_u16()),
            message: body,
        });
    }

    let bytes = response.bytes().await?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
    envelope.into_data()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_a_trimmed_base() {
        let api = HttpDirtApi::with_client(Client::new(), "http://localhost:3000/api/");
        assert_eq!(api.base_url(), "http://localhost:3000/api");
        assert_eq!(
            api.aquarium_url("42", "/clean-spot"),
            "http://localhost:3000/api/dirt/aquarium/42/clean-spot"
        );
        assert_eq!(api.aquarium_url("42", ""), "http://localhost:3000/api/dirt/aquarium/42");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        // Port 9 (discard) on localhost is not expected to speak HTTP.
        let api = HttpDirtApi::new("http://127.0.0.1:9", Duration::from_millis(500))
            .expect("client builds");
        let err = api.fetch_dirt("1").await.unwrap_err();
        assert_eq!(err.kind(), "network");
    }
}
