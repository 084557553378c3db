pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;

use crate::dirt::snapshot::DecaySnapshot;

pub use client::HttpDirtApi;
pub use error::{CleanError, DirtError};
pub use types::CleanSpotResponse;

/// The dirt service as seen by the engine.
#[async_trait]
pub trait DirtApi: Send + Sync {
    /// `GET /dirt/aquarium/{id}`
    async fn fetch_dirt(&self, aquarium_id: &str) -> Result<DecaySnapshot, DirtError>;

    /// `POST /dirt/aquarium/{id}/clean-spot`
    async fn clean_spot(
        &self,
        aquarium_id: &str,
        spot_id: &str,
    ) -> Result<CleanSpotResponse, DirtError>;

    /// `POST /dirt/aquarium/{id}/initialize`
    async fn initialize(
        &self,
        aquarium_id: &str,
        config: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, DirtError>;
}
