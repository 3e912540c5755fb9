//! Outbound integrations a bot can be wired to.
//!
//! Every method receives the bot so implementations can resolve the endpoint and
//! credential from `BotConfig::integrations`. Errors are reported, never retried.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::domain::bot::BotConfig;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

#[async_trait]
pub trait CommerceConnector: Send + Sync {
    /// `Ok(None)` when the bot has no commerce integration.
    async fn product_count(&self, bot: &BotConfig) -> Result<Option<u64>>;
    async fn list_products(&self, bot: &BotConfig) -> Result<Option<Vec<Product>>>;
}

/// Returns the `<loc>` URLs listed by a sitemap.
#[async_trait]
pub trait SitemapFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<String>>;
}

/// Returns the raw `href` targets found on a page, relative or absolute.
#[async_trait]
pub trait HomepageLinkFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait TicketingConnector: Send + Sync {
    async fn create(&self, bot: &BotConfig, subject: &str, description: &str) -> Result<()>;
}

#[async_trait]
pub trait CrmConnector: Send + Sync {
    async fn upsert_contact(&self, bot: &BotConfig, email: &str) -> Result<()>;
}

#[async_trait]
pub trait WebhookConnector: Send + Sync {
    async fn post(&self, url: &str, payload: &Value) -> Result<()>;
}
