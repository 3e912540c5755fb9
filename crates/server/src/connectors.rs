//! reqwest-backed connectors. Endpoints and credentials come from the bot's
//! integration references; the bearer token is read from the environment
//! variable named by `credential_ref`.

use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

use parley_agent::connectors::{
    CommerceConnector, CrmConnector, HomepageLinkFetcher, Product, SitemapFetcher,
    TicketingConnector, WebhookConnector,
};
use parley_core::domain::bot::{BotConfig, IntegrationRef};

#[derive(Clone)]
pub struct HttpConnectors {
    client: Client,
}

impl HttpConnectors {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn authorized(&self, request: RequestBuilder, integration: &IntegrationRef) -> RequestBuilder {
        match bearer_token(integration) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request.send().await.with_context(|| format!("{what} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{what} returned {status}"));
        }
        Ok(response)
    }
}

pub fn bearer_token(integration: &IntegrationRef) -> Option<String> {
    let variable = integration.credential_ref.as_deref()?.trim();
    if variable.is_empty() {
        return None;
    }
    std::env::var(variable).ok().filter(|token| !token.trim().is_empty())
}

fn endpoint(integration: &IntegrationRef, path: &str) -> String {
    format!("{}{path}", integration.endpoint.trim_end_matches('/'))
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

#[async_trait]
impl CommerceConnector for HttpConnectors {
    async fn product_count(&self, bot: &BotConfig) -> Result<Option<u64>> {
        let Some(integration) = bot.integrations.commerce.as_ref() else {
            return Ok(None);
        };
        let url = endpoint(integration, "/products/count");
        let request = self.authorized(self.client.get(url), integration);
        let response = self.send(request, "commerce product count").await?;
        let body: CountResponse = response.json().await.context("invalid product count body")?;
        Ok(Some(body.count))
    }

    async fn list_products(&self, bot: &BotConfig) -> Result<Option<Vec<Product>>> {
        let Some(integration) = bot.integrations.commerce.as_ref() else {
            return Ok(None);
        };
        let url = endpoint(integration, "/products");
        let request = self.authorized(self.client.get(url), integration);
        let response = self.send(request, "commerce product listing").await?;
        let body: Vec<Value> = response.json().await.context("invalid product listing body")?;
        Ok(Some(body.iter().map(product_from_json).collect()))
    }
}

fn product_from_json(value: &Value) -> Product {
    let name = value
        .get("name")
        .or_else(|| value.get("title"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Product {
        name,
        url: value.get("url").and_then(Value::as_str).map(str::to_string),
        price: value.get("price").and_then(Value::as_f64),
    }
}

#[async_trait]
impl TicketingConnector for HttpConnectors {
    async fn create(&self, bot: &BotConfig, subject: &str, description: &str) -> Result<()> {
        let integration = bot
            .integrations
            .ticketing
            .as_ref()
            .ok_or_else(|| anyhow!("bot `{}` has no ticketing integration", bot.id))?;
        let request = self.client.post(&integration.endpoint).json(&json!({
            "subject": subject,
            "description": description,
        }));
        self.send(self.authorized(request, integration), "ticket creation").await?;
        Ok(())
    }
}

#[async_trait]
impl CrmConnector for HttpConnectors {
    async fn upsert_contact(&self, bot: &BotConfig, email: &str) -> Result<()> {
        let integration = bot
            .integrations
            .crm
            .as_ref()
            .ok_or_else(|| anyhow!("bot `{}` has no crm integration", bot.id))?;
        let request = self.client.post(&integration.endpoint).json(&json!({ "email": email }));
        self.send(self.authorized(request, integration), "crm contact upsert").await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookConnector for HttpConnectors {
    async fn post(&self, url: &str, payload: &Value) -> Result<()> {
        self.send(self.client.post(url).json(payload), "webhook").await?;
        Ok(())
    }
}

fn loc_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<loc>\s*(.*?)\s*</loc>").expect("valid loc regex"))
}

fn href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"'#]+)[^"']*["']"#).expect("valid href regex")
    })
}

pub fn extract_sitemap_urls(xml: &str) -> Vec<String> {
    loc_pattern()
        .captures_iter(xml)
        .filter_map(|captures| captures.get(1))
        .map(|url| url.as_str().replace("&amp;", "&"))
        .filter(|url| !url.is_empty())
        .collect()
}

pub fn extract_links(html: &str) -> Vec<String> {
    href_pattern()
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .map(|href| href.as_str().trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

/// Fetches public pages of a bot's website for product-count heuristics.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response =
            self.client.get(url).send().await.with_context(|| format!("fetching {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{url} returned {status}"));
        }
        response.text().await.with_context(|| format!("reading {url} failed"))
    }
}

#[async_trait]
impl SitemapFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<String>> {
        Ok(extract_sitemap_urls(&self.fetch_text(url).await?))
    }
}

#[async_trait]
impl HomepageLinkFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<String>> {
        Ok(extract_links(&self.fetch_text(url).await?))
    }
}

#[cfg(test)]
mod tests {
    use parley_core::domain::bot::IntegrationRef;

    use super::{bearer_token, extract_links, extract_sitemap_urls};

    #[test]
    fn sitemap_locations_are_extracted_and_unescaped() {
        let xml = r#"<?xml version="1.0"?>
            <urlset>
              <url><loc>https://shop.example.com/products/a</loc></url>
              <url><LOC>
                https://shop.example.com/products/b?color=red&amp;size=m
              </LOC></url>
            </urlset>"#;

        assert_eq!(
            extract_sitemap_urls(xml),
            vec![
                "https://shop.example.com/products/a".to_string(),
                "https://shop.example.com/products/b?color=red&size=m".to_string(),
            ]
        );
    }

    #[test]
    fn anchor_hrefs_are_extracted_without_fragments() {
        let html = r##"<nav><a class="x" href="/shop/lamp">Lamp</a>
            <a href='https://shop.example.com/p/chair#reviews'>Chair</a>
            <a href="#top">Top</a><link href="/style.css"></nav>"##;

        assert_eq!(
            extract_links(html),
            vec!["/shop/lamp".to_string(), "https://shop.example.com/p/chair".to_string()]
        );
    }

    #[test]
    fn bearer_token_requires_a_named_non_empty_variable() {
        let integration = IntegrationRef {
            endpoint: "https://desk.example.com".to_string(),
            credential_ref: Some("PARLEY_TEST_TOKEN_THAT_IS_NEVER_SET".to_string()),
        };
        assert!(bearer_token(&integration).is_none());

        let anonymous = IntegrationRef { credential_ref: None, ..integration };
        assert!(bearer_token(&anonymous).is_none());
    }
}
