//! Deterministic answers for questions the model must not guess at.
//!
//! Today that is the product count. Sources are tried in order (commerce count,
//! commerce listing, sitemap, homepage links) and the first positive count wins.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use parley_core::domain::bot::BotConfig;

use crate::connectors::{CommerceConnector, HomepageLinkFetcher, SitemapFetcher};

const PRODUCT_SEGMENTS: &[&str] =
    &["product", "products", "produkt", "produkter", "shop", "p", "item", "items"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyLanguage {
    English,
    Swedish,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForcedIntent {
    ProductCount(ReplyLanguage),
}

fn english_product_count() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:how\s+many\s+(?:different\s+)?(?:products|items)|number\s+of\s+products)\b",
        )
        .expect("valid english product-count regex")
    })
}

fn swedish_product_count() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)\b(?:hur\s+många\s+(?:olika\s+)?(?:produkter|varor|artiklar)",
            r"|antal(?:et)?\s+produkter)\b",
        ))
        .expect("valid swedish product-count regex")
    })
}

pub fn detect(message: &str) -> Option<ForcedIntent> {
    if swedish_product_count().is_match(message) {
        Some(ForcedIntent::ProductCount(ReplyLanguage::Swedish))
    } else if english_product_count().is_match(message) {
        Some(ForcedIntent::ProductCount(ReplyLanguage::English))
    } else {
        None
    }
}

fn exact_count_reply(count: u64, language: ReplyLanguage) -> String {
    match language {
        ReplyLanguage::English => format!("{count} products."),
        ReplyLanguage::Swedish => format!("{count} produkter."),
    }
}

fn approximate_count_reply(count: u64, language: ReplyLanguage) -> String {
    match language {
        ReplyLanguage::English => format!("Our website lists about {count} products."),
        ReplyLanguage::Swedish => format!("Vår webbplats listar ungefär {count} produkter."),
    }
}

fn apology_reply(language: ReplyLanguage) -> String {
    match language {
        ReplyLanguage::English => "I can't see our full product range right now. Please browse \
                                   the shop on our website, or leave your email and we'll get \
                                   back to you."
            .to_string(),
        ReplyLanguage::Swedish => "Jag kan inte se hela vårt sortiment just nu. Titta gärna i \
                                   butiken på vår webbplats, eller lämna din e-post så \
                                   återkommer vi."
            .to_string(),
    }
}

pub struct ForcedReplyResolver {
    commerce: Arc<dyn CommerceConnector>,
    sitemap: Arc<dyn SitemapFetcher>,
    homepage: Arc<dyn HomepageLinkFetcher>,
}

impl ForcedReplyResolver {
    pub fn new(
        commerce: Arc<dyn CommerceConnector>,
        sitemap: Arc<dyn SitemapFetcher>,
        homepage: Arc<dyn HomepageLinkFetcher>,
    ) -> Self {
        Self { commerce, sitemap, homepage }
    }

    /// `None` when the message is not a fixed intent; otherwise always a reply.
    pub async fn resolve(
        &self,
        bot: &BotConfig,
        message: &str,
        correlation_id: &str,
    ) -> Option<String> {
        let ForcedIntent::ProductCount(language) = detect(message)?;

        if bot.integrations.commerce.is_some() {
            match self.commerce.product_count(bot).await {
                Ok(Some(count)) if count > 0 => return Some(exact_count_reply(count, language)),
                Ok(_) => {}
                Err(error) => log_miss("commerce_count", correlation_id, &error),
            }
            match self.commerce.list_products(bot).await {
                Ok(Some(products)) if !products.is_empty() => {
                    return Some(exact_count_reply(products.len() as u64, language));
                }
                Ok(_) => {}
                Err(error) => log_miss("commerce_listing", correlation_id, &error),
            }
        }

        if let Some(company_url) = bot.company_url.as_deref() {
            let origin = origin_of(company_url);
            let sitemap_url = format!("{}/sitemap.xml", company_url.trim_end_matches('/'));
            match self.sitemap.fetch(&sitemap_url).await {
                Ok(urls) => {
                    let count = count_product_links(&urls, origin.as_deref());
                    if count > 0 {
                        return Some(approximate_count_reply(count, language));
                    }
                }
                Err(error) => log_miss("sitemap", correlation_id, &error),
            }
            match self.homepage.fetch(company_url).await {
                Ok(links) => {
                    let count = count_product_links(&links, origin.as_deref());
                    if count > 0 {
                        return Some(approximate_count_reply(count, language));
                    }
                }
                Err(error) => log_miss("homepage", correlation_id, &error),
            }
        }

        Some(apology_reply(language))
    }
}

fn log_miss(source: &'static str, correlation_id: &str, error: &anyhow::Error) {
    debug!(
        event_name = "forced_reply.source_failed",
        correlation_id = %correlation_id,
        source,
        error = %error,
        "product count source failed, trying next"
    );
}

/// `scheme://host[:port]` of an absolute URL, lowercased.
pub fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let host = rest.split(['/', '?', '#']).next().filter(|host| !host.is_empty())?;
    Some(format!("{}://{}", scheme.to_ascii_lowercase(), host.to_ascii_lowercase()))
}

pub fn is_product_path(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
    segments.iter().enumerate().any(|(index, segment)| {
        index + 1 < segments.len()
            && PRODUCT_SEGMENTS.contains(&segment.to_ascii_lowercase().as_str())
    })
}

/// Distinct same-origin product links. Relative links belong to `origin`.
pub fn count_product_links(links: &[String], origin: Option<&str>) -> u64 {
    let mut distinct = BTreeSet::new();
    for link in links {
        let link = link.trim();
        let path = match origin_of(link) {
            Some(link_origin) => {
                if origin.is_some_and(|origin| origin != link_origin) {
                    continue;
                }
                let (_, rest) = link.split_once("://").unwrap_or(("", link));
                rest.find('/').map(|index| &rest[index..]).unwrap_or("/")
            }
            None if link.starts_with('/') && !link.starts_with("//") => link,
            None => continue,
        };
        if is_product_path(path) {
            let path = path.split(['?', '#']).next().unwrap_or_default();
            distinct.insert(path.trim_end_matches('/').to_string());
        }
    }
    distinct.len() as u64
}
