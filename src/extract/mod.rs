//! Product extraction strategies
//!
//! This module turns fetched HTML into either a product record or a
//! "not a product page" verdict. Two strategies exist:
//! - `SelectorStrategy`: CSS selectors configured per site
//! - `ModelStrategy`: an external language model prompted with cleaned page text
//!
//! The strategy is chosen once per run from the site's `extraction_config`
//! (present means selectors, absent means model) and never changes mid-run.

mod model;
mod openai;
mod selector;

pub use model::{clean_html, parse_model_response, ExtractionModel, ModelStrategy};
pub use openai::OpenAiModel;
pub use selector::{parse_price, SelectorConfig, SelectorStrategy};

use crate::storage::SiteRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Fields every strategy understands
pub const TEXT_FIELDS: &[&str] = &["name", "brand", "category", "description", "sku", "currency"];
pub const PRICE_FIELDS: &[&str] = &["price", "original_price"];
pub const LIST_FIELDS: &[&str] = &["images", "tags", "specs"];

/// Canonical product shape shared by both strategies
///
/// Only `name` is mandatory. `id` may be supplied by the extractor; when it
/// is not, the orchestrator derives one from the site and page identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub specs: BTreeMap<String, String>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub source_site_id: i64,
}

/// Verdict of one extraction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The page describes a product
    Product(ProductRecord),

    /// The page is a recognised non-product page (listing, blog, cart...)
    NotAProduct,
}

impl Extraction {
    pub fn is_product(&self) -> bool {
        matches!(self, Self::Product(_))
    }
}

/// Errors raised while extracting a single page
///
/// These are recorded on the page and never abort a crawl run.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Model response is not a JSON object: {0}")]
    InvalidJson(String),

    #[error("Model response is missing mandatory field '{0}'")]
    MissingField(String),

    #[error("Extraction model call failed: {0}")]
    Model(String),

    #[error("Invalid selector for '{field}': {message}")]
    InvalidSelector { field: String, message: String },

    #[error("Unknown extraction field '{0}'")]
    UnknownField(String),
}

/// The extraction strategy bound to one crawl run
pub enum ExtractionStrategy {
    Selector(SelectorStrategy),
    Model(ModelStrategy),
}

impl ExtractionStrategy {
    /// Selects and prepares the strategy for a site
    ///
    /// Selectors are compiled here, once, so a misconfigured site fails before
    /// its first fetch rather than on every page.
    ///
    /// # Arguments
    ///
    /// * `site` - The site being crawled
    /// * `model` - The extraction model, required only for sites without selectors
    /// * `max_content_chars` - Truncation limit for model prompts
    pub fn for_site(
        site: &SiteRecord,
        model: Option<Arc<dyn ExtractionModel>>,
        max_content_chars: usize,
    ) -> Result<Self, ExtractionError> {
        match (&site.extraction_config, model) {
            (Some(config), _) => Ok(Self::Selector(SelectorStrategy::new(config)?)),
            (None, Some(model)) => Ok(Self::Model(ModelStrategy::new(model, max_content_chars))),
            (None, None) => Err(ExtractionError::Model(format!(
                "site {} has no selector config and no extraction model is configured",
                site.id
            ))),
        }
    }

    /// Extracts a product from the page, or reports that it is not a product page
    pub async fn extract(&self, html: &str, url: &Url) -> Result<Extraction, ExtractionError> {
        match self {
            Self::Selector(strategy) => strategy.extract(html, url),
            Self::Model(strategy) => strategy.extract(html, url).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Selector(_) => "selector",
            Self::Model(_) => "model",
        }
    }
}
