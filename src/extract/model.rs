//! Language-model based extraction
//!
//! The page is reduced to readable text (scripts, styles, navigation,
//! footers and ad containers removed), truncated, embedded in a fixed prompt
//! and sent to an `ExtractionModel`. The model must answer with a JSON object;
//! anything else is an extraction error, never a "not a product" verdict.

use crate::extract::{parse_price, Extraction, ExtractionError, ProductRecord};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Node};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Capability of an external language model
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Sends a prompt and returns the raw completion text
    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError>;
}

const PROMPT_TEMPLATE: &str = r#"You are extracting product data from an e-commerce web page.

Page URL: {url}

Page content:
---
{content}
---

Decide whether this page describes exactly one product that can be bought.
Answer with a single JSON object and nothing else:
{
  "is_product_page": true or false,
  "id": "stable product identifier if the page shows one, else null",
  "name": "product name",
  "price": current price as a number or null,
  "original_price": price before discount as a number or null,
  "currency": "ISO 4217 code or null",
  "category": "category or null",
  "brand": "brand or null",
  "description": "short description or null",
  "sku": "SKU or null",
  "images": ["absolute image URLs"],
  "tags": ["keywords"],
  "specs": {"attribute": "value"}
}
If the page is not a product page, answer {"is_product_page": false}."#;

/// Tags whose whole subtree is dropped before prompting
const NOISE_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "iframe", "svg", "template",
];

/// Class or id tokens that mark advertising containers
const AD_TOKENS: &[&str] = &["ad", "ads", "advert", "advertisement", "sponsored", "banner-ad"];

/// Tags after which a line break is emitted
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "br",
    "table", "ul", "ol", "dl", "dt", "dd", "main", "header",
];

/// Model strategy bound to one run
pub struct ModelStrategy {
    model: Arc<dyn ExtractionModel>,
    max_content_chars: usize,
}

impl ModelStrategy {
    pub fn new(model: Arc<dyn ExtractionModel>, max_content_chars: usize) -> Self {
        Self {
            model,
            max_content_chars,
        }
    }

    pub async fn extract(&self, html: &str, url: &Url) -> Result<Extraction, ExtractionError> {
        let prompt = self.build_prompt(html, url);
        let response = self.model.complete(&prompt).await?;
        parse_model_response(&response, url)
    }

    /// Cleans, truncates and embeds the page into the prompt template
    pub fn build_prompt(&self, html: &str, url: &Url) -> String {
        let cleaned = clean_html(html);
        let content = truncate_chars(&cleaned, self.max_content_chars);
        PROMPT_TEMPLATE
            .replace("{url}", url.as_str())
            .replace("{content}", content)
    }
}

/// Reduces an HTML document to its readable text
///
/// Images are kept as `[image: src]` markers so the model can report them.
pub fn clean_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    collect_text(document.root_element(), &mut out);

    out.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_noise(&child) {
                    continue;
                }

                let name = child.value().name();
                if name == "img" {
                    if let Some(src) = child.value().attr("src") {
                        out.push_str(&format!("[image: {}] ", src));
                    }
                }

                collect_text(child, out);

                if BLOCK_TAGS.contains(&name) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn is_noise(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    if NOISE_TAGS.contains(&value.name()) {
        return true;
    }

    let is_ad_token = |token: &str| {
        let token = token.to_ascii_lowercase();
        AD_TOKENS.contains(&token.as_str())
            || token.starts_with("ad-")
            || token.starts_with("ads-")
            || token.starts_with("advert")
    };

    value.classes().any(is_ad_token) || value.id().is_some_and(is_ad_token)
}

/// Truncates to at most `max_chars` characters on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Parses a model completion into an extraction verdict
///
/// Code fences and prose around the JSON object are tolerated. A missing
/// `is_product_page` flag is read as `true`; a product without a non-empty
/// `name` is an error.
pub fn parse_model_response(response: &str, url: &Url) -> Result<Extraction, ExtractionError> {
    let object = extract_json_object(response)?;

    let is_product = object
        .get("is_product_page")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !is_product {
        return Ok(Extraction::NotAProduct);
    }

    let name = string_field(&object, "name")
        .ok_or_else(|| ExtractionError::MissingField("name".to_string()))?;

    let product = ProductRecord {
        id: string_field(&object, "id"),
        name,
        price: price_field(&object, "price"),
        original_price: price_field(&object, "original_price"),
        currency: string_field(&object, "currency"),
        category: string_field(&object, "category"),
        brand: string_field(&object, "brand"),
        description: string_field(&object, "description"),
        sku: string_field(&object, "sku"),
        images: list_field(&object, "images")
            .into_iter()
            .filter_map(|src| url.join(&src).ok().map(|u| u.to_string()))
            .collect(),
        tags: list_field(&object, "tags"),
        specs: specs_field(&object),
        source_url: url.to_string(),
        source_site_id: 0,
    };

    Ok(Extraction::Product(product))
}

fn extract_json_object(response: &str) -> Result<Map<String, Value>, ExtractionError> {
    let start = response.find('{');
    let end = response.rfind('}');
    let candidate = match (start, end) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => {
            return Err(ExtractionError::InvalidJson(preview(response)));
        }
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ExtractionError::InvalidJson(preview(response))),
        Err(e) => Err(ExtractionError::InvalidJson(format!(
            "{} in {}",
            e,
            preview(response)
        ))),
    }
}

fn preview(text: &str) -> String {
    let short = truncate_chars(text.trim(), 120);
    if short.len() < text.trim().len() {
        format!("{}...", short)
    } else {
        short.to_string()
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn price_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    match object.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn list_field(object: &Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn specs_field(object: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut specs = BTreeMap::new();
    if let Some(Value::Object(map)) = object.get("specs") {
        for (key, value) in map {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            specs.insert(key.clone(), value);
        }
    }
    specs
}
