//! CSS selector based extraction
//!
//! A site's selector config names a `product_page_indicator` and a map from
//! field name to CSS selector:
//!
//! ```toml
//! [site.extraction]
//! product_page_indicator = ".product-detail"
//!
//! [site.extraction.fields]
//! name = "h1.product-title"
//! price = ".price-now"
//! images = ".gallery img"
//! specs = "table.specs tr"
//! ```
//!
//! Text fields are taken verbatim (trimmed), price fields from the first
//! numeric token, and list fields from every matching element.

use crate::extract::{
    Extraction, ExtractionError, ProductRecord, LIST_FIELDS, PRICE_FIELDS, TEXT_FIELDS,
};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use url::Url;

/// Selector configuration stored with a site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Selector that must match for a page to be a product page
    #[serde(default)]
    pub product_page_indicator: Option<String>,

    /// Field name -> CSS selector
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Selector strategy with every selector compiled up front
#[derive(Debug)]
pub struct SelectorStrategy {
    indicator: Option<Selector>,
    fields: BTreeMap<String, Selector>,
}

impl SelectorStrategy {
    /// Compiles a selector config
    ///
    /// Fails on unknown field names and on selectors that do not parse.
    pub fn new(config: &SelectorConfig) -> Result<Self, ExtractionError> {
        let indicator = config
            .product_page_indicator
            .as_deref()
            .map(|css| compile("product_page_indicator", css))
            .transpose()?;

        let mut fields = BTreeMap::new();
        for (field, css) in &config.fields {
            let known = TEXT_FIELDS.contains(&field.as_str())
                || PRICE_FIELDS.contains(&field.as_str())
                || LIST_FIELDS.contains(&field.as_str());
            if !known {
                return Err(ExtractionError::UnknownField(field.clone()));
            }
            fields.insert(field.clone(), compile(field, css)?);
        }

        Ok(Self { indicator, fields })
    }

    /// Extracts a product from a page
    ///
    /// Returns `NotAProduct` when the indicator selector is configured but
    /// absent, or when no non-empty `name` can be found.
    pub fn extract(&self, html: &str, url: &Url) -> Result<Extraction, ExtractionError> {
        let document = Html::parse_document(html);

        if let Some(indicator) = &self.indicator {
            if document.select(indicator).next().is_none() {
                return Ok(Extraction::NotAProduct);
            }
        }

        let name = match self.text("name", &document) {
            Some(name) => name,
            None => return Ok(Extraction::NotAProduct),
        };

        let price_text = self.text("price", &document);
        let currency = self
            .text("currency", &document)
            .or_else(|| price_text.as_deref().and_then(detect_currency));

        let product = ProductRecord {
            id: None,
            name,
            price: price_text.as_deref().and_then(parse_price),
            original_price: self
                .text("original_price", &document)
                .as_deref()
                .and_then(parse_price),
            currency,
            category: self.text("category", &document),
            brand: self.text("brand", &document),
            description: self.text("description", &document),
            sku: self.text("sku", &document),
            images: self.images(&document, url),
            tags: self.texts("tags", &document),
            specs: self.specs(&document),
            source_url: url.to_string(),
            source_site_id: 0,
        };

        Ok(Extraction::Product(product))
    }

    /// First non-empty text of the field's selector
    fn text(&self, field: &str, document: &Html) -> Option<String> {
        let selector = self.fields.get(field)?;
        document
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty())
    }

    /// Every non-empty text of the field's selector
    fn texts(&self, field: &str, document: &Html) -> Vec<String> {
        match self.fields.get(field) {
            Some(selector) => document
                .select(selector)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Absolute image URLs, de-duplicated in document order
    fn images(&self, document: &Html, base: &Url) -> Vec<String> {
        let Some(selector) = self.fields.get("images") else {
            return Vec::new();
        };

        let mut images: Vec<String> = Vec::new();
        for element in document.select(selector) {
            let attrs = element.value();
            let src = attrs
                .attr("src")
                .or_else(|| attrs.attr("data-src"))
                .or_else(|| attrs.attr("href"));

            if let Some(resolved) = src.and_then(|s| base.join(s.trim()).ok()) {
                let resolved = resolved.to_string();
                if !images.contains(&resolved) {
                    images.push(resolved);
                }
            }
        }
        images
    }

    /// Key/value pairs from rows such as `<tr><th>k</th><td>v</td></tr>` or `<li>k: v</li>`
    fn specs(&self, document: &Html) -> BTreeMap<String, String> {
        let mut specs = BTreeMap::new();
        let Some(selector) = self.fields.get("specs") else {
            return specs;
        };

        for row in document.select(selector) {
            let cells: Vec<String> = row
                .children()
                .filter_map(ElementRef::wrap)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect();

            let pair = if cells.len() >= 2 {
                Some((cells[0].clone(), cells[1].clone()))
            } else {
                let text = element_text(row);
                text.split_once(':')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            };

            if let Some((key, value)) = pair {
                let key = key.trim_end_matches(':').trim().to_string();
                if !key.is_empty() {
                    specs.insert(key, value);
                }
            }
        }
        specs
    }
}

fn compile(field: &str, css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::InvalidSelector {
        field: field.to_string(),
        message: format!("{:?}", e),
    })
}

/// Element text with inner whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses the first numeric token of a price string
///
/// Thousands separators (`,`) are dropped; a single `.` is the decimal point.
///
/// # Examples
///
/// ```
/// use harvester::extract::parse_price;
///
/// assert_eq!(parse_price("$1,299.99"), Some(1299.99));
/// assert_eq!(parse_price("Now only 15 EUR (was 20)"), Some(15.0));
/// assert_eq!(parse_price("Call for price"), None);
/// ```
pub fn parse_price(text: &str) -> Option<f64> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid price regex"));

    let token = number.find(text)?;
    token.as_str().replace(',', "").parse().ok()
}

fn detect_currency(price_text: &str) -> Option<String> {
    let code = if price_text.contains('$') {
        "USD"
    } else if price_text.contains('€') {
        "EUR"
    } else if price_text.contains('£') {
        "GBP"
    } else if price_text.contains('¥') {
        "JPY"
    } else {
        return None;
    };
    Some(code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_HTML: &str = r#"
        <html><body>
          <div class="product-detail">
            <h1 class="title">  Blue   Ceramic Mug </h1>
            <span class="price">$1,024.50</span>
            <span class="was">$1,200</span>
            <a class="crumb">Kitchen</a>
            <div class="gallery">
              <img src="/img/mug-1.jpg">
              <img data-src="https://cdn.example.com/mug-2.jpg">
              <img src="/img/mug-1.jpg">
            </div>
            <ul class="tags"><li>mug</li><li>ceramic</li><li> </li></ul>
            <table class="specs">
              <tr><th>Capacity</th><td>350 ml</td></tr>
              <tr><th>Color:</th><td>Blue</td></tr>
            </table>
            <ul class="facts"><li>Dishwasher safe: yes</li></ul>
          </div>
        </body></html>
    "#;

    fn url() -> Url {
        Url::parse("https://shop.example.com/p/mug").unwrap()
    }

    fn config(fields: &[(&str, &str)], indicator: Option<&str>) -> SelectorConfig {
        SelectorConfig {
            product_page_indicator: indicator.map(str::to_string),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn full_config() -> SelectorConfig {
        config(
            &[
                ("name", "h1.title"),
                ("price", ".price"),
                ("original_price", ".was"),
                ("category", ".crumb"),
                ("images", ".gallery img"),
                ("tags", ".tags li"),
                ("specs", "table.specs tr"),
            ],
            Some(".product-detail"),
        )
    }

    #[test]
    fn test_extracts_full_product() {
        let strategy = SelectorStrategy::new(&full_config()).unwrap();
        let Extraction::Product(product) = strategy.extract(PRODUCT_HTML, &url()).unwrap() else {
            panic!("expected a product");
        };

        assert_eq!(product.name, "Blue Ceramic Mug");
        assert_eq!(product.price, Some(1024.5));
        assert_eq!(product.original_price, Some(1200.0));
        assert_eq!(product.currency.as_deref(), Some("USD"));
        assert_eq!(product.category.as_deref(), Some("Kitchen"));
        assert_eq!(
            product.images,
            vec![
                "https://shop.example.com/img/mug-1.jpg".to_string(),
                "https://cdn.example.com/mug-2.jpg".to_string(),
            ]
        );
        assert_eq!(product.tags, vec!["mug".to_string(), "ceramic".to_string()]);
        assert_eq!(product.specs.get("Capacity").map(String::as_str), Some("350 ml"));
        assert_eq!(product.specs.get("Color").map(String::as_str), Some("Blue"));
        assert_eq!(product.source_url, "https://shop.example.com/p/mug");
    }

    #[test]
    fn test_colon_separated_specs() {
        let strategy =
            SelectorStrategy::new(&config(&[("name", "h1"), ("specs", ".facts li")], None)).unwrap();
        let Extraction::Product(product) = strategy.extract(PRODUCT_HTML, &url()).unwrap() else {
            panic!("expected a product");
        };
        assert_eq!(
            product.specs.get("Dishwasher safe").map(String::as_str),
            Some("yes")
        );
    }

    #[test]
    fn test_missing_indicator_is_not_a_product() {
        let strategy = SelectorStrategy::new(&full_config()).unwrap();
        let html = "<html><body><h1 class=\"title\">Our Story</h1></body></html>";
        assert_eq!(
            strategy.extract(html, &url()).unwrap(),
            Extraction::NotAProduct
        );
    }

    #[test]
    fn test_missing_name_is_not_a_product() {
        let strategy =
            SelectorStrategy::new(&config(&[("name", "h1.missing"), ("price", ".price")], None))
                .unwrap();
        assert_eq!(
            strategy.extract(PRODUCT_HTML, &url()).unwrap(),
            Extraction::NotAProduct
        );
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let result = SelectorStrategy::new(&config(&[("name", "h1[")], None));
        assert!(matches!(
            result,
            Err(ExtractionError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = SelectorStrategy::new(&config(&[("colour", ".c")], None));
        assert!(matches!(result, Err(ExtractionError::UnknownField(_))));
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("19.99"), Some(19.99));
        assert_eq!(parse_price("£ 7"), Some(7.0));
        assert_eq!(parse_price("12,345"), Some(12345.0));
        assert_eq!(parse_price(""), None);
    }
}
