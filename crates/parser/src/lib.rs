pub mod html;
pub mod numeric;

use std::collections::HashMap;

use scraper::Html;
use url::Url;

use estatecrawler_core::{content_fingerprint, CrawlError, Property};

use html::{extract_field, extract_field_list, extract_features, FieldSelectors};
use numeric::{normalize_feature_tag, parse_area, parse_count, parse_price};

/// Max bytes to parse. Larger pages are truncated before parsing.
const MAX_PARSE_SIZE: usize = 5 * 1024 * 1024;
const MAX_ADDRESS_LEN: usize = 500;
const MAX_DESCRIPTION_LEN: usize = 2000;
const FINGERPRINT_DESCRIPTION_PREFIX: usize = 200;

/// Structured-field extractor, with per-origin selector overrides falling
/// back to a generic cascade.
pub struct Extractor {
    overrides: HashMap<String, FieldSelectors>,
    default_selectors: FieldSelectors,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            default_selectors: FieldSelectors::generic(),
        }
    }
}

impl Extractor {
    pub fn with_overrides(overrides: HashMap<String, FieldSelectors>) -> Self {
        Self {
            overrides,
            default_selectors: FieldSelectors::generic(),
        }
    }

    fn selectors_for(&self, url: &Url) -> &FieldSelectors {
        url.host_str()
            .and_then(|h| self.overrides.get(h))
            .unwrap_or(&self.default_selectors)
    }

    /// Extracts a `Property` from an advertisement page's HTML. Field-level
    /// failures are recorded in `missing_fields` and don't fail the call;
    /// only the quality gate (no address and no price) does.
    pub fn extract(&self, url: &Url, html_str: &str) -> Result<Property, CrawlError> {
        let truncated = if html_str.len() > MAX_PARSE_SIZE {
            let mut end = MAX_PARSE_SIZE;
            while !html_str.is_char_boundary(end) {
                end -= 1;
            }
            &html_str[..end]
        } else {
            html_str
        };
        let document = Html::parse_document(truncated);
        let selectors = self.selectors_for(url);

        let mut missing_fields = Vec::new();

        let address = extract_field(&document, &selectors.address).map(|a| {
            let trimmed: String = a.chars().take(MAX_ADDRESS_LEN).collect();
            trimmed
        });
        if address.is_none() {
            missing_fields.push("address".to_string());
        }

        let price_text = extract_field(&document, &selectors.price);
        let (price, price_raw) = match price_text.as_deref().and_then(parse_price) {
            Some((value, raw)) => (Some(value), Some(raw)),
            None => {
                missing_fields.push("price".to_string());
                (None, None)
            }
        };

        let rooms = extract_field(&document, &selectors.rooms).and_then(|t| parse_count(&t));
        if rooms.is_none() {
            missing_fields.push("rooms".to_string());
        }
        let bathrooms =
            extract_field(&document, &selectors.bathrooms).and_then(|t| parse_count(&t));
        if bathrooms.is_none() {
            missing_fields.push("bathrooms".to_string());
        }
        let total_area =
            extract_field(&document, &selectors.total_area).and_then(|t| parse_area(&t));
        let usable_area =
            extract_field(&document, &selectors.usable_area).and_then(|t| parse_area(&t));
        if total_area.is_none() && usable_area.is_none() {
            missing_fields.push("area".to_string());
        }

        let property_kind = extract_field(&document, &selectors.property_kind);
        if property_kind.is_none() {
            missing_fields.push("property_kind".to_string());
        }

        let description = extract_field(&document, &selectors.description).map(|d| {
            let trimmed: String = d.chars().take(MAX_DESCRIPTION_LEN).collect();
            trimmed
        });
        if description.is_none() {
            missing_fields.push("description".to_string());
        }

        let mut features: Vec<String> = extract_field_list(&document, &selectors.features)
            .iter()
            .map(|f| normalize_feature_tag(f))
            .filter(|f| !f.is_empty())
            .collect();
        features.sort();
        features.dedup();

        let property = Property {
            address,
            city: None,
            neighborhood: None,
            postal_code: None,
            price,
            price_raw,
            rooms,
            bathrooms,
            total_area,
            usable_area,
            property_kind,
            source_url: url.to_string(),
            description,
            features,
            missing_fields,
        };

        if !property.passes_quality_gate() {
            return Err(CrawlError::QualityGateMiss(format!(
                "neither address nor price extracted for {url}"
            )));
        }

        Ok(property)
    }

    /// Computes the page's content fingerprint (independent of HTML
    /// markup), used by the FingerprintStore to detect unchanged content.
    pub fn fingerprint(&self, url: &Url, html_str: &str) -> String {
        let features = extract_features(html_str, url, &[], &[], &[]);
        content_fingerprint(
            &features.prices,
            &features.addresses,
            &features.description_blocks,
            FINGERPRINT_DESCRIPTION_PREFIX,
        )
    }
}

pub use html::extract_features as extract_page_features;

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html><body>
            <div class="property-address">Rua das Flores, 123 - Centro</div>
            <div class="property-price">R$ 450.000</div>
            <div class="rooms">3 quartos</div>
            <div class="bathrooms">2 banheiros</div>
            <div class="total-area">80 m²</div>
            <div class="property-type">Apartamento</div>
            <div class="property-description">Amplo apartamento reformado, pronto para morar.</div>
            <ul class="amenities"><li>Piscina</li><li>Academia</li></ul>
        </body></html>
    "#;

    #[test]
    fn extracts_full_property_from_sample() {
        let url = Url::parse("https://example.com/imovel/1").unwrap();
        let extractor = Extractor::default();
        let property = extractor.extract(&url, SAMPLE).unwrap();
        assert_eq!(property.address.as_deref(), Some("Rua das Flores, 123 - Centro"));
        assert_eq!(property.price, Some(450_000.0));
        assert_eq!(property.rooms, Some(3));
        assert_eq!(property.bathrooms, Some(2));
        assert!(property.missing_fields.is_empty());
        assert_eq!(property.features, vec!["academia", "piscina"]);
    }

    #[test]
    fn missing_both_address_and_price_fails_quality_gate() {
        let url = Url::parse("https://example.com/about").unwrap();
        let extractor = Extractor::default();
        let result = extractor.extract(&url, "<html><body>nothing here</body></html>");
        assert!(matches!(result, Err(CrawlError::QualityGateMiss(_))));
    }

    #[test]
    fn partial_extraction_records_missing_fields_but_succeeds() {
        let url = Url::parse("https://example.com/imovel/2").unwrap();
        let extractor = Extractor::default();
        let html = r#"<html><body><div class="property-price">R$ 100.000</div></body></html>"#;
        let property = extractor.extract(&url, html).unwrap();
        assert!(property.missing_fields.contains(&"address".to_string()));
        assert_eq!(property.price, Some(100_000.0));
    }

    #[test]
    fn fingerprint_is_stable_for_identical_content() {
        let url = Url::parse("https://example.com/imovel/1").unwrap();
        let extractor = Extractor::default();
        assert_eq!(
            extractor.fingerprint(&url, SAMPLE),
            extractor.fingerprint(&url, SAMPLE)
        );
    }
}
