use scraper::{Html, Selector};
use url::Url;

use estatecrawler_core::PageFeatures;

use crate::numeric::parse_price;

/// Primary/secondary/heuristic selector cascade for one structured field.
/// Selectors are tried in order; the first that yields non-empty text wins.
#[derive(Debug, Clone, Default)]
pub struct FieldSelectors {
    pub address: Vec<String>,
    pub price: Vec<String>,
    pub rooms: Vec<String>,
    pub bathrooms: Vec<String>,
    pub total_area: Vec<String>,
    pub usable_area: Vec<String>,
    pub description: Vec<String>,
    pub features: Vec<String>,
    pub property_kind: Vec<String>,
}

impl FieldSelectors {
    /// A generic cascade that works across typical real-estate listing
    /// markup: microdata/schema.org hints first, then common class names.
    pub fn generic() -> Self {
        Self {
            address: vec![
                "[itemprop='address']".into(),
                ".property-address".into(),
                ".listing-address".into(),
                "address".into(),
            ],
            price: vec![
                "[itemprop='price']".into(),
                ".property-price".into(),
                ".listing-price".into(),
                ".price".into(),
            ],
            rooms: vec![".rooms".into(), ".bedrooms".into(), "[data-rooms]".into()],
            bathrooms: vec![".bathrooms".into(), "[data-bathrooms]".into()],
            total_area: vec![".total-area".into(), ".area-total".into()],
            usable_area: vec![".usable-area".into(), ".area-usable".into()],
            description: vec![
                "[itemprop='description']".into(),
                ".property-description".into(),
                ".listing-description".into(),
                "#description".into(),
            ],
            features: vec![
                ".amenities li".into(),
                ".features li".into(),
                ".property-features li".into(),
            ],
            property_kind: vec![".property-type".into(), "[itemprop='category']".into()],
        }
    }
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn first_text(document: &Html, selectors: &[String]) -> Option<String> {
    for sel in selectors {
        if let Some(parsed) = selector(sel) {
            if let Some(el) = document.select(&parsed).next() {
                let text = el.text().collect::<String>().trim().to_string();
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }
    None
}

fn all_text(document: &Html, selectors: &[String]) -> Vec<String> {
    for sel in selectors {
        if let Some(parsed) = selector(sel) {
            let texts: Vec<String> = document
                .select(&parsed)
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            if !texts.is_empty() {
                return texts;
            }
        }
    }
    Vec::new()
}

/// Extracted candidate text for one structured field, via the cascade.
pub fn extract_field(document: &Html, selectors: &[String]) -> Option<String> {
    first_text(document, selectors)
}

pub fn extract_field_list(document: &Html, selectors: &[String]) -> Vec<String> {
    all_text(document, selectors)
}

/// Builds `PageFeatures` from raw HTML: DOM-derived facts the Classifier and
/// the Extractor both need, computed once per fetch.
pub fn extract_features(
    html_str: &str,
    base_url: &Url,
    room_tokens: &[String],
    bathroom_tokens: &[String],
    area_tokens: &[String],
) -> PageFeatures {
    let document = Html::parse_document(html_str);

    let title = selector("title")
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string());

    let body_text = selector("body")
        .and_then(|s| document.select(&s).next())
        .map(|el| {
            el.text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let lower_body = body_text.to_lowercase();

    let currency_markers = ["r$", "$", "€", "£", "us$"];
    let currency_marker_count = currency_markers
        .iter()
        .map(|m| lower_body.matches(m).count())
        .sum();

    let has_rooms_token = room_tokens
        .iter()
        .any(|t| lower_body.contains(&t.to_lowercase()));
    let has_bathrooms_token = bathroom_tokens
        .iter()
        .any(|t| lower_body.contains(&t.to_lowercase()));
    let has_area_token = area_tokens
        .iter()
        .any(|t| lower_body.contains(&t.to_lowercase()));

    let has_pagination = selector(".pagination, .pager, [rel='next']")
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false);
    let has_filters = selector(".filters, .search-filters, form.filter")
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false);

    let link_count = selector("a[href]")
        .map(|s| document.select(&s).count())
        .unwrap_or(0);
    let image_count = selector("img[src]")
        .map(|s| document.select(&s).count())
        .unwrap_or(0);

    let mut outbound_links = Vec::new();
    if let Some(sel) = selector("a[href]") {
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                if let Ok(joined) = base_url.join(href) {
                    outbound_links.push(joined.to_string());
                }
            }
        }
    }

    let price_candidates = extract_field_list(
        &document,
        &[
            "[itemprop='price']".into(),
            ".price".into(),
            ".property-price".into(),
            ".listing-price".into(),
        ],
    );
    let mut prices = Vec::new();
    let mut price_texts = Vec::new();
    for candidate in &price_candidates {
        if let Some((value, raw)) = parse_price(candidate) {
            prices.push(value);
            price_texts.push(raw);
        }
    }

    let addresses = extract_field_list(
        &document,
        &[
            "[itemprop='address']".into(),
            ".property-address".into(),
            ".listing-address".into(),
            "address".into(),
        ],
    );

    let description_blocks = extract_field_list(
        &document,
        &[
            "[itemprop='description']".into(),
            ".property-description".into(),
            ".listing-description".into(),
        ],
    );

    PageFeatures {
        title,
        currency_marker_count,
        has_rooms_token,
        has_bathrooms_token,
        has_area_token,
        has_pagination,
        has_filters,
        link_count,
        image_count,
        visible_text_len: body_text.chars().count(),
        prices,
        price_texts,
        addresses,
        description_blocks,
        outbound_links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html lang="pt-BR"><head><title>Apartamento 3 quartos</title></head>
        <body>
            <div class="property-address">Rua das Flores, 123 - Centro</div>
            <div class="property-price">R$ 450.000</div>
            <div class="property-description">Amplo apartamento com 3 quartos e 2 banheiros, 80 m² úteis.</div>
            <a href="/imoveis/outro">outro</a>
            <a href="/imoveis/outro2">outro2</a>
        </body></html>
    "#;

    #[test]
    fn extracts_features_from_sample_page() {
        let url = Url::parse("https://example.com/imovel/1").unwrap();
        let features = extract_features(
            SAMPLE,
            &url,
            &["quarto".to_string()],
            &["banheiro".to_string()],
            &["m²".to_string()],
        );
        assert!(features.has_rooms_token);
        assert!(features.has_bathrooms_token);
        assert!(features.has_area_token);
        assert_eq!(features.prices.len(), 1);
        assert_eq!(features.link_count, 2);
    }

    #[test]
    fn field_cascade_finds_address() {
        let document = Html::parse_document(SAMPLE);
        let selectors = FieldSelectors::generic();
        let address = extract_field(&document, &selectors.address);
        assert_eq!(address.as_deref(), Some("Rua das Flores, 123 - Centro"));
    }
}
