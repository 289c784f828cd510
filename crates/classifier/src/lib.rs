use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use estatecrawler_core::config::ClassifierConfig;
use estatecrawler_core::{Classification, PageFeatures, PageKind};
use url::Url;

/// Learned per-origin URL-shape patterns, built by `train()` and swapped in
/// atomically. Never mutated in place — a new snapshot replaces the old one.
#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    origins: HashMap<String, OriginPatterns>,
}

#[derive(Debug, Clone, Default)]
struct OriginPatterns {
    ad_path_tokens: HashSet<String>,
    catalog_path_tokens: HashSet<String>,
}

/// One labeled training example: a URL and the page kind it was confirmed
/// to be (by successful extraction, or by operator feedback).
pub struct LabeledUrl {
    pub url: Url,
    pub kind: PageKind,
}

impl PatternLibrary {
    pub fn train(examples: &[LabeledUrl]) -> Self {
        let mut origins: HashMap<String, OriginPatterns> = HashMap::new();
        for ex in examples {
            let Some(host) = ex.url.host_str() else {
                continue;
            };
            let entry = origins.entry(host.to_string()).or_default();
            for token in path_tokens(&ex.url) {
                match ex.kind {
                    PageKind::Advertisement => {
                        entry.ad_path_tokens.insert(token);
                    }
                    PageKind::Catalog => {
                        entry.catalog_path_tokens.insert(token);
                    }
                    _ => {}
                }
            }
        }
        Self { origins }
    }

    fn score(&self, url: &Url) -> (f64, f64) {
        let Some(host) = url.host_str() else {
            return (0.0, 0.0);
        };
        let Some(patterns) = self.origins.get(host) else {
            return (0.0, 0.0);
        };
        let tokens: Vec<String> = path_tokens(url);
        if tokens.is_empty() {
            return (0.0, 0.0);
        }
        let ad_hits = tokens
            .iter()
            .filter(|t| patterns.ad_path_tokens.contains(*t))
            .count();
        let catalog_hits = tokens
            .iter()
            .filter(|t| patterns.catalog_path_tokens.contains(*t))
            .count();
        (
            ad_hits as f64 / tokens.len() as f64,
            catalog_hits as f64 / tokens.len() as f64,
        )
    }
}

fn path_tokens(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segs| {
            segs.filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect()
        })
        .unwrap_or_default()
}

/// Rule- and learned-pattern page classifier. Combines three signal
/// families — URL shape, content features, learned content patterns — into
/// a single weighted confidence per candidate kind.
pub struct Classifier {
    config: ClassifierConfig,
    patterns: Arc<ArcSwap<PatternLibrary>>,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            patterns: Arc::new(ArcSwap::new(Arc::new(PatternLibrary::default()))),
        }
    }

    pub fn with_patterns(config: ClassifierConfig, patterns: Arc<ArcSwap<PatternLibrary>>) -> Self {
        Self { config, patterns }
    }

    pub fn patterns_handle(&self) -> Arc<ArcSwap<PatternLibrary>> {
        self.patterns.clone()
    }

    /// Swaps in a freshly trained pattern library. No in-place mutation.
    pub fn train(&self, examples: &[LabeledUrl]) {
        self.patterns.store(Arc::new(PatternLibrary::train(examples)));
    }

    fn url_shape_score(&self, url: &Url) -> (f64, f64) {
        let path = url.path();
        let numeric_segment = url
            .path_segments()
            .and_then(|mut segs| segs.next_back())
            .map(|last| last.chars().filter(|c| c.is_ascii_digit()).count() >= 3)
            .unwrap_or(false);

        let ad_markers = ["/imovel/", "/anuncio/", "/listing/", "/property/", "/ad/"];
        let catalog_markers = ["/busca", "/search", "/imoveis", "/listings", "/page/", "/p="];

        let ad_hit = ad_markers.iter().any(|m| path.contains(m)) || numeric_segment;
        let catalog_hit = catalog_markers.iter().any(|m| path.contains(m))
            || url.query_pairs().any(|(k, _)| k == "page");

        (
            if ad_hit { 1.0 } else { 0.0 },
            if catalog_hit { 1.0 } else { 0.0 },
        )
    }

    fn content_score(&self, features: &PageFeatures) -> (f64, f64) {
        let cfg = &self.config;
        let mut ad_signals = 0.0;
        let mut ad_total = 0.0;

        ad_total += 1.0;
        if features.currency_marker_count >= 1 && features.prices.len() <= 3 {
            ad_signals += 1.0;
        }
        ad_total += 1.0;
        if features.has_rooms_token || features.has_bathrooms_token || features.has_area_token {
            ad_signals += 1.0;
        }
        ad_total += 1.0;
        if features.visible_text_len >= cfg.min_visible_text_len {
            ad_signals += 1.0;
        }
        ad_total += 1.0;
        if features.link_count < cfg.catalog_link_threshold {
            ad_signals += 1.0;
        }

        let mut catalog_signals = 0.0;
        let mut catalog_total = 0.0;

        catalog_total += 1.0;
        if features.link_count >= cfg.catalog_link_threshold {
            catalog_signals += 1.0;
        }
        catalog_total += 1.0;
        if features.has_pagination || features.has_filters {
            catalog_signals += 1.0;
        }
        catalog_total += 1.0;
        if features.prices.len() > 3 {
            catalog_signals += 1.0;
        }

        (ad_signals / ad_total, catalog_signals / catalog_total)
    }

    /// Classifies a single page. `url` and `features` must come from the
    /// same fetch.
    pub fn classify(&self, url: &Url, features: &PageFeatures) -> Classification {
        let (url_ad, url_catalog) = self.url_shape_score(url);
        let (content_ad, content_catalog) = self.content_score(features);
        let patterns = self.patterns.load();
        let (learned_ad, learned_catalog) = patterns.score(url);

        let cfg = &self.config;
        let total_weight = cfg.keyword_weight + cfg.structure_weight + cfg.learned_weight;

        let ad_confidence = (url_ad * cfg.keyword_weight
            + content_ad * cfg.structure_weight
            + learned_ad * cfg.learned_weight)
            / total_weight;
        let catalog_confidence = (url_catalog * cfg.keyword_weight
            + content_catalog * cfg.structure_weight
            + learned_catalog * cfg.learned_weight)
            / total_weight;

        if ad_confidence >= cfg.ad_confidence_threshold
            && ad_confidence >= catalog_confidence
        {
            Classification {
                kind: PageKind::Advertisement,
                confidence: ad_confidence,
            }
        } else if catalog_confidence >= cfg.catalog_confidence_threshold {
            Classification {
                kind: PageKind::Catalog,
                confidence: catalog_confidence,
            }
        } else {
            Classification {
                kind: PageKind::Other,
                confidence: 1.0 - ad_confidence.max(catalog_confidence),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> ClassifierConfig {
        ClassifierConfig {
            room_tokens: vec!["quarto".into()],
            bathroom_tokens: vec!["banheiro".into()],
            area_tokens: vec!["m²".into()],
            min_visible_text_len: 200,
            catalog_link_threshold: 15,
            ad_confidence_threshold: 0.6,
            catalog_confidence_threshold: 0.5,
            keyword_weight: 0.4,
            structure_weight: 0.35,
            learned_weight: 0.25,
        }
    }

    #[test]
    fn classifies_ad_shaped_url_as_advertisement() {
        let classifier = Classifier::new(default_config());
        let url = Url::parse("https://example.com/imovel/casa-123456").unwrap();
        let features = PageFeatures {
            currency_marker_count: 1,
            has_rooms_token: true,
            has_bathrooms_token: true,
            has_area_token: true,
            visible_text_len: 800,
            link_count: 5,
            prices: vec![450_000.0],
            ..Default::default()
        };
        let result = classifier.classify(&url, &features);
        assert_eq!(result.kind, PageKind::Advertisement);
    }

    #[test]
    fn classifies_listing_shaped_url_as_catalog() {
        let classifier = Classifier::new(default_config());
        let url = Url::parse("https://example.com/busca?page=2").unwrap();
        let features = PageFeatures {
            link_count: 40,
            has_pagination: true,
            prices: vec![1.0; 20],
            ..Default::default()
        };
        let result = classifier.classify(&url, &features);
        assert_eq!(result.kind, PageKind::Catalog);
    }

    #[test]
    fn sparse_page_classifies_as_other() {
        let classifier = Classifier::new(default_config());
        let url = Url::parse("https://example.com/about-us").unwrap();
        let features = PageFeatures::default();
        let result = classifier.classify(&url, &features);
        assert_eq!(result.kind, PageKind::Other);
    }

    #[test]
    fn training_swaps_pattern_library_without_mutating_old_handle() {
        let classifier = Classifier::new(default_config());
        let handle = classifier.patterns_handle();
        let before = handle.load_full();
        classifier.train(&[LabeledUrl {
            url: Url::parse("https://example.com/imovel/1").unwrap(),
            kind: PageKind::Advertisement,
        }]);
        let after = handle.load_full();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
