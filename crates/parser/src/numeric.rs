use once_cell::sync::Lazy;
use regex::Regex;

static DIGIT_GROUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9][0-9.,]*").unwrap());
static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Parses a currency-formatted price string (`R$ 450.000`, `$450,000.00`,
/// `450000`) into a float plus the matched raw substring. Assumes `.` as
/// thousands separator when there is no trailing `,XX`/`.XX` fraction,
/// matching the pt-BR/es formatting this crawler's origins use.
pub fn parse_price(text: &str) -> Option<(f64, String)> {
    let m = DIGIT_GROUP_RE.find(text)?;
    let raw = m.as_str().to_string();
    let value = normalize_number(&raw)?;
    Some((value, raw))
}

fn normalize_number(raw: &str) -> Option<f64> {
    let has_comma = raw.contains(',');
    let has_dot = raw.contains('.');

    let normalized = if has_comma && has_dot {
        // Whichever separator appears last is the decimal separator.
        if raw.rfind(',') > raw.rfind('.') {
            raw.replace('.', "").replace(',', ".")
        } else {
            raw.replace(',', "")
        }
    } else if has_comma {
        let parts: Vec<&str> = raw.split(',').collect();
        if parts.last().map(|p| p.len()) == Some(2) {
            raw.replace(',', ".")
        } else {
            raw.replace(',', "")
        }
    } else if has_dot {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.last().map(|p| p.len()) == Some(2) && parts.len() == 2 {
            raw.to_string()
        } else {
            raw.replace('.', "")
        }
    } else {
        raw.to_string()
    };

    normalized.parse::<f64>().ok()
}

/// Parses a small integer count (rooms, bathrooms) out of free text like
/// "3 quartos" or "3".
pub fn parse_count(text: &str) -> Option<u32> {
    INT_RE.find(text)?.as_str().parse::<u32>().ok()
}

/// Parses an area measurement ("80 m²", "80.5 m2") into square meters.
pub fn parse_area(text: &str) -> Option<f64> {
    let (value, _) = parse_price(text)?;
    Some(value)
}

const ACCENT_MAP: &[(char, char)] = &[
    ('á', 'a'), ('à', 'a'), ('ã', 'a'), ('â', 'a'), ('ä', 'a'),
    ('é', 'e'), ('è', 'e'), ('ê', 'e'), ('ë', 'e'),
    ('í', 'i'), ('ì', 'i'), ('î', 'i'), ('ï', 'i'),
    ('ó', 'o'), ('ò', 'o'), ('õ', 'o'), ('ô', 'o'), ('ö', 'o'),
    ('ú', 'u'), ('ù', 'u'), ('û', 'u'), ('ü', 'u'),
    ('ç', 'c'), ('ñ', 'n'),
];

fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| {
            ACCENT_MAP
                .iter()
                .find(|(accented, _)| *accented == c)
                .map(|(_, plain)| *plain)
                .unwrap_or(c)
        })
        .collect()
}

/// Normalizes a feature tag: lowercase, accent-stripped, trimmed. Sorting
/// and deduplication happen at the call site over the whole tag list.
pub fn normalize_feature_tag(raw: &str) -> String {
    strip_accents(&raw.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_brazilian_formatted_price() {
        let (value, _) = parse_price("R$ 450.000").unwrap();
        assert_eq!(value, 450_000.0);
    }

    #[test]
    fn parses_price_with_cents() {
        let (value, _) = parse_price("$1,234.56").unwrap();
        assert!((value - 1234.56).abs() < 0.001);
    }

    #[test]
    fn parses_comma_decimal_price() {
        let (value, _) = parse_price("450.000,50").unwrap();
        assert!((value - 450_000.50).abs() < 0.001);
    }

    #[test]
    fn parses_room_count() {
        assert_eq!(parse_count("3 quartos"), Some(3));
    }

    #[test]
    fn normalizes_accented_feature_tag() {
        assert_eq!(normalize_feature_tag("  Piscina Aquecida "), "piscina aquecida");
        assert_eq!(normalize_feature_tag("Varanda Gourmet"), "varanda gourmet");
    }
}
