//! Seed-file parsing: a newline-delimited list of URLs, `#` comments, blank
//! lines ignored.

use anyhow::{Context, Result};

/// Reads `path` and returns the non-comment, non-blank lines as seed URLs.
/// Lines are not validated as URLs here — the Frontier rejects anything it
/// can't parse when the seeds are enqueued.
pub fn load_seed_file(path: &str) -> Result<Vec<String>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading seed file {path}"))?;
    Ok(parse_seeds(&contents))
}

fn parse_seeds(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seeds_skips_comments_and_blanks() {
        let input = "\
# real estate seed list
https://example.com/imoveis

  https://example.com/listings/1
# trailing comment
";
        let seeds = parse_seeds(input);
        assert_eq!(
            seeds,
            vec![
                "https://example.com/imoveis".to_string(),
                "https://example.com/listings/1".to_string(),
            ]
        );
    }

    #[test]
    fn parse_seeds_empty_input_yields_empty_list() {
        assert!(parse_seeds("").is_empty());
        assert!(parse_seeds("   \n\n#comment only\n").is_empty());
    }
}
