//! Detection and normalization of `=@IMAGE("url")` formulas.
//!
//! The pattern is `=`, `@IMAGE` (any case), `(`, a single- or double-quoted
//! URL and `)`, with optional whitespace between the parts. It may appear
//! anywhere inside the cell text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static IMAGE_FORMULA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)=\s*@IMAGE\s*\(\s*["']([^"']+)["']\s*\)"#).expect("valid regex")
});

/// Extract the URL of the first `@IMAGE` formula in `text`.
pub fn find_image_url(text: &str) -> Option<&str> {
    IMAGE_FORMULA
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Check whether `text` contains an `@IMAGE` formula.
pub fn contains_image_formula(text: &str) -> bool {
    IMAGE_FORMULA.is_match(text)
}

/// Replace every `@IMAGE` formula in `text` with `=IMAGE("url")`, each
/// occurrence keeping its own URL. Text around the matches is unchanged.
pub fn normalize_formulas(text: &str) -> String {
    IMAGE_FORMULA
        .replace_all(text, |caps: &Captures| format!("=IMAGE(\"{}\")", &caps[1]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_basic_forms() {
        assert_eq!(find_image_url(r#"=@IMAGE("http://x/img.png")"#), Some("http://x/img.png"));
        assert_eq!(find_image_url("=@IMAGE('http://x/img.png')"), Some("http://x/img.png"));
        assert_eq!(
            find_image_url(r#"= @image( "http://x/a.jpg" )"#),
            Some("http://x/a.jpg")
        );
        assert_eq!(
            find_image_url(r#"note: =@Image("u1") and =@IMAGE("u2")"#),
            Some("u1")
        );
    }

    #[test]
    fn test_non_matching() {
        assert_eq!(find_image_url(""), None);
        assert_eq!(find_image_url("plain text"), None);
        assert_eq!(find_image_url(r#"=IMAGE("http://x/img.png")"#), None);
        assert_eq!(find_image_url(r#"@IMAGE("http://x/img.png")"#), None);
        assert_eq!(find_image_url(r#"=@IMAGE()"#), None);
        assert_eq!(find_image_url(r#"=@IMAGE("")"#), None);
        assert_eq!(find_image_url(r#"=@IMAGE(http://x/img.png)"#), None);
        assert!(!contains_image_formula("=SUM(A1:A3)"));
    }

    #[test]
    fn test_normalize_keeps_surrounding_text() {
        assert_eq!(
            normalize_formulas(r#"=@IMAGE('http://x/img.png')"#),
            r#"=IMAGE("http://x/img.png")"#
        );
        assert_eq!(
            normalize_formulas(r#"a =@image("u1") b = @IMAGE ( 'u2' ) c"#),
            r#"a =IMAGE("u1") b =IMAGE("u2") c"#
        );
        assert_eq!(normalize_formulas("untouched"), "untouched");
    }

    #[test]
    fn test_normalized_text_no_longer_matches() {
        let normalized = normalize_formulas(r#"=@IMAGE("http://x/img.png")"#);
        assert!(!contains_image_formula(&normalized));
    }

    fn mixed_case(word: &str, mask: &[bool]) -> String {
        word.chars()
            .zip(mask.iter().cycle())
            .map(|(c, &upper)| {
                if upper {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                }
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_extracts_exact_url(
            url in r"https?://[a-z0-9./_-]{1,40}",
            double in any::<bool>(),
            mask in proptest::collection::vec(any::<bool>(), 5),
            ws in proptest::collection::vec(r"[ \t]{0,3}", 5),
        ) {
            let quote = if double { '"' } else { '\'' };
            let text = format!(
                "={}@{}{}({}{quote}{url}{quote}{}){}",
                ws[0], mixed_case("IMAGE", &mask), ws[1], ws[2], ws[3], ws[4]
            );
            prop_assert_eq!(find_image_url(&text), Some(url.as_str()));
            prop_assert_eq!(
                normalize_formulas(&text),
                format!("=IMAGE(\"{url}\"){}", ws[4])
            );
        }
    }
}
