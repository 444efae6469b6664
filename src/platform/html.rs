//! Image extraction from HTML fragments in post bodies and feed entries.

use std::sync::LazyLock;

use regex::Regex;

/// `<img ... src="...">` with either quote style.
#[allow(clippy::expect_used)]
static IMG_SRC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
        .expect("img src regex is valid") // Static pattern, safe to panic
});

/// Returns every `<img src>` URL in document order, without duplicates.
#[must_use]
pub fn image_sources(html: &str) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for captures in IMG_SRC_PATTERN.captures_iter(html) {
        if let Some(src) = captures.get(1) {
            let src = src.as_str().trim().replace("&amp;", "&");
            if !src.is_empty() && !sources.contains(&src) {
                sources.push(src);
            }
        }
    }
    sources
}
