//! Local file names for downloaded media.

use sha2::{Digest, Sha256};
use url::Url;

/// Extensions accepted as-is from a URL's last path segment.
const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

/// Extension used when the content type is unknown.
const FALLBACK_EXTENSION: &str = ".tmp";

/// Returns the URL's last path segment when it is a safe file name with a
/// known image extension.
#[must_use]
pub fn destination_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if !is_safe_segment(last) {
        return None;
    }
    let (_, ext) = last.rsplit_once('.')?;
    KNOWN_EXTENSIONS
        .contains(&ext.to_ascii_lowercase().as_str())
        .then(|| last.to_string())
}

/// Name derived from the SHA-256 of the URL, e.g. `3a7b...e1.jpg`.
#[must_use]
pub fn hashed_name(url: &str, extension: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{hex}{extension}")
}

/// Maps a `Content-Type` header value to a file extension with leading dot.
#[must_use]
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some("image/jpeg" | "image/jpg" | "image/pjpeg") => ".jpg",
        Some("image/png") => ".png",
        Some("image/gif") => ".gif",
        Some("image/webp") => ".webp",
        Some("image/bmp") => ".bmp",
        Some("image/tiff") => ".tif",
        _ => FALLBACK_EXTENSION,
    }
}

fn is_safe_segment(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_name_keeps_image_tail() {
        assert_eq!(
            destination_name("https://farm1.staticflickr.com/2/123_abc_m.jpg").as_deref(),
            Some("123_abc_m.jpg")
        );
    }

    #[test]
    fn test_destination_name_rejects_unknown_or_missing_extension() {
        assert!(destination_name("https://x.example.com/image").is_none());
        assert!(destination_name("https://x.example.com/page.php").is_none());
        assert!(destination_name("https://x.example.com/").is_none());
    }

    #[test]
    fn test_destination_name_rejects_unsafe_characters() {
        assert!(destination_name("https://x.example.com/a%20b.jpg").is_none());
    }

    #[test]
    fn test_hashed_name_is_stable() {
        let a = hashed_name("https://x/y", ".png");
        let b = hashed_name("https://x/y", ".png");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64 + 4);
        assert!(a.ends_with(".png"));
        assert_ne!(a, hashed_name("https://x/z", ".png"));
    }

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(extension_for_content_type(Some("image/jpeg")), ".jpg");
        assert_eq!(
            extension_for_content_type(Some("image/png; charset=binary")),
            ".png"
        );
        assert_eq!(extension_for_content_type(Some("text/html")), ".tmp");
        assert_eq!(extension_for_content_type(None), ".tmp");
    }
}
