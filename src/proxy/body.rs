//! Body capture policy: buffer up to the configured cap, truncate with a
//! marker on overflow, placeholder for binary content types.

use crate::events::BodyCapture;

pub const TRUNCATION_MARKER: &str = "...[truncated]";

fn looks_textual(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("text/")
                || ct.contains("json")
                || ct.contains("xml")
                || ct.contains("x-www-form-urlencoded")
                || ct.contains("event-stream")
        }
    }
}

/// Capture a body according to the proxy's buffering policy.
///
/// Bodies at exactly `max_body_size` bytes are emitted untruncated; bodies
/// one byte over are truncated with a marker and the discarded count.
pub fn capture(bytes: &[u8], content_type: Option<&str>, max_body_size: usize) -> BodyCapture {
    if bytes.is_empty() {
        return BodyCapture::Empty;
    }
    if !looks_textual(content_type) {
        return BodyCapture::Binary {
            content_type: content_type.unwrap_or("application/octet-stream").to_string(),
            size: bytes.len(),
        };
    }

    let text = String::from_utf8_lossy(bytes);
    if bytes.len() <= max_body_size {
        return BodyCapture::Full {
            text: text.into_owned(),
            size: bytes.len(),
        };
    }

    let truncated = crate::util::truncate_utf8_safe(&text, max_body_size);
    BodyCapture::Truncated {
        text: format!("{truncated}{TRUNCATION_MARKER}"),
        size: bytes.len(),
        discarded_bytes: bytes.len() - max_body_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_empty_variant() {
        assert!(matches!(capture(&[], None, 100), BodyCapture::Empty));
    }

    #[test]
    fn body_at_exactly_cap_is_untruncated() {
        let bytes = vec![b'a'; 100];
        match capture(&bytes, Some("text/plain"), 100) {
            BodyCapture::Full { size, .. } => assert_eq!(size, 100),
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[test]
    fn body_one_over_cap_is_truncated() {
        let bytes = vec![b'a'; 101];
        match capture(&bytes, Some("text/plain"), 100) {
            BodyCapture::Truncated {
                discarded_bytes, ..
            } => assert_eq!(discarded_bytes, 1),
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn binary_content_type_is_placeholder() {
        match capture(&[0u8, 1, 2, 3], Some("image/png"), 100) {
            BodyCapture::Binary { size, .. } => assert_eq!(size, 4),
            other => panic!("expected Binary, got {other:?}"),
        }
    }
}
