pub const OCTET_STREAM: &str = "application/octet-stream";
pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Sniffs the media type from the leading bytes of a stream.
pub fn detect_from_bytes(head: &[u8]) -> String {
    if head.is_empty() {
        return OCTET_STREAM.to_string();
    }
    match infer::get(head) {
        Some(kind) => kind.mime_type().to_string(),
        None if looks_like_text(head) => PLAIN_TEXT.to_string(),
        None => OCTET_STREAM.to_string(),
    }
}

/// Lower-cases, trims and drops any `;parameter` suffix.
pub fn normalize(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.find(';') {
        Some(p) => name[..p].trim().to_string(),
        None => name,
    }
}

/// True for media types that name a zip-family archive.
pub fn is_archive(media_type: &str) -> bool {
    let media_type = normalize(media_type);
    media_type == "application/zip"
        || media_type == "application/x-zip-compressed"
        || media_type.ends_with("+zip")
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // a multi-byte sequence cut off at the end of the chunk is still text
        Err(e) => e.error_len().is_none() && e.valid_up_to() + 4 > head.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mimetype_detection() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
        assert_eq!(detect_from_bytes(&png), "image/png");
        assert_eq!(detect_from_bytes(b"%PDF-1.7\n"), "application/pdf");
        assert_eq!(detect_from_bytes(b"hello world"), PLAIN_TEXT);
        assert_eq!(detect_from_bytes(&[0xff, 0x00, 0x13]), OCTET_STREAM);
        assert_eq!(detect_from_bytes(&[]), OCTET_STREAM);
    }

    #[test]
    fn test_truncated_utf8_is_text() {
        let mut bytes = "grüß".as_bytes().to_vec();
        bytes.pop();
        assert_eq!(detect_from_bytes(&bytes), PLAIN_TEXT);
    }

    #[test]
    fn test_normalize_and_archive() {
        assert_eq!(normalize(" Text/Plain; charset=UTF-8 "), "text/plain");
        assert!(is_archive("application/zip"));
        assert!(is_archive("application/epub+zip"));
        assert!(!is_archive("application/gzip"));
        assert!(!is_archive("text/plain"));
    }
}
