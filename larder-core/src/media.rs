//! Media-type registry.
//!
//! Table-driven mapping between media types and file extensions. The first
//! extension listed for a media type is its canonical one, so resolution is
//! deterministic in both directions.

/// Default media type for structured values.
pub const APPLICATION_JSON: &str = "application/json";

/// Default media type for binary values. Maps to no extension.
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

/// (media type, extensions) pairs. Canonical extension first.
const REGISTRY: &[(&str, &[&str])] = &[
    ("application/json", &["json"]),
    ("application/ld+json", &["jsonld"]),
    ("application/xml", &["xml"]),
    ("application/pdf", &["pdf"]),
    ("application/zip", &["zip"]),
    ("application/gzip", &["gz"]),
    ("application/x-tar", &["tar"]),
    ("application/wasm", &["wasm"]),
    ("application/javascript", &["js", "mjs"]),
    ("application/yaml", &["yaml", "yml"]),
    ("application/toml", &["toml"]),
    ("application/msword", &["doc"]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        &["docx"],
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        &["xlsx"],
    ),
    ("text/plain", &["txt", "text"]),
    ("text/html", &["html", "htm"]),
    ("text/css", &["css"]),
    ("text/csv", &["csv"]),
    ("text/markdown", &["md", "markdown"]),
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/gif", &["gif"]),
    ("image/webp", &["webp"]),
    ("image/svg+xml", &["svg"]),
    ("image/x-icon", &["ico"]),
    ("image/avif", &["avif"]),
    ("image/bmp", &["bmp"]),
    ("image/tiff", &["tif", "tiff"]),
    ("audio/mpeg", &["mp3"]),
    ("audio/wav", &["wav"]),
    ("audio/ogg", &["ogg"]),
    ("video/mp4", &["mp4"]),
    ("video/webm", &["webm"]),
    ("font/woff", &["woff"]),
    ("font/woff2", &["woff2"]),
];

/// Normalize a media type for lookup: drop parameters, trim, lowercase.
///
/// `"Text/HTML; charset=utf-8"` becomes `"text/html"`.
pub fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Canonical file extension for a media type.
///
/// Returns `None` for `application/octet-stream` and for unregistered types.
pub fn extension_for(mime_type: &str) -> Option<&'static str> {
    let essence = essence(mime_type);
    if essence == APPLICATION_OCTET_STREAM {
        return None;
    }
    REGISTRY
        .iter()
        .find(|(mime, _)| *mime == essence)
        .and_then(|(_, exts)| exts.first().copied())
}

/// Media type registered for a file extension (without the leading dot).
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    REGISTRY
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map(|(mime, _)| *mime)
}

/// Guess a media type from well-known magic numbers.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1F\x8B", "application/gzip"),
        (b"\0asm", "application/wasm"),
    ];

    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, mime)| *mime)
}
