use mime::Mime;

#[must_use]
pub fn detect_mime(data: &[u8]) -> Option<String> {
    infer::get(data).map(|info| info.mime_type().to_string())
}

/// Lowercased `type/subtype` without parameters, or `None` if unparseable.
#[must_use]
pub fn normalize_mime(declared: &str) -> Option<String> {
    let parsed: Mime = declared.trim().parse().ok()?;
    Some(parsed.essence_str().to_ascii_lowercase())
}

/// Declared MIME type when it is specific, sniffed type otherwise.
#[must_use]
pub fn resolve_image_mime(declared: &str, data: &[u8]) -> Option<String> {
    match normalize_mime(declared) {
        Some(mime) if mime != "application/octet-stream" => Some(mime),
        _ => detect_mime(data),
    }
}

#[must_use]
pub fn extension_from_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "text/markdown" => "md",
        "text/plain" => "txt",
        _ => "bin",
    }
}
