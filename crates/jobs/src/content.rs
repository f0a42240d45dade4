use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::types::OutputKind;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn content_type_for(path: &Path, kind: OutputKind) -> String {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let base = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        _ => DEFAULT_CONTENT_TYPE,
    };

    match kind {
        OutputKind::Text => format!("{base}; charset=utf-8"),
        OutputKind::Image => base.to_string(),
    }
}

/// Content type for text extracted from a structured artifact.
pub fn text_content_type() -> String {
    "text/plain; charset=utf-8".to_string()
}

pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_follows_extension_and_kind() {
        assert_eq!(content_type_for(Path::new("a.PNG"), OutputKind::Image), "image/png");
        assert_eq!(
            content_type_for(Path::new("a.md"), OutputKind::Text),
            "text/markdown; charset=utf-8"
        );
        assert_eq!(
            content_type_for(Path::new("noext"), OutputKind::Image),
            "application/octet-stream"
        );
    }

    #[test]
    fn encodes_standard_base64() {
        assert_eq!(encode(b"hello"), "aGVsbG8=");
        assert_eq!(decode_text(&[0x68, 0x69, 0xff]), "hi\u{fffd}");
    }
}
