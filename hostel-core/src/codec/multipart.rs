use bytes::Bytes;

use super::fields::{Fields, FileStream};
use super::{Codec, CodecError, Decoded};
use crate::http::media::{MediaType, MULTIPART_FORM_DATA, MULTIPART_MIXED};

/// The `multipart/form-data` codec (RFC 7578).
///
/// Sections with a `filename` (or an inner `multipart/mixed` body, which is
/// recursed) decode to [`FileStream`]s; the rest decode to text fields.
/// Decode only; multipart is never produced as a response representation.
#[derive(Debug)]
pub struct MultipartCodec;

impl Codec for MultipartCodec {
    fn media_type(&self) -> &'static str {
        MULTIPART_FORM_DATA
    }

    fn read(&self, bytes: &[u8], media: &MediaType) -> Result<Decoded, CodecError> {
        let boundary = media.boundary().ok_or(CodecError::MissingBoundary)?;
        let parts = split_parts(bytes, boundary)?;
        let mut fields = Fields::new();
        for part in parts {
            let name = part.name.clone().unwrap_or_default();
            let inner_mixed = part
                .media
                .as_ref()
                .filter(|m| m.essence() == MULTIPART_MIXED)
                .and_then(|m| m.boundary().map(str::to_string));
            if let Some(inner_boundary) = inner_mixed {
                // A nested multipart/mixed body: every inner section becomes
                // one stream under the enclosing field name.
                for inner in split_parts(&part.data, &inner_boundary)? {
                    fields.push_file(FileStream {
                        name: name.clone(),
                        filename: inner.filename,
                        media: inner.media,
                        data: inner.data,
                    });
                }
            } else if part.filename.is_some() {
                fields.push_file(FileStream {
                    name,
                    filename: part.filename,
                    media: part.media,
                    data: part.data,
                });
            } else {
                let charset = part
                    .media
                    .as_ref()
                    .map(|m| m.charset().to_string())
                    .unwrap_or_else(|| "utf-8".to_string());
                if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("utf8") {
                    return Err(CodecError::Charset(charset));
                }
                let text = String::from_utf8(part.data.to_vec())
                    .map_err(|e| CodecError::Syntax(e.to_string()))?;
                fields.push_text(name, text);
            }
        }
        Ok(Decoded::Fields(fields))
    }

    fn produce(&self, _value: &serde_json::Value) -> Result<Bytes, CodecError> {
        Err(CodecError::Syntax(
            "multipart/form-data is not produced".to_string(),
        ))
    }

    fn can_produce(&self) -> bool {
        false
    }
}

struct RawPart {
    name: Option<String>,
    filename: Option<String>,
    media: Option<MediaType>,
    data: Bytes,
}

/// Split a multipart body on its boundary delimiters (RFC 2046 §5.1.1).
fn split_parts(bytes: &[u8], boundary: &str) -> Result<Vec<RawPart>, CodecError> {
    let open = format!("--{boundary}");
    let marker = format!("\r\n--{boundary}");

    let mut pos = find(bytes, open.as_bytes(), 0).ok_or_else(|| {
        CodecError::Syntax(format!("boundary '{boundary}' not found in body"))
    })? + open.len();

    let mut parts = Vec::new();
    loop {
        let rest = &bytes[pos..];
        if rest.starts_with(b"--") {
            break; // close delimiter
        }
        let rest_start = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => pos + i + 1,
            None => break,
        };
        let end = find(bytes, marker.as_bytes(), rest_start)
            .ok_or_else(|| CodecError::Syntax("unterminated multipart section".to_string()))?;
        parts.push(parse_part(&bytes[rest_start..end])?);
        pos = end + marker.len();
    }
    Ok(parts)
}

/// Parse one section: header block up to the blank line, then raw content.
fn parse_part(section: &[u8]) -> Result<RawPart, CodecError> {
    let (headers, data) = match find(section, b"\r\n\r\n", 0) {
        Some(i) => (&section[..i], &section[i + 4..]),
        None if section.starts_with(b"\r\n") => (&section[..0], &section[2..]),
        None => (&section[..0], section),
    };

    let mut name = None;
    let mut filename = None;
    let mut media = None;
    for line in headers.split(|&b| b == b'\n') {
        let line = std::str::from_utf8(line)
            .map_err(|e| CodecError::Syntax(e.to_string()))?
            .trim_end_matches('\r')
            .trim();
        let Some((header, value)) = line.split_once(':') else {
            continue;
        };
        if header.eq_ignore_ascii_case("content-disposition") {
            let (n, f) = parse_disposition(value);
            name = n;
            filename = f;
        } else if header.eq_ignore_ascii_case("content-type") {
            media = MediaType::parse(value.trim());
        }
    }

    Ok(RawPart {
        name,
        filename,
        media,
        data: Bytes::copy_from_slice(data),
    })
}

/// Extract `name` and `filename` from a `Content-Disposition` value such as
/// `form-data; name="file1"; filename="file1.txt"`.
fn parse_disposition(value: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut filename = None;
    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let text = raw.trim().trim_matches('"').to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(text),
            "filename" => filename = Some(text),
            _ => {}
        }
    }
    (name, filename)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}
