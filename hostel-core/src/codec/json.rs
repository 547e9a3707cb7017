use bytes::Bytes;

use super::{Codec, CodecError, Decoded};
use crate::http::media::{MediaType, APPLICATION_JSON};

/// The JSON codec: field-name based, tolerant of unknown fields, UTF-8 only.
#[derive(Debug)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn media_type(&self) -> &'static str {
        APPLICATION_JSON
    }

    fn read(&self, bytes: &[u8], media: &MediaType) -> Result<Decoded, CodecError> {
        let charset = media.charset();
        if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("utf8") {
            return Err(CodecError::Charset(charset.to_string()));
        }
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Syntax(e.to_string()))?;
        Ok(Decoded::Value(value))
    }

    fn produce(&self, value: &serde_json::Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Syntax(e.to_string()))
    }

    fn can_produce(&self) -> bool {
        true
    }
}
