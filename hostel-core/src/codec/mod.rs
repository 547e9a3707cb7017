//! The serializer registry: a mapping from normalized media type to a codec
//! that decodes request bytes into structured input and encodes handler
//! results into response bytes.

pub mod fields;
pub mod form;
pub mod json;
pub mod multipart;
#[cfg(feature = "xml")]
pub mod xml;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::HttpError;
use crate::http::media::{MediaType, APPLICATION_JSON};

pub use fields::{Fields, FieldsError, FileStream, FromFields};
pub use form::FormCodec;
pub use json::JsonCodec;
pub use multipart::MultipartCodec;
#[cfg(feature = "xml")]
pub use xml::XmlCodec;

// ── Codec contract ──────────────────────────────────────────────────────────

/// Failures inside a codec.
#[derive(Debug)]
pub enum CodecError {
    /// Malformed input (or unencodable output) for this representation.
    Syntax(String),
    /// A charset this codec does not handle.
    Charset(String),
    /// A multipart payload without a boundary parameter.
    MissingBoundary,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Syntax(msg) => write!(f, "{msg}"),
            CodecError::Charset(charset) => write!(f, "unsupported charset: {charset}"),
            CodecError::MissingBoundary => write!(f, "multipart body without a boundary"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for HttpError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Charset(charset) => {
                HttpError::UnsupportedMediaType(format!("charset {charset}"))
            }
            other => HttpError::BadRequest(other.to_string()),
        }
    }
}

/// What a codec decodes a body into.
#[derive(Debug)]
pub enum Decoded {
    /// A structured tree; targets deserialize through serde.
    Value(serde_json::Value),
    /// A flat field multimap; targets implement [`FromFields`].
    Fields(Fields),
}

/// A reversible object ↔ bytes transcoder for one media type.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// The normalized `type/subtype` this codec is registered under.
    fn media_type(&self) -> &'static str;

    /// Decode request bytes. The media type carries codec parameters
    /// (charset, boundary).
    fn read(&self, bytes: &[u8], media: &MediaType) -> Result<Decoded, CodecError>;

    /// Encode a structured value into response bytes.
    fn produce(&self, value: &serde_json::Value) -> Result<Bytes, CodecError>;

    /// Whether this codec participates in response negotiation.
    fn can_produce(&self) -> bool;
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Owned by the application options; there is no process-global registry.
pub struct SerializerRegistry {
    codecs: Vec<Arc<dyn Codec>>,
    by_essence: HashMap<&'static str, usize>,
}

impl SerializerRegistry {
    pub fn new() -> SerializerRegistry {
        SerializerRegistry {
            codecs: Vec::new(),
            by_essence: HashMap::new(),
        }
    }

    /// The standard codec set: JSON, URL-encoded form, multipart, and — when
    /// the `xml` feature is enabled and the toggle is on — XML.
    pub fn with_defaults(enable_xml: bool) -> SerializerRegistry {
        let mut registry = SerializerRegistry::new();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(FormCodec));
        registry.register(Arc::new(MultipartCodec));
        #[cfg(feature = "xml")]
        if enable_xml {
            registry.register(Arc::new(XmlCodec));
        }
        #[cfg(not(feature = "xml"))]
        let _ = enable_xml;
        registry
    }

    /// Register a codec; a later registration for the same essence replaces
    /// the earlier one.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        let essence = codec.media_type();
        match self.by_essence.get(essence) {
            Some(&index) => self.codecs[index] = codec,
            None => {
                self.by_essence.insert(essence, self.codecs.len());
                self.codecs.push(codec);
            }
        }
    }

    pub fn codec_for(&self, essence: &str) -> Option<&Arc<dyn Codec>> {
        self.by_essence.get(essence).map(|&i| &self.codecs[i])
    }

    /// Decode a request body with the codec registered for its content type.
    ///
    /// Unknown content types map to 415; codec failures to 400 (or 415 for
    /// charset problems).
    pub fn read(&self, media: &MediaType, bytes: &[u8]) -> Result<Decoded, HttpError> {
        let essence = media.essence();
        let codec = self
            .codec_for(&essence)
            .ok_or_else(|| HttpError::UnsupportedMediaType(essence.clone()))?;
        Ok(codec.read(bytes, media)?)
    }

    /// Pick the first codec acceptable to the request's Accept list.
    ///
    /// An empty list (or a full wildcard) selects JSON. Returns the concrete
    /// media type the response will carry.
    pub fn negotiate(&self, accept: &[MediaType]) -> Result<(MediaType, Arc<dyn Codec>), HttpError> {
        if accept.is_empty() {
            return self
                .codec_for(APPLICATION_JSON)
                .map(|c| (MediaType::essence_only(APPLICATION_JSON), c.clone()))
                .ok_or(HttpError::NotAcceptable);
        }
        for wanted in accept {
            if wanted.is_wildcard() {
                if let Some(codec) = self.codec_for(APPLICATION_JSON) {
                    return Ok((MediaType::essence_only(APPLICATION_JSON), codec.clone()));
                }
            }
            for codec in &self.codecs {
                if !codec.can_produce() {
                    continue;
                }
                let offered = MediaType::essence_only(codec.media_type());
                if wanted.accepts(&offered) {
                    return Ok((offered, codec.clone()));
                }
            }
        }
        Err(HttpError::NotAcceptable)
    }

    /// Negotiate and encode in one step.
    pub fn produce(
        &self,
        accept: &[MediaType],
        value: &serde_json::Value,
    ) -> Result<(MediaType, Bytes), HttpError> {
        let (media, codec) = self.negotiate(accept)?;
        let bytes = codec.produce(value)?;
        Ok((media, bytes))
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_defaults(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::media::parse_accept;

    #[test]
    fn unknown_content_type_is_415() {
        let registry = SerializerRegistry::with_defaults(false);
        let media = MediaType::parse("text/csv").unwrap();
        let err = registry.read(&media, b"a,b").unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedMediaType(_)));
    }

    #[test]
    fn empty_accept_defaults_to_json() {
        let registry = SerializerRegistry::with_defaults(false);
        let (media, _) = registry.negotiate(&[]).unwrap();
        assert_eq!(media.essence(), "application/json");
    }

    #[test]
    fn wildcard_accept_selects_json() {
        let registry = SerializerRegistry::with_defaults(false);
        let accept = parse_accept("*/*");
        let (media, _) = registry.negotiate(&accept).unwrap();
        assert_eq!(media.essence(), "application/json");
    }

    #[test]
    fn first_acceptable_type_wins() {
        let registry = SerializerRegistry::with_defaults(false);
        let accept = parse_accept("text/csv, application/x-www-form-urlencoded, application/json");
        let (media, _) = registry.negotiate(&accept).unwrap();
        assert_eq!(media.essence(), "application/x-www-form-urlencoded");
    }

    #[test]
    fn no_match_is_not_acceptable() {
        let registry = SerializerRegistry::with_defaults(false);
        let accept = parse_accept("text/csv");
        let err = registry.negotiate(&accept).unwrap_err();
        assert!(matches!(err, HttpError::NotAcceptable));
    }

    #[test]
    fn multipart_never_negotiated_for_output() {
        let registry = SerializerRegistry::with_defaults(false);
        let accept = parse_accept("multipart/form-data");
        assert!(registry.negotiate(&accept).is_err());
    }

    #[test]
    fn produce_encodes_with_negotiated_codec() {
        let registry = SerializerRegistry::with_defaults(false);
        let accept = parse_accept("application/json");
        let value = serde_json::json!({"id": 12});
        let (media, bytes) = registry.produce(&accept, &value).unwrap();
        assert_eq!(media.essence(), "application/json");
        assert_eq!(&bytes[..], br#"{"id":12}"#);
    }
}
