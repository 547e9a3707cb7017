use bytes::Bytes;

use super::fields::Fields;
use super::{Codec, CodecError, Decoded};
use crate::http::media::{MediaType, APPLICATION_FORM};

/// The `application/x-www-form-urlencoded` codec.
///
/// `a=b&a=c&d[]=x` parses into a flat multimap; a `[]` suffix coalesces into
/// the bare name. Encoding flattens an object, repeating keys for arrays.
#[derive(Debug)]
pub struct FormCodec;

impl Codec for FormCodec {
    fn media_type(&self) -> &'static str {
        APPLICATION_FORM
    }

    fn read(&self, bytes: &[u8], media: &MediaType) -> Result<Decoded, CodecError> {
        let charset = media.charset();
        if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("utf8") {
            return Err(CodecError::Charset(charset.to_string()));
        }
        let mut fields = Fields::new();
        for (name, value) in form_urlencoded::parse(bytes) {
            let name = name.into_owned();
            let name = name.strip_suffix("[]").unwrap_or(&name).to_string();
            fields.push_text(name, value.into_owned());
        }
        Ok(Decoded::Fields(fields))
    }

    fn produce(&self, value: &serde_json::Value) -> Result<Bytes, CodecError> {
        let object = value.as_object().ok_or_else(|| {
            CodecError::Syntax("only objects encode as a URL-encoded form".to_string())
        })?;
        let mut out = form_urlencoded::Serializer::new(String::new());
        for (name, field) in object {
            match field {
                serde_json::Value::Array(items) => {
                    for item in items {
                        out.append_pair(name, &scalar_text(item));
                    }
                }
                other => {
                    out.append_pair(name, &scalar_text(other));
                }
            }
        }
        Ok(Bytes::from(out.finish()))
    }

    fn can_produce(&self) -> bool {
        true
    }
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media() -> MediaType {
        MediaType::parse(APPLICATION_FORM).unwrap()
    }

    fn read_fields(bytes: &[u8]) -> Fields {
        match FormCodec.read(bytes, &media()).unwrap() {
            Decoded::Fields(fields) => fields,
            _ => panic!("expected fields"),
        }
    }

    #[test]
    fn repeated_names_accumulate() {
        let mut fields = read_fields(b"a=b&a=c");
        assert_eq!(fields.take_all_text("a"), vec!["b", "c"]);
    }

    #[test]
    fn bracket_suffix_coalesces() {
        let mut fields = read_fields(b"d[]=x&d[]=y");
        assert_eq!(fields.take_all_text("d"), vec!["x", "y"]);
    }

    #[test]
    fn percent_decoding_applied() {
        let mut fields = read_fields(b"name=Caf%C3%A9+Y");
        assert_eq!(fields.take_text("name").unwrap(), "Café Y");
    }

    #[test]
    fn produce_flattens_objects() {
        let value = serde_json::json!({"id": 12, "tags": ["a", "b"]});
        let bytes = FormCodec.produce(&value).unwrap();
        assert_eq!(&bytes[..], b"id=12&tags=a&tags=b");
    }

    #[test]
    fn produce_rejects_non_objects() {
        let err = FormCodec.produce(&serde_json::json!(42)).unwrap_err();
        assert!(matches!(err, CodecError::Syntax(_)));
    }
}
