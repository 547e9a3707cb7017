use bytes::Bytes;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::fields::Fields;
use super::{Codec, CodecError, Decoded};
use crate::http::media::{MediaType, APPLICATION_XML};

/// The optional `application/xml` codec: elements-to-fields on decode, a
/// field-per-element tree on encode.
#[derive(Debug)]
pub struct XmlCodec;

const ROOT: &str = "object";

impl Codec for XmlCodec {
    fn media_type(&self) -> &'static str {
        APPLICATION_XML
    }

    fn read(&self, bytes: &[u8], media: &MediaType) -> Result<Decoded, CodecError> {
        let charset = media.charset();
        if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("utf8") {
            return Err(CodecError::Charset(charset.to_string()));
        }

        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut fields = Fields::new();
        let mut depth = 0usize;
        let mut current: Option<(String, String)> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    if depth == 2 {
                        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        current = Some((name, String::new()));
                    }
                }
                Ok(Event::Empty(e)) => {
                    if depth == 1 {
                        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        fields.push_text(name, String::new());
                    }
                }
                Ok(Event::Text(t)) => {
                    if let Some((_, value)) = current.as_mut() {
                        let text = t
                            .unescape()
                            .map_err(|e| CodecError::Syntax(e.to_string()))?;
                        value.push_str(&text);
                    }
                }
                Ok(Event::End(_)) => {
                    if depth == 2 {
                        if let Some((name, value)) = current.take() {
                            fields.push_text(name, value);
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(CodecError::Syntax(e.to_string())),
            }
            buf.clear();
        }
        Ok(Decoded::Fields(fields))
    }

    fn produce(&self, value: &serde_json::Value) -> Result<Bytes, CodecError> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, ROOT, value)?;
        Ok(Bytes::from(writer.into_inner()))
    }

    fn can_produce(&self) -> bool {
        true
    }
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &serde_json::Value,
) -> Result<(), CodecError> {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
        }
        serde_json::Value::Object(map) => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| CodecError::Syntax(e.to_string()))?;
            for (field, inner) in map {
                write_element(writer, field, inner)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(|e| CodecError::Syntax(e.to_string()))?;
        }
        other => {
            let text = match other {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                rest => rest.to_string(),
            };
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| CodecError::Syntax(e.to_string()))?;
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(|e| CodecError::Syntax(e.to_string()))?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(|e| CodecError::Syntax(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media() -> MediaType {
        MediaType::parse(APPLICATION_XML).unwrap()
    }

    #[test]
    fn elements_become_fields() {
        let body = b"<object><id>12</id><message>Test</message></object>";
        let decoded = XmlCodec.read(body, &media()).unwrap();
        match decoded {
            Decoded::Fields(mut fields) => {
                assert_eq!(fields.take_text("id").unwrap(), "12");
                assert_eq!(fields.take_text("message").unwrap(), "Test");
            }
            _ => panic!("expected fields"),
        }
    }

    #[test]
    fn repeated_elements_accumulate() {
        let body = b"<object><tag>a</tag><tag>b</tag></object>";
        let decoded = XmlCodec.read(body, &media()).unwrap();
        match decoded {
            Decoded::Fields(mut fields) => {
                assert_eq!(fields.take_all_text("tag"), vec!["a", "b"]);
            }
            _ => panic!("expected fields"),
        }
    }

    #[test]
    fn produce_writes_element_tree() {
        let value = serde_json::json!({"id": 12, "message": "Test"});
        let bytes = XmlCodec.produce(&value).unwrap();
        assert_eq!(
            &bytes[..],
            b"<object><id>12</id><message>Test</message></object>" as &[u8]
        );
    }

    #[test]
    fn produce_escapes_text() {
        let value = serde_json::json!({"note": "a < b"});
        let bytes = XmlCodec.produce(&value).unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("a &lt; b"), "not escaped: {text}");
    }
}
