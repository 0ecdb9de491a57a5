use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::domain::{error::ParseError, models::NormalizedDocument};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut fields = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ParseError::Malformed(e.to_string()))?;
            let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr
                .unescape_value()
                .map_err(|e| ParseError::Malformed(e.to_string()))?;
            fields.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let value = if self.fields.is_empty() {
            if self.text.is_empty() {
                Value::Null
            } else {
                Value::String(self.text)
            }
        } else {
            let mut fields = self.fields;
            if !self.text.is_empty() {
                fields.insert("#text".to_string(), Value::String(self.text));
            }
            Value::Object(fields)
        };
        (self.name, value)
    }
}

/// Repeated siblings collapse into an array; a single child stays scalar.
fn attach(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        None => {
            fields.insert(name, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

/// Decodes raw member bytes and normalizes them.
pub fn normalize_bytes(bytes: &[u8]) -> Result<NormalizedDocument, ParseError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|e| {
        error!("Document is not valid UTF-8: {}", e);
        ParseError::Encoding(e.to_string())
    })?;
    normalize(text)
}

/// Parses markup into an ordered tree: `{root_name: value}`.
pub fn normalize(markup: &str) -> Result<NormalizedDocument, ParseError> {
    if markup.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut reader = Reader::from_str(markup);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Malformed(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(ParseError::Malformed("multiple root elements".to_string()));
                }
                stack.push(Frame::open(&start)?);
            }
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.fields, name, value),
                    None if root.is_none() => root = Some((name, value)),
                    None => return Err(ParseError::Malformed("multiple root elements".to_string())),
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| ParseError::Malformed(e.to_string()))?;
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(&text),
                    None => {
                        return Err(ParseError::Malformed(format!(
                            "text outside the root element: {:?}",
                            text
                        )))
                    }
                }
            }
            Event::CData(data) => {
                let data = data.into_inner();
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(&String::from_utf8_lossy(&data)),
                    None => return Err(ParseError::Malformed("CDATA outside the root element".to_string())),
                }
            }
            Event::End(_) => {
                // Tag names are checked against the open element by the reader.
                let frame = stack
                    .pop()
                    .ok_or_else(|| ParseError::Malformed("unbalanced closing tag".to_string()))?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.fields, name, value),
                    None => root = Some((name, value)),
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Malformed(format!(
            "document ended inside <{}>",
            open.name
        )));
    }
    let (name, value) = root.ok_or(ParseError::Empty)?;
    debug!("Normalized document with root <{}>", name);

    let mut doc = Map::new();
    doc.insert(name, value);
    Ok(Value::Object(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repeated_children_become_sequences() {
        let doc = normalize(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <Root>
              <ChainId>7290027600007</ChainId>
              <Items Count="2">
                <Item><ItemCode>1</ItemCode><ItemPrice>5.90</ItemPrice></Item>
                <Item><ItemCode>2</ItemCode><ItemPrice>3.00</ItemPrice></Item>
              </Items>
            </Root>"#,
        )
        .unwrap();
        assert_eq!(
            doc,
            json!({"Root": {
                "ChainId": "7290027600007",
                "Items": {
                    "@Count": "2",
                    "Item": [
                        {"ItemCode": "1", "ItemPrice": "5.90"},
                        {"ItemCode": "2", "ItemPrice": "3.00"}
                    ]
                }
            }})
        );
    }

    #[test]
    fn single_child_stays_scalar() {
        let doc = normalize("<Root><Items><Item><ItemCode>1</ItemCode></Item></Items></Root>").unwrap();
        assert!(doc["Root"]["Items"]["Item"].is_object());
    }

    #[test]
    fn preserves_key_order() {
        let doc = normalize("<R><b>1</b><a>2</a><c/></R>").unwrap();
        let keys: Vec<&String> = doc["R"].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["b", "a", "c"]);
        assert_eq!(doc["R"]["c"], Value::Null);
    }

    #[test]
    fn text_with_attributes_and_entities() {
        let doc = normalize(r#"<R><Name lang="he">Milk &amp; Honey</Name><D><![CDATA[<b>x</b>]]></D></R>"#).unwrap();
        assert_eq!(doc["R"]["Name"], json!({"@lang": "he", "#text": "Milk & Honey"}));
        assert_eq!(doc["R"]["D"], "<b>x</b>");
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(normalize(""), Err(ParseError::Empty)));
        assert!(matches!(normalize("  \n "), Err(ParseError::Empty)));
        assert!(matches!(normalize("<?xml version=\"1.0\"?>"), Err(ParseError::Empty)));
    }

    #[test]
    fn rejects_malformed_markup() {
        assert!(matches!(normalize("<Root><Items></Root>"), Err(ParseError::Malformed(_))));
        assert!(matches!(normalize("<Root><Items>"), Err(ParseError::Malformed(_))));
        assert!(matches!(normalize("<A/><B/>"), Err(ParseError::Malformed(_))));
        assert!(matches!(normalize("just text"), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn decodes_bytes_with_bom_and_rejects_bad_encoding() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("<R><N>חלב</N></R>".as_bytes());
        assert_eq!(normalize_bytes(&bytes).unwrap()["R"]["N"], "חלב");
        assert!(matches!(normalize_bytes(&[b'<', 0xff, 0xfe, b'>']), Err(ParseError::Encoding(_))));
    }
}
