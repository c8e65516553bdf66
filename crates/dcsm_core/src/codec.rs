use std::path::Path;

use percent_encoding::percent_decode;
use serde_json::Value as JsonValue;

use crate::document::SaveDocument;
use crate::envelope::{Envelope, EscapeProfile, JsonLayout};
use crate::error::{CoreError, EncodeError, FormatError};
use crate::field_path::FieldPath;
use crate::fsutil;
use crate::node::Node;

pub fn decode(bytes: &[u8]) -> Result<SaveDocument, FormatError> {
    let raw = std::str::from_utf8(bytes).map_err(|source| FormatError::InvalidUtf8 {
        stage: "before unescaping",
        source,
    })?;
    decode_str(raw)
}

pub fn decode_str(raw: &str) -> Result<SaveDocument, FormatError> {
    let body = raw.trim_matches(|c: char| c.is_ascii_whitespace());
    if body.is_empty() {
        return Err(FormatError::Empty);
    }
    let start = raw.len() - raw.trim_start_matches(|c: char| c.is_ascii_whitespace()).len();
    let end = start + body.len();

    let text = percent_decode(body.as_bytes())
        .decode_utf8()
        .map_err(|source| FormatError::InvalidUtf8 {
            stage: "after unescaping",
            source,
        })?;
    let root = parse_json(&text)?;
    let envelope = Envelope {
        escapes: EscapeProfile::detect(body),
        layout: JsonLayout::detect(&root, &text),
        leading: raw[..start].to_string(),
        trailing: raw[end..].to_string(),
    };
    log::debug!(
        "decoded {} byte artifact (layout {:?}, canonical escapes: {})",
        raw.len(),
        envelope.layout,
        envelope.escapes.is_canonical()
    );
    Ok(SaveDocument::from_parts(root, envelope))
}

/// Reads and decodes any artifact, whatever its root shape.
pub fn decode_file(path: impl AsRef<Path>) -> crate::error::Result<SaveDocument> {
    let path = path.as_ref();
    let bytes = fsutil::read(path)?;
    decode(&bytes).map_err(|e| CoreError::format(path, e))
}

pub fn encode(document: &SaveDocument) -> Result<Vec<u8>, EncodeError> {
    encode_to_string(document).map(String::into_bytes)
}

pub fn encode_to_string(document: &SaveDocument) -> Result<String, EncodeError> {
    encode_with(document.root(), document.envelope())
}

/// Encodes a bare node with the canonical envelope.
pub fn encode_node(node: &Node) -> Result<Vec<u8>, EncodeError> {
    encode_with(node, &Envelope::default()).map(String::into_bytes)
}

pub(crate) fn encode_with(node: &Node, envelope: &Envelope) -> Result<String, EncodeError> {
    check_unique_keys(node, &mut FieldPath::root())?;
    let text = envelope.layout.render(node)?;
    let escaped = envelope.escapes.apply(&text);
    let mut out =
        String::with_capacity(envelope.leading.len() + escaped.len() + envelope.trailing.len());
    out.push_str(&envelope.leading);
    out.push_str(&escaped);
    out.push_str(&envelope.trailing);
    Ok(out)
}

/// Accepts a percent-encoded artifact or a plain JSON document.
pub fn decode_json_or_encoded(bytes: &[u8]) -> Result<Node, FormatError> {
    match decode(bytes) {
        Ok(document) => Ok(document.into_root()),
        Err(FormatError::Json(encoded_err)) => {
            let text = std::str::from_utf8(bytes).map_err(|source| FormatError::InvalidUtf8 {
                stage: "before unescaping",
                source,
            })?;
            parse_json(text.trim()).map_err(|raw_err| {
                log::debug!("payload is neither encoded ({encoded_err}) nor raw JSON");
                raw_err
            })
        }
        Err(FormatError::InvalidUtf8 { .. }) => {
            // A raw JSON payload may contain a bare '%' followed by non-UTF-8 escapes.
            let text = std::str::from_utf8(bytes).map_err(|source| FormatError::InvalidUtf8 {
                stage: "before unescaping",
                source,
            })?;
            parse_json(text.trim())
        }
        Err(other) => Err(other),
    }
}

/// Parses JSON text; duplicate keys resolve to the last value at the first position.
pub(crate) fn parse_json(text: &str) -> Result<Node, FormatError> {
    let value: JsonValue = serde_json::from_str(text)?;
    Ok(Node::from(value))
}

fn check_unique_keys(node: &Node, path: &mut FieldPath) -> Result<(), EncodeError> {
    match node {
        Node::Mapping(map) => {
            if let Some(key) = map.first_duplicate_key() {
                return Err(EncodeError::DuplicateKey {
                    path: path.clone(),
                    key: key.to_string(),
                });
            }
            for (key, child) in map.iter() {
                path.push_key(key);
                let result = check_unique_keys(child, path);
                path.pop();
                result?;
            }
        }
        Node::Sequence(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push_index(index);
                let result = check_unique_keys(child, path);
                path.pop();
                result?;
            }
        }
        _ => {}
    }
    Ok(())
}

pub(crate) fn expect_mapping(node: &Node, path: &FieldPath) -> Result<(), FormatError> {
    match node {
        Node::Mapping(_) => Ok(()),
        other => Err(FormatError::UnexpectedShape {
            path: path.clone(),
            expected: "mapping",
            found: other.kind_name(),
        }),
    }
}

pub(crate) fn expect_sequence(node: &Node, path: &FieldPath) -> Result<(), FormatError> {
    match node {
        Node::Sequence(_) => Ok(()),
        other => Err(FormatError::UnexpectedShape {
            path: path.clone(),
            expected: "sequence",
            found: other.kind_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_newline_and_lower_hex_survive_reencoding() {
        let raw = "%7b%22a%22%3a%5b1%2c2.50%5d%7d\n";
        let document = decode(raw.as_bytes()).expect("decode");
        assert_eq!(encode_to_string(&document).expect("encode"), raw);
    }

    #[test]
    fn empty_and_whitespace_only_inputs_are_rejected() {
        assert!(matches!(decode(b""), Err(FormatError::Empty)));
        assert!(matches!(decode(b" \r\n"), Err(FormatError::Empty)));
    }

    #[test]
    fn raw_json_is_accepted_by_lenient_decoder() {
        let node = decode_json_or_encoded(b"{\"rate\": \"50%\"}").expect("decode");
        assert_eq!(
            node.as_mapping()
                .and_then(|m| m.get("rate"))
                .and_then(Node::as_str),
            Some("50%")
        );
    }
}
