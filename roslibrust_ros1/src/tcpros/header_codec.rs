//! The length-prefixed `key=value` connection header block used by every TCPROS-family
//! protocol (topic connections and service connections alike).
//!
//! Wire form: a `u32` little-endian total byte length, followed by that many bytes of fields.
//! Each field is itself a `u32` little-endian length followed by that many UTF-8 bytes spelling
//! `key=value`. There is no trailer.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashSet;
use std::io::Cursor;

use crate::error::TcprosError;

/// An ordered `key=value` field list, preserving insertion order.
pub type HeaderFields = Vec<(String, String)>;

/// Encodes `fields` into the framed wire format described above.
///
/// Encoding never fails: any `String` is valid UTF-8 already, and callers are trusted not to
/// pass keys containing `=` (the decode side is what has to defend against malformed input).
pub fn encode(fields: &HeaderFields) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, value) in fields {
        let field = format!("{key}={value}");
        body.write_u32::<LittleEndian>(field.len() as u32).unwrap();
        body.extend_from_slice(field.as_bytes());
    }

    let mut framed = Vec::with_capacity(body.len() + 4);
    framed
        .write_u32::<LittleEndian>(body.len() as u32)
        .unwrap();
    framed.extend_from_slice(&body);
    framed
}

/// Decodes a single connection-header block (the `total_length` prefix and all fields, but not
/// the length prefix itself -- callers have typically already peeled that off to know how many
/// bytes to read off the wire; `bytes` here is the `total_length` payload only).
///
/// Fails with [TcprosError::MalformedHeader] if any field is too short to contain its declared
/// length, lacks an `=`, or a key is repeated.
pub fn decode(bytes: &[u8]) -> Result<HeaderFields, TcprosError> {
    let mut cursor = Cursor::new(bytes);
    let mut fields = Vec::new();
    let mut seen_keys = HashSet::new();

    while (cursor.position() as usize) < bytes.len() {
        let remaining = bytes.len() - cursor.position() as usize;
        if remaining < 4 {
            return Err(TcprosError::MalformedHeader(
                "truncated field length prefix".to_string(),
            ));
        }
        let field_len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| TcprosError::MalformedHeader(e.to_string()))? as usize;
        let remaining = bytes.len() - cursor.position() as usize;
        if field_len > remaining {
            return Err(TcprosError::MalformedHeader(format!(
                "field declared length {field_len} exceeds remaining {remaining} bytes"
            )));
        }
        let start = cursor.position() as usize;
        let field_bytes = &bytes[start..start + field_len];
        cursor.set_position((start + field_len) as u64);

        let field_str = std::str::from_utf8(field_bytes)
            .map_err(|e| TcprosError::MalformedHeader(e.to_string()))?;
        let (key, value) = field_str.split_once('=').ok_or_else(|| {
            TcprosError::MalformedHeader(format!("field {field_str:?} has no '='"))
        })?;

        if !seen_keys.insert(key.to_string()) {
            return Err(TcprosError::MalformedHeader(format!(
                "duplicate header key {key:?}"
            )));
        }
        fields.push((key.to_string(), value.to_string()));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HeaderFields {
        vec![
            ("callerid".to_string(), "/talker".to_string()),
            ("topic".to_string(), "/chatter".to_string()),
            ("type".to_string(), "std_msgs/String".to_string()),
            ("md5sum".to_string(), "992ce8a1687cec8c8bd883ec73ca41d1".to_string()),
        ]
    }

    #[test]
    fn round_trips() {
        let fields = sample();
        let bytes = encode(&fields);
        // Strip the leading total-length prefix the way a real reader would.
        let total_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        assert_eq!(total_len, bytes.len() - 4);
        let decoded = decode(&bytes[4..]).unwrap();
        assert_eq!(decoded, fields);
    }

    #[test]
    fn rejects_field_without_equals() {
        let mut body = Vec::new();
        let field = "not_a_kv_pair";
        body.write_u32::<LittleEndian>(field.len() as u32).unwrap();
        body.extend_from_slice(field.as_bytes());
        assert!(matches!(
            decode(&body),
            Err(TcprosError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_length_prefix_overrunning_buffer() {
        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(100).unwrap();
        body.extend_from_slice(b"short");
        assert!(matches!(
            decode(&body),
            Err(TcprosError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let mut body = Vec::new();
        for field in ["a=1", "a=2"] {
            body.write_u32::<LittleEndian>(field.len() as u32).unwrap();
            body.extend_from_slice(field.as_bytes());
        }
        assert!(matches!(
            decode(&body),
            Err(TcprosError::MalformedHeader(_))
        ));
    }
}
