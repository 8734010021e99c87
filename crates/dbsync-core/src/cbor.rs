//! Rendering of embedded CBOR payloads (metadata, datums) as JSON.

/// Decode a CBOR payload and render it as JSON.
///
/// Chain data may legally hold payloads with no JSON rendering (byte-string
/// map keys, non-finite floats) or non-canonical encodings; those yield
/// `None` and the caller stores the column as null.
pub fn to_json(bytes: &[u8]) -> Option<String> {
    let value: serde_cbor::Value = serde_cbor::from_slice(bytes).ok()?;
    serde_json::to_string(&value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use serde_cbor::Value;

    #[test]
    fn text_map_renders() {
        let mut map = BTreeMap::new();
        map.insert(Value::Text("msg".into()), Value::Text("hi".into()));
        let bytes = serde_cbor::to_vec(&Value::Map(map)).unwrap();
        assert_eq!(to_json(&bytes).as_deref(), Some(r#"{"msg":"hi"}"#));
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(to_json(&[0xff, 0x00, 0x13]), None);
        assert_eq!(to_json(&[]), None);
    }
}
