//! Tolerant decoding of sensor payloads.
//!
//! Producers disagree on encoding. Flag topics carry either a JSON object
//! (`{"door_open": true}`) or a bare literal (`true`, `"false"`, `1`). Camera
//! topics carry either a raw base64 string or `{"image": "<base64>"}`. The
//! codec accepts all of them; which decode path runs is chosen by the topic's
//! [`PayloadKind`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde_json::{Map, Value};

use super::error::DecodeError;

const DATA_URL_MARKER: &str = ";base64,";

/// Decode rules for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    /// Boolean carried under `key` or as a bare literal
    Flag { key: String },
    /// `{"temperature": n}` or `{"indoor": n, "outdoor": n}`
    Temperature,
    /// Base64 image, raw or wrapped in `{"image": ...}`
    Image,
}

impl PayloadKind {
    pub fn flag(key: impl Into<String>) -> Self {
        PayloadKind::Flag { key: key.into() }
    }
}

/// Typed value produced from a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Flag(bool),
    Temperature { indoor: f64, outdoor: Option<f64> },
    Image(Bytes),
}

/// Decode `raw` according to `kind`.
pub fn decode(kind: &PayloadKind, raw: &[u8]) -> Result<Decoded, DecodeError> {
    let text = std::str::from_utf8(raw)?.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    match kind {
        PayloadKind::Flag { key } => decode_flag(text, key).map(Decoded::Flag),
        PayloadKind::Temperature => decode_temperature(text),
        PayloadKind::Image => decode_image(text).map(Decoded::Image),
    }
}

fn parse_literal(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("true") || text == "1" {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") || text == "0" {
        Some(false)
    } else {
        None
    }
}

fn flag_from_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_u64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(literal) => parse_literal(literal),
        _ => None,
    }
}

fn decode_flag(text: &str, key: &str) -> Result<bool, DecodeError> {
    if let Some(flag) = parse_literal(text) {
        return Ok(flag);
    }

    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => {
            let value = map
                .get(key)
                .ok_or_else(|| DecodeError::MissingKey(key.to_string()))?;
            flag_from_value(value).ok_or_else(|| DecodeError::UnexpectedType {
                key: key.to_string(),
                expected: "boolean",
            })
        }
        other => flag_from_value(&other)
            .ok_or(DecodeError::UnexpectedShape("object or boolean literal")),
    }
}

fn number_at(map: &Map<String, Value>, key: &str) -> Result<Option<f64>, DecodeError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| DecodeError::UnexpectedType {
                key: key.to_string(),
                expected: "number",
            }),
    }
}

fn decode_temperature(text: &str) -> Result<Decoded, DecodeError> {
    let Value::Object(map) = serde_json::from_str::<Value>(text)? else {
        return Err(DecodeError::UnexpectedShape("JSON object"));
    };

    let indoor = match number_at(&map, "temperature")? {
        Some(value) => value,
        None => number_at(&map, "indoor")?
            .ok_or_else(|| DecodeError::MissingKey("temperature".to_string()))?,
    };
    let outdoor = number_at(&map, "outdoor")?;

    Ok(Decoded::Temperature { indoor, outdoor })
}

fn decode_image(text: &str) -> Result<Bytes, DecodeError> {
    let wrapped = text.starts_with('{') || text.starts_with('"');
    let encoded = if wrapped {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(mut map) => match map.remove("image") {
                Some(Value::String(image)) => image,
                Some(_) => {
                    return Err(DecodeError::UnexpectedType {
                        key: "image".to_string(),
                        expected: "string",
                    })
                }
                None => return Err(DecodeError::MissingKey("image".to_string())),
            },
            Value::String(image) => image,
            _ => return Err(DecodeError::UnexpectedShape("base64 string or object")),
        }
    } else {
        text.to_string()
    };

    // Tolerate a `data:image/jpeg;base64,` prefix.
    let encoded = match encoded.find(DATA_URL_MARKER) {
        Some(index) => &encoded[index + DATA_URL_MARKER.len()..],
        None => encoded.as_str(),
    };
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(Bytes::from(STANDARD.decode(encoded)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(key: &str, raw: &str) -> Result<Decoded, DecodeError> {
        decode(&PayloadKind::flag(key), raw.as_bytes())
    }

    #[test]
    fn flag_from_json_object() {
        assert_eq!(
            flag("motion_detected", r#"{"sensor":"motion_sensor_1","motion_detected":true,"timestamp":1.5}"#).unwrap(),
            Decoded::Flag(true)
        );
        assert_eq!(
            flag("door_open", r#"{"door_open": false}"#).unwrap(),
            Decoded::Flag(false)
        );
    }

    #[test]
    fn flag_from_bare_literals() {
        for (raw, expected) in [
            ("true", true),
            ("false", false),
            ("\"true\"", true),
            (" FALSE \n", false),
            ("1", true),
            ("0", false),
        ] {
            assert_eq!(flag("door_open", raw).unwrap(), Decoded::Flag(expected), "{raw}");
        }
    }

    #[test]
    fn flag_rejects_missing_key_and_wrong_type() {
        assert!(matches!(
            flag("door_open", r#"{"window_open": true}"#),
            Err(DecodeError::MissingKey(key)) if key == "door_open"
        ));
        assert!(matches!(
            flag("door_open", r#"{"door_open": "maybe"}"#),
            Err(DecodeError::UnexpectedType { .. })
        ));
        assert!(matches!(
            flag("door_open", "[true]"),
            Err(DecodeError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            flag("door_open", "{door_open: tru"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode(&PayloadKind::Temperature, b"{\"temperature\": "),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn empty_and_non_utf8_payloads() {
        assert!(matches!(flag("door_open", "   "), Err(DecodeError::Empty)));
        assert!(matches!(
            decode(&PayloadKind::flag("door_open"), &[0xff, 0xfe]),
            Err(DecodeError::Utf8(_))
        ));
    }

    #[test]
    fn temperature_shapes() {
        assert_eq!(
            decode(&PayloadKind::Temperature, br#"{"temperature": 21.5}"#).unwrap(),
            Decoded::Temperature {
                indoor: 21.5,
                outdoor: None
            }
        );
        assert_eq!(
            decode(&PayloadKind::Temperature, br#"{"indoor": 22, "outdoor": 3.5}"#).unwrap(),
            Decoded::Temperature {
                indoor: 22.0,
                outdoor: Some(3.5)
            }
        );
        assert!(matches!(
            decode(&PayloadKind::Temperature, br#"{"humidity": 40}"#),
            Err(DecodeError::MissingKey(_))
        ));
        assert!(matches!(
            decode(&PayloadKind::Temperature, br#"{"temperature": "warm"}"#),
            Err(DecodeError::UnexpectedType { .. })
        ));
        assert!(matches!(
            decode(&PayloadKind::Temperature, b"21.5"),
            Err(DecodeError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn image_raw_and_wrapped() {
        let encoded = STANDARD.encode(b"\xff\xd8jpeg-bytes");
        let expected = Decoded::Image(Bytes::from_static(b"\xff\xd8jpeg-bytes"));

        assert_eq!(decode(&PayloadKind::Image, encoded.as_bytes()).unwrap(), expected);

        let wrapped = format!(r#"{{"image": "{encoded}"}}"#);
        assert_eq!(decode(&PayloadKind::Image, wrapped.as_bytes()).unwrap(), expected);

        let data_url = format!("data:image/jpeg;base64,{encoded}");
        assert_eq!(decode(&PayloadKind::Image, data_url.as_bytes()).unwrap(), expected);
    }

    #[test]
    fn image_errors() {
        assert!(matches!(
            decode(&PayloadKind::Image, b"not base64!!"),
            Err(DecodeError::InvalidBase64(_))
        ));
        assert!(matches!(
            decode(&PayloadKind::Image, br#"{"img": "AAAA"}"#),
            Err(DecodeError::MissingKey(_))
        ));
        assert!(matches!(
            decode(&PayloadKind::Image, br#"{"image": 12}"#),
            Err(DecodeError::UnexpectedType { .. })
        ));
    }
}
