//! Self-describing tagged-JSON wire codec.
//!
//! Wire values round-trip through the small tagged scheme documented in
//! `SPEC_FULL.md` §4.1: plain JSON scalars pass through untouched, keywords
//! and symbols are tagged scalar strings (`"~:ns/name"`, `"~$?e"`), and
//! richer shapes (uuid, timestamp, datom, error) are two-element arrays of
//! the form `["~#tag", payload]`.

pub mod framing;

use std::fmt;

pub use framing::{FrameCodecError, decode_frame, decode_frame_default, encode_frame,
    encode_frame_default, DEFAULT_MAX_FRAME_BYTES};

/// A keyword attribute or op name, e.g. `block/name` or `thread-api/q`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Keyword(pub String);

impl Keyword {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or(&self.0)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A query variable or function-name symbol, e.g. `?e` or `ground`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(pub String);

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 128-bit UUID, decoded from `["~#uuid", "<text>"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid(pub u128);

impl Uuid {
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let hex: String = text.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err(WireError::Malformed(format!("invalid uuid: {text}")));
        }
        u128::from_str_radix(&hex, 16)
            .map(Uuid)
            .map_err(|_| WireError::Malformed(format!("invalid uuid: {text}")))
    }

    pub fn to_text(self) -> String {
        let hex = format!("{:032x}", self.0);
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

/// A raw `(E, A, V, T, added?)` datom tuple as it crosses the wire. `A` is
/// the plain namespaced attribute string; it is coerced into a schema
/// keyword by the engine's coercion boundary, not by the codec itself.
#[derive(Debug, Clone, PartialEq)]
pub struct WireDatom {
    pub e: i64,
    pub a: String,
    pub v: Box<Value>,
    pub t: i64,
    pub added: bool,
}

/// A tagged error value, decoded from `["~#error", {message, data}]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WireErrorValue {
    pub message: String,
    pub data: Box<Value>,
}

/// A decoded wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(Keyword),
    Symbol(Symbol),
    Uuid(Uuid),
    /// Millisecond-epoch timestamp.
    Inst(i64),
    Datom(WireDatom),
    Error(WireErrorValue),
    Vector(Vec<Value>),
    /// Preserves insertion order; keys are themselves `Value`s so keyword
    /// keys (as in `{:find [...] :where [...]}`) survive the round-trip.
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn keyword(s: impl Into<String>) -> Self {
        Value::Keyword(Keyword::new(s))
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Value::Symbol(Symbol(s.into()))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a keyword-keyed entry in a `Map`, by the keyword's bare text
    /// (without the leading `:`).
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.iter().find_map(|(k, v)| match k {
            Value::Keyword(kw) if kw.0 == key => Some(v),
            Value::Str(s) if s == key => Some(v),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    Malformed(String),
    Frame(FrameCodecError),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Malformed(msg) => write!(f, "codec/malformed: {msg}"),
            WireError::Frame(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<FrameCodecError> for WireError {
    fn from(value: FrameCodecError) -> Self {
        WireError::Frame(value)
    }
}

fn escape_scalar(s: &str) -> String {
    if s.starts_with('~') {
        format!("~~{s}")
    } else {
        s.to_string()
    }
}

fn decode_scalar(s: &str) -> Value {
    if let Some(rest) = s.strip_prefix("~~") {
        Value::Str(rest.to_string())
    } else if let Some(rest) = s.strip_prefix("~:") {
        Value::Keyword(Keyword::new(rest))
    } else if let Some(rest) = s.strip_prefix("~$") {
        Value::Symbol(Symbol(rest.to_string()))
    } else {
        Value::Str(s.to_string())
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::{Value as J, json};
    match value {
        Value::Null => J::Null,
        Value::Bool(b) => J::Bool(*b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Str(s) => J::String(escape_scalar(s)),
        Value::Keyword(k) => J::String(format!("~:{}", k.0)),
        Value::Symbol(s) => J::String(format!("~${}", s.0)),
        Value::Uuid(u) => json!(["~#uuid", u.to_text()]),
        Value::Inst(ms) => json!(["~#inst", ms]),
        Value::Datom(d) => json!(["~#datom", [json!(d.e), json!(d.a), to_json(&d.v), json!(d.t), json!(d.added)]]),
        Value::Error(e) => json!(["~#error", {"message": e.message, "data": to_json(&e.data)}]),
        Value::Vector(items) => J::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in entries {
                let key = match k {
                    Value::Keyword(kw) => format!("~:{}", kw.0),
                    Value::Symbol(s) => format!("~${}", s.0),
                    Value::Str(s) => escape_scalar(s),
                    other => {
                        // Non-scalar map keys are not part of the wire
                        // vocabulary; fall back to their JSON text so
                        // encoding never panics.
                        to_json(other).to_string()
                    }
                };
                obj.insert(key, to_json(v));
            }
            J::Object(obj)
        }
    }
}

fn from_json(json: &serde_json::Value) -> Result<Value, WireError> {
    use serde_json::Value as J;
    match json {
        J::Null => Ok(Value::Null),
        J::Bool(b) => Ok(Value::Bool(*b)),
        J::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(WireError::Malformed(format!("unrepresentable number: {n}")))
            }
        }
        J::String(s) => Ok(decode_scalar(s)),
        J::Array(items) => {
            if let Some(tagged) = decode_tagged_array(items)? {
                Ok(tagged)
            } else {
                Ok(Value::Vector(
                    items.iter().map(from_json).collect::<Result<_, _>>()?,
                ))
            }
        }
        J::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (k, v) in map {
                entries.push((decode_scalar(k), from_json(v)?));
            }
            Ok(Value::Map(entries))
        }
    }
}

fn decode_tagged_array(items: &[serde_json::Value]) -> Result<Option<Value>, WireError> {
    let Some(serde_json::Value::String(tag)) = items.first() else {
        return Ok(None);
    };
    if items.len() != 2 {
        return Ok(None);
    }
    let payload = &items[1];
    match tag.as_str() {
        "~#uuid" => {
            let text = payload
                .as_str()
                .ok_or_else(|| WireError::Malformed("~#uuid payload must be a string".into()))?;
            Ok(Some(Value::Uuid(Uuid::parse(text)?)))
        }
        "~#inst" => {
            let ms = payload
                .as_i64()
                .ok_or_else(|| WireError::Malformed("~#inst payload must be an integer".into()))?;
            Ok(Some(Value::Inst(ms)))
        }
        "~#datom" => {
            let tuple = payload
                .as_array()
                .ok_or_else(|| WireError::Malformed("~#datom payload must be an array".into()))?;
            if tuple.len() != 5 {
                return Err(WireError::Malformed(
                    "~#datom payload must have 5 elements".into(),
                ));
            }
            let e = tuple[0]
                .as_i64()
                .ok_or_else(|| WireError::Malformed("datom E must be an integer".into()))?;
            let a = tuple[1]
                .as_str()
                .ok_or_else(|| WireError::Malformed("datom A must be a string".into()))?
                .to_string();
            let v = Box::new(from_json(&tuple[2])?);
            let t = tuple[3]
                .as_i64()
                .ok_or_else(|| WireError::Malformed("datom T must be an integer".into()))?;
            let added = tuple[4]
                .as_bool()
                .ok_or_else(|| WireError::Malformed("datom added? must be a bool".into()))?;
            Ok(Some(Value::Datom(WireDatom { e, a, v, t, added })))
        }
        "~#error" => {
            let obj = payload
                .as_object()
                .ok_or_else(|| WireError::Malformed("~#error payload must be an object".into()))?;
            let message = obj
                .get("message")
                .and_then(|m| m.as_str())
                .ok_or_else(|| WireError::Malformed("~#error.message must be a string".into()))?
                .to_string();
            let data = Box::new(
                obj.get("data")
                    .map(from_json)
                    .transpose()?
                    .unwrap_or(Value::Null),
            );
            Ok(Some(Value::Error(WireErrorValue { message, data })))
        }
        _ => Ok(None),
    }
}

/// Serialise a value into its wire bytes (UTF-8 JSON text).
pub fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&to_json(value)).expect("wire Value always serialises to valid JSON")
}

/// Parse wire bytes into a typed value. Fails with `WireError::Malformed`
/// on invalid UTF-8/JSON or a tagged form with the wrong shape.
pub fn decode(bytes: &[u8]) -> Result<Value, WireError> {
    let json: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| WireError::Malformed(e.to_string()))?;
    from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_round_trips() {
        let v = Value::keyword("block/name");
        let bytes = encode(&v);
        assert_eq!(bytes, br#""~:block/name""#);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn symbol_round_trips() {
        let v = Value::symbol("?e");
        let bytes = encode(&v);
        assert_eq!(bytes, br#""~$?e""#);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn uuid_round_trips() {
        let uuid = Uuid::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let v = Value::Uuid(uuid);
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn datom_round_trips() {
        let v = Value::Datom(WireDatom {
            e: 1,
            a: "block/name".into(),
            v: Box::new(Value::str("x")),
            t: 7,
            added: true,
        });
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn error_round_trips() {
        let v = Value::Error(WireErrorValue {
            message: "boom".into(),
            data: Box::new(Value::Null),
        });
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn escaped_tilde_string_round_trips() {
        let v = Value::str("~not-a-tag");
        let bytes = encode(&v);
        assert_eq!(bytes, br#""~~~not-a-tag""#);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn map_with_keyword_keys_round_trips() {
        let v = Value::Map(vec![
            (Value::keyword("find"), Value::Vector(vec![Value::symbol("?n")])),
            (Value::keyword("where"), Value::Vector(vec![])),
        ]);
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = decode(b"{not json").unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }

    #[test]
    fn malformed_datom_shape_is_an_error() {
        let err = decode(br#"["~#datom", [1, "a/b"]]"#).unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }
}
