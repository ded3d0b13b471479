//! Primitive value encoding.
//!
//! Primitives cross the wire as `(type name, canonical text)` pairs that
//! round-trip exactly through `parse`/`to_string`. Arrays of primitives
//! are encoded as comma-separated elements with backslash-escaped commas;
//! an empty array encodes to the empty string. Non-primitives are never
//! encoded by value: they are pinned and referenced by token instead.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use periscope_types::value::{RemoteValue, ValuePayload};

use crate::{Result, WireError};

pub const TYPE_BOOL: &str = "System.Boolean";
pub const TYPE_I8: &str = "System.SByte";
pub const TYPE_I16: &str = "System.Int16";
pub const TYPE_I32: &str = "System.Int32";
pub const TYPE_I64: &str = "System.Int64";
pub const TYPE_U8: &str = "System.Byte";
pub const TYPE_U16: &str = "System.UInt16";
pub const TYPE_U32: &str = "System.UInt32";
pub const TYPE_U64: &str = "System.UInt64";
pub const TYPE_F32: &str = "System.Single";
pub const TYPE_F64: &str = "System.Double";
pub const TYPE_STRING: &str = "System.String";
pub const TYPE_DATETIME: &str = "System.DateTime";
pub const TYPE_TIMESPAN: &str = "System.TimeSpan";
pub const TYPE_GUID: &str = "System.Guid";

/// Wire type name for the by-ref poison sentinel the agent substitutes
/// for arguments it cannot proxy.
pub const SENTINEL_TYPE: &str = "Periscope.ByRefSentinel";

/// A primitive value with a canonical textual form.
#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    DateTime(DateTime<Utc>),
    /// A time span as (seconds, subsecond nanoseconds).
    TimeSpan(u64, u32),
    Guid(Uuid),
    /// An enumeration member, carried by type and member name.
    Enum { enum_type: String, member: String },
    /// A homogeneous array of primitives.
    Array {
        element_type: String,
        elements: Vec<Primitive>,
    },
}

impl Primitive {
    /// The wire type name for this value.
    pub fn type_name(&self) -> String {
        match self {
            Primitive::Bool(_) => TYPE_BOOL.to_string(),
            Primitive::I8(_) => TYPE_I8.to_string(),
            Primitive::I16(_) => TYPE_I16.to_string(),
            Primitive::I32(_) => TYPE_I32.to_string(),
            Primitive::I64(_) => TYPE_I64.to_string(),
            Primitive::U8(_) => TYPE_U8.to_string(),
            Primitive::U16(_) => TYPE_U16.to_string(),
            Primitive::U32(_) => TYPE_U32.to_string(),
            Primitive::U64(_) => TYPE_U64.to_string(),
            Primitive::F32(_) => TYPE_F32.to_string(),
            Primitive::F64(_) => TYPE_F64.to_string(),
            Primitive::Str(_) => TYPE_STRING.to_string(),
            Primitive::DateTime(_) => TYPE_DATETIME.to_string(),
            Primitive::TimeSpan(..) => TYPE_TIMESPAN.to_string(),
            Primitive::Guid(_) => TYPE_GUID.to_string(),
            Primitive::Enum { enum_type, .. } => enum_type.clone(),
            Primitive::Array { element_type, .. } => format!("{element_type}[]"),
        }
    }

    /// The canonical textual form.
    pub fn to_text(&self) -> String {
        match self {
            Primitive::Bool(v) => v.to_string(),
            Primitive::I8(v) => v.to_string(),
            Primitive::I16(v) => v.to_string(),
            Primitive::I32(v) => v.to_string(),
            Primitive::I64(v) => v.to_string(),
            Primitive::U8(v) => v.to_string(),
            Primitive::U16(v) => v.to_string(),
            Primitive::U32(v) => v.to_string(),
            Primitive::U64(v) => v.to_string(),
            Primitive::F32(v) => v.to_string(),
            Primitive::F64(v) => v.to_string(),
            Primitive::Str(v) => v.clone(),
            Primitive::DateTime(v) => v.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Primitive::TimeSpan(secs, nanos) => format!("{secs}.{nanos:09}"),
            Primitive::Guid(v) => v.to_string(),
            Primitive::Enum { member, .. } => member.clone(),
            Primitive::Array { elements, .. } => {
                let escaped: Vec<String> = elements
                    .iter()
                    .map(|e| escape_element(&e.to_text()))
                    .collect();
                escaped.join(",")
            }
        }
    }

    /// Lift into a wire value with the given timestamp.
    pub fn to_remote(&self, stamp_ms: u64) -> RemoteValue {
        RemoteValue::encoded(stamp_ms, self.type_name(), self.to_text())
    }
}

fn escape_element(text: &str) -> String {
    text.replace('\\', "\\\\").replace(',', "\\,")
}

/// Split an array body on unescaped commas and unescape each element.
fn split_elements(text: &str) -> Vec<String> {
    let mut elements = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                // An escape applies to the next character verbatim.
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' => {
                elements.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    elements.push(current);
    elements
}

/// Decode a `(type name, text)` pair back into a primitive.
///
/// # Errors
///
/// Returns [`WireError::UnknownPrimitive`] when `type_name` names no
/// supported primitive (the caller may then consult the target runtime,
/// e.g. for enum types) and [`WireError::InvalidValue`] when the text
/// does not parse as the declared type.
pub fn decode(type_name: &str, text: &str) -> Result<Primitive> {
    if let Some(element_type) = type_name.strip_suffix("[]") {
        // Empty text is the canonical form of the empty array.
        if text.is_empty() {
            return Ok(Primitive::Array {
                element_type: element_type.to_string(),
                elements: Vec::new(),
            });
        }
        let elements = split_elements(text)
            .into_iter()
            .map(|e| decode(element_type, &e))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Primitive::Array {
            element_type: element_type.to_string(),
            elements,
        });
    }

    fn bad(type_name: &str, text: &str) -> WireError {
        WireError::InvalidValue(format!("'{text}' is not a valid {type_name}"))
    }

    match type_name {
        TYPE_BOOL => text
            .parse()
            .map(Primitive::Bool)
            .map_err(|_| bad(type_name, text)),
        TYPE_I8 => text
            .parse()
            .map(Primitive::I8)
            .map_err(|_| bad(type_name, text)),
        TYPE_I16 => text
            .parse()
            .map(Primitive::I16)
            .map_err(|_| bad(type_name, text)),
        TYPE_I32 => text
            .parse()
            .map(Primitive::I32)
            .map_err(|_| bad(type_name, text)),
        TYPE_I64 => text
            .parse()
            .map(Primitive::I64)
            .map_err(|_| bad(type_name, text)),
        TYPE_U8 => text
            .parse()
            .map(Primitive::U8)
            .map_err(|_| bad(type_name, text)),
        TYPE_U16 => text
            .parse()
            .map(Primitive::U16)
            .map_err(|_| bad(type_name, text)),
        TYPE_U32 => text
            .parse()
            .map(Primitive::U32)
            .map_err(|_| bad(type_name, text)),
        TYPE_U64 => text
            .parse()
            .map(Primitive::U64)
            .map_err(|_| bad(type_name, text)),
        TYPE_F32 => text
            .parse()
            .map(Primitive::F32)
            .map_err(|_| bad(type_name, text)),
        TYPE_F64 => text
            .parse()
            .map(Primitive::F64)
            .map_err(|_| bad(type_name, text)),
        TYPE_STRING => Ok(Primitive::Str(text.to_string())),
        TYPE_DATETIME => DateTime::parse_from_rfc3339(text)
            .map(|dt| Primitive::DateTime(dt.with_timezone(&Utc)))
            .map_err(|_| bad(type_name, text)),
        TYPE_TIMESPAN => {
            let (secs, nanos) = text.split_once('.').ok_or_else(|| bad(type_name, text))?;
            let secs = secs.parse().map_err(|_| bad(type_name, text))?;
            if nanos.len() != 9 {
                return Err(bad(type_name, text));
            }
            let nanos: u32 = nanos.parse().map_err(|_| bad(type_name, text))?;
            if nanos >= 1_000_000_000 {
                return Err(bad(type_name, text));
            }
            Ok(Primitive::TimeSpan(secs, nanos))
        }
        TYPE_GUID => text
            .parse()
            .map(Primitive::Guid)
            .map_err(|_| bad(type_name, text)),
        other => Err(WireError::UnknownPrimitive(other.to_string())),
    }
}

/// True when `type_name` is encodable by value (including arrays of such).
pub fn is_primitive_type(type_name: &str) -> bool {
    let element = type_name.strip_suffix("[]").unwrap_or(type_name);
    matches!(
        element,
        TYPE_BOOL
            | TYPE_I8
            | TYPE_I16
            | TYPE_I32
            | TYPE_I64
            | TYPE_U8
            | TYPE_U16
            | TYPE_U32
            | TYPE_U64
            | TYPE_F32
            | TYPE_F64
            | TYPE_STRING
            | TYPE_DATETIME
            | TYPE_TIMESPAN
            | TYPE_GUID
    )
}

/// Decode the primitive carried by a wire value, if it carries one.
pub fn from_remote(value: &RemoteValue) -> Result<Option<Primitive>> {
    match &value.payload {
        ValuePayload::Encoded { type_name, text } => decode(type_name, text).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn roundtrip(p: Primitive) {
        let type_name = p.type_name();
        let text = p.to_text();
        let back = decode(&type_name, &text).expect("decode");
        assert_eq!(back, p, "roundtrip failed for {type_name}");
    }

    #[test]
    fn test_scalar_roundtrips() {
        roundtrip(Primitive::Bool(true));
        roundtrip(Primitive::I8(-12));
        roundtrip(Primitive::I16(-3_000));
        roundtrip(Primitive::I32(1_234_567));
        roundtrip(Primitive::I64(-9_000_000_000));
        roundtrip(Primitive::U8(255));
        roundtrip(Primitive::U16(65_535));
        roundtrip(Primitive::U32(4_000_000_000));
        roundtrip(Primitive::U64(u64::MAX));
        roundtrip(Primitive::F32(1.5));
        roundtrip(Primitive::F64(std::f64::consts::PI));
        roundtrip(Primitive::Str("hello, world".to_string()));
        roundtrip(Primitive::Guid(Uuid::new_v4()));
        roundtrip(Primitive::TimeSpan(90, 500_000_000));
    }

    #[test]
    fn test_datetime_roundtrip() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).single().expect("valid");
        roundtrip(Primitive::DateTime(dt));
    }

    #[test]
    fn test_array_roundtrip() {
        roundtrip(Primitive::Array {
            element_type: TYPE_I32.to_string(),
            elements: vec![Primitive::I32(1), Primitive::I32(-2), Primitive::I32(3)],
        });
    }

    #[test]
    fn test_array_with_commas_and_backslashes() {
        roundtrip(Primitive::Array {
            element_type: TYPE_STRING.to_string(),
            elements: vec![
                Primitive::Str("a,b".to_string()),
                Primitive::Str("c\\d".to_string()),
                Primitive::Str(String::new()),
            ],
        });
    }

    #[test]
    fn test_empty_array_encodes_to_empty_text() {
        let p = Primitive::Array {
            element_type: TYPE_U8.to_string(),
            elements: vec![],
        };
        assert_eq!(p.to_text(), "");
        roundtrip(p);
    }

    #[test]
    fn test_unknown_primitive_reported() {
        assert!(matches!(
            decode("Demo.Widget", "x"),
            Err(WireError::UnknownPrimitive(_))
        ));
    }

    #[test]
    fn test_invalid_text_reported() {
        assert!(matches!(
            decode(TYPE_I32, "not-a-number"),
            Err(WireError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_is_primitive_type() {
        assert!(is_primitive_type("System.Int32"));
        assert!(is_primitive_type("System.Int32[]"));
        assert!(!is_primitive_type("Demo.Counter"));
    }

    #[test]
    fn test_to_remote_carries_stamp() {
        let rv = Primitive::I32(42).to_remote(777);
        assert_eq!(rv.stamp_ms, 777);
        match rv.payload {
            ValuePayload::Encoded { type_name, text } => {
                assert_eq!(type_name, TYPE_I32);
                assert_eq!(text, "42");
            }
            _ => unreachable!("encoded"),
        }
    }

    #[test]
    fn test_enum_encoding_is_member_name() {
        let p = Primitive::Enum {
            enum_type: "Demo.Color".to_string(),
            member: "Red".to_string(),
        };
        assert_eq!(p.type_name(), "Demo.Color");
        assert_eq!(p.to_text(), "Red");
    }
}
