//! Runtime values and object identity.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Stable identity of a heap object for its whole lifetime.
///
/// Ids are never reused within one runtime; the heap address an id lives
/// at is unstable across compactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// A value held in a field, argument, or return slot.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
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
    /// Seconds and subsecond nanoseconds.
    TimeSpan(u64, u32),
    Guid(Uuid),
    /// A member of an enumeration type.
    Enum { enum_type: String, member: String },
    /// A homogeneous array of non-reference values.
    Array {
        element_type: String,
        elements: Vec<Value>,
    },
    /// A reference to a heap object.
    Object(ObjectId),
    /// A reference to a type rather than an instance.
    Type { assembly: String, full_name: String },
    /// Stand-in for a by-ref argument that cannot be proxied; any use
    /// inside an interceptor fails with `PoisonedArgument`.
    Sentinel,
}

impl Value {
    /// The full type name this value reports for dispatch purposes.
    pub fn type_name(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some("System.Boolean".to_string()),
            Value::I8(_) => Some("System.SByte".to_string()),
            Value::I16(_) => Some("System.Int16".to_string()),
            Value::I32(_) => Some("System.Int32".to_string()),
            Value::I64(_) => Some("System.Int64".to_string()),
            Value::U8(_) => Some("System.Byte".to_string()),
            Value::U16(_) => Some("System.UInt16".to_string()),
            Value::U32(_) => Some("System.UInt32".to_string()),
            Value::U64(_) => Some("System.UInt64".to_string()),
            Value::F32(_) => Some("System.Single".to_string()),
            Value::F64(_) => Some("System.Double".to_string()),
            Value::Str(_) => Some("System.String".to_string()),
            Value::DateTime(_) => Some("System.DateTime".to_string()),
            Value::TimeSpan(..) => Some("System.TimeSpan".to_string()),
            Value::Guid(_) => Some("System.Guid".to_string()),
            Value::Enum { enum_type, .. } => Some(enum_type.clone()),
            Value::Array { element_type, .. } => Some(format!("{element_type}[]")),
            // Object and Type names need the heap; the runtime resolves them.
            Value::Object(_) | Value::Type { .. } | Value::Sentinel => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The object id, when this value references a heap object.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Coerce to `i64` for numeric convenience in method bodies.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(i64::from(*v)),
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::U8(v) => Some(i64::from(*v)),
            Value::U16(v) => Some(i64::from(*v)),
            Value::U32(v) => Some(i64::from(*v)),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Deterministic hash code for an object identity.
///
/// Mirrors a managed runtime's identity hash: stable for the object's
/// lifetime, unrelated to the object's address.
pub fn identity_hashcode(id: ObjectId) -> i32 {
    // splitmix64 finaliser, folded to 31 bits like managed hash codes.
    let mut x = id.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    (x & 0x7fff_ffff) as i32
}
