use std::{cmp::Ordering, fmt::{self, Display}};

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{frame::Frame, tree};

pub type Guid = Uuid;

/// Fixed-point rational number. The denominator is always positive.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Numeric {
    num: i64,
    denom: i64,
}

impl Numeric {
    pub const ZERO: Numeric = Numeric { num: 0, denom: 1 };

    /// Returns `None` for a zero denominator or when normalizing the sign overflows.
    pub fn new(num: i64, denom: i64) -> Option<Self> {
        match denom.cmp(&0) {
            Ordering::Equal => None,
            Ordering::Greater => Some(Self { num, denom }),
            Ordering::Less => Some(Self {
                num: num.checked_neg()?,
                denom: denom.checked_neg()?,
            }),
        }
    }

    pub fn from_int(value: i64) -> Self {
        Self { num: value, denom: 1 }
    }

    pub fn num(&self) -> i64 {
        self.num
    }

    pub fn denom(&self) -> i64 {
        self.denom
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    pub fn to_decimal(&self) -> Option<Decimal> {
        Decimal::from(self.num).checked_div(Decimal::from(self.denom))
    }

    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let num = i64::try_from(value.mantissa()).ok()?;
        let denom = 10i64.checked_pow(value.scale())?;
        Self::new(num, denom)
    }
}

impl Default for Numeric {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Ord for Numeric {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.denom as i128;
        let rhs = other.num as i128 * self.denom as i128;
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Numeric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Numeric {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Numeric {}

impl Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.denom)
    }
}

/// Discriminant of a [`Value`]. Declaration order is the cross-tag sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueTag {
    Int64,
    Double,
    Numeric,
    String,
    Guid,
    Timestamp,
    Blob,
    List,
    Frame,
}

impl Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueTag::Int64 => "int64",
            ValueTag::Double => "double",
            ValueTag::Numeric => "numeric",
            ValueTag::String => "string",
            ValueTag::Guid => "guid",
            ValueTag::Timestamp => "timestamp",
            ValueTag::Blob => "blob",
            ValueTag::List => "list",
            ValueTag::Frame => "frame",
        };
        f.write_str(name)
    }
}

/// A payload stored in a [`Frame`] slot. Owns everything reachable from it,
/// so `clone` is always a deep copy.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Int64(i64),
    Double(f64),
    Numeric(Numeric),
    String(String),
    Guid(Guid),
    Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Blob(Vec<u8>),
    List(Vec<Value>),
    Frame(Frame),
}

impl Value {
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Int64(_) => ValueTag::Int64,
            Value::Double(_) => ValueTag::Double,
            Value::Numeric(_) => ValueTag::Numeric,
            Value::String(_) => ValueTag::String,
            Value::Guid(_) => ValueTag::Guid,
            Value::Timestamp(_) => ValueTag::Timestamp,
            Value::Blob(_) => ValueTag::Blob,
            Value::List(_) => ValueTag::List,
            Value::Frame(_) => ValueTag::Frame,
        }
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<Numeric> {
        match self {
            Value::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Guid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<OffsetDateTime> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            Value::Frame(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_frame_mut(&mut self) -> Option<&mut Frame> {
        match self {
            Value::Frame(f) => Some(f),
            _ => None,
        }
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        tree::deep_copy(self)
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        tree::compare_values(self, other)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        tree::write_value(f, self)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Numeric> for Value {
    fn from(value: Numeric) -> Self {
        Value::Numeric(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Guid> for Value {
    fn from(value: Guid) -> Self {
        Value::Guid(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Frame> for Value {
    fn from(value: Frame) -> Self {
        Value::Frame(value)
    }
}
