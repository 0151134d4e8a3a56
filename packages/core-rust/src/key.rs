//! Record keys and their order-preserving byte encoding.
//!
//! A [`RecordKey`] is either a number or a string, matching the key types an
//! embedded object store accepts. Keys order numbers before strings, numbers
//! by value and strings by UTF-8 bytes. The same type doubles as the value
//! type of secondary indexes.
//!
//! [`RecordKey::encode`] maps keys to bytes such that byte-wise comparison
//! of encodings agrees with [`Ord`] on keys. Storage engines use the
//! encoding directly as table keys, so range scans come back in key order.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

const TAG_NUMBER: u8 = 0x10;
const TAG_TEXT: u8 = 0x20;

/// Primary key or secondary index value.
#[derive(Debug, Clone)]
pub enum RecordKey {
    /// Numeric key. Never NaN.
    Number(f64),
    /// String key.
    Text(String),
}

impl RecordKey {
    /// Extracts a key from a JSON value.
    ///
    /// Returns `None` for values that cannot act as keys: null, booleans,
    /// arrays, objects, and numbers that are not finite.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts the key back to JSON.
    ///
    /// Integral numbers inside the `i64` range come back as JSON integers.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => match integral(*n) {
                Some(i) => Value::from(i),
                None => Value::from(*n),
            },
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// Returns the key as an integer, if it is an integral number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => integral(*n),
            Self::Text(_) => None,
        }
    }

    /// Returns the key as a string slice, if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    /// Order-preserving byte encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Number(n) => {
                let mut out = Vec::with_capacity(9);
                out.push(TAG_NUMBER);
                out.extend_from_slice(&sortable_bits(*n).to_be_bytes());
                out
            }
            Self::Text(s) => {
                let mut out = Vec::with_capacity(1 + s.len());
                out.push(TAG_TEXT);
                out.extend_from_slice(s.as_bytes());
                out
            }
        }
    }

    /// Inverse of [`encode`](Self::encode). Returns `None` on malformed input.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        match tag {
            TAG_NUMBER => {
                let raw: [u8; 8] = rest.try_into().ok()?;
                Some(Self::Number(unsortable_bits(u64::from_be_bytes(raw))))
            }
            TAG_TEXT => std::str::from_utf8(rest)
                .ok()
                .map(|s| Self::Text(s.to_string())),
            _ => None,
        }
    }
}

/// Flips the sign bit of non-negative floats and every bit of negative
/// ones, so the resulting integers sort like the floats.
fn sortable_bits(n: f64) -> u64 {
    // -0.0 and 0.0 compare equal as keys.
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    if bits & (1 << 63) == 0 {
        bits | (1 << 63)
    } else {
        !bits
    }
}

fn unsortable_bits(bits: u64) -> f64 {
    if bits & (1 << 63) == 0 {
        f64::from_bits(!bits)
    } else {
        f64::from_bits(bits & !(1 << 63))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => sortable_bits(*a).cmp(&sortable_bits(*b)),
            (Self::Text(a), Self::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RecordKey {}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => match integral(*n) {
                Some(i) => write!(f, "{i}"),
                None => write!(f, "{n}"),
            },
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RecordKey {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<u64> for RecordKey {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
