//! Typed values stored in a record's structured fields.

use std::collections::BTreeMap;
use std::fmt;

/// Structured fields keyed by name. Key order carries no meaning.
pub type Fields = BTreeMap<String, FieldValue>;

/// Tagged union for structured field values.
///
/// JSON has no representation for non-finite floats or raw bytes, so the bulk
/// formatter coerces `Float(NaN | inf)` and `Bytes` to strings and marks the
/// document.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
    Map(Fields),
}

impl FieldValue {
    /// Build a nested map from `(key, value)` pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns `true` when JSON can carry the value without coercion.
    pub fn is_faithfully_encodable(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            Self::Bytes(_) => false,
            Self::List(items) => items.iter().all(Self::is_faithfully_encodable),
            Self::Map(map) => map.values().all(Self::is_faithfully_encodable),
            _ => true,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for FieldValue {
    /// Values above `i64::MAX` are stored as floats.
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(Self::Float(value as f64), Self::Int)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(value: Vec<FieldValue>) -> Self {
        Self::List(value)
    }
}

impl From<Fields> for FieldValue {
    fn from(value: Fields) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_pick_the_expected_variant() {
        assert_eq!(FieldValue::from(123_u32), FieldValue::Int(123));
        assert_eq!(FieldValue::from(u64::MAX), FieldValue::Float(u64::MAX as f64));
        assert_eq!(FieldValue::from("x"), FieldValue::String("x".into()));
        assert_eq!(FieldValue::from(None::<i32>), FieldValue::Null);
    }

    #[test]
    fn nested_map_builder() {
        let value = FieldValue::map([("site", "realaffiliate.com")]);
        let map = value.as_map().expect("map");
        assert_eq!(map["site"].as_str(), Some("realaffiliate.com"));
    }

    #[test]
    fn encodability_checks_nested_values() {
        assert!(FieldValue::map([("a", 1.5)]).is_faithfully_encodable());
        assert!(!FieldValue::map([("a", f64::NAN)]).is_faithfully_encodable());
        assert!(!FieldValue::List(vec![FieldValue::Bytes(vec![0xff])]).is_faithfully_encodable());
    }
}
