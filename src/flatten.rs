//! Reduction of nested device replies into flat key-value telemetry
//!
//! Every reply shape a channel can produce implements [`Flatten`] explicitly, so
//! the set of keys that can reach a snapshot is visible in the source. Nested
//! records merge their fields into the top level under their own names (no path
//! prefix); on collision the field written last wins. Unset fields are dropped.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// A scalar telemetry value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

/// Any reply value that is neither a number nor a string (booleans, arrays,
/// objects) is kept as its JSON text.
impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ReplyValue {
            Number(f64),
            Text(String),
            Other(serde_json::Value),
        }

        Ok(match ReplyValue::deserialize(deserializer)? {
            ReplyValue::Number(v) => FieldValue::Number(v),
            ReplyValue::Text(s) => FieldValue::Text(s),
            ReplyValue::Other(v) => FieldValue::Text(v.to_string()),
        })
    }
}

impl FieldValue {
    /// Numeric view of the value; text is never coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// Flat mapping from field name to value
pub type FlatMap = BTreeMap<String, FieldValue>;

/// A reply shape that knows how to merge itself into a flat mapping.
pub trait Flatten {
    fn flatten_into(&self, out: &mut FlatMap);

    fn flatten(&self) -> FlatMap {
        let mut out = FlatMap::new();
        self.flatten_into(&mut out);
        out
    }
}

/// Conversion of a single record field into an optional scalar.
///
/// `None` means the field is unset and must not appear in the flat mapping.
pub trait IntoField {
    fn to_field(&self) -> Option<FieldValue>;
}

macro_rules! impl_numeric_field {
    ($($ty:ty),*) => {
        $(
            impl IntoField for $ty {
                fn to_field(&self) -> Option<FieldValue> {
                    Some(FieldValue::Number(*self as f64))
                }
            }
        )*
    };
}

impl_numeric_field!(f64, f32, u8, u16, u32, u64, i16, i32, i64);

impl IntoField for String {
    fn to_field(&self) -> Option<FieldValue> {
        Some(FieldValue::Text(self.clone()))
    }
}

impl IntoField for FieldValue {
    fn to_field(&self) -> Option<FieldValue> {
        Some(self.clone())
    }
}

impl<T: IntoField> IntoField for Option<T> {
    fn to_field(&self) -> Option<FieldValue> {
        self.as_ref().and_then(IntoField::to_field)
    }
}

/// Inserts a field unless it is unset. Later inserts overwrite earlier ones.
pub fn insert_field<T: IntoField + ?Sized>(out: &mut FlatMap, name: &str, value: &T) {
    if let Some(value) = value.to_field() {
        out.insert(name.to_string(), value);
    }
}

/// Implements [`Flatten`] for a record.
///
/// Scalar fields are written first, in the listed order, then the nested
/// records, so a nested field shadows a scalar of the same name.
#[macro_export]
macro_rules! flatten_record {
    ($ty:ty { $($field:ident),* $(,)? } $(nested { $($nested:ident),* $(,)? })?) => {
        impl $crate::flatten::Flatten for $ty {
            fn flatten_into(&self, out: &mut $crate::flatten::FlatMap) {
                $( $crate::flatten::insert_field(out, stringify!($field), &self.$field); )*
                $( $( $crate::flatten::Flatten::flatten_into(&self.$nested, out); )* )?
            }
        }
    };
}

impl<T: Flatten> Flatten for Option<T> {
    fn flatten_into(&self, out: &mut FlatMap) {
        if let Some(inner) = self {
            inner.flatten_into(out);
        }
    }
}

/// A bare scalar has no field name of its own; it is keyed by its text.
impl Flatten for FieldValue {
    fn flatten_into(&self, out: &mut FlatMap) {
        out.insert(self.to_string(), self.clone());
    }
}

/// An already flat mapping merges as is.
impl Flatten for FlatMap {
    fn flatten_into(&self, out: &mut FlatMap) {
        out.extend(self.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Value held in a generic key-value container
///
/// Variant order matters: null and objects are matched first, every other shape
/// becomes a scalar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Absent,
    Record(Container),
    Scalar(FieldValue),
}

/// Generic key-value container as returned by descriptive endpoints
pub type Container = BTreeMap<String, Entry>;

impl Flatten for Container {
    fn flatten_into(&self, out: &mut FlatMap) {
        for (key, entry) in self {
            match entry {
                Entry::Scalar(value) => {
                    out.insert(key.clone(), value.clone());
                }
                Entry::Record(record) => record.flatten_into(out),
                Entry::Absent => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Inner {
        voltage: Option<f64>,
        soc: Option<f64>,
    }

    flatten_record!(Inner { voltage, soc });

    #[derive(Default)]
    struct Outer {
        soc: Option<f64>,
        name: Option<String>,
        count: u16,
        inner: Inner,
        deeper: Option<Middle>,
    }

    struct Middle {
        label: String,
        inner: Inner,
    }

    flatten_record!(Middle { label } nested { inner });
    flatten_record!(Outer { soc, name, count } nested { inner, deeper });

    #[test]
    fn test_plain_record_drops_unset_fields() {
        let flat = Inner {
            voltage: Some(230.0),
            soc: None,
        }
        .flatten();

        assert_eq!(flat.len(), 1);
        assert_eq!(flat.get("voltage"), Some(&FieldValue::Number(230.0)));
        assert!(!flat.contains_key("soc"));
    }

    #[test]
    fn test_nested_fields_merge_without_prefix() {
        let outer = Outer {
            soc: Some(40.0),
            name: Some("pulse".to_string()),
            count: 3,
            inner: Inner {
                voltage: Some(48.5),
                soc: None,
            },
            deeper: Some(Middle {
                label: "wr".to_string(),
                inner: Inner {
                    voltage: None,
                    soc: Some(55.0),
                },
            }),
        };

        let flat = outer.flatten();

        assert_eq!(flat.get("name"), Some(&FieldValue::from("pulse")));
        assert_eq!(flat.get("count"), Some(&FieldValue::Number(3.0)));
        assert_eq!(flat.get("voltage"), Some(&FieldValue::Number(48.5)));
        assert_eq!(flat.get("label"), Some(&FieldValue::from("wr")));
        // Written last by the doubly nested record
        assert_eq!(flat.get("soc"), Some(&FieldValue::Number(55.0)));
        assert!(!flat.keys().any(|k| k.contains('.')));
    }

    #[test]
    fn test_unset_nested_record_contributes_nothing() {
        let flat = Outer::default().flatten();
        assert_eq!(flat.len(), 1);
        assert!(flat.contains_key("count"));
    }

    #[test]
    fn test_container_with_embedded_records() {
        let container: Container = serde_json::from_str(
            r#"{
                "a": 1.5,
                "b": null,
                "c": {"d": "x", "e": null, "f": {"a": 2}}
            }"#,
        )
        .unwrap();

        let flat = container.flatten();

        assert_eq!(flat.len(), 2);
        assert_eq!(flat.get("d"), Some(&FieldValue::from("x")));
        // "c" is iterated after "a", so the nested value wins
        assert_eq!(flat.get("a"), Some(&FieldValue::Number(2.0)));
        assert!(!flat.contains_key("b"));
        assert!(!flat.contains_key("e"));
    }

    #[test]
    fn test_unexpected_shapes_degrade_to_text() {
        let container: Container = serde_json::from_str(
            r#"{"flag": true, "list": [1, 2], "nested": {"off": false}}"#,
        )
        .unwrap();

        let flat = container.flatten();

        assert_eq!(flat.get("flag"), Some(&FieldValue::from("true")));
        assert_eq!(flat.get("list"), Some(&FieldValue::from("[1,2]")));
        assert_eq!(flat.get("off"), Some(&FieldValue::from("false")));
    }

    #[test]
    fn test_flat_map_merges_unchanged() {
        let mut map = FlatMap::new();
        map.insert("soc".to_string(), FieldValue::Number(12.0));
        assert_eq!(map.flatten(), map);
    }

    #[test]
    fn test_bare_scalar_keyed_by_its_text() {
        let flat = FieldValue::from("standby").flatten();
        assert_eq!(flat.get("standby"), Some(&FieldValue::from("standby")));

        let flat = FieldValue::Number(7.0).flatten();
        assert_eq!(flat.get("7"), Some(&FieldValue::Number(7.0)));
    }

    #[test]
    fn test_text_is_not_numeric() {
        assert_eq!(FieldValue::from("12").as_f64(), None);
        assert_eq!(FieldValue::Number(12.0).as_f64(), Some(12.0));
    }
}
