use chrono::{DateTime, Utc};

use crate::errors::ComputeError;
use crate::flatten::{FieldValue, FlatMap};

/// Flattened result of one successful fetch
///
/// Never mutated after construction; a new fetch produces a new snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    fields: FlatMap,
}

impl Snapshot {
    pub fn new(fields: FlatMap, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Numeric field value, distinguishing a missing field from a text one.
    pub fn number(&self, field: &'static str) -> Result<f64, ComputeError> {
        match self.fields.get(field) {
            None => Err(ComputeError::MissingField(field)),
            Some(value) => value.as_f64().ok_or(ComputeError::NotNumeric(field)),
        }
    }

    /// Numeric field value, treating a missing field as zero.
    pub fn number_or_zero(&self, field: &'static str) -> Result<f64, ComputeError> {
        match self.number(field) {
            Err(ComputeError::MissingField(_)) => Ok(0.0),
            other => other,
        }
    }

    pub fn fields(&self) -> &FlatMap {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        let mut fields = FlatMap::new();
        fields.insert("soc".to_string(), FieldValue::Number(80.0));
        fields.insert("serial".to_string(), FieldValue::from("SN1"));
        Snapshot::new(fields, Utc::now())
    }

    #[test]
    fn test_number_lookup() {
        let snapshot = snapshot();
        assert_eq!(snapshot.number("soc"), Ok(80.0));
        assert_eq!(snapshot.number("serial"), Err(ComputeError::NotNumeric("serial")));
        assert_eq!(snapshot.number("charge_power"), Err(ComputeError::MissingField("charge_power")));
    }

    #[test]
    fn test_number_or_zero_only_defaults_missing() {
        let snapshot = snapshot();
        assert_eq!(snapshot.number_or_zero("charge_power"), Ok(0.0));
        assert_eq!(snapshot.number_or_zero("serial"), Err(ComputeError::NotNumeric("serial")));
    }
}
