//! Lenient readers for agent-supplied JSON arguments.
//!
//! Models send numbers as JSON numbers, numeric strings, or occasionally
//! with stray whitespace. Everything here returns `None` instead of failing
//! so callers can decide between a fallback and a soft error.

use serde_json::Value;

use crate::geo::{Bbox, LngLat};

const LONGITUDE_KEYS: [&str; 3] = ["longitude", "lng", "lon"];
const LATITUDE_KEYS: [&str; 2] = ["latitude", "lat"];

/// Finite number from a JSON number or numeric string.
pub fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

pub fn number_field(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(number)
}

pub fn string_field<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn bool_field(params: &Value, key: &str) -> Option<bool> {
    match params.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Integer field, accepting `3`, `3.0` and `"3"`.
pub fn integer_field(params: &Value, key: &str) -> Option<i64> {
    let n = number_field(params, key)?;
    (n.fract() == 0.0).then_some(n as i64)
}

/// Direct longitude/latitude fields on an object (any of the accepted
/// spellings). Both must be present and numeric.
pub fn lng_lat_fields(obj: &Value) -> Option<LngLat> {
    let lng = LONGITUDE_KEYS.iter().find_map(|k| number_field(obj, k))?;
    let lat = LATITUDE_KEYS.iter().find_map(|k| number_field(obj, k))?;
    Some(LngLat::new(lng, lat))
}

/// True if the object has any longitude/latitude key at all, numeric or not.
pub fn has_lng_lat_keys(obj: &Value) -> bool {
    LONGITUDE_KEYS
        .iter()
        .chain(LATITUDE_KEYS.iter())
        .any(|k| obj.get(k).map(|v| !v.is_null()).unwrap_or(false))
}

/// Result of reading a `bbox` array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BboxField {
    Absent,
    /// Four elements, all numeric.
    Valid(Bbox),
    /// Four elements, at least one non-numeric.
    NonNumeric,
    /// Present but not a four-element array.
    WrongShape,
}

pub fn bbox_field(obj: &Value, key: &str) -> BboxField {
    let Some(raw) = obj.get(key).filter(|v| !v.is_null()) else {
        return BboxField::Absent;
    };
    let Some(items) = raw.as_array().filter(|a| a.len() == 4) else {
        return BboxField::WrongShape;
    };
    let mut out = [0.0; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        match number(item) {
            Some(n) => *slot = n,
            None => return BboxField::NonNumeric,
        }
    }
    BboxField::Valid(Bbox(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn number_accepts_numeric_strings() {
        assert_eq!(number(&json!(1.5)), Some(1.5));
        assert_eq!(number(&json!(" -122.4 ")), Some(-122.4));
        assert_eq!(number(&json!("abc")), None);
        assert_eq!(number(&json!(null)), None);
        assert_eq!(number(&json!(true)), None);
    }

    #[test]
    fn lng_lat_accepts_short_keys() {
        assert_eq!(
            lng_lat_fields(&json!({"lng": 1, "lat": 2})),
            Some(LngLat::new(1.0, 2.0))
        );
        assert_eq!(
            lng_lat_fields(&json!({"longitude": "3", "latitude": 4})),
            Some(LngLat::new(3.0, 4.0))
        );
        assert_eq!(lng_lat_fields(&json!({"longitude": 3})), None);
    }

    #[test]
    fn bbox_field_distinguishes_shapes() {
        assert_eq!(bbox_field(&json!({}), "bbox"), BboxField::Absent);
        assert_eq!(
            bbox_field(&json!({"bbox": [1, "2", 3, 4]}), "bbox"),
            BboxField::Valid(Bbox([1.0, 2.0, 3.0, 4.0]))
        );
        assert_eq!(
            bbox_field(&json!({"bbox": [1, "x", 3, 4]}), "bbox"),
            BboxField::NonNumeric
        );
        assert_eq!(bbox_field(&json!({"bbox": [1, 2, 3]}), "bbox"), BboxField::WrongShape);
    }

    #[test]
    fn integer_field_rejects_fractions() {
        assert_eq!(integer_field(&json!({"n": 3.0}), "n"), Some(3));
        assert_eq!(integer_field(&json!({"n": "20"}), "n"), Some(20));
        assert_eq!(integer_field(&json!({"n": 2.5}), "n"), None);
    }
}
