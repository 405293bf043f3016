use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Patches are closed structs but arrive as JSON objects, and "absent" must
/// stay distinguishable from "set to null" (date clearing relies on it).
pub enum NullableValue<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> NullableValue<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> NullableValue<U> {
        match self {
            NullableValue::Omitted => NullableValue::Omitted,
            NullableValue::Null => NullableValue::Null,
            NullableValue::Value(v) => NullableValue::Value(f(v)),
        }
    }

    /// Outer option: was the key present; inner option: null vs value.
    pub fn into_patch(self) -> Option<Option<T>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::Value(v) => Some(Some(v)),
        }
    }
}

pub fn classify_string(optional_value: Option<&Value>) -> Result<NullableValue<String>, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::Value(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

pub fn classify_uuid(optional_value: Option<&Value>) -> Result<NullableValue<Uuid>, String> {
    match classify_string(optional_value)? {
        NullableValue::Omitted => Ok(NullableValue::Omitted),
        NullableValue::Null => Ok(NullableValue::Null),
        NullableValue::Value(s) => Uuid::parse_str(s.trim())
            .map(NullableValue::Value)
            .map_err(|_| format!("'{s}' is not a valid UUID")),
    }
}

pub fn classify_date(optional_value: Option<&Value>) -> Result<NullableValue<NaiveDate>, String> {
    match classify_string(optional_value)? {
        NullableValue::Omitted => Ok(NullableValue::Omitted),
        NullableValue::Null => Ok(NullableValue::Null),
        NullableValue::Value(s) => parse_date(&s).map(NullableValue::Value),
    }
}

pub fn classify_uuid_list(optional_value: Option<&Value>) -> Result<Option<Vec<Uuid>>, String> {
    match optional_value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => ids.push(
                        Uuid::parse_str(s.trim()).map_err(|_| format!("'{s}' is not a valid UUID"))?,
                    ),
                    other => return Err(format!("expected UUID string, got {other}")),
                }
            }
            Ok(Some(ids))
        }
        Some(other) => Err(format!("expected array or null, got {other}")),
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("'{raw}' is not a valid ISO-8601 date"))
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // Bare dates are accepted as midnight UTC in timestamp positions.
    parse_date(trimmed)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .ok_or_else(|| format!("'{raw}' is not a valid ISO-8601 timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_null_and_value_stay_distinct() {
        let obj = json!({ "target_date": null, "start_date": "2025-01-10" });
        let map = obj.as_object().unwrap();

        assert!(matches!(
            classify_date(map.get("missing")),
            Ok(NullableValue::Omitted)
        ));
        assert!(matches!(
            classify_date(map.get("target_date")),
            Ok(NullableValue::Null)
        ));
        match classify_date(map.get("start_date")) {
            Ok(NullableValue::Value(d)) => assert_eq!(d.to_string(), "2025-01-10"),
            _ => panic!("expected parsed date"),
        }
    }

    #[test]
    fn rejects_non_string_dates() {
        let obj = json!({ "start_date": 42 });
        assert!(classify_date(obj.as_object().unwrap().get("start_date")).is_err());
    }

    #[test]
    fn timestamp_accepts_rfc3339_and_bare_dates() {
        assert!(parse_timestamp("2025-01-10T12:30:00Z").is_ok());
        assert!(parse_timestamp("2025-01-10").is_ok());
        assert!(parse_timestamp("not-a-date").is_err());
    }
}
