//! Conversion of SDK output shapes into JSON documents.
//!
//! SDK shapes carry no serde support, so each source renders the fields it
//! exposes with [`json_object!`]. Keys follow the PascalCase naming of the
//! cloud APIs, which is what mapping expressions are written against.
//! Absent fields are omitted rather than rendered as `null`.

use aws_sdk_cloudformation::primitives::{DateTime, DateTimeFormat};
use serde_json::Value;

/// Render a value as JSON.
pub trait ToJson {
    fn to_json(&self) -> Value;
}

impl ToJson for str {
    fn to_json(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToJson for String {
    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }
}

impl ToJson for bool {
    fn to_json(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ToJson for i32 {
    fn to_json(&self) -> Value {
        Value::from(*self)
    }
}

impl ToJson for i64 {
    fn to_json(&self) -> Value {
        Value::from(*self)
    }
}

impl ToJson for DateTime {
    fn to_json(&self) -> Value {
        self.fmt(DateTimeFormat::DateTime)
            .map_or(Value::Null, Value::String)
    }
}

impl ToJson for Value {
    fn to_json(&self) -> Value {
        self.clone()
    }
}

impl<T: ToJson + ?Sized> ToJson for &T {
    fn to_json(&self) -> Value {
        (**self).to_json()
    }
}

impl<T: ToJson> ToJson for Option<T> {
    fn to_json(&self) -> Value {
        self.as_ref().map_or(Value::Null, ToJson::to_json)
    }
}

impl<T: ToJson> ToJson for [T] {
    fn to_json(&self) -> Value {
        Value::Array(self.iter().map(ToJson::to_json).collect())
    }
}

impl<T: ToJson> ToJson for Vec<T> {
    fn to_json(&self) -> Value {
        self.as_slice().to_json()
    }
}

/// Build a JSON object from `"Key" => getter` pairs, skipping nulls.
macro_rules! json_object {
    ($($key:literal => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = serde_json::Map::new();
        $(
            let value = $crate::services::resources::json::ToJson::to_json(&$value);
            if !value.is_null() {
                map.insert($key.to_string(), value);
            }
        )*
        serde_json::Value::Object(map)
    }};
}

/// Implement [`ToJson`] for SDK enums through their `as_str`.
macro_rules! enum_to_json {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::services::resources::json::ToJson for $ty {
                fn to_json(&self) -> serde_json::Value {
                    serde_json::Value::String(self.as_str().to_string())
                }
            }
        )*
    };
}

pub(crate) use enum_to_json;
pub(crate) use json_object;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_skips_absent_fields() {
        let name: Option<&str> = Some("stack");
        let reason: Option<&str> = None;
        let tags: &[String] = &["a".to_string()];
        let created = DateTime::from_secs(0);

        let value = json_object! {
            "StackName" => name,
            "StackStatusReason" => reason,
            "Tags" => tags,
            "Timeout" => Some(5_i32),
            "CreationTime" => Some(&created),
        };

        assert_eq!(
            value,
            json!({
                "StackName": "stack",
                "Tags": ["a"],
                "Timeout": 5,
                "CreationTime": "1970-01-01T00:00:00Z"
            })
        );
    }
}
