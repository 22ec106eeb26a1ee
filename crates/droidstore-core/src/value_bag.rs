//! Opaque value bags: settings, details, and result details.
//!
//! A value bag is persisted as an arbitrary string. It is usually a JSON
//! object, but the store never validates it against a schema: decoding to
//! structured form is a best-effort convenience on read, and the stored
//! string stays authoritative. Reading never fails; a string that does not
//! parse as JSON is handed back verbatim.

use serde::de::{Deserialize, Deserializer};
use serde::Serialize;
use serde_json::Value;

/// An opaque value bag, decoded lazily from its stored text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ValueBag {
    /// The stored text parsed as JSON.
    Structured(Value),
    /// The stored text as-is.
    Raw(String),
}

impl ValueBag {
    /// Decode the persisted text. Falls back to `Raw` on parse failure.
    pub fn from_stored(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw(text.to_string()),
        }
    }

    /// Build a bag from caller input. A JSON string stays raw; any other
    /// JSON value is kept structured.
    pub fn from_input(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Raw(s),
            other => Self::Structured(other),
        }
    }

    /// The canonical text persisted for this bag.
    pub fn to_stored(&self) -> String {
        match self {
            Self::Structured(value) => value.to_string(),
            Self::Raw(s) => s.clone(),
        }
    }

    /// Look up a key, when the bag is a structured object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Structured(Value::Object(map)) => map.get(key),
            _ => None,
        }
    }

    /// Look up a key and expect a string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

impl<'de> Deserialize<'de> for ValueBag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_input(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_object_round_trips_through_storage() {
        let bag = ValueBag::from_input(json!({"image": "x", "livemode": "True"}));
        let stored = bag.to_stored();
        let back = ValueBag::from_stored(&stored);
        assert_eq!(back, bag);
        assert_eq!(back.get_str("image"), Some("x"));
    }

    #[test]
    fn unparseable_string_round_trips_verbatim() {
        let bag = ValueBag::from_stored("not json at all");
        assert_eq!(bag, ValueBag::Raw("not json at all".to_string()));
        assert_eq!(bag.to_stored(), "not json at all");
    }

    #[test]
    fn string_input_stays_raw() {
        // A caller sending the JSON string "abc" stores the bare text, and
        // reading it back yields the identical string.
        let bag = ValueBag::from_input(json!("abc"));
        assert_eq!(bag, ValueBag::Raw("abc".to_string()));
        let back = ValueBag::from_stored(&bag.to_stored());
        assert_eq!(serde_json::to_value(&back).unwrap(), json!("abc"));
    }

    #[test]
    fn numeric_text_decodes_structured() {
        assert_eq!(
            ValueBag::from_stored("5"),
            ValueBag::Structured(json!(5))
        );
    }

    #[test]
    fn serializes_as_the_decoded_form() {
        let bag = ValueBag::from_stored(r#"{"a":1}"#);
        assert_eq!(serde_json::to_value(&bag).unwrap(), json!({"a": 1}));
        let raw = ValueBag::from_stored("True");
        assert_eq!(serde_json::to_value(&raw).unwrap(), json!("True"));
    }
}
