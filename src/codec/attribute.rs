//! Typed attribute values and the `{"attr": {"<kind>": <value>}}` JSON envelope.

// std
use std::collections::HashMap;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{
	Deserialize, Deserializer, Serialize, Serializer,
	de::{Error as DeError, MapAccess, Visitor},
	ser::SerializeMap,
};
// self
use crate::error::{DecodeError, ValidationError};

/// A single typed attribute value: one of the six kinds the data plane
/// understands — signed integer, double, UTF-8 string, byte blob, boolean, or timestamp.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
	/// Signed 64-bit integer, wire kind `N`, rendered as a decimal string.
	Int(i64),
	/// Double-precision float, wire kind `N`, rendered in scientific notation.
	Float(f64),
	/// UTF-8 string, wire kind `S`.
	Str(String),
	/// Byte blob, wire kind `B`, base64-encoded on the wire.
	Blob(Vec<u8>),
	/// Boolean, wire kind `BOOL`.
	Bool(bool),
	/// Timestamp, wire kind `TS`, rendered `"<secs>:<nanos>"`.
	Timestamp {
		/// Seconds since the Unix epoch.
		secs: i64,
		/// Nanosecond remainder.
		nanos: i64,
	},
}
impl AttributeValue {
	/// Convenience constructor for a timestamp value.
	pub const fn timestamp(secs: i64, nanos: i64) -> Self {
		Self::Timestamp { secs, nanos }
	}

	/// The wire-format kind tag (`N`, `S`, `B`, `BOOL`, or `TS`) for this value.
	pub fn kind(&self) -> &'static str {
		match self {
			AttributeValue::Int(_) | AttributeValue::Float(_) => "N",
			AttributeValue::Str(_) => "S",
			AttributeValue::Blob(_) => "B",
			AttributeValue::Bool(_) => "BOOL",
			AttributeValue::Timestamp { .. } => "TS",
		}
	}

	fn rendered(&self) -> serde_json::Value {
		match self {
			AttributeValue::Int(v) => serde_json::Value::String(v.to_string()),
			AttributeValue::Float(v) => serde_json::Value::String(render_scientific(*v)),
			AttributeValue::Str(v) => serde_json::Value::String(v.clone()),
			AttributeValue::Blob(v) => serde_json::Value::String(STANDARD.encode(v)),
			AttributeValue::Bool(v) => serde_json::Value::Bool(*v),
			AttributeValue::Timestamp { secs, nanos } =>
				serde_json::Value::String(format!("{secs}:{nanos}")),
		}
	}

	fn from_kind_value(kind: &str, value: serde_json::Value) -> Result<Self, DecodeError> {
		match kind {
			"N" => {
				let raw = value
					.as_str()
					.ok_or_else(|| DecodeError::frame("`N` value must be a string", None))?;

				if raw.contains('.') || raw.contains('e') || raw.contains('E') {
					raw.parse::<f64>()
						.map(AttributeValue::Float)
						.map_err(|e| DecodeError::frame(format!("invalid N value: {e}"), None))
				} else {
					raw.parse::<i64>()
						.map(AttributeValue::Int)
						.map_err(|e| DecodeError::frame(format!("invalid N value: {e}"), None))
				}
			},
			"S" => {
				let raw = value
					.as_str()
					.ok_or_else(|| DecodeError::frame("`S` value must be a string", None))?;

				Ok(AttributeValue::Str(raw.to_owned()))
			},
			"B" => {
				let raw = value
					.as_str()
					.ok_or_else(|| DecodeError::frame("`B` value must be a string", None))?;
				let bytes = STANDARD
					.decode(raw)
					.map_err(|e| DecodeError::frame(format!("invalid base64: {e}"), None))?;

				Ok(AttributeValue::Blob(bytes))
			},
			"BOOL" => value
				.as_bool()
				.map(AttributeValue::Bool)
				.ok_or_else(|| DecodeError::frame("`BOOL` value must be a bool", None)),
			"TS" => {
				let raw = value
					.as_str()
					.ok_or_else(|| DecodeError::frame("`TS` value must be a string", None))?;
				let (secs, nanos) = raw
					.split_once(':')
					.ok_or_else(|| DecodeError::frame(format!("invalid TS value: {raw}"), None))?;
				let secs = secs
					.parse::<i64>()
					.map_err(|e| DecodeError::frame(format!("invalid TS seconds: {e}"), None))?;
				let nanos = nanos
					.parse::<i64>()
					.map_err(|e| DecodeError::frame(format!("invalid TS nanos: {e}"), None))?;

				Ok(AttributeValue::Timestamp { secs, nanos })
			},
			other => Err(DecodeError::frame(format!("unsupported attribute kind: {other}"), None)),
		}
	}
}
impl Serialize for AttributeValue {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut map = serializer.serialize_map(Some(1))?;

		map.serialize_entry(self.kind(), &self.rendered())?;
		map.end()
	}
}
impl<'de> Deserialize<'de> for AttributeValue {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		struct AttrVisitor;
		impl<'de> Visitor<'de> for AttrVisitor {
			type Value = AttributeValue;

			fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
				f.write_str("a single-key {kind: value} attribute envelope")
			}

			fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
			where
				A: MapAccess<'de>,
			{
				let (kind, value): (String, serde_json::Value) = map
					.next_entry()?
					.ok_or_else(|| DeError::custom("attribute envelope must have exactly one key"))?;

				AttributeValue::from_kind_value(&kind, value).map_err(DeError::custom)
			}
		}

		deserializer.deserialize_map(AttrVisitor)
	}
}

/// A map from attribute name to typed value.
pub type Item = HashMap<String, AttributeValue>;

/// Encodes an [`Item`] into the `{"attr": {"<kind>": <value>}}` JSON envelope expected by
/// `PutItem`/`PutItems` bodies.
pub fn encode_item(item: &Item) -> serde_json::Value {
	serde_json::to_value(item).expect("Item serialization is infallible for supported kinds.")
}

/// Decodes a JSON envelope body into an [`Item`], as returned by `GetItem`/`GetItems` when
/// the caller negotiated JSON content.
pub fn decode_item(body: &[u8]) -> Result<Item, DecodeError> {
	let de = &mut serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(de).map_err(DecodeError::from)
}

/// Validates that an attribute name is usable, rejecting empty names.
pub fn validate_attribute_name(name: &str) -> Result<(), ValidationError> {
	if name.is_empty() {
		return Err(ValidationError::MalformedAttribute {
			name: name.to_owned(),
			reason: "attribute name must not be empty".into(),
		});
	}

	Ok(())
}

fn render_scientific(value: f64) -> String {
	format!("{value:e}")
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn round_trip(value: AttributeValue) -> AttributeValue {
		let mut item = Item::new();

		item.insert("attr".into(), value);

		let encoded = encode_item(&item);
		let bytes = serde_json::to_vec(&encoded).expect("Envelope should serialize.");
		let decoded = decode_item(&bytes).expect("Envelope should decode.");

		decoded.get("attr").cloned().expect("Round-tripped item should keep its key.")
	}

	#[test]
	fn round_trips_every_supported_kind() {
		assert_eq!(round_trip(AttributeValue::Int(30)), AttributeValue::Int(30));
		assert_eq!(
			round_trip(AttributeValue::Str("foo".into())),
			AttributeValue::Str("foo".into())
		);
		assert_eq!(
			round_trip(AttributeValue::Blob(vec![1, 2, 3, 255])),
			AttributeValue::Blob(vec![1, 2, 3, 255])
		);
		assert_eq!(round_trip(AttributeValue::Bool(true)), AttributeValue::Bool(true));
		assert_eq!(
			round_trip(AttributeValue::timestamp(1, 2)),
			AttributeValue::timestamp(1, 2)
		);

		let AttributeValue::Float(f) = round_trip(AttributeValue::Float(3.5)) else {
			panic!("Expected a float back.");
		};

		assert!((f - 3.5).abs() < f64::EPSILON);
	}

	#[test]
	fn scenario_put_then_get_item_round_trips_whole_item() {
		let mut item = Item::new();

		item.insert("age".into(), AttributeValue::Int(30));
		item.insert("name".into(), AttributeValue::Str("foo".into()));

		let encoded = serde_json::to_vec(&encode_item(&item)).unwrap();
		let decoded = decode_item(&encoded).unwrap();

		assert_eq!(decoded.get("age"), Some(&AttributeValue::Int(30)));
		assert_eq!(decoded.get("name"), Some(&AttributeValue::Str("foo".into())));
	}

	#[test]
	fn rejects_empty_attribute_names() {
		assert!(validate_attribute_name("").is_err());
		assert!(validate_attribute_name("ok").is_ok());
	}
}
