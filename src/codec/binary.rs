//! Streams-decodes the framed binary envelope `GetItems` returns when the caller did not
//! request JSON.
//!
//! The body is a concatenation of independent length-prefixed frames. The last frame is a
//! metadata payload carrying a key table and an item list of `(key-index, value-index)`
//! pairs; the preceding frames are value-extension payloads holding the actual tagged
//! values. Resolving a value index therefore means locating which frame it falls into —
//! this module computes the per-frame cumulative value counts once and binary-searches
//! that table for every pair, rather than re-scanning frames per lookup.

// self
use crate::{
	codec::attribute::{AttributeValue, Item},
	error::DecodeError,
};

/// Content type that selects the binary framed decoder for `GetItems`.
pub const FRAMED_CONTENT_TYPE: &str = "application/octet-capnp";

/// A single decoded value inside a value-extension frame, tagged by the discriminated
/// union the wire format uses.
#[derive(Clone, Debug, PartialEq)]
pub enum TaggedValue {
	/// Attribute is absent for this item.
	NotExists,
	/// Signed 64-bit integer.
	Qword(i64),
	/// Unsigned 64-bit integer.
	Uqword(u64),
	/// Byte blob.
	Blob(Vec<u8>),
	/// UTF-8 string.
	Str(String),
	/// Double-precision float.
	Dfloat(f64),
	/// Boolean.
	Boolean(bool),
	/// Timestamp, seconds + nanoseconds.
	Time {
		/// Seconds since the Unix epoch.
		secs: i64,
		/// Nanosecond remainder.
		nanos: i64,
	},
}
impl TaggedValue {
	fn into_attribute(self, key: &str) -> Result<Option<AttributeValue>, DecodeError> {
		Ok(match self {
			TaggedValue::NotExists => None,
			TaggedValue::Qword(v) => Some(AttributeValue::Int(v)),
			TaggedValue::Uqword(v) => Some(AttributeValue::Int(i64::try_from(v).map_err(
				|_| DecodeError::frame(format!("`{key}` uqword overflows i64"), None),
			)?)),
			TaggedValue::Blob(v) => Some(AttributeValue::Blob(v)),
			TaggedValue::Str(v) => Some(AttributeValue::Str(v)),
			TaggedValue::Dfloat(v) => Some(AttributeValue::Float(v)),
			TaggedValue::Boolean(v) => Some(AttributeValue::Bool(v)),
			TaggedValue::Time { secs, nanos } => Some(AttributeValue::Timestamp { secs, nanos }),
		})
	}
}

const TAG_NOT_EXISTS: u8 = 0;
const TAG_QWORD: u8 = 1;
const TAG_UQWORD: u8 = 2;
const TAG_BLOB: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_DFLOAT: u8 = 5;
const TAG_BOOLEAN: u8 = 6;
const TAG_TIME: u8 = 7;

struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}
impl<'a> Reader<'a> {
	fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
		let end = self
			.pos
			.checked_add(n)
			.filter(|&end| end <= self.buf.len())
			.ok_or_else(|| DecodeError::frame("frame truncated", None))?;
		let slice = &self.buf[self.pos..end];

		self.pos = end;

		Ok(slice)
	}

	fn u32(&mut self) -> Result<u32, DecodeError> {
		let bytes: [u8; 4] =
			self.take(4)?.try_into().map_err(|_| DecodeError::frame("frame truncated", None))?;

		Ok(u32::from_le_bytes(bytes))
	}

	fn u8(&mut self) -> Result<u8, DecodeError> {
		Ok(self.take(1)?[0])
	}

	fn i64(&mut self) -> Result<i64, DecodeError> {
		let bytes: [u8; 8] =
			self.take(8)?.try_into().map_err(|_| DecodeError::frame("frame truncated", None))?;

		Ok(i64::from_le_bytes(bytes))
	}

	fn u64(&mut self) -> Result<u64, DecodeError> {
		let bytes: [u8; 8] =
			self.take(8)?.try_into().map_err(|_| DecodeError::frame("frame truncated", None))?;

		Ok(u64::from_le_bytes(bytes))
	}

	fn f64(&mut self) -> Result<f64, DecodeError> {
		let bytes: [u8; 8] =
			self.take(8)?.try_into().map_err(|_| DecodeError::frame("frame truncated", None))?;

		Ok(f64::from_le_bytes(bytes))
	}

	fn string(&mut self) -> Result<String, DecodeError> {
		let len = self.u32()? as usize;
		let bytes = self.take(len)?;

		String::from_utf8(bytes.to_vec())
			.map_err(|e| DecodeError::frame(format!("invalid utf8: {e}"), None))
	}

	fn tagged_value(&mut self) -> Result<TaggedValue, DecodeError> {
		match self.u8()? {
			TAG_NOT_EXISTS => Ok(TaggedValue::NotExists),
			TAG_QWORD => Ok(TaggedValue::Qword(self.i64()?)),
			TAG_UQWORD => Ok(TaggedValue::Uqword(self.u64()?)),
			TAG_BLOB => {
				let len = self.u32()? as usize;
				let bytes = self.take(len)?;

				Ok(TaggedValue::Blob(bytes.to_vec()))
			},
			TAG_STR => Ok(TaggedValue::Str(self.string()?)),
			TAG_DFLOAT => Ok(TaggedValue::Dfloat(self.f64()?)),
			TAG_BOOLEAN => Ok(TaggedValue::Boolean(self.u8()? != 0)),
			TAG_TIME => Ok(TaggedValue::Time { secs: self.i64()?, nanos: self.i64()? }),
			other => Err(DecodeError::frame(format!("unknown value tag: {other}"), None)),
		}
	}
}

/// Splits the response body into its constituent frames, stopping on the first framing
/// error.
fn split_frames(body: &[u8]) -> Result<Vec<&[u8]>, DecodeError> {
	let mut frames = Vec::new();
	let mut reader = Reader::new(body);

	while reader.pos < reader.buf.len() {
		let len = reader.u32()? as usize;
		let payload = reader.take(len)?;

		frames.push(payload);
	}

	if frames.is_empty() {
		return Err(DecodeError::frame("body contained no frames", None));
	}

	Ok(frames)
}

fn parse_value_frame(payload: &[u8]) -> Result<Vec<TaggedValue>, DecodeError> {
	let mut reader = Reader::new(payload);
	let count = reader.u32()? as usize;
	let mut values = Vec::with_capacity(count);

	for _ in 0..count {
		values.push(reader.tagged_value()?);
	}

	Ok(values)
}

struct MetadataFrame {
	keys: Vec<String>,
	items: Vec<Vec<(u32, u32)>>,
}

fn parse_metadata_frame(payload: &[u8]) -> Result<MetadataFrame, DecodeError> {
	let mut reader = Reader::new(payload);
	let key_count = reader.u32()? as usize;
	let mut keys = Vec::with_capacity(key_count);

	for _ in 0..key_count {
		keys.push(reader.string()?);
	}

	let item_count = reader.u32()? as usize;
	let mut items = Vec::with_capacity(item_count);

	for _ in 0..item_count {
		let pair_count = reader.u32()? as usize;
		let mut pairs = Vec::with_capacity(pair_count);

		for _ in 0..pair_count {
			let key_index = reader.u32()?;
			let value_index = reader.u32()?;

			pairs.push((key_index, value_index));
		}

		items.push(pairs);
	}

	Ok(MetadataFrame { keys, items })
}

/// Resolves global value indices across the concatenated value-extension frames.
///
/// First pass: records the cumulative length of each frame's value array. Second pass:
/// for any value index, binary-searches the cumulative table to find its owning frame and
/// in-frame offset.
struct ValueTable {
	frames: Vec<Vec<TaggedValue>>,
	/// `cumulative[i]` is the number of values contributed by frames `0..=i`.
	cumulative: Vec<u32>,
}
impl ValueTable {
	fn build(frames: Vec<Vec<TaggedValue>>) -> Self {
		let mut cumulative = Vec::with_capacity(frames.len());
		let mut total = 0u32;

		for frame in &frames {
			total += frame.len() as u32;
			cumulative.push(total);
		}

		Self { frames, cumulative }
	}

	fn resolve(&self, value_index: u32) -> Result<&TaggedValue, DecodeError> {
		let frame_idx = self.cumulative.partition_point(|&boundary| boundary <= value_index);

		if frame_idx >= self.frames.len() {
			return Err(DecodeError::frame(
				format!("value index {value_index} out of range"),
				None,
			));
		}

		let preceding = if frame_idx == 0 { 0 } else { self.cumulative[frame_idx - 1] };
		let offset = (value_index - preceding) as usize;

		self.frames[frame_idx].get(offset).ok_or_else(|| {
			DecodeError::frame(format!("value index {value_index} out of range"), None)
		})
	}
}

/// Decodes the framed binary envelope into its constituent items, section by section.
pub fn decode_items(body: &[u8]) -> Result<Vec<Item>, DecodeError> {
	let frames = split_frames(body)?;
	let (metadata_payload, value_payloads) =
		frames.split_last().expect("split_frames guarantees at least one frame.");
	let metadata = parse_metadata_frame(metadata_payload)?;
	let value_frames = value_payloads
		.iter()
		.map(|payload| parse_value_frame(payload))
		.collect::<Result<Vec<_>, _>>()?;
	let table = ValueTable::build(value_frames);
	let mut items = Vec::with_capacity(metadata.items.len());

	for pairs in &metadata.items {
		let mut item = Item::new();

		for &(key_index, value_index) in pairs {
			let key = metadata.keys.get(key_index as usize).ok_or_else(|| {
				DecodeError::frame(format!("key index {key_index} out of range"), None)
			})?;
			let value = table.resolve(value_index)?.clone();

			if let Some(attr) = value.into_attribute(key)? {
				item.insert(key.clone(), attr);
			}
		}

		items.push(item);
	}

	Ok(items)
}

#[cfg(test)]
pub(crate) mod test_encode {
	//! Test-only encoder producing the same frame layout [`decode_items`] consumes, so unit
	//! tests do not depend on a live server.
	use super::*;

	pub(crate) fn encode_value(out: &mut Vec<u8>, value: &TaggedValue) {
		match value {
			TaggedValue::NotExists => out.push(TAG_NOT_EXISTS),
			TaggedValue::Qword(v) => {
				out.push(TAG_QWORD);
				out.extend_from_slice(&v.to_le_bytes());
			},
			TaggedValue::Uqword(v) => {
				out.push(TAG_UQWORD);
				out.extend_from_slice(&v.to_le_bytes());
			},
			TaggedValue::Blob(v) => {
				out.push(TAG_BLOB);
				out.extend_from_slice(&(v.len() as u32).to_le_bytes());
				out.extend_from_slice(v);
			},
			TaggedValue::Str(v) => {
				out.push(TAG_STR);
				out.extend_from_slice(&(v.len() as u32).to_le_bytes());
				out.extend_from_slice(v.as_bytes());
			},
			TaggedValue::Dfloat(v) => {
				out.push(TAG_DFLOAT);
				out.extend_from_slice(&v.to_le_bytes());
			},
			TaggedValue::Boolean(v) => {
				out.push(TAG_BOOLEAN);
				out.push(if *v { 1 } else { 0 });
			},
			TaggedValue::Time { secs, nanos } => {
				out.push(TAG_TIME);
				out.extend_from_slice(&secs.to_le_bytes());
				out.extend_from_slice(&nanos.to_le_bytes());
			},
		}
	}

	pub(crate) fn encode_value_frame(values: &[TaggedValue]) -> Vec<u8> {
		let mut payload = Vec::new();

		payload.extend_from_slice(&(values.len() as u32).to_le_bytes());

		for value in values {
			encode_value(&mut payload, value);
		}

		payload
	}

	pub(crate) fn encode_metadata_frame(keys: &[&str], items: &[Vec<(u32, u32)>]) -> Vec<u8> {
		let mut payload = Vec::new();

		payload.extend_from_slice(&(keys.len() as u32).to_le_bytes());

		for key in keys {
			payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
			payload.extend_from_slice(key.as_bytes());
		}

		payload.extend_from_slice(&(items.len() as u32).to_le_bytes());

		for pairs in items {
			payload.extend_from_slice(&(pairs.len() as u32).to_le_bytes());

			for &(key_idx, value_idx) in pairs {
				payload.extend_from_slice(&key_idx.to_le_bytes());
				payload.extend_from_slice(&value_idx.to_le_bytes());
			}
		}

		payload
	}

	pub(crate) fn frame_body(frames: &[Vec<u8>]) -> Vec<u8> {
		let mut body = Vec::new();

		for frame in frames {
			body.extend_from_slice(&(frame.len() as u32).to_le_bytes());
			body.extend_from_slice(frame);
		}

		body
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::{test_encode::*, *};

	#[test]
	fn decodes_single_frame_single_item() {
		let value_frame = encode_value_frame(&[TaggedValue::Qword(30), TaggedValue::Str("foo".into())]);
		let metadata_frame =
			encode_metadata_frame(&["age", "name"], &[vec![(0, 0), (1, 1)]]);
		let body = frame_body(&[value_frame, metadata_frame]);
		let items = decode_items(&body).expect("Body should decode.");

		assert_eq!(items.len(), 1);
		assert_eq!(items[0].get("age"), Some(&AttributeValue::Int(30)));
		assert_eq!(items[0].get("name"), Some(&AttributeValue::Str("foo".into())));
	}

	#[test]
	fn resolves_value_indices_across_multiple_value_frames() {
		let frame_a = encode_value_frame(&[TaggedValue::Qword(1), TaggedValue::Qword(2)]);
		let frame_b = encode_value_frame(&[TaggedValue::Qword(3)]);
		// Global indices: 0,1 live in frame_a; 2 lives in frame_b.
		let metadata_frame = encode_metadata_frame(
			&["k"],
			&[vec![(0, 0)], vec![(0, 1)], vec![(0, 2)]],
		);
		let body = frame_body(&[frame_a, frame_b, metadata_frame]);
		let items = decode_items(&body).expect("Body should decode.");

		assert_eq!(items[0].get("k"), Some(&AttributeValue::Int(1)));
		assert_eq!(items[1].get("k"), Some(&AttributeValue::Int(2)));
		assert_eq!(items[2].get("k"), Some(&AttributeValue::Int(3)));
	}

	#[test]
	fn not_exists_values_are_omitted_from_the_item() {
		let value_frame = encode_value_frame(&[TaggedValue::NotExists]);
		let metadata_frame = encode_metadata_frame(&["missing"], &[vec![(0, 0)]]);
		let body = frame_body(&[value_frame, metadata_frame]);
		let items = decode_items(&body).expect("Body should decode.");

		assert!(items[0].get("missing").is_none());
	}

	#[test]
	fn stops_on_framing_error() {
		let mut body = (5u32).to_le_bytes().to_vec();

		body.extend_from_slice(&[1, 2]); // shorter than declared length

		assert!(decode_items(&body).is_err());
	}
}
