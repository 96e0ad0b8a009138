//! Parses the `__mtime_secs==<n> and __mtime_nsecs==<n>` modification-time header that the
//! server attaches to every item response.

// self
use crate::error::DecodeError;

/// Response header carrying an item's modification time, in the shape parsed by
/// [`ModificationTime::parse`].
pub const MTIME_HEADER: &str = "X-v3io-transaction-verifier";

/// An item's implicit modification time, maintained by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModificationTime {
	/// Seconds since the Unix epoch.
	pub secs: i64,
	/// Nanosecond remainder.
	pub nanos: i64,
}
impl ModificationTime {
	/// Parses the literal header shape `__mtime_secs==<n> and __mtime_nsecs==<n>`.
	///
	/// Splits on the literal token `and`, then on `==`; any other shape is an error

	pub fn parse(header: &str) -> Result<Self, DecodeError> {
		let (secs_part, nsecs_part) = header
			.split_once(" and ")
			.ok_or_else(|| DecodeError::Mtime { raw: header.to_owned() })?;

		let secs = parse_kv(secs_part, "__mtime_secs", header)?;
		let nanos = parse_kv(nsecs_part, "__mtime_nsecs", header)?;

		Ok(Self { secs, nanos })
	}

	/// Renders the header back to its wire shape.
	pub fn render(&self) -> String {
		format!("__mtime_secs=={} and __mtime_nsecs=={}", self.secs, self.nanos)
	}
}

fn parse_kv(part: &str, expected_key: &str, whole: &str) -> Result<i64, DecodeError> {
	let (key, value) = part
		.split_once("==")
		.ok_or_else(|| DecodeError::Mtime { raw: whole.to_owned() })?;

	if key != expected_key {
		return Err(DecodeError::Mtime { raw: whole.to_owned() });
	}

	value.trim().parse::<i64>().map_err(|_| DecodeError::Mtime { raw: whole.to_owned() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn parses_the_canonical_shape() {
		let parsed = ModificationTime::parse("__mtime_secs==1 and __mtime_nsecs==2")
			.expect("Canonical mtime header should parse.");

		assert_eq!(parsed, ModificationTime { secs: 1, nanos: 2 });
	}

	#[test]
	fn rejects_any_other_shape() {
		assert!(ModificationTime::parse("__mtime_secs=1,__mtime_nsecs=2").is_err());
		assert!(ModificationTime::parse("garbage").is_err());
		assert!(ModificationTime::parse("__mtime_nsecs==2 and __mtime_secs==1").is_err());
	}

	#[test]
	fn render_round_trips() {
		let mtime = ModificationTime { secs: 5, nanos: 6 };

		assert_eq!(
			ModificationTime::parse(&mtime.render()).expect("Rendered header should parse."),
			mtime
		);
	}
}
