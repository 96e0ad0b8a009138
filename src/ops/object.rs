//! `GetObject`, `PutObject`, `UpdateObject`, `DeleteObject`, `CheckPathExists`, and
//! `PutOOSObject`.

// self
use crate::{
	_prelude::*,
	dispatcher::{DispatchResponse, Dispatcher, RequestHandle},
	error::DecodeError,
	http::{HttpRequestSpec, HttpTransport, Method, TransportErrorMapper},
	ops::DataPlaneInput,
	response::Response,
};

/// Reserved range-start sentinel meaning "append at the object's current end".
pub const APPEND_OFFSET: i64 = -1;

/// A POSIX file mode decoded from the server's `mode` field.
///
/// Strings beginning with `0` are parsed as octal; any other shape is parsed as decimal.
/// The server occasionally encodes extra file-type flags in the number's top nibble (bits
/// 28-31); those are repositioned into their canonical POSIX location (bit 17) and merged
/// back in rather than replacing the rest of the value, so a plain already-POSIX mode
/// (top nibble zero) round-trips unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode(pub u32);
impl Mode {
	/// Parses the server's mode string.
	pub fn parse(raw: &str) -> Result<Self, DecodeError> {
		let parsed = if let Some(octal) = raw.strip_prefix('0') {
			if octal.is_empty() {
				0
			} else {
				u32::from_str_radix(octal, 8)
					.map_err(|e| DecodeError::frame(format!("invalid octal mode {raw}: {e}"), None))?
			}
		} else {
			raw.parse::<u32>()
				.map_err(|e| DecodeError::frame(format!("invalid decimal mode {raw}: {e}"), None))?
		};
		let top_nibble = (parsed >> 28) & 0xF;

		Ok(Self(parsed | (top_nibble << 17)))
	}

	/// The `rwxrwxrwx` plus setuid/setgid/sticky bits (low 12 bits, octal `07777`).
	pub fn permission_bits(&self) -> u32 {
		self.0 & 0o7777
	}

	/// True when the POSIX file-type field (`S_IFMT`) denotes a regular file.
	pub fn is_regular(&self) -> bool {
		self.0 & 0o170000 == 0o100000
	}

	/// True when the POSIX file-type field (`S_IFMT`) denotes a directory.
	pub fn is_dir(&self) -> bool {
		self.0 & 0o170000 == 0o040000
	}

	/// Renders the mode back to its canonical decimal wire form.
	pub fn render(&self) -> String {
		self.0.to_string()
	}
}

/// Input to `GetObject`.
#[derive(Clone, Debug)]
pub struct GetObjectInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Object path inside the container.
	pub path: String,
	/// Inclusive byte range `(offset, length)`; `None` reads the whole object.
	pub range: Option<(u64, u64)>,
}
impl GetObjectInput {
	/// Creates a whole-object read.
	pub fn new(data_plane: DataPlaneInput, path: impl Into<String>) -> Self {
		Self { data_plane, path: path.into(), range: None }
	}

	/// Requests a ranged read starting at `offset` for `length` bytes.
	pub fn with_range(mut self, offset: u64, length: u64) -> Self {
		self.range = Some((offset, length));

		self
	}
}

/// Output of `GetObject`: the raw bytes, available from the response body.
#[derive(Clone, Debug)]
pub struct GetObjectOutput {
	/// Object bytes for the requested range (or the whole object).
	pub body: bytes::Bytes,
}

/// Input to `PutObject`. An offset of [`APPEND_OFFSET`] appends at the object's
/// current end.
#[derive(Clone, Debug)]
pub struct PutObjectInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Object path inside the container.
	pub path: String,
	/// Starting byte offset, or [`APPEND_OFFSET`] to append.
	pub offset: i64,
	/// Bytes to write.
	pub body: bytes::Bytes,
}

/// Directory attribute updates sent by `UpdateObject`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DirAttributes {
	/// POSIX mode, rendered back to decimal on the wire.
	#[serde(rename = "mode", skip_serializing_if = "Option::is_none")]
	pub mode: Option<u32>,
	/// Owning user ID.
	#[serde(rename = "uid", skip_serializing_if = "Option::is_none")]
	pub uid: Option<u32>,
	/// Owning group ID.
	#[serde(rename = "gid", skip_serializing_if = "Option::is_none")]
	pub gid: Option<u32>,
	/// Access time, seconds since the epoch.
	#[serde(rename = "atime_sec", skip_serializing_if = "Option::is_none")]
	pub atime_sec: Option<i64>,
	/// Change time, seconds since the epoch.
	#[serde(rename = "ctime_sec", skip_serializing_if = "Option::is_none")]
	pub ctime_sec: Option<i64>,
	/// Modification time, seconds since the epoch.
	#[serde(rename = "mtime_sec", skip_serializing_if = "Option::is_none")]
	pub mtime_sec: Option<i64>,
}

/// Input to `UpdateObject`.
#[derive(Clone, Debug)]
pub struct UpdateObjectInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Directory path inside the container.
	pub path: String,
	/// Attributes to set.
	pub attributes: DirAttributes,
}

/// Input to `DeleteObject`/`CheckPathExists`: just the path.
#[derive(Clone, Debug)]
pub struct ObjectPathInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Object or directory path inside the container.
	pub path: String,
}
impl ObjectPathInput {
	/// Creates a path-only input.
	pub fn new(data_plane: DataPlaneInput, path: impl Into<String>) -> Self {
		Self { data_plane, path: path.into() }
	}
}

/// Output of `CheckPathExists`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckPathExistsOutput {
	/// True when the `HEAD` request returned a 2xx status.
	pub exists: bool,
}

/// One segment of a `PutOOSObject` request: a header blob and its payload (the exact
/// iovec byte layout is an implementer decision, recorded in `DESIGN.md`).
#[derive(Clone, Debug)]
pub struct IoVec {
	/// Raw bytes for this segment.
	pub data: bytes::Bytes,
}

/// Input to `PutOOSObject`: an ordered list of iovecs concatenated into the
/// request body, with `io-vec-num`/`io-vec-sizes` headers describing the split.
#[derive(Clone, Debug)]
pub struct PutOosObjectInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Object path inside the container.
	pub path: String,
	/// Segments to concatenate, in order.
	pub iovecs: Vec<IoVec>,
}

impl<C, M> Dispatcher<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Reads an object (or a byte range of it), on the caller's own task.
	pub async fn get_object_sync(
		&self,
		input: GetObjectInput,
	) -> Result<(GetObjectOutput, Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let mut spec = HttpRequestSpec::new(Method::Get, url);

		if let Some((offset, length)) = input.range {
			let end = offset + length.saturating_sub(1);

			spec = spec.with_header("Range", format!("bytes={offset}-{end}"));
		}

		let response = self.execute_operation(&input.data_plane, spec).await?;
		let body = bytes::Bytes::copy_from_slice(response.body());

		Ok((GetObjectOutput { body }, response))
	}

	/// Enqueues [`Dispatcher::get_object_sync`] and returns a handle immediately.
	pub async fn get_object(
		&self,
		input: GetObjectInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.get_object_sync(input).await })
			.await
	}

	/// Writes (or appends to) an object, on the caller's own task.
	pub async fn put_object_sync(&self, input: PutObjectInput) -> Result<((), Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let mut spec = HttpRequestSpec::new(Method::Put, url).with_body(input.body);

		spec = if input.offset == APPEND_OFFSET {
			spec.with_header("Range", "-1")
		} else {
			spec.with_header("Range", format!("bytes={}-", input.offset))
		};

		let response = self.execute_operation(&input.data_plane, spec).await?;

		Ok(((), response))
	}

	/// Enqueues [`Dispatcher::put_object_sync`] and returns a handle immediately.
	pub async fn put_object(
		&self,
		input: PutObjectInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.put_object_sync(input).await })
			.await
	}

	/// Updates directory attributes, on the caller's own task.
	pub async fn update_object_sync(&self, input: UpdateObjectInput) -> Result<((), Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let body = serde_json::to_vec(&input.attributes)
			.expect("DirAttributes serialization is infallible.");
		let spec = HttpRequestSpec::new(Method::Put, url)
			.with_header("X-v3io-function", "DirSetAttr")
			.with_body(body);
		let response = self.execute_operation(&input.data_plane, spec).await?;

		Ok(((), response))
	}

	/// Enqueues [`Dispatcher::update_object_sync`] and returns a handle immediately.
	pub async fn update_object(
		&self,
		input: UpdateObjectInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.update_object_sync(input).await })
			.await
	}

	/// Deletes an object, on the caller's own task.
	pub async fn delete_object_sync(&self, input: ObjectPathInput) -> Result<((), Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let spec = HttpRequestSpec::new(Method::Delete, url);
		let response = self.execute_operation(&input.data_plane, spec).await?;

		Ok(((), response))
	}

	/// Enqueues [`Dispatcher::delete_object_sync`] and returns a handle immediately.
	pub async fn delete_object(
		&self,
		input: ObjectPathInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.delete_object_sync(input).await })
			.await
	}

	/// Checks whether a path exists, on the caller's own task. Any non-2xx status is
	/// reported as `exists: false` rather than surfaced as an error; transport-level
	/// failures still propagate.
	pub async fn check_path_exists_sync(
		&self,
		input: ObjectPathInput,
	) -> Result<(CheckPathExistsOutput, Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let spec = HttpRequestSpec::new(Method::Head, url);
		let (status, response) = self.execute_operation_raw(&input.data_plane, spec).await?;
		let exists = (200..300).contains(&status);

		Ok((CheckPathExistsOutput { exists }, response))
	}

	/// Enqueues [`Dispatcher::check_path_exists_sync`] and returns a handle immediately.
	pub async fn check_path_exists(
		&self,
		input: ObjectPathInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move {
			d.check_path_exists_sync(input).await
		})
		.await
	}

	/// Writes a concatenated-iovec object, on the caller's own task.
	pub async fn put_oos_object_sync(&self, input: PutOosObjectInput) -> Result<((), Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let sizes = input
			.iovecs
			.iter()
			.map(|v| v.data.len().to_string())
			.collect::<Vec<_>>()
			.join(",");
		let mut body = bytes::BytesMut::new();

		for iovec in &input.iovecs {
			body.extend_from_slice(&iovec.data);
		}

		let spec = HttpRequestSpec::new(Method::Put, url)
			.with_header("X-v3io-function", "PutOOSObject")
			.with_header("io-vec-num", input.iovecs.len().to_string())
			.with_header("io-vec-sizes", sizes)
			.with_body(body.freeze());
		let response = self.execute_operation(&input.data_plane, spec).await?;

		Ok(((), response))
	}

	/// Enqueues [`Dispatcher::put_oos_object_sync`] and returns a handle immediately.
	pub async fn put_oos_object(
		&self,
		input: PutOosObjectInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move {
			d.put_oos_object_sync(input).await
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scenario_file_mode_decoding_octal_and_decimal_agree() {
		let octal = Mode::parse("0100664").expect("Octal mode should parse.");
		let decimal = Mode::parse("33204").expect("Decimal mode should parse.");

		assert_eq!(octal, decimal);
		assert!(octal.is_regular());
		assert_eq!(octal.permission_bits(), 0o664);
	}

	#[test]
	fn rejects_malformed_mode_strings() {
		assert!(Mode::parse("0778").is_err());
		assert!(Mode::parse("not-a-number").is_err());
	}
}
