//! `CreateStream`, `DescribeStream`, `DeleteStream`, `SeekShard`, `PutRecords`,
//! `GetRecords`, and `PutChunk`.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	dispatcher::{DispatchResponse, Dispatcher, RequestHandle},
	http::{HttpRequestSpec, HttpTransport, Method, TransportErrorMapper},
	ops::DataPlaneInput,
	response::Response,
};

/// Input to `CreateStream`.
#[derive(Clone, Debug)]
pub struct CreateStreamInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Stream path.
	pub path: String,
	/// Number of shards to create.
	pub shard_count: u32,
	/// Retention period in hours.
	pub retention_period_hours: u32,
}
impl CreateStreamInput {
	/// Creates a `CreateStream` input with the given shard count and retention.
	pub fn new(
		data_plane: DataPlaneInput,
		path: impl Into<String>,
		shard_count: u32,
		retention_period_hours: u32,
	) -> Self {
		Self { data_plane, path: path.into(), shard_count, retention_period_hours }
	}
}

#[derive(Serialize)]
struct CreateStreamBody {
	#[serde(rename = "ShardCount")]
	shard_count: u32,
	#[serde(rename = "RetentionPeriodHours")]
	retention_period_hours: u32,
}

/// Input to `DescribeStream`.
#[derive(Clone, Debug)]
pub struct DescribeStreamInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Stream path.
	pub path: String,
}

/// Output of `DescribeStream`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DescribeStreamOutput {
	/// Number of shards in the stream.
	#[serde(rename = "ShardCount", default)]
	pub shard_count: u32,
	/// Retention period in hours.
	#[serde(rename = "RetentionPeriodHours", default)]
	pub retention_period_hours: u32,
}

/// Input to `DeleteStream`: a composite operation that lists the stream's shards, deletes
/// each, then deletes the stream directory itself.
#[derive(Clone, Debug)]
pub struct DeleteStreamInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Stream path.
	pub path: String,
}

/// Output of `DeleteStream`: errors encountered per shard path, if any. The operation does
/// not stop at the first failure — it continues through every remaining shard so a single
/// unreachable shard cannot strand the rest of the stream undeleted.
#[derive(Clone, Debug, Default)]
pub struct DeleteStreamOutput {
	/// Error message per shard path that failed to delete.
	pub shard_errors: HashMap<String, String>,
}
impl DeleteStreamOutput {
	/// True when every shard and the stream directory itself deleted cleanly.
	pub fn is_success(&self) -> bool {
		self.shard_errors.is_empty()
	}
}

/// Starting point for a shard read, shared with the consumer-group coordinator.
#[derive(Clone, Debug)]
pub enum SeekType {
	/// Earliest retained record.
	Earliest,
	/// Most recently written record.
	Latest,
	/// First record at or after the given Unix timestamp.
	Time {
		/// Seconds since the Unix epoch.
		secs: i64,
		/// Nanosecond remainder.
		nanos: i64,
	},
	/// Exact sequence number.
	Sequence(u64),
}
impl SeekType {
	fn type_name(&self) -> &'static str {
		match self {
			SeekType::Earliest => "EARLIEST",
			SeekType::Latest => "LATEST",
			SeekType::Time { .. } => "TIME",
			SeekType::Sequence(_) => "SEQUENCE",
		}
	}
}

/// Input to `SeekShard`.
#[derive(Clone, Debug)]
pub struct SeekShardInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Shard path.
	pub path: String,
	/// Starting point for the returned [`Location`].
	pub seek: SeekType,
}

#[derive(Serialize)]
struct SeekShardBody {
	#[serde(rename = "Type")]
	seek_type: &'static str,
	#[serde(rename = "StartingSequenceNumber", skip_serializing_if = "Option::is_none")]
	starting_sequence_number: Option<u64>,
	#[serde(rename = "TimestampSec", skip_serializing_if = "Option::is_none")]
	timestamp_sec: Option<i64>,
	#[serde(rename = "TimestampNSec", skip_serializing_if = "Option::is_none")]
	timestamp_nsec: Option<i64>,
}
impl From<&SeekType> for SeekShardBody {
	fn from(seek: &SeekType) -> Self {
		let mut body = SeekShardBody {
			seek_type: seek.type_name(),
			starting_sequence_number: None,
			timestamp_sec: None,
			timestamp_nsec: None,
		};

		match seek {
			SeekType::Sequence(n) => body.starting_sequence_number = Some(*n),
			SeekType::Time { secs, nanos } => {
				body.timestamp_sec = Some(*secs);
				body.timestamp_nsec = Some(*nanos);
			},
			SeekType::Earliest | SeekType::Latest => {},
		}

		body
	}
}

#[derive(Deserialize)]
struct SeekShardResponseBody {
	#[serde(rename = "Location")]
	location: String,
}

/// An opaque, server-minted cursor into a shard; callers must not interpret its contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location(pub String);

/// Input to `PutRecords`.
#[derive(Clone, Debug)]
pub struct PutRecordsInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Stream path.
	pub path: String,
	/// Records to append, in order.
	pub records: Vec<RecordToPut>,
}

/// One record submitted to `PutRecords`.
#[derive(Clone, Debug)]
pub struct RecordToPut {
	/// Record payload.
	pub data: bytes::Bytes,
	/// Opaque client-supplied metadata, round-tripped alongside the record.
	pub client_info: Option<bytes::Bytes>,
	/// Pins the record to a specific shard, bypassing partition-key hashing.
	pub shard_id: Option<u32>,
	/// Hashed to choose a shard when `shard_id` is absent.
	pub partition_key: Option<String>,
}
impl RecordToPut {
	/// Creates a record with no client info, explicit shard, or partition key.
	pub fn new(data: impl Into<bytes::Bytes>) -> Self {
		Self { data: data.into(), client_info: None, shard_id: None, partition_key: None }
	}

	/// Pins this record to a specific shard.
	pub fn with_shard_id(mut self, shard_id: u32) -> Self {
		self.shard_id = Some(shard_id);

		self
	}

	/// Sets the partition key used to choose a shard when no explicit shard ID is set.
	pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
		self.partition_key = Some(key.into());

		self
	}
}

#[derive(Serialize)]
struct PutRecordsBody {
	#[serde(rename = "Records")]
	records: Vec<PutRecordsRecordBody>,
}

#[derive(Serialize)]
struct PutRecordsRecordBody {
	#[serde(rename = "Data")]
	data: String,
	#[serde(rename = "ClientInfo", skip_serializing_if = "Option::is_none")]
	client_info: Option<String>,
	#[serde(rename = "ShardId", skip_serializing_if = "Option::is_none")]
	shard_id: Option<u32>,
	#[serde(rename = "PartitionKey", skip_serializing_if = "Option::is_none")]
	partition_key: Option<String>,
}

#[derive(Deserialize)]
struct PutRecordsResponseBody {
	#[serde(rename = "FailedRecordCount", default)]
	failed_record_count: u32,
	#[serde(rename = "Records", default)]
	records: Vec<PutRecordsResultRecord>,
}

#[derive(Deserialize)]
struct PutRecordsResultRecord {
	#[serde(rename = "SequenceNumber", default)]
	sequence_number: Option<u64>,
	#[serde(rename = "ErrorCode", default)]
	error_code: Option<String>,
	#[serde(rename = "ErrorMessage", default)]
	error_message: Option<String>,
}

/// Per-record result of a `PutRecords` call, in request order.
#[derive(Clone, Debug)]
pub struct PutRecordResult {
	/// Sequence number assigned to the record, on success.
	pub sequence_number: Option<u64>,
	/// Error code, if this record was rejected.
	pub error_code: Option<String>,
	/// Error message, if this record was rejected.
	pub error_message: Option<String>,
}
impl PutRecordResult {
	/// True when the record was accepted (no error code present).
	pub fn is_success(&self) -> bool {
		self.error_code.is_none()
	}
}

/// Output of `PutRecords`.
#[derive(Clone, Debug, Default)]
pub struct PutRecordsOutput {
	/// Number of records the server rejected.
	pub failed_record_count: u32,
	/// Per-record results, in request order.
	pub records: Vec<PutRecordResult>,
}

/// Input to `GetRecords`.
#[derive(Clone, Debug)]
pub struct GetRecordsInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Shard path.
	pub path: String,
	/// Cursor returned by a prior `SeekShard` or `GetRecords` call.
	pub location: Location,
	/// Maximum number of records to return.
	pub limit: u32,
}

#[derive(Serialize)]
struct GetRecordsBody<'a> {
	#[serde(rename = "Location")]
	location: &'a str,
	#[serde(rename = "Limit")]
	limit: u32,
}

#[derive(Deserialize)]
struct GetRecordsResponseBody {
	#[serde(rename = "NextLocation")]
	next_location: String,
	#[serde(rename = "MSecBehindLatest", default)]
	msec_behind_latest: u64,
	#[serde(rename = "Records", default)]
	records: Vec<GetRecordsRecordBody>,
}

#[derive(Deserialize)]
struct GetRecordsRecordBody {
	#[serde(rename = "Data")]
	data: String,
	#[serde(rename = "ClientInfo", default)]
	client_info: Option<String>,
	#[serde(rename = "ArrivalTimeSec", default)]
	arrival_time_sec: Option<i64>,
	#[serde(rename = "PartitionKey", default)]
	partition_key: Option<String>,
	#[serde(rename = "SequenceNumber")]
	sequence_number: u64,
}

/// One record returned by `GetRecords`.
#[derive(Clone, Debug)]
pub struct Record {
	/// Record payload.
	pub data: bytes::Bytes,
	/// Opaque client-supplied metadata, if the writer attached any.
	pub client_info: Option<bytes::Bytes>,
	/// Server-assigned arrival timestamp, seconds since the Unix epoch.
	pub arrival_time_sec: Option<i64>,
	/// Partition key the writer supplied, if any.
	pub partition_key: Option<String>,
	/// This record's sequence number within its shard.
	pub sequence_number: u64,
}

/// Output of `GetRecords`: the records plus a cursor to continue from.
#[derive(Clone, Debug)]
pub struct GetRecordsOutput {
	/// Records matched by this call, in shard order.
	pub records: Vec<Record>,
	/// Cursor to pass to the next `GetRecords` call.
	pub next_location: Location,
	/// Approximate lag behind the shard's latest record, in milliseconds.
	pub msec_behind_latest: u64,
}

/// Input to `PutChunk`: appends a pre-assembled chunk of already-encoded records directly
/// to a shard, bypassing per-record framing.
#[derive(Clone, Debug)]
pub struct PutChunkInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Shard path.
	pub path: String,
	/// Pre-encoded chunk payload.
	pub data: bytes::Bytes,
}

impl<C, M> Dispatcher<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Creates a stream with the given shard count and retention, on the caller's own task.
	pub async fn create_stream_sync(&self, input: CreateStreamInput) -> Result<((), Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let body = CreateStreamBody {
			shard_count: input.shard_count,
			retention_period_hours: input.retention_period_hours,
		};
		let spec = HttpRequestSpec::new(Method::Post, url)
			.with_header("X-v3io-function", "CreateStream")
			.with_body(serde_json::to_vec(&body).expect("CreateStream body is infallible."));
		let response = self.execute_operation(&input.data_plane, spec).await?;

		Ok(((), response))
	}

	/// Enqueues [`Dispatcher::create_stream_sync`] and returns a handle immediately.
	pub async fn create_stream(
		&self,
		input: CreateStreamInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.create_stream_sync(input).await })
			.await
	}

	/// Fetches a stream's shard count and retention, on the caller's own task.
	pub async fn describe_stream_sync(
		&self,
		input: DescribeStreamInput,
	) -> Result<(DescribeStreamOutput, Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let spec = HttpRequestSpec::new(Method::Put, url).with_header("X-v3io-function", "DescribeStream");
		let response = self.execute_operation(&input.data_plane, spec).await?;
		let output = {
			let de = &mut serde_json::Deserializer::from_slice(response.body());

			serde_path_to_error::deserialize(de).map_err(crate::error::DecodeError::from)?
		};

		Ok((output, response))
	}

	/// Enqueues [`Dispatcher::describe_stream_sync`] and returns a handle immediately.
	pub async fn describe_stream(
		&self,
		input: DescribeStreamInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.describe_stream_sync(input).await })
			.await
	}

	/// Deletes a stream's shards, then the stream directory, continuing past per-shard
	/// failures rather than stopping at the first.
	pub async fn delete_stream_sync(
		&self,
		input: DeleteStreamInput,
	) -> Result<(DeleteStreamOutput, Response)> {
		let contents_input = crate::ops::container::GetContainerContentsInput::new(
			input.data_plane.clone(),
			input.path.clone(),
		);
		let (contents, response) = self.get_container_contents_sync(contents_input).await?;

		response.release();

		let mut shard_errors = HashMap::new();

		for entry in contents.contents {
			let delete_input = crate::ops::object::ObjectPathInput::new(
				input.data_plane.clone(),
				entry.key.clone(),
			);

			match self.delete_object_sync(delete_input).await {
				Ok((_, response)) => response.release(),
				Err(e) => {
					shard_errors.insert(entry.key, e.to_string());
				},
			}
		}

		let delete_dir = crate::ops::object::ObjectPathInput::new(input.data_plane.clone(), input.path.clone());
		let response = match self.delete_object_sync(delete_dir).await {
			Ok((_, response)) => response,
			Err(e) => {
				shard_errors.insert(input.path.clone(), e.to_string());

				let spec = HttpRequestSpec::new(Method::Head, self.session().url.clone());
				let (_, response) = self.execute_operation_raw(&input.data_plane, spec).await?;

				response
			},
		};

		Ok((DeleteStreamOutput { shard_errors }, response))
	}

	/// Enqueues [`Dispatcher::delete_stream_sync`] and returns a handle immediately.
	pub async fn delete_stream(
		&self,
		input: DeleteStreamInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.delete_stream_sync(input).await })
			.await
	}

	/// Resolves a starting point into an opaque shard cursor, on the caller's own task.
	pub async fn seek_shard_sync(&self, input: SeekShardInput) -> Result<(Location, Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let body: SeekShardBody = (&input.seek).into();
		let spec = HttpRequestSpec::new(Method::Put, url)
			.with_header("X-v3io-function", "SeekShard")
			.with_body(serde_json::to_vec(&body).expect("SeekShard body is infallible."));
		let response = self.execute_operation(&input.data_plane, spec).await?;
		let de = &mut serde_json::Deserializer::from_slice(response.body());
		let parsed: SeekShardResponseBody =
			serde_path_to_error::deserialize(de).map_err(crate::error::DecodeError::from)?;

		Ok((Location(parsed.location), response))
	}

	/// Enqueues [`Dispatcher::seek_shard_sync`] and returns a handle immediately.
	pub async fn seek_shard(
		&self,
		input: SeekShardInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.seek_shard_sync(input).await })
			.await
	}

	/// Appends records to a stream, letting the server choose shards by partition key or
	/// explicit shard ID, on the caller's own task.
	pub async fn put_records_sync(&self, input: PutRecordsInput) -> Result<(PutRecordsOutput, Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let body = PutRecordsBody {
			records: input
				.records
				.iter()
				.map(|r| PutRecordsRecordBody {
					data: STANDARD.encode(&r.data),
					client_info: r.client_info.as_ref().map(|b| STANDARD.encode(b)),
					shard_id: r.shard_id,
					partition_key: r.partition_key.clone(),
				})
				.collect(),
		};
		let spec = HttpRequestSpec::new(Method::Post, url)
			.with_header("X-v3io-function", "PutRecords")
			.with_body(serde_json::to_vec(&body).expect("PutRecords body is infallible."));
		let response = self.execute_operation(&input.data_plane, spec).await?;
		let de = &mut serde_json::Deserializer::from_slice(response.body());
		let parsed: PutRecordsResponseBody =
			serde_path_to_error::deserialize(de).map_err(crate::error::DecodeError::from)?;
		let records = parsed
			.records
			.into_iter()
			.map(|r| PutRecordResult {
				sequence_number: r.sequence_number,
				error_code: r.error_code,
				error_message: r.error_message,
			})
			.collect();

		Ok((PutRecordsOutput { failed_record_count: parsed.failed_record_count, records }, response))
	}

	/// Enqueues [`Dispatcher::put_records_sync`] and returns a handle immediately.
	pub async fn put_records(
		&self,
		input: PutRecordsInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.put_records_sync(input).await })
			.await
	}

	/// Fetches records starting at `input.location`, on the caller's own task.
	pub async fn get_records_sync(&self, input: GetRecordsInput) -> Result<(GetRecordsOutput, Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let body = GetRecordsBody { location: &input.location.0, limit: input.limit };
		let spec = HttpRequestSpec::new(Method::Put, url)
			.with_header("X-v3io-function", "GetRecords")
			.with_body(serde_json::to_vec(&body).expect("GetRecords body is infallible."));
		let response = self.execute_operation(&input.data_plane, spec).await?;
		let de = &mut serde_json::Deserializer::from_slice(response.body());
		let parsed: GetRecordsResponseBody =
			serde_path_to_error::deserialize(de).map_err(crate::error::DecodeError::from)?;
		let mut records = Vec::with_capacity(parsed.records.len());

		for r in parsed.records {
			let data = STANDARD
				.decode(&r.data)
				.map_err(|e| crate::error::DecodeError::frame(format!("invalid record data: {e}"), None))?;
			let client_info = r
				.client_info
				.map(|ci| STANDARD.decode(ci))
				.transpose()
				.map_err(|e| crate::error::DecodeError::frame(format!("invalid client info: {e}"), None))?;

			records.push(Record {
				data: data.into(),
				client_info: client_info.map(Into::into),
				arrival_time_sec: r.arrival_time_sec,
				partition_key: r.partition_key,
				sequence_number: r.sequence_number,
			});
		}

		Ok((
			GetRecordsOutput {
				records,
				next_location: Location(parsed.next_location),
				msec_behind_latest: parsed.msec_behind_latest,
			},
			response,
		))
	}

	/// Enqueues [`Dispatcher::get_records_sync`] and returns a handle immediately.
	pub async fn get_records(
		&self,
		input: GetRecordsInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.get_records_sync(input).await })
			.await
	}

	/// Appends a pre-encoded chunk directly to a shard, on the caller's own task.
	pub async fn put_chunk_sync(&self, input: PutChunkInput) -> Result<((), Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let spec = HttpRequestSpec::new(Method::Post, url)
			.with_header("X-v3io-function", "PutChunk")
			.with_body(input.data);
		let response = self.execute_operation(&input.data_plane, spec).await?;

		Ok(((), response))
	}

	/// Enqueues [`Dispatcher::put_chunk_sync`] and returns a handle immediately.
	pub async fn put_chunk(
		&self,
		input: PutChunkInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.put_chunk_sync(input).await })
			.await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn seek_type_names_match_the_wire_vocabulary() {
		assert_eq!(SeekType::Earliest.type_name(), "EARLIEST");
		assert_eq!(SeekType::Latest.type_name(), "LATEST");
		assert_eq!(SeekType::Time { secs: 1, nanos: 0 }.type_name(), "TIME");
		assert_eq!(SeekType::Sequence(4).type_name(), "SEQUENCE");
	}

	#[test]
	fn seek_shard_body_only_carries_the_field_its_type_needs() {
		let body: SeekShardBody = (&SeekType::Sequence(7)).into();

		assert_eq!(body.starting_sequence_number, Some(7));
		assert!(body.timestamp_sec.is_none());

		let body: SeekShardBody = (&SeekType::Time { secs: 5, nanos: 6 }).into();

		assert_eq!(body.timestamp_sec, Some(5));
		assert_eq!(body.timestamp_nsec, Some(6));
		assert!(body.starting_sequence_number.is_none());
	}

	#[test]
	fn put_record_result_success_iff_no_error_code() {
		let ok = PutRecordResult { sequence_number: Some(1), error_code: None, error_message: None };
		let failed = PutRecordResult {
			sequence_number: None,
			error_code: Some("E".into()),
			error_message: Some("boom".into()),
		};

		assert!(ok.is_success());
		assert!(!failed.is_success());
	}

	#[test]
	fn delete_stream_output_success_iff_no_shard_errors() {
		let mut output = DeleteStreamOutput::default();

		assert!(output.is_success());

		output.shard_errors.insert("s".into(), "boom".into());

		assert!(!output.is_success());
	}
}
