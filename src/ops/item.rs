//! `GetItem`, `GetItems`, `PutItem`, `PutItems`, and `UpdateItem`.

// self
use crate::{
	_prelude::*,
	codec::{self, Item, attribute::AttributeValue, binary::FRAMED_CONTENT_TYPE},
	dispatcher::{DispatchResponse, Dispatcher, RequestHandle},
	http::{HttpRequestSpec, HttpTransport, Method, TransportErrorMapper},
	ops::DataPlaneInput,
	response::Response,
};

fn requests_wildcard(attributes_to_get: &[String]) -> bool {
	attributes_to_get.iter().any(|a| a == "*" || a == "**")
}

fn last_path_segment(path: &str) -> &str {
	path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Input to `GetItem`.
#[derive(Clone, Debug)]
pub struct GetItemInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Full path to the item, including its key as the final segment.
	pub path: String,
	/// Attribute names to fetch; `*`/`**` request every attribute plus a synthetic
	/// `__name` carrying the item's key.
	pub attributes_to_get: Vec<String>,
}
impl GetItemInput {
	/// Creates a `GetItem` input for the given path and attribute list.
	pub fn new(data_plane: DataPlaneInput, path: impl Into<String>, attributes_to_get: Vec<String>) -> Self {
		Self { data_plane, path: path.into(), attributes_to_get }
	}
}

/// Output of `GetItem`.
#[derive(Clone, Debug, Default)]
pub struct GetItemOutput {
	/// The decoded item.
	pub item: Item,
	/// The item's server-maintained modification time, parsed from the verifier header
	/// when the server attached one.
	pub modification_time: Option<codec::ModificationTime>,
}

/// Input to `GetItems`: a table (directory) scan with optional filtering, sharding, and
/// pagination.
#[derive(Clone, Debug)]
pub struct GetItemsInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Table (directory) path to scan.
	pub path: String,
	/// Attribute names to fetch; `*`/`**` request every attribute plus `__name`.
	pub attributes_to_get: Vec<String>,
	/// Opaque server-side filter expression, forwarded verbatim.
	pub filter_expression: Option<String>,
	/// Opaque pagination cursor from a previous call's `next_marker`.
	pub marker: Option<String>,
	/// Restricts the scan to one sharding-key partition.
	pub sharding_key: Option<String>,
	/// Maximum number of items to return in one page.
	pub limit: Option<u32>,
	/// This worker's segment index, for parallel segmented scans.
	pub segment: Option<u32>,
	/// Total segment count, for parallel segmented scans.
	pub total_segment: Option<u32>,
	/// Inclusive sort-key range start.
	pub sort_key_range_start: Option<String>,
	/// Inclusive sort-key range end.
	pub sort_key_range_end: Option<String>,
	/// Allows the server to scatter results across object boundaries.
	pub allow_object_scatter: bool,
	/// Requests item data be included inline, rather than key-only metadata.
	pub return_data: bool,
	/// Caps the size in bytes of returned data per item.
	pub data_max_size: Option<u32>,
	/// When true, negotiates the JSON encoding; when false, the framed binary encoding.
	pub as_json: bool,
}
impl GetItemsInput {
	/// Creates a `GetItems` scan over `path` with no filter, sharding, or pagination,
	/// negotiating JSON by default.
	pub fn new(data_plane: DataPlaneInput, path: impl Into<String>, attributes_to_get: Vec<String>) -> Self {
		Self {
			data_plane,
			path: path.into(),
			attributes_to_get,
			filter_expression: None,
			marker: None,
			sharding_key: None,
			limit: None,
			segment: None,
			total_segment: None,
			sort_key_range_start: None,
			sort_key_range_end: None,
			allow_object_scatter: false,
			return_data: true,
			data_max_size: None,
			as_json: true,
		}
	}

	/// Requests the framed binary encoding instead of JSON.
	pub fn with_binary_encoding(mut self) -> Self {
		self.as_json = false;

		self
	}

	/// Continues a previous scan from its `next_marker`.
	pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
		self.marker = Some(marker.into());

		self
	}

	/// Caps the number of items returned in one page.
	pub fn with_limit(mut self, limit: u32) -> Self {
		self.limit = Some(limit);

		self
	}
}

#[derive(Serialize)]
struct GetItemsBody<'a> {
	#[serde(rename = "AttributesToGet")]
	attributes_to_get: String,
	#[serde(rename = "TableName")]
	table_name: &'a str,
	#[serde(rename = "FilterExpression", skip_serializing_if = "Option::is_none")]
	filter_expression: Option<&'a str>,
	#[serde(rename = "Marker", skip_serializing_if = "Option::is_none")]
	marker: Option<&'a str>,
	#[serde(rename = "ShardingKey", skip_serializing_if = "Option::is_none")]
	sharding_key: Option<&'a str>,
	#[serde(rename = "Limit", skip_serializing_if = "Option::is_none")]
	limit: Option<u32>,
	#[serde(rename = "Segment", skip_serializing_if = "Option::is_none")]
	segment: Option<u32>,
	#[serde(rename = "TotalSegment", skip_serializing_if = "Option::is_none")]
	total_segment: Option<u32>,
	#[serde(rename = "SortKeyRangeStart", skip_serializing_if = "Option::is_none")]
	sort_key_range_start: Option<&'a str>,
	#[serde(rename = "SortKeyRangeEnd", skip_serializing_if = "Option::is_none")]
	sort_key_range_end: Option<&'a str>,
	#[serde(rename = "AllowObjectScatter")]
	allow_object_scatter: bool,
	#[serde(rename = "ReturnData")]
	return_data: bool,
	#[serde(rename = "DataMaxSize", skip_serializing_if = "Option::is_none")]
	data_max_size: Option<u32>,
}

/// Output of `GetItems`, including pagination state.
#[derive(Clone, Debug, Default)]
pub struct GetItemsOutput {
	/// Items matched by this page, keyed by item name when the server provided one.
	pub items: Vec<Item>,
	/// True when more pages remain.
	pub is_truncated: bool,
	/// Opaque cursor to resume the scan; present only when `is_truncated` is true.
	pub next_marker: Option<String>,
}

#[derive(Deserialize, Default)]
struct ItemsEnvelope {
	#[serde(rename = "Items", default)]
	items: HashMap<String, Item>,
	#[serde(rename = "NextMarker", default)]
	next_marker: Option<String>,
	#[serde(rename = "IsTruncated", default)]
	is_truncated: bool,
}

/// Input to `PutItem`.
#[derive(Clone, Debug)]
pub struct PutItemInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Full path to the item, including its key as the final segment.
	pub path: String,
	/// Attributes to write.
	pub item: Item,
	/// Opaque condition expression, forwarded verbatim; rejected writes surface as a
	/// precondition status error.
	pub condition_expression: Option<String>,
	/// Opaque update-mode string (e.g. `"CreateOrReplaceAttributes"`).
	pub update_mode: Option<String>,
}
impl PutItemInput {
	/// Creates a `PutItem` input with no condition or update-mode override.
	pub fn new(data_plane: DataPlaneInput, path: impl Into<String>, item: Item) -> Self {
		Self { data_plane, path: path.into(), item, condition_expression: None, update_mode: None }
	}

	/// Attaches a condition expression, forwarded verbatim to the server.
	pub fn with_condition_expression(mut self, expr: impl Into<String>) -> Self {
		self.condition_expression = Some(expr.into());

		self
	}
}

#[derive(Serialize)]
struct PutItemBody {
	#[serde(rename = "Item")]
	item: serde_json::Value,
	#[serde(rename = "ConditionExpression", skip_serializing_if = "Option::is_none")]
	condition_expression: Option<String>,
	#[serde(rename = "UpdateMode", skip_serializing_if = "Option::is_none")]
	update_mode: Option<String>,
}

/// Input to `UpdateItem`.
#[derive(Clone, Debug)]
pub struct UpdateItemInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Full path to the item, including its key as the final segment.
	pub path: String,
	/// Opaque update expression, forwarded verbatim.
	pub update_expression: String,
	/// Opaque update-mode string.
	pub update_mode: Option<String>,
	/// Opaque condition expression, forwarded verbatim.
	pub condition_expression: Option<String>,
}

#[derive(Serialize)]
struct UpdateItemBody<'a> {
	#[serde(rename = "UpdateExpression")]
	update_expression: &'a str,
	#[serde(rename = "UpdateMode", skip_serializing_if = "Option::is_none")]
	update_mode: Option<&'a str>,
	#[serde(rename = "ConditionExpression", skip_serializing_if = "Option::is_none")]
	condition_expression: Option<&'a str>,
}

/// Input to `PutItems`: a client-side fan-out of one `PutItem` per element.
#[derive(Clone, Debug)]
pub struct PutItemsInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Table (directory) path; each item is written to `<path>/<key>`.
	pub path: String,
	/// Items to write, keyed by item key.
	pub items: HashMap<String, Item>,
}

/// Output of `PutItems`: per-key failures, if any. Overall success is `errors.is_empty()`;
/// there is no transactional rollback.
#[derive(Clone, Debug, Default)]
pub struct PutItemsOutput {
	/// Error message per failed item key.
	pub errors: HashMap<String, String>,
}
impl PutItemsOutput {
	/// True when every `PutItem` fan-out call succeeded.
	pub fn is_success(&self) -> bool {
		self.errors.is_empty()
	}
}

impl<C, M> Dispatcher<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Fetches a single item, on the caller's own task.
	pub async fn get_item_sync(&self, input: GetItemInput) -> Result<(GetItemOutput, Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let body = serde_json::json!({ "AttributesToGet": input.attributes_to_get.join(",") });
		let spec = HttpRequestSpec::new(Method::Put, url)
			.with_header("X-v3io-function", "GetItem")
			.with_body(serde_json::to_vec(&body).expect("GetItem body is infallible."));
		let response = self.execute_operation(&input.data_plane, spec).await?;
		let mut item = codec::attribute::decode_item(response.body())?;
		let modification_time = response.modification_time();

		if requests_wildcard(&input.attributes_to_get) {
			item.insert("__name".to_owned(), AttributeValue::Str(last_path_segment(&input.path).to_owned()));
		}

		Ok((GetItemOutput { item, modification_time }, response))
	}

	/// Enqueues [`Dispatcher::get_item_sync`] and returns a handle immediately.
	pub async fn get_item(
		&self,
		input: GetItemInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.get_item_sync(input).await })
			.await
	}

	/// Scans a table page, on the caller's own task, negotiating JSON or the framed binary
	/// encoding per `input.as_json`.
	pub async fn get_items_sync(&self, input: GetItemsInput) -> Result<(GetItemsOutput, Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let wildcard = requests_wildcard(&input.attributes_to_get);
		let body = GetItemsBody {
			attributes_to_get: input.attributes_to_get.join(","),
			table_name: &input.path,
			filter_expression: input.filter_expression.as_deref(),
			marker: input.marker.as_deref(),
			sharding_key: input.sharding_key.as_deref(),
			limit: input.limit,
			segment: input.segment,
			total_segment: input.total_segment,
			sort_key_range_start: input.sort_key_range_start.as_deref(),
			sort_key_range_end: input.sort_key_range_end.as_deref(),
			allow_object_scatter: input.allow_object_scatter,
			return_data: input.return_data,
			data_max_size: input.data_max_size,
		};
		let mut spec = HttpRequestSpec::new(Method::Put, url)
			.with_header("X-v3io-function", "GetItems")
			.with_body(serde_json::to_vec(&body).expect("GetItems body is infallible."));

		if !input.as_json {
			spec = spec.with_header("Accept", FRAMED_CONTENT_TYPE);
		}

		let response = self.execute_operation(&input.data_plane, spec).await?;
		let negotiated_binary = response
			.header("Content-Type")
			.map(|ct| ct == FRAMED_CONTENT_TYPE)
			.unwrap_or(false);
		let (mut items, next_marker, is_truncated) = if negotiated_binary {
			let items = codec::binary::decode_items(response.body())?;

			(items, None, false)
		} else {
			let envelope: ItemsEnvelope = {
				let de = &mut serde_json::Deserializer::from_slice(response.body());

				serde_path_to_error::deserialize(de).map_err(crate::error::DecodeError::from)?
			};
			let mut items = Vec::with_capacity(envelope.items.len());

			for (key, mut item) in envelope.items {
				if wildcard {
					item.insert("__name".to_owned(), AttributeValue::Str(key));
				}

				items.push(item);
			}

			(items, envelope.next_marker, envelope.is_truncated)
		};

		if negotiated_binary && wildcard {
			for item in &mut items {
				item.entry("__name".to_owned()).or_insert_with(|| AttributeValue::Str(String::new()));
			}
		}

		Ok((GetItemsOutput { items, is_truncated, next_marker }, response))
	}

	/// Enqueues [`Dispatcher::get_items_sync`] and returns a handle immediately.
	pub async fn get_items(
		&self,
		input: GetItemsInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.get_items_sync(input).await })
			.await
	}

	/// Writes a single item, on the caller's own task.
	pub async fn put_item_sync(&self, input: PutItemInput) -> Result<((), Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let body = PutItemBody {
			item: codec::attribute::encode_item(&input.item),
			condition_expression: input.condition_expression,
			update_mode: input.update_mode,
		};
		let spec = HttpRequestSpec::new(Method::Put, url)
			.with_header("X-v3io-function", "PutItem")
			.with_body(serde_json::to_vec(&body).expect("PutItem body is infallible."));
		let response = self.execute_operation(&input.data_plane, spec).await?;

		Ok(((), response))
	}

	/// Enqueues [`Dispatcher::put_item_sync`] and returns a handle immediately.
	pub async fn put_item(
		&self,
		input: PutItemInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.put_item_sync(input).await })
			.await
	}

	/// Updates a single item via an update expression, on the caller's own task.
	pub async fn update_item_sync(&self, input: UpdateItemInput) -> Result<((), Response)> {
		let url = crate::uri::build(&self.session().url, &input.data_plane.container, &input.path, None)?;
		let body = UpdateItemBody {
			update_expression: &input.update_expression,
			update_mode: input.update_mode.as_deref(),
			condition_expression: input.condition_expression.as_deref(),
		};
		let spec = HttpRequestSpec::new(Method::Post, url)
			.with_header("X-v3io-function", "UpdateItem")
			.with_body(serde_json::to_vec(&body).expect("UpdateItem body is infallible."));
		let response = self.execute_operation(&input.data_plane, spec).await?;

		Ok(((), response))
	}

	/// Enqueues [`Dispatcher::update_item_sync`] and returns a handle immediately.
	pub async fn update_item(
		&self,
		input: UpdateItemInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.update_item_sync(input).await })
			.await
	}

	/// Fans out one `PutItem` per element, accumulating per-key errors. Never
	/// fails outright; inspect [`PutItemsOutput::is_success`].
	pub async fn put_items_sync(&self, input: PutItemsInput) -> Result<(PutItemsOutput, Response)> {
		let mut errors = HashMap::new();
		let mut last_response = None;

		for (key, item) in input.items {
			let path = format!("{}/{key}", input.path.trim_end_matches('/'));
			let put = PutItemInput::new(input.data_plane.clone(), path, item);

			match self.put_item_sync(put).await {
				Ok((_, response)) => last_response = Some(response),
				Err(e) => {
					errors.insert(key, e.to_string());
				},
			}
		}

		let response = match last_response {
			Some(response) => response,
			None => {
				let spec = HttpRequestSpec::new(Method::Head, self.session().url.clone());
				let (_, response) = self.execute_operation_raw(&input.data_plane, spec).await?;

				response
			},
		};

		Ok((PutItemsOutput { errors }, response))
	}

	/// Enqueues [`Dispatcher::put_items_sync`] and returns a handle immediately.
	pub async fn put_items(
		&self,
		input: PutItemsInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.put_items_sync(input).await })
			.await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn wildcard_detection_matches_star_and_double_star() {
		assert!(requests_wildcard(&["*".to_string()]));
		assert!(requests_wildcard(&["**".to_string()]));
		assert!(!requests_wildcard(&["age".to_string()]));
	}

	#[test]
	fn last_path_segment_strips_trailing_slash() {
		assert_eq!(last_path_segment("/t/it/"), "it");
		assert_eq!(last_path_segment("/t/it"), "it");
	}

	#[test]
	fn put_items_output_success_iff_no_errors() {
		let mut output = PutItemsOutput::default();

		assert!(output.is_success());

		output.errors.insert("k".to_string(), "boom".to_string());

		assert!(!output.is_success());
	}
}
