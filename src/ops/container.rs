//! `GetContainers`, `GetClusterMD`, and `GetContainerContents`.

// self
use crate::{
	_prelude::*,
	dispatcher::{DispatchResponse, Dispatcher, RequestHandle},
	http::{HttpRequestSpec, HttpTransport, Method, TransportErrorMapper},
	ops::{CancellationToken, DataPlaneInput},
	response::Response,
};

/// Parameters for operations scoped to the cluster rather than to one container
/// (`GetContainers`, `GetClusterMD`); unlike [`DataPlaneInput`] these carry no container
/// name since they address the cluster URL root.
#[derive(Clone, Debug, Default)]
pub struct ClusterInput {
	/// Cooperative cancellation signal.
	pub cancellation: CancellationToken,
	/// Per-call timeout override.
	pub timeout: Option<Duration>,
	/// When true, a failed call attaches the response body to the returned error.
	pub response_in_error: bool,
}
impl ClusterInput {
	/// Creates a default cluster-scoped input.
	pub fn new() -> Self {
		Self::default()
	}

	fn as_data_plane_input(&self) -> DataPlaneInput {
		let mut input = DataPlaneInput::new("_cluster").with_response_in_error(self.response_in_error);

		if let Some(timeout) = self.timeout {
			input = input.with_timeout(timeout);
		}

		input.cancellation = self.cancellation.clone();

		input
	}
}

/// A single tenant container name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerName(pub String);

/// Output of `GetContainers`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GetContainersOutput {
	/// Container names visible to the caller's credentials.
	#[serde(rename = "Containers", default)]
	pub containers: Vec<ContainerEntry>,
}

/// One container listing entry.
#[derive(Clone, Debug, Deserialize)]
pub struct ContainerEntry {
	/// Container name.
	#[serde(rename = "Name")]
	pub name: String,
}

/// Output of `GetClusterMD`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GetClusterMdOutput {
	/// Opaque cluster metadata document, forwarded verbatim.
	#[serde(flatten)]
	pub fields: HashMap<String, serde_json::Value>,
}

/// Input to `GetContainerContents`.
#[derive(Clone, Debug)]
pub struct GetContainerContentsInput {
	/// Cross-cutting fields.
	pub data_plane: DataPlaneInput,
	/// Directory path inside the container to list.
	pub path: String,
	/// Only list entries with this prefix.
	pub prefix: Option<String>,
	/// When true, the server returns only the common prefixes, not individual keys.
	pub prefix_only: bool,
	/// When true, the server includes extra metadata (size, mtime) per entry.
	pub prefix_info: bool,
	/// Opaque pagination cursor from a previous call's `next_marker`.
	pub marker: Option<String>,
	/// Maximum number of entries to return in one page.
	pub max_keys: Option<u32>,
}
impl GetContainerContentsInput {
	/// Creates a listing input for the given path with no pagination, prefix, or limit.
	pub fn new(data_plane: DataPlaneInput, path: impl Into<String>) -> Self {
		Self {
			data_plane,
			path: path.into(),
			prefix: None,
			prefix_only: false,
			prefix_info: false,
			marker: None,
			max_keys: None,
		}
	}

	/// Continues a previous listing from its `next_marker`.
	pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
		self.marker = Some(marker.into());

		self
	}

	/// Caps the number of entries returned in one page.
	pub fn with_max_keys(mut self, max_keys: u32) -> Self {
		self.max_keys = Some(max_keys);

		self
	}

	fn query(&self) -> String {
		let mut pairs = Vec::new();

		if let Some(prefix) = &self.prefix {
			pairs.push(format!("prefix={prefix}"));
		}
		if self.prefix_only {
			pairs.push("prefix-only=1".to_owned());
		}
		if self.prefix_info {
			pairs.push("prefix-info=1".to_owned());
		}
		if let Some(marker) = &self.marker {
			pairs.push(format!("marker={marker}"));
		}
		if let Some(max_keys) = self.max_keys {
			pairs.push(format!("max-keys={max_keys}"));
		}

		pairs.join("&")
	}
}

/// One entry returned by `GetContainerContents`.
#[derive(Clone, Debug, Deserialize)]
pub struct ContentsEntry {
	/// Full path of the entry, relative to the container.
	#[serde(rename = "Key")]
	pub key: String,
	/// Size in bytes, when `prefix_info` was requested.
	#[serde(rename = "Size", default)]
	pub size: Option<u64>,
}

/// Output of `GetContainerContents`, including pagination state.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GetContainerContentsOutput {
	/// Matched entries for this page.
	#[serde(rename = "Contents", default)]
	pub contents: Vec<ContentsEntry>,
	/// True when more pages remain; callers should pass `next_marker` into the next call.
	#[serde(rename = "IsTruncated", default)]
	pub is_truncated: bool,
	/// Opaque cursor to resume listing; present only when `is_truncated` is true.
	#[serde(rename = "NextMarker", default)]
	pub next_marker: Option<String>,
}

impl<C, M> Dispatcher<C, M>
where
	C: HttpTransport,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Lists containers visible to the caller's credentials, on the caller's own task.
	pub async fn get_containers_sync(
		&self,
		input: ClusterInput,
	) -> Result<(GetContainersOutput, Response)> {
		let data_plane = input.as_data_plane_input();
		let spec = HttpRequestSpec::new(Method::Get, self.session().url.clone());
		let response = self.execute_operation(&data_plane, spec).await?;
		let output = {
			let de = &mut serde_json::Deserializer::from_slice(response.body());

			serde_path_to_error::deserialize(de).map_err(crate::error::DecodeError::from)?
		};

		Ok((output, response))
	}

	/// Enqueues [`Dispatcher::get_containers_sync`] and returns a handle immediately.
	pub async fn get_containers(
		&self,
		input: ClusterInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.get_containers_sync(input).await })
			.await
	}

	/// Fetches opaque cluster metadata, on the caller's own task.
	pub async fn get_cluster_md_sync(
		&self,
		input: ClusterInput,
	) -> Result<(GetClusterMdOutput, Response)> {
		let data_plane = input.as_data_plane_input();
		let spec = HttpRequestSpec::new(Method::Put, self.session().url.clone())
			.with_header("X-v3io-function", "GetClusterMD");
		let response = self.execute_operation(&data_plane, spec).await?;
		let output = {
			let de = &mut serde_json::Deserializer::from_slice(response.body());

			serde_path_to_error::deserialize(de).map_err(crate::error::DecodeError::from)?
		};

		Ok((output, response))
	}

	/// Enqueues [`Dispatcher::get_cluster_md_sync`] and returns a handle immediately.
	pub async fn get_cluster_md(
		&self,
		input: ClusterInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move { d.get_cluster_md_sync(input).await })
			.await
	}

	/// Lists one page of a container directory's contents, on the caller's own task.
	pub async fn get_container_contents_sync(
		&self,
		input: GetContainerContentsInput,
	) -> Result<(GetContainerContentsOutput, Response)> {
		let url = crate::uri::build(
			&self.session().url,
			&input.data_plane.container,
			&input.path,
			Some(&input.query()),
		)?;
		let spec = HttpRequestSpec::new(Method::Get, url);
		let response = self.execute_operation(&input.data_plane, spec).await?;
		let output = {
			let de = &mut serde_json::Deserializer::from_slice(response.body());

			serde_path_to_error::deserialize(de).map_err(crate::error::DecodeError::from)?
		};

		Ok((output, response))
	}

	/// Enqueues [`Dispatcher::get_container_contents_sync`] and returns a handle
	/// immediately.
	pub async fn get_container_contents(
		&self,
		input: GetContainerContentsInput,
		context: Box<dyn std::any::Any + Send>,
		response_tx: tokio::sync::mpsc::UnboundedSender<DispatchResponse>,
	) -> Result<RequestHandle> {
		self.enqueue_op(context, response_tx, move |d| async move {
			d.get_container_contents_sync(input).await
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn get_container_contents_query_combines_every_parameter() {
		let input = GetContainerContentsInput::new(DataPlaneInput::new("c"), "/d")
			.with_marker("m")
			.with_max_keys(2);

		assert_eq!(input.query(), "marker=m&max-keys=2");
	}

	#[test]
	fn cluster_input_maps_to_a_non_empty_container_placeholder() {
		let input = ClusterInput::new();
		let data_plane = input.as_data_plane_input();

		assert!(data_plane.validate().is_ok());
	}
}
