//! End-to-end scenarios against a mocked data plane.

// crates.io
use httpmock::prelude::*;
use pretty_assertions::assert_eq;
// self
use v3io_client::{
	_preludet::*,
	codec::{AttributeValue, Item},
	ops::{
		DataPlaneInput,
		container::GetContainerContentsInput,
		item::{GetItemInput, PutItemInput},
		stream::{CreateStreamInput, GetRecordsInput, PutRecordsInput, RecordToPut, SeekShardInput, SeekType},
    },
};

fn dispatcher(server: &MockServer) -> ReqwestTestDispatcher {
	build_reqwest_test_dispatcher(&server.base_url(), "test-access-key")
}

/// `PutItem` then `GetItem` round-trips the written attributes.
#[tokio::test]
async fn scenario_put_item_then_get_item_round_trips() {
	let server = MockServer::start_async().await;
	let dispatcher = dispatcher(&server);
	let put_mock = server
		.mock_async(|when, then| {
			when.method(PUT).path("/t/t/it").header("X-v3io-function", "PutItem");
			then.status(200);
		})
		.await;
	let get_mock = server
		.mock_async(|when, then| {
			when.method(PUT).path("/t/t/it").header("X-v3io-function", "GetItem");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"age":{"N":"30"},"name":{"S":"foo"}}"#);
		})
		.await;

	let mut item = Item::new();

	item.insert("age".to_string(), AttributeValue::Int(30));
	item.insert("name".to_string(), AttributeValue::Str("foo".to_string()));

	let put = PutItemInput::new(DataPlaneInput::new("t"), "/t/it", item);
	let (_, response) = dispatcher.put_item_sync(put).await.expect("PutItem should succeed.");

	response.release();

	let get = GetItemInput::new(DataPlaneInput::new("t"), "/t/it", vec!["age".into(), "name".into()]);
	let (output, response) = dispatcher.get_item_sync(get).await.expect("GetItem should succeed.");

	assert_eq!(output.item.get("age"), Some(&AttributeValue::Int(30)));
	assert_eq!(output.item.get("name"), Some(&AttributeValue::Str("foo".to_string())));

	response.release();
	put_mock.assert_async().await;
	get_mock.assert_async().await;
}

/// A `PutItem` whose condition expression the server rejects surfaces a precondition
/// status error, distinguishable by HTTP code.
#[tokio::test]
async fn scenario_put_item_condition_rejected_is_a_precondition_error() {
	let server = MockServer::start_async().await;
	let dispatcher = dispatcher(&server);

	server
		.mock_async(|when, then| {
			when.method(PUT).path("/t/it").header("X-v3io-function", "PutItem");
			then.status(412).body(r#"{"ErrorCode":"ConditionalCheckFailed"}"#);
		})
		.await;

	let mut item = Item::new();

	item.insert("attr".to_string(), AttributeValue::Int(2));

	let put = PutItemInput::new(DataPlaneInput::new("t"), "/it", item).with_condition_expression("attr == 0");
	let err = dispatcher.put_item_sync(put).await.expect_err("Rejected condition should surface as an error.");

	assert!(err.is_precondition_failure());
}

/// `GetContainerContents` with a small limit paginates via `Marker`/`IsTruncated`
/// until every entry has been consumed exactly once.
#[tokio::test]
async fn scenario_get_container_contents_paginates_until_exhausted() {
	let server = MockServer::start_async().await;
	let dispatcher = dispatcher(&server);

	server
		.mock_async(|when, then| {
			when.method(GET).path("/d/d").query_param("marker", "page-2");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"Contents":[{"Key":"x"},{"Key":"y"}],"IsTruncated":false}"#);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/d/d").query_param("max-keys", "2");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"Contents":[{"Key":"a"},{"Key":"b"}],"IsTruncated":true,"NextMarker":"page-2"}"#);
		})
		.await;

	let first_page = GetContainerContentsInput::new(DataPlaneInput::new("d"), "/d").with_max_keys(2);
	let (first_output, response) =
		dispatcher.get_container_contents_sync(first_page).await.expect("First page should succeed.");

	response.release();
	assert!(first_output.is_truncated);

	let next_marker = first_output.next_marker.clone().expect("Truncated page must carry a NextMarker.");
	let second_page =
		GetContainerContentsInput::new(DataPlaneInput::new("d"), "/d").with_marker(next_marker).with_max_keys(2);
	let (second_output, response) =
		dispatcher.get_container_contents_sync(second_page).await.expect("Second page should succeed.");

	response.release();
	assert!(!second_output.is_truncated);

	let seen: Vec<String> = first_output
		.contents
		.into_iter()
		.chain(second_output.contents)
		.map(|e| e.key)
		.collect();

	assert_eq!(seen, vec!["a".to_string(), "b".to_string(), "x".to_string(), "y".to_string()]);
}

/// Creates a stream, puts a record with a partition key, seeks to the earliest
/// location, and reads the record back in sequence order.
#[tokio::test]
async fn scenario_create_stream_put_and_read_records() {
	let server = MockServer::start_async().await;
	let dispatcher = dispatcher(&server);

	server
		.mock_async(|when, then| {
			when.method(POST).path("/s/s").header("X-v3io-function", "CreateStream");
			then.status(200);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/s/s").header("X-v3io-function", "PutRecords");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"FailedRecordCount":0,"Records":[{"SequenceNumber":1}]}"#);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(PUT).path("/s/s/0").header("X-v3io-function", "Seek");
			then.status(200).header("content-type", "application/json").body(r#"{"Location":"loc-0"}"#);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(PUT).path("/s/s/0").header("X-v3io-function", "GetRecords");
			then.status(200).header("content-type", "application/json").body(
				r#"{"NextLocation":"loc-1","MSecBehindLatest":0,"Records":[{"Data":"QQ==","SequenceNumber":1}]}"#,
			);
		})
		.await;

	let create = CreateStreamInput::new(DataPlaneInput::new("s"), "/s", 2, 1);

	dispatcher.create_stream_sync(create).await.expect("CreateStream should succeed.").1.release();

	let put = PutRecordsInput {
		data_plane: DataPlaneInput::new("s"),
		path: "/s".to_string(),
		records: vec![RecordToPut::new(bytes::Bytes::from_static(b"A")).with_partition_key("k")],
	};
	let (put_out, response) = dispatcher.put_records_sync(put).await.expect("PutRecords should succeed.");

	response.release();
	assert_eq!(put_out.failed_record_count, 0);
	assert_eq!(put_out.records.len(), 1);
	assert!(put_out.records[0].sequence_number.unwrap() > 0);

	let seek = SeekShardInput { data_plane: DataPlaneInput::new("s"), path: "/s/0".to_string(), seek: SeekType::Earliest };
	let (location, response) = dispatcher.seek_shard_sync(seek).await.expect("SeekShard should succeed.");

	response.release();

	let get = GetRecordsInput { data_plane: DataPlaneInput::new("s"), path: "/s/0".to_string(), location, limit: 10 };
	let (records_out, response) = dispatcher.get_records_sync(get).await.expect("GetRecords should succeed.");

	response.release();
	assert_eq!(records_out.records.len(), 1);
	assert_eq!(records_out.records[0].data.as_ref(), b"A");
	assert_eq!(records_out.records[0].sequence_number, 1);
}
