//! End-to-end client operations against the simulated account.
//!
//! Covers document CRUD, queries, change feed, session token tracking,
//! partition splits, deadlines and cancellation.

mod common;

use std::time::Duration;

use cosmos_core::diagnostics::keys;
use cosmos_core::session::VectorSessionToken;
use cosmos_core::transport::{headers, status, sub_status};
use cosmos_core::{ConsistencyLevel, ErrorKind, RequestOptions};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use common::{fast_config, Harness, CONTAINER};

fn body(id: &str, total: u32) -> Vec<u8> {
    format!(r#"{{"id":"{}","pk":"p1","total":{}}}"#, id, total).into_bytes()
}

// =============================================================================
// DOCUMENT CRUD
// =============================================================================

#[tokio::test]
async fn test_create_read_replace_delete() {
    let h = Harness::new(fast_config());
    let client = &h.client;

    let created = client
        .create_item(CONTAINER, "p1", "1", body("1", 10), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(created.status, status::CREATED);
    assert!(created.payload.is_some());
    let etag = created.etag().unwrap().to_string();

    let read = client
        .read_item(CONTAINER, "p1", "1", RequestOptions::new())
        .await
        .unwrap();
    let doc: Value = read.json().unwrap();
    assert_eq!(doc["total"], 10);
    assert_eq!(read.region.as_ref().map(|r| r.as_str()), Some("A"));

    let replaced = client
        .replace_item(
            CONTAINER,
            "p1",
            "1",
            body("1", 20),
            RequestOptions::new().with_if_match(etag.clone()),
        )
        .await
        .unwrap();
    assert_eq!(replaced.status, status::OK);

    // The old etag no longer matches.
    let err = client
        .replace_item(
            CONTAINER,
            "p1",
            "1",
            body("1", 30),
            RequestOptions::new().with_if_match(etag),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PreconditionFailed);
    assert!(err.diagnostics.is_some());

    let deleted = client
        .delete_item(CONTAINER, "p1", "1", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(deleted.status, status::NO_CONTENT);

    let err = client
        .read_item(CONTAINER, "p1", "1", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_conflict_and_upsert() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;

    let err = h
        .client
        .create_item(CONTAINER, "p1", "1", body("1", 1), RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(err.status, status::CONFLICT);

    let upserted = h
        .client
        .upsert_item(CONTAINER, "p1", "1", body("1", 5), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(upserted.status, status::OK);

    let fresh = h
        .client
        .upsert_item(CONTAINER, "p1", "2", body("2", 5), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(fresh.status, status::CREATED);
}

#[tokio::test]
async fn test_content_response_on_write_disabled() {
    let h = Harness::new(fast_config());
    let created = h
        .client
        .create_item(
            CONTAINER,
            "p1",
            "1",
            body("1", 1),
            RequestOptions::new().with_content_response_on_write(false),
        )
        .await
        .unwrap();
    assert_eq!(created.status, status::CREATED);
    assert!(created.payload.is_none());
    assert!(created.etag().is_some());
}

#[tokio::test]
async fn test_stream_api_reports_status() {
    let h = Harness::new(fast_config());
    let op = cosmos_core::LogicalOperation::read_item(CONTAINER, "p1".into(), "missing");
    let response = h.client.execute_stream(op, RequestOptions::new()).await.unwrap();
    assert_eq!(response.status, status::NOT_FOUND);
    assert!(!response.is_success());
    assert!(response.diagnostics.store_responses().len() >= 1);
}

#[tokio::test]
async fn test_batch_and_query() {
    let h = Harness::new(fast_config());
    let items = r#"[{"id":"a","pk":"p1"},{"id":"b","pk":"p1"},{"id":"c","pk":"p1"}]"#;
    let batch = h
        .client
        .execute_batch(CONTAINER, "p1", items.as_bytes().to_vec(), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(batch.status, status::OK);

    let documents = h
        .client
        .query_all_ranges(CONTAINER, "SELECT * FROM c", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(documents.len(), 3);
}

#[tokio::test]
async fn test_change_feed_continuation() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;

    let first = h
        .client
        .read_change_feed(CONTAINER, "0", None, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(first.status, status::OK);
    let continuation = first.continuation().unwrap().to_string();

    let unchanged = h
        .client
        .read_change_feed(CONTAINER, "0", Some(&continuation), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(unchanged.status, status::NOT_MODIFIED);
}

#[tokio::test]
async fn test_stronger_consistency_override_rejected() {
    let h = Harness::new(fast_config());
    let err = h
        .client
        .read_item(
            CONTAINER,
            "p1",
            "1",
            RequestOptions::new().with_consistency_level(ConsistencyLevel::Strong),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
    assert_eq!(h.sim.request_count(), 0);
}

// =============================================================================
// SESSION TOKENS
// =============================================================================

#[tokio::test]
async fn test_session_token_is_monotonic() {
    let h = Harness::new(fast_config());
    let mut last = 0u64;
    for i in 0..5 {
        h.seed("p1", &i.to_string()).await;
        let token = h.client.session_token(CONTAINER).unwrap();
        let (_, raw) = token.split_once(':').unwrap();
        let lsn = VectorSessionToken::parse(raw).unwrap().global_lsn;
        assert!(lsn > last, "session token went from {} to {}", last, lsn);
        last = lsn;
    }
}

#[tokio::test]
async fn test_reads_carry_session_token() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;
    h.sim.clear_requests();

    h.client
        .read_item(CONTAINER, "p1", "1", RequestOptions::new())
        .await
        .unwrap();
    let requests = h.sim.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].session_token.as_deref(), Some("0:0#1"));
}

#[tokio::test]
async fn test_unreachable_explicit_session_falls_back_to_local() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;

    // No region ever reaches LSN 500; the client's own token does succeed.
    let response = h
        .client
        .read_item(
            CONTAINER,
            "p1",
            "1",
            RequestOptions::new().with_session_token("0:0#500"),
        )
        .await
        .unwrap();
    assert_eq!(response.status, status::OK);

    let decisions = response.diagnostics.datum(keys::RETRY_DECISIONS).unwrap();
    assert!(decisions.to_string().contains("LocalSessionToken"));
    assert_eq!(
        response.diagnostics.contacted_regions(),
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    );
}

#[tokio::test]
async fn test_container_recreated_clears_session() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;
    assert!(h.client.session_token(CONTAINER).is_some());

    h.client.on_container_recreated(CONTAINER);
    assert!(h.client.session_token(CONTAINER).is_none());
}

// =============================================================================
// PARTITION SPLITS
// =============================================================================

#[tokio::test]
async fn test_read_after_split_refreshes_routing() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;
    h.sim.split_range(CONTAINER, "0").unwrap();

    let read = h
        .client
        .read_item(CONTAINER, "p1", "1", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(read.status, status::OK);

    let summary = read.diagnostics.summary();
    assert_eq!(
        summary.direct_count(status::GONE, sub_status::PARTITION_KEY_RANGE_GONE),
        1
    );
    assert_ne!(read.headers.get(headers::PARTITION_KEY_RANGE_ID), Some("0"));
}

#[tokio::test]
async fn test_query_on_split_range_is_unavailable() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;
    h.client
        .query(CONTAINER, "0", "SELECT * FROM c", None, RequestOptions::new())
        .await
        .unwrap();
    h.sim.split_range(CONTAINER, "0").unwrap();

    let err = h
        .client
        .query(CONTAINER, "0", "SELECT * FROM c", None, RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.status, status::SERVICE_UNAVAILABLE);
    assert_eq!(err.sub_status, sub_status::PARTITION_KEY_RANGE_GONE);
}

// =============================================================================
// DEADLINES AND CANCELLATION
// =============================================================================

#[tokio::test]
async fn test_end_to_end_timeout() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;
    h.sim.set_region_latency("A", Duration::from_millis(500));

    let err = h
        .client
        .read_item(
            CONTAINER,
            "p1",
            "1",
            RequestOptions::new().with_end_to_end_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.status, status::REQUEST_TIMEOUT);
    assert!(err.diagnostics.is_some());
    assert_eq!(h.client.metrics().timeouts, 1);
}

#[tokio::test]
async fn test_cancellation_is_not_a_timeout() {
    let h = Harness::new(fast_config());
    h.seed("p1", "1").await;
    h.sim.set_region_latency("A", Duration::from_millis(500));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let op = cosmos_core::LogicalOperation::read_item(CONTAINER, "p1".into(), "1");
    let err = h
        .client
        .execute_with_cancellation(op, RequestOptions::new(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(err.status, 0);

    let metrics = h.client.metrics();
    assert_eq!(metrics.cancellations, 1);
    assert_eq!(metrics.timeouts, 0);
}
