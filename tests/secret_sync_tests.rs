//! # Secret Sync Tests
//!
//! Behaviour of `SecretSyncer` against in-memory Key Vault and cluster fakes:
//! - idempotent writes
//! - stale versions never overwrite newer material, pins can roll back
//! - foreign secrets are never overwritten
//! - fetch retries, timeouts and cancellation
//! - fatal vs transient classification

mod common;

use common::*;
use keyvault_sync_controller::cluster::ClusterError;
use keyvault_sync_controller::constants::{
    CONTENT_HASH_ANNOTATION, OWNER_LABEL, SOURCE_ANNOTATION, VERSION_ANNOTATION,
};
use keyvault_sync_controller::controller::syncer::{SecretSyncer, SyncError, SyncSettings};
use keyvault_sync_controller::provider::{SecretRef, SourceError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn syncer(source: &Arc<FakeSource>, sink: &Arc<FakeSink>) -> SecretSyncer {
    syncer_with(source, sink, fast_settings(), CancellationToken::new())
}

fn syncer_with(
    source: &Arc<FakeSource>,
    sink: &Arc<FakeSink>,
    settings: SyncSettings,
    cancel: CancellationToken,
) -> SecretSyncer {
    SecretSyncer::new(
        Arc::clone(source) as _,
        Arc::clone(sink) as _,
        owner(),
        settings,
        cancel,
    )
}

#[tokio::test]
async fn test_first_sync_writes_owned_secret() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    source.set("solr-admin-password", "v1", 100, "hunter2");

    let outcome = syncer(&source, &sink)
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect("sync should succeed");

    assert!(outcome.written);
    assert_eq!(outcome.secret.last_synced_version.id, "v1");
    assert_eq!(outcome.secret.local_name, "solr-basic-auth");

    let stored = sink.get(NAMESPACE, "solr-basic-auth").expect("secret written");
    assert_eq!(stored.data.get("password").map(String::as_str), Some("hunter2"));
    assert_eq!(stored.labels.get(OWNER_LABEL).map(String::as_str), Some(OWNER));
    assert_eq!(stored.annotations.get(VERSION_ANNOTATION).map(String::as_str), Some("v1"));
    assert_eq!(
        stored.annotations.get(SOURCE_ANNOTATION).map(String::as_str),
        Some("solr-kv/solr-admin-password")
    );
    assert!(stored.annotations.contains_key(CONTENT_HASH_ANNOTATION));
}

#[tokio::test]
async fn test_unchanged_secret_is_not_rewritten() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    source.set("solr-admin-password", "v1", 100, "hunter2");
    let syncer = syncer(&source, &sink);
    let request = request("solr-admin-password", "solr-basic-auth");

    let first = syncer.sync(&request).await.expect("first sync");
    let second = syncer.sync(&request).await.expect("second sync");

    assert!(first.written);
    assert!(!second.written);
    assert_eq!(sink.writes(), 1);
    assert_eq!(second.secret.last_synced_version, first.secret.last_synced_version);
}

#[tokio::test]
async fn test_new_version_is_written() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    let syncer = syncer(&source, &sink);
    let request = request("solr-admin-password", "solr-basic-auth");

    source.set("solr-admin-password", "v1", 100, "hunter2");
    syncer.sync(&request).await.expect("first sync");
    source.set("solr-admin-password", "v2", 200, "correct-horse");
    let outcome = syncer.sync(&request).await.expect("second sync");

    assert!(outcome.written);
    assert_eq!(outcome.secret.last_synced_version.id, "v2");
    assert_eq!(
        sink.value(NAMESPACE, "solr-basic-auth", "password").as_deref(),
        Some("correct-horse")
    );
}

#[tokio::test]
async fn test_stale_version_does_not_overwrite_newer_material() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    let syncer = syncer(&source, &sink);
    let request = request("solr-admin-password", "solr-basic-auth");

    source.set("solr-admin-password", "v2", 200, "correct-horse");
    syncer.sync(&request).await.expect("first sync");

    // A lagging replica answers with the previous version
    source.set("solr-admin-password", "v1", 100, "hunter2");
    let outcome = syncer.sync(&request).await.expect("stale sync");

    assert!(!outcome.written);
    assert_eq!(outcome.secret.last_synced_version.id, "v2");
    assert_eq!(sink.writes(), 1);
    assert_eq!(
        sink.value(NAMESPACE, "solr-basic-auth", "password").as_deref(),
        Some("correct-horse")
    );
}

#[tokio::test]
async fn test_repinning_to_older_version_rolls_back() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    let syncer = syncer(&source, &sink);

    source.set("solr-admin-password", "v2", 200, "correct-horse");
    syncer
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect("latest sync");

    // Operator pins the mapping back to the previous version
    source.set("solr-admin-password", "v1", 100, "hunter2");
    let mut pinned = request("solr-admin-password", "solr-basic-auth");
    pinned.reference = pinned.reference.pinned("v1");
    let outcome = syncer.sync(&pinned).await.expect("pinned sync");

    assert!(outcome.written);
    assert_eq!(outcome.secret.last_synced_version.id, "v1");
    assert_eq!(sink.writes(), 2);
    assert_eq!(
        sink.value(NAMESPACE, "solr-basic-auth", "password").as_deref(),
        Some("hunter2")
    );

    // Re-syncing the same pin is a no-op
    let again = syncer.sync(&pinned).await.expect("repeat pinned sync");
    assert!(!again.written);
    assert_eq!(sink.writes(), 2);
}

#[tokio::test]
async fn test_foreign_secret_is_never_overwritten() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    source.set("solr-admin-password", "v1", 100, "hunter2");
    sink.insert_foreign(NAMESPACE, "solr-basic-auth");

    let error = syncer(&source, &sink)
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect_err("foreign secret must be refused");

    assert!(matches!(error, SyncError::LocalNameConflict { .. }));
    assert!(!error.is_transient());
    assert_eq!(sink.writes(), 0);
    assert_eq!(
        sink.value(NAMESPACE, "solr-basic-auth", "password").as_deref(),
        Some("do-not-touch")
    );
}

#[tokio::test]
async fn test_transient_fetch_failures_are_retried() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    let reference = SecretRef::new(VAULT, "solr-admin-password");
    source.push_error(SourceError::fetch(&reference, "503 Service Unavailable"));
    source.push_error(SourceError::fetch(&reference, "429 Too Many Requests"));
    source.set("solr-admin-password", "v1", 100, "hunter2");

    let outcome = syncer(&source, &sink)
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect("third attempt succeeds");

    assert!(outcome.written);
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_return_transient_error() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    let reference = SecretRef::new(VAULT, "solr-admin-password");
    for _ in 0..3 {
        source.push_error(SourceError::fetch(&reference, "connection reset"));
    }

    let error = syncer(&source, &sink)
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect_err("all attempts fail");

    assert!(matches!(error, SyncError::Source(SourceError::Fetch { .. })));
    assert!(error.is_transient());
    assert_eq!(source.calls(), 3);
    assert_eq!(sink.writes(), 0);
}

#[tokio::test]
async fn test_missing_secret_is_transient() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());

    let error = syncer(&source, &sink)
        .sync(&request("not-created-yet", "solr-basic-auth"))
        .await
        .expect_err("secret does not exist");

    assert!(error.is_transient());
}

#[tokio::test]
async fn test_auth_failure_is_fatal_and_not_retried() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    let reference = SecretRef::new(VAULT, "solr-admin-password");
    source.push_error(SourceError::auth(&reference, "403 Forbidden"));
    source.set("solr-admin-password", "v1", 100, "hunter2");

    let error = syncer(&source, &sink)
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect_err("auth failure");

    assert!(matches!(error, SyncError::Source(SourceError::Auth { .. })));
    assert!(!error.is_transient());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_slow_fetch_times_out() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    source.set("solr-admin-password", "v1", 100, "hunter2");
    source.set_delay(Duration::from_secs(5));
    let settings = SyncSettings {
        max_attempts: 1,
        call_timeout: Duration::from_millis(50),
        ..fast_settings()
    };

    let start = Instant::now();
    let error = syncer_with(&source, &sink, settings, CancellationToken::new())
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect_err("fetch times out");

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(error.is_transient());
    assert!(error.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_cancellation_stops_in_flight_sync() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    source.set("solr-admin-password", "v1", 100, "hunter2");
    source.set_delay(Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let settings = SyncSettings {
        call_timeout: Duration::from_secs(10),
        ..fast_settings()
    };
    let syncer = syncer_with(&source, &sink, settings, cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let start = Instant::now();
    let error = syncer
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect_err("sync is cancelled");
    canceller.await.expect("canceller task");

    assert!(matches!(error, SyncError::Cancelled { .. }));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(sink.writes(), 0);
}

#[tokio::test]
async fn test_forbidden_write_is_fatal() {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    source.set("solr-admin-password", "v1", 100, "hunter2");
    sink.fail_writes_with(ClusterError::Forbidden {
        object: "secret solr/solr-basic-auth".into(),
        message: "secrets is forbidden".into(),
    });

    let error = syncer(&source, &sink)
        .sync(&request("solr-admin-password", "solr-basic-auth"))
        .await
        .expect_err("write is denied");

    assert!(matches!(error, SyncError::Cluster(ClusterError::Forbidden { .. })));
    assert!(!error.is_transient());
}
