mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cnxml_validate::diagnostics::{Diagnostic, DiagnosticSource, Position};
use cnxml_validate::queue::{EditorConnection, QueueConfig, ValidationQueue, ValidationRequest};
use cnxml_validate::validator::DocumentValidator;
use common::{RecordingConnection, Workspace, page};

fn link_to(target: &str) -> String {
    page(&format!(r#"<link target-id="{}"/>"#, target))
}

#[tokio::test]
async fn test_older_queued_versions_are_dropped() {
    let workspace = Workspace::new();
    let connection = RecordingConnection::new(vec![workspace.uri()]);
    let queue = ValidationQueue::new(connection.clone(), DocumentValidator::default());
    let a = workspace.module_uri("m1");
    let b = workspace.module_uri("m2");

    queue.add_request(ValidationRequest::new(&a, link_to("one"), 1));
    queue.add_request(ValidationRequest::new(&a, link_to("two"), 2));
    queue.add_request(ValidationRequest::new(&b, link_to("three"), 1));

    assert_eq!(queue.pending(), vec![(a.clone(), 2), (b.clone(), 1)]);

    queue.wait_idle().await;

    let published = connection.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].0, a);
    assert_eq!(published[1].0, b);
    assert_eq!(
        connection.messages_for(&a),
        vec![vec!["Target for link doesn't exist!: two".to_string()]]
    );
    assert_eq!(
        connection.messages_for(&b),
        vec![vec!["Target for link doesn't exist!: three".to_string()]]
    );
    assert!(!queue.is_draining());
    assert!(queue.pending().is_empty());
}

#[tokio::test]
async fn test_newer_queued_version_is_kept() {
    let workspace = Workspace::new();
    let connection = RecordingConnection::new(vec![workspace.uri()]);
    let queue = ValidationQueue::new(connection.clone(), DocumentValidator::default());
    let a = workspace.module_uri("m1");

    queue.add_request(ValidationRequest::new(&a, link_to("three"), 3));
    queue.add_request(ValidationRequest::new(&a, link_to("two"), 2));

    assert_eq!(queue.pending(), vec![(a.clone(), 3), (a.clone(), 2)]);
    queue.wait_idle().await;

    assert_eq!(connection.messages_for(&a).len(), 2);
}

#[tokio::test]
async fn test_request_during_processing_runs_after_it() {
    let workspace = Workspace::new();
    let connection = RecordingConnection::gated(vec![workspace.uri()]);
    let queue = ValidationQueue::new(connection.clone(), DocumentValidator::default());
    let a = workspace.module_uri("m1");

    queue.add_request(ValidationRequest::new(&a, link_to("one"), 1));
    connection.wait_entered().await;

    queue.add_request(ValidationRequest::new(&a, link_to("two"), 2));
    assert!(queue.is_draining());
    assert_eq!(queue.pending(), vec![(a.clone(), 2)]);

    connection.release();
    queue.wait_idle().await;

    assert_eq!(
        connection.messages_for(&a),
        vec![
            vec!["Target for link doesn't exist!: one".to_string()],
            vec!["Target for link doesn't exist!: two".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_unparsable_document_publishes_nothing() {
    let workspace = Workspace::new();
    let connection = RecordingConnection::new(vec![workspace.uri()]);
    let queue = ValidationQueue::new(connection.clone(), DocumentValidator::default());
    let a = workspace.module_uri("m1");

    queue.add_request(ValidationRequest::new(&a, "<document><para>", 1));
    queue.wait_idle().await;
    assert!(connection.published().is_empty());

    queue.add_request(ValidationRequest::new(&a, page("<para/>"), 2));
    queue.wait_idle().await;
    assert_eq!(connection.messages_for(&a), vec![Vec::<String>::new()]);
}

#[tokio::test]
async fn test_non_file_uri_is_skipped() {
    let connection = RecordingConnection::new(Vec::new());
    let queue = ValidationQueue::new(connection.clone(), DocumentValidator::default());

    queue.add_request(ValidationRequest::new(
        "untitled:Untitled-1",
        link_to("one"),
        1,
    ));
    queue.wait_idle().await;

    assert!(connection.published().is_empty());
}

#[tokio::test]
async fn test_settle_delay_coalesces_bursts() {
    let workspace = Workspace::new();
    let connection = RecordingConnection::new(vec![workspace.uri()]);
    let queue = ValidationQueue::with_config(
        connection.clone(),
        DocumentValidator::default(),
        QueueConfig {
            settle_delay: Duration::from_millis(50),
            ..QueueConfig::default()
        },
    );
    let a = workspace.module_uri("m1");

    queue.add_request(ValidationRequest::new(&a, link_to("one"), 1));
    // v1 stays queued while the drain waits out the delay
    tokio::task::yield_now().await;
    queue.add_request(ValidationRequest::new(&a, link_to("two"), 2));
    queue.wait_idle().await;

    assert_eq!(
        connection.messages_for(&a),
        vec![vec!["Target for link doesn't exist!: two".to_string()]]
    );
}

#[tokio::test]
async fn test_wait_idle_on_fresh_queue_returns() {
    let connection = RecordingConnection::new(Vec::new());
    let queue = ValidationQueue::new(connection, DocumentValidator::default());
    queue.wait_idle().await;
    assert!(!queue.is_draining());
}

#[tokio::test]
async fn test_queue_validates_against_workspace_modules() {
    let workspace = Workspace::new();
    workspace.add_module("m123", &page(r#"<para id="x"/>"#));
    workspace.add_file("modules/m1/diagram.png", "png");
    let source = page(
        r#"<image src="diagram.png"/>
<image src="missing.png"/>
<link document="m123" target-id="x"/>
<link document="m123" target-id="y"/>
<link document="m999"/>"#,
    );
    workspace.add_module("m1", &source);

    let connection = RecordingConnection::new(vec![workspace.uri()]);
    let queue = ValidationQueue::new(connection.clone(), DocumentValidator::default());
    let uri = workspace.module_uri("m1");

    queue.add_request(ValidationRequest::new(&uri, source, 7));
    queue.wait_idle().await;

    let published = connection.published();
    assert_eq!(published.len(), 1);
    let diagnostics = &published[0].1;
    let messages: Vec<&str> = diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "Image file missing.png doesn't exist!",
            "Target ID in document doesn't exist!: y",
            "Target document for link doesn't exist!: m999",
        ]
    );
    assert_eq!(diagnostics[0].source, DiagnosticSource::ImageValidation);
    assert_eq!(diagnostics[0].range.start, Position::new(4, 0));
    assert_eq!(diagnostics[1].source, DiagnosticSource::LinkValidation);
    assert_eq!(diagnostics[1].range.start, Position::new(6, 0));
}

#[tokio::test]
async fn test_queue_is_shared_between_clones() {
    let workspace = Workspace::new();
    let connection = RecordingConnection::new(vec![workspace.uri()]);
    let queue = ValidationQueue::new(connection.clone(), DocumentValidator::default());
    let other = queue.clone();
    let a = workspace.module_uri("m1");

    queue.add_request(ValidationRequest::new(&a, link_to("one"), 1));
    other.add_request(ValidationRequest::new(&a, link_to("two"), 2));
    assert_eq!(queue.pending(), vec![(a.clone(), 2)]);

    other.wait_idle().await;
    assert_eq!(connection.messages_for(&a).len(), 1);
}

/// Panics in its first `workspace_folders` call, then behaves
struct FailsOnceConnection {
    failed: AtomicBool,
    inner: Arc<RecordingConnection>,
}

#[async_trait]
impl EditorConnection for FailsOnceConnection {
    async fn workspace_folders(&self) -> Vec<String> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            panic!("editor went away");
        }
        self.inner.workspace_folders().await
    }

    async fn publish_diagnostics(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
        self.inner.publish_diagnostics(uri, diagnostics).await;
    }
}

#[tokio::test]
async fn test_queue_recovers_after_a_panicking_request() {
    let workspace = Workspace::new();
    let recorder = RecordingConnection::new(vec![workspace.uri()]);
    let connection = Arc::new(FailsOnceConnection {
        failed: AtomicBool::new(false),
        inner: recorder.clone(),
    });
    let queue = ValidationQueue::new(connection, DocumentValidator::default());
    let a = workspace.module_uri("m1");
    let b = workspace.module_uri("m2");
    let c = workspace.module_uri("m3");

    // a panics; b was queued behind it and must still be processed
    queue.add_request(ValidationRequest::new(&a, link_to("one"), 1));
    queue.add_request(ValidationRequest::new(&b, link_to("two"), 1));
    tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
        .await
        .expect("queue stalled after a panic");

    assert!(!queue.is_draining());
    assert!(recorder.messages_for(&a).is_empty());
    assert_eq!(
        recorder.messages_for(&b),
        vec![vec!["Target for link doesn't exist!: two".to_string()]]
    );

    // a later request starts a new drain
    queue.add_request(ValidationRequest::new(&c, link_to("three"), 1));
    tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
        .await
        .expect("queue stalled after a panic");
    assert_eq!(
        recorder.messages_for(&c),
        vec![vec!["Target for link doesn't exist!: three".to_string()]]
    );
    assert!(queue.pending().is_empty());
}
