use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures::stream;
use mockall::Sequence;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tonic::async_trait;
use tonic::transport::Endpoint;

use super::*;
use crate::backend::EventStream;
use crate::backend::MockStreamKv;
use crate::test_utils::enable_logger;
use crate::ChangeEvent;
use crate::Error;
use crate::MockKeyWatcher;
use crate::MockReadApi;

/// Forwards every dispatched change to a channel so the test can observe
/// order and count.
struct RecordingProcessor {
    tx: mpsc::UnboundedSender<(String, Option<String>)>,
}

#[async_trait]
impl KeyProcessor for RecordingProcessor {
    async fn process_key(
        &self,
        key: &str,
        value: Option<&str>,
        _api: &dyn ReadApi,
        attrs: HashMap<String, String>,
    ) {
        assert!(attrs.is_empty(), "auxiliary attrs must be empty at this layer");
        let _ = self.tx.send((key.to_string(), value.map(str::to_string)));
    }
}

struct NoopProcessor;

#[async_trait]
impl KeyProcessor for NoopProcessor {
    async fn process_key(
        &self,
        _key: &str,
        _value: Option<&str>,
        _api: &dyn ReadApi,
        _attrs: HashMap<String, String>,
    ) {
    }
}

/// A key watcher that always fails with the same error, recording when
/// each attempt was made.
struct FailingKeyWatcher {
    make_err: fn() -> Error,
    attempts: Mutex<Vec<Instant>>,
    tx: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl KeyWatcher for FailingKeyWatcher {
    async fn next(&self) -> crate::Result<ChangeEvent> {
        self.attempts.lock().unwrap().push(Instant::now());
        let _ = self.tx.send(());
        Err((self.make_err)())
    }

    fn cancel(&self) {}
}

fn recording() -> (
    Arc<RecordingProcessor>,
    mpsc::UnboundedReceiver<(String, Option<String>)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingProcessor { tx }), rx)
}

fn spawn_run(watcher: &Watcher) -> tokio::task::JoinHandle<()> {
    let watcher = watcher.clone();
    tokio::spawn(async move { watcher.run().await })
}

#[tokio::test(start_paused = true)]
async fn delivers_changes_to_the_processor_in_order() {
    enable_logger();
    let mut kw = MockKeyWatcher::new();
    let mut seq = Sequence::new();
    for (key, value) in [
        ("/rules/a", Some("1")),
        ("/rules/b", None),
        ("/rules/c", Some("3")),
    ] {
        kw.expect_next()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || {
                Ok(ChangeEvent {
                    key: key.to_string(),
                    value: value.map(str::to_string),
                })
            });
    }
    kw.expect_next().returning(|| Err(Error::Canceled));
    kw.expect_cancel().returning(|| ());

    let (processor, mut rx) = recording();
    let watcher = Watcher::from_parts(Arc::new(MockReadApi::new()), Arc::new(kw), processor);
    let handle = spawn_run(&watcher);

    assert_eq!(
        rx.recv().await.unwrap(),
        ("/rules/a".to_string(), Some("1".to_string()))
    );
    assert_eq!(rx.recv().await.unwrap(), ("/rules/b".to_string(), None));
    assert_eq!(
        rx.recv().await.unwrap(),
        ("/rules/c".to_string(), Some("3".to_string()))
    );

    watcher.stop();
    handle.await.unwrap();
    assert!(watcher.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn an_error_between_successes_drops_nothing() {
    let mut kw = MockKeyWatcher::new();
    let mut seq = Sequence::new();
    kw.expect_next().times(1).in_sequence(&mut seq).returning(|| {
        Ok(ChangeEvent {
            key: "/rules/a".to_string(),
            value: Some("1".to_string()),
        })
    });
    kw.expect_next()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Err(Error::StreamClosed));
    kw.expect_next().times(1).in_sequence(&mut seq).returning(|| {
        Ok(ChangeEvent {
            key: "/rules/b".to_string(),
            value: Some("2".to_string()),
        })
    });
    kw.expect_next().returning(|| Err(Error::Canceled));
    kw.expect_cancel().returning(|| ());

    let (processor, mut rx) = recording();
    let watcher = Watcher::from_parts(Arc::new(MockReadApi::new()), Arc::new(kw), processor);
    let handle = spawn_run(&watcher);

    assert_eq!(rx.recv().await.unwrap().0, "/rules/a");
    assert_eq!(rx.recv().await.unwrap().0, "/rules/b");

    watcher.stop();
    handle.await.unwrap();
    assert!(rx.try_recv().is_err(), "exactly the two successes, no more");
}

#[tokio::test(start_paused = true)]
async fn is_stopped_flips_only_after_the_loop_exits() {
    let mut kw = MockKeyWatcher::new();
    kw.expect_next()
        .returning(|| Err(Error::EmptyResponse("nothing yet".to_string())));
    kw.expect_cancel().returning(|| ());

    let watcher = Watcher::from_parts(
        Arc::new(MockReadApi::new()),
        Arc::new(kw),
        Arc::new(NoopProcessor),
    );
    assert!(!watcher.is_stopped());

    let handle = spawn_run(&watcher);
    tokio::task::yield_now().await;
    assert!(!watcher.is_stopped());

    watcher.stop();
    handle.await.unwrap();
    assert!(watcher.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn unreachable_store_backs_off_for_a_minute() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let kw = Arc::new(FailingKeyWatcher {
        make_err: || Error::Unavailable("tcp connect: connection refused".to_string()),
        attempts: Mutex::new(Vec::new()),
        tx,
    });

    let watcher = Watcher::from_parts(
        Arc::new(MockReadApi::new()),
        kw.clone(),
        Arc::new(NoopProcessor),
    );
    let handle = spawn_run(&watcher);

    for _ in 0..3 {
        rx.recv().await.unwrap();
    }
    watcher.stop();
    handle.await.unwrap();

    let attempts = kw.attempts.lock().unwrap();
    assert!(attempts.len() >= 3);
    for pair in attempts.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_secs(60),
            "attempts must be at least one minute apart"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn generic_errors_back_off_for_a_second() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let kw = Arc::new(FailingKeyWatcher {
        make_err: || Error::StreamClosed,
        attempts: Mutex::new(Vec::new()),
        tx,
    });

    let watcher = Watcher::from_parts(
        Arc::new(MockReadApi::new()),
        kw.clone(),
        Arc::new(NoopProcessor),
    );
    let handle = spawn_run(&watcher);

    for _ in 0..5 {
        rx.recv().await.unwrap();
    }
    watcher.stop();
    handle.await.unwrap();

    let attempts = kw.attempts.lock().unwrap();
    assert!(attempts.len() >= 5);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        // and never escalates beyond the short tier
        assert!(pair[1] - pair[0] < Duration::from_secs(60));
    }
}

#[tokio::test]
async fn stop_before_run_pre_empts_the_loop() {
    let mut kw = MockKeyWatcher::new();
    kw.expect_next().times(0);
    kw.expect_cancel().returning(|| ());

    let watcher = Watcher::from_parts(
        Arc::new(MockReadApi::new()),
        Arc::new(kw),
        Arc::new(NoopProcessor),
    );

    watcher.stop();
    watcher.run().await;
    assert!(watcher.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn stream_constructor_applies_the_wrap_hook() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut kv = MockStreamKv::new();
    kv.expect_watch()
        .withf(|prefix, start| prefix == "/rules/" && *start == 0)
        .returning(move |_, _| {
            let _ = tx.send(());
            let s: EventStream = Box::pin(stream::pending());
            Ok(s)
        });

    let kv = Arc::new(kv);
    let wrap: WrapKv = Box::new(move |_raw| kv);

    let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
    let watcher = Watcher::stream(
        channel,
        &BackendConfig::default(),
        "/rules/",
        Arc::new(NoopProcessor),
        600,
        wrap,
    );
    let handle = spawn_run(&watcher);

    // the wrapped client, not the raw one, serves the watch
    rx.recv().await.unwrap();

    watcher.stop();
    handle.await.unwrap();
    assert!(watcher.is_stopped());
}
