use crate::{
    BoxError, Config, ContainerRef, Error, Filter, LogEntry, LogSource, LogStream, Output,
    Transform,
};
use futures::prelude::*;
use k8s_openapi::{
    api::core::v1::{Container, Pod, PodSpec, PodStatus},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{api::LogParams, runtime::watcher};
use kubert::index::IndexNamespacedResource;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, time};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

type LineTx = mpsc::Sender<Result<String, BoxError>>;

/// A log source whose pod events and log lines are driven by the test.
#[derive(Clone)]
struct FakeSource {
    pods_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<watcher::Event<Pod>>>>>,
    opened_tx: mpsc::UnboundedSender<(ContainerRef, LogParams, LineTx)>,
    watches: Arc<AtomicUsize>,
}

struct Harness {
    pods_tx: mpsc::UnboundedSender<watcher::Event<Pod>>,
    opened_rx: mpsc::UnboundedReceiver<(ContainerRef, LogParams, LineTx)>,
    watches: Arc<AtomicUsize>,
}

fn fake() -> (FakeSource, Harness) {
    let (pods_tx, pods_rx) = mpsc::unbounded_channel();
    let (opened_tx, opened_rx) = mpsc::unbounded_channel();
    let watches = Arc::new(AtomicUsize::new(0));
    let source = FakeSource {
        pods_rx: Arc::new(Mutex::new(Some(pods_rx))),
        opened_tx,
        watches: watches.clone(),
    };
    let harness = Harness {
        pods_tx,
        opened_rx,
        watches,
    };
    (source, harness)
}

#[async_trait::async_trait]
impl LogSource for FakeSource {
    fn watch_pods(
        &self,
        _namespace: Option<&str>,
        _selector: Option<&str>,
    ) -> crate::PodEvents {
        self.watches.fetch_add(1, Ordering::SeqCst);
        match self.pods_rx.lock().take() {
            Some(rx) => {
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) })
                    .boxed()
            }
            None => stream::pending().boxed(),
        }
    }

    async fn follow(
        &self,
        target: &ContainerRef,
        params: &LogParams,
    ) -> Result<crate::Lines, BoxError> {
        let (tx, mut rx) = mpsc::channel(16);
        self.opened_tx
            .send((target.clone(), params.clone(), tx))
            .map_err(|_| BoxError::from("test harness dropped"))?;
        Ok(stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

fn pod(name: &str, phase: &str, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some("hello-alice".to_string()),
            name: Some(name.to_string()),
            labels: Some(maplit::btreemap! {
                "app.loco.io/instance".to_string() => "hello-alice".to_string(),
            }),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|c| Container {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

fn target(pod: &str, container: &str) -> ContainerRef {
    ContainerRef {
        namespace: "hello-alice".to_string(),
        pod: pod.to_string(),
        container: container.to_string(),
    }
}

fn config() -> Config {
    Config {
        selector: Some("app.loco.io/instance=hello-alice".to_string()),
        follow: true,
        ..Default::default()
    }
}

async fn opened(h: &mut Harness) -> (ContainerRef, LogParams, LineTx) {
    time::timeout(TIMEOUT, h.opened_rx.recv())
        .await
        .expect("follow must be opened")
        .expect("source must be alive")
}

async fn entry(out: &mut Output) -> LogEntry {
    time::timeout(TIMEOUT, out.entries.recv())
        .await
        .expect("entry must arrive")
        .expect("entries must be open")
}

async fn drain_closed(out: &mut Output) {
    time::timeout(TIMEOUT, async {
        while out.entries.recv().await.is_some() {}
        while out.errors.recv().await.is_some() {}
    })
    .await
    .expect("outputs must close");
}

#[tokio::test]
async fn merges_pods_discovered_mid_stream() {
    let (source, mut h) = fake();
    let (stream, mut out) = LogStream::new(config(), source).expect("config must be valid");
    stream.start(&CancellationToken::new()).expect("must start");

    h.pods_tx
        .send(watcher::Event::Apply(pod("hello-abc", "Running", &["hello"])))
        .unwrap();
    let (abc, params, abc_tx) = opened(&mut h).await;
    assert_eq!(abc, target("hello-abc", "hello"));
    assert_eq!(params.container.as_deref(), Some("hello"));
    assert!(params.follow);

    h.pods_tx
        .send(watcher::Event::Apply(pod("hello-def", "Running", &["hello"])))
        .unwrap();
    let (def, _, def_tx) = opened(&mut h).await;
    assert_eq!(def, target("hello-def", "hello"));
    assert_eq!(
        stream.index().read().followed(),
        vec![target("hello-abc", "hello"), target("hello-def", "hello")]
    );

    abc_tx.send(Ok("from abc".to_string())).await.unwrap();
    def_tx.send(Ok("from def".to_string())).await.unwrap();
    let mut pods = vec![entry(&mut out).await, entry(&mut out).await]
        .into_iter()
        .map(|e| (e.pod, e.message))
        .collect::<Vec<_>>();
    pods.sort();
    assert_eq!(
        pods,
        vec![
            ("hello-abc".to_string(), "from abc".to_string()),
            ("hello-def".to_string(), "from def".to_string()),
        ]
    );

    // Deleting one pod cancels exactly its follow task.
    h.pods_tx
        .send(watcher::Event::Delete(pod("hello-abc", "Running", &["hello"])))
        .unwrap();
    time::timeout(TIMEOUT, abc_tx.closed())
        .await
        .expect("abc follow must be cancelled");
    assert!(!def_tx.is_closed());
    assert_eq!(
        stream.index().read().followed(),
        vec![target("hello-def", "hello")]
    );

    def_tx.send(Ok("still here".to_string())).await.unwrap();
    assert_eq!(entry(&mut out).await.message, "still here");

    stream.stop().await;
    assert!(stream.is_stopped());
    assert!(def_tx.is_closed());
    drain_closed(&mut out).await;
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let (source, h) = fake();
    let (stream, mut out) = LogStream::new(config(), source).expect("config must be valid");

    stream.start(&CancellationToken::new()).expect("must start");
    assert!(stream.is_running());
    assert!(matches!(
        stream.start(&CancellationToken::new()),
        Err(Error::AlreadyRunning)
    ));
    assert_eq!(h.watches.load(Ordering::SeqCst), 1);

    stream.stop().await;
    stream.stop().await;
    assert!(stream.is_stopped());
    assert!(matches!(
        stream.start(&CancellationToken::new()),
        Err(Error::AlreadyRunning)
    ));
    drain_closed(&mut out).await;
}

#[tokio::test]
async fn stop_before_start_closes_outputs() {
    let (source, _h) = fake();
    let (stream, mut out) = LogStream::new(config(), source).expect("config must be valid");
    stream.stop().await;
    assert!(stream.is_stopped());
    drain_closed(&mut out).await;
}

#[tokio::test]
async fn parent_cancellation_closes_outputs() {
    let (source, mut h) = fake();
    let (stream, mut out) = LogStream::new(config(), source).expect("config must be valid");
    let parent = CancellationToken::new();
    stream.start(&parent).expect("must start");

    h.pods_tx
        .send(watcher::Event::Apply(pod("hello-abc", "Running", &["hello"])))
        .unwrap();
    let (_, _, tx) = opened(&mut h).await;

    parent.cancel();
    time::timeout(TIMEOUT, tx.closed())
        .await
        .expect("follow must be cancelled");
    drain_closed(&mut out).await;
}

#[tokio::test]
async fn filters_and_transforms_entries() {
    let (source, mut h) = fake();
    let config = Config {
        timestamps: true,
        filters: vec![Arc::new(|e: &LogEntry| !e.message.contains("healthz")) as Filter],
        transforms: vec![
            Arc::new(|mut e: LogEntry| {
                e.message = e.message.to_uppercase();
                e
            }) as Transform,
            Arc::new(|mut e: LogEntry| {
                e.message.push('!');
                e
            }) as Transform,
        ],
        ..config()
    };
    let (stream, mut out) = LogStream::new(config, source).expect("config must be valid");
    stream.start(&CancellationToken::new()).expect("must start");

    h.pods_tx
        .send(watcher::Event::Apply(pod("hello-abc", "Running", &["hello"])))
        .unwrap();
    let (_, params, tx) = opened(&mut h).await;
    assert!(params.timestamps);

    tx.send(Ok("2024-05-01T10:00:00Z GET /healthz".to_string()))
        .await
        .unwrap();
    tx.send(Ok("2024-05-01T10:00:01Z fatal: boom".to_string()))
        .await
        .unwrap();

    let e = entry(&mut out).await;
    assert_eq!(e.message, "FATAL: BOOM!");
    assert!(e.is_error);
    assert_eq!(e.timestamp.to_rfc3339(), "2024-05-01T10:00:01+00:00");

    stream.stop().await;
    drain_closed(&mut out).await;
}

#[tokio::test]
async fn ignores_pods_that_are_not_running() {
    let (source, mut h) = fake();
    let config = Config {
        containers: vec!["hello".to_string()],
        ..config()
    };
    let (stream, mut out) = LogStream::new(config, source).expect("config must be valid");
    stream.start(&CancellationToken::new()).expect("must start");

    h.pods_tx
        .send(watcher::Event::Apply(pod("hello-abc", "Pending", &["hello"])))
        .unwrap();
    h.pods_tx
        .send(watcher::Event::Apply(pod(
            "hello-def",
            "Running",
            &["sidecar", "hello"],
        )))
        .unwrap();

    // Only the allowed container of the running pod is followed.
    let (target, _, _tx) = opened(&mut h).await;
    assert_eq!(target, self::target("hello-def", "hello"));
    assert!(h.opened_rx.try_recv().is_err());

    stream.stop().await;
    drain_closed(&mut out).await;
}

#[tokio::test]
async fn reports_ended_streams_and_reclaims_the_slot() {
    let (source, mut h) = fake();
    let (stream, mut out) = LogStream::new(config(), source).expect("config must be valid");
    stream.start(&CancellationToken::new()).expect("must start");

    let running = pod("hello-abc", "Running", &["hello"]);
    h.pods_tx
        .send(watcher::Event::Apply(running.clone()))
        .unwrap();
    let (_, _, tx) = opened(&mut h).await;

    tx.send(Err(BoxError::from("connection reset")))
        .await
        .unwrap();
    let error = time::timeout(TIMEOUT, out.errors.recv())
        .await
        .expect("error must arrive")
        .expect("errors must be open");
    assert!(
        matches!(error, Error::Read { ref target, .. } if *target == self::target("hello-abc", "hello")),
        "{error}"
    );

    // Once the follow task has exited, a later update re-opens the stream.
    time::timeout(TIMEOUT, async {
        while !stream.index().read().followed().is_empty() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("slot must be released");
    h.pods_tx.send(watcher::Event::Apply(running)).unwrap();
    let (target, _, _tx) = opened(&mut h).await;
    assert_eq!(target, self::target("hello-abc", "hello"));

    stream.stop().await;
    drain_closed(&mut out).await;
}

#[tokio::test]
async fn index_applies_directly() {
    let (source, mut h) = fake();
    let (stream, mut out) = LogStream::new(config(), source).expect("config must be valid");

    stream
        .index()
        .write()
        .apply(pod("hello-abc", "Running", &["hello"]));
    let (target, _, tx) = opened(&mut h).await;
    assert_eq!(target, self::target("hello-abc", "hello"));

    // Applying the same pod again doesn't open a second stream.
    stream
        .index()
        .write()
        .apply(pod("hello-abc", "Running", &["hello"]));
    tokio::task::yield_now().await;
    assert!(h.opened_rx.try_recv().is_err());

    stream
        .index()
        .write()
        .delete("hello-alice".to_string(), "hello-abc".to_string());
    time::timeout(TIMEOUT, tx.closed())
        .await
        .expect("follow must be cancelled");

    stream.stop().await;
    drain_closed(&mut out).await;
}
