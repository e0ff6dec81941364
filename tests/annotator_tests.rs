use std::sync::Arc;
use std::time::Duration;

use lookout::error::{AnnotatorError, SessionError};
use lookout::kernel::telemetry::SharedTelemetry;
use lookout::kernel::{Annotator, AnnotatorPhase, Arbiter, Observation, ObservationSink, SessionLifecycle};
use lookout::testing::{Script, ScriptedFactory, StaticFrames};
use tokio::sync::{mpsc, oneshot};

const INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum SinkEvent {
    Observed(Observation),
    Cleared,
}

struct RecordingSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ObservationSink for RecordingSink {
    fn on_observation(&self, observation: Observation) {
        let _ = self.tx.send(SinkEvent::Observed(observation));
    }

    fn on_memory_cleared(&self) {
        let _ = self.tx.send(SinkEvent::Cleared);
    }
}

struct Rig {
    factory: Arc<ScriptedFactory>,
    lifecycle: Arc<SessionLifecycle>,
    arbiter: Arc<Arbiter>,
    telemetry: SharedTelemetry,
}

impl Rig {
    fn new() -> Self {
        let factory = ScriptedFactory::new(Script::default());
        let lifecycle = Arc::new(SessionLifecycle::new(factory.clone()));
        Self {
            factory,
            lifecycle,
            arbiter: Arc::new(Arbiter::new(Duration::from_secs(30))),
            telemetry: SharedTelemetry::new(),
        }
    }

    fn annotator(&self, frames: Arc<StaticFrames>, sink: Arc<dyn ObservationSink>) -> Annotator {
        Annotator::new(self.arbiter.clone(), self.lifecycle.clone(), frames, sink)
            .with_telemetry(self.telemetry.clone())
    }
}

fn channel_sink() -> (Arc<dyn ObservationSink>, mpsc::UnboundedReceiver<Observation>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = move |observation: Observation| {
        let _ = tx.send(observation);
    };
    (Arc::new(sink), rx)
}

#[tokio::test(start_paused = true)]
async fn scenario_a_uncontended_appends_all_succeed() {
    let rig = Rig::new();
    let (sink, mut rx) = channel_sink();
    let handle = rig.annotator(StaticFrames::new(), sink).start(INTERVAL).unwrap();

    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(rx.recv().await.unwrap());
    }

    assert_eq!(rig.lifecycle.usage_count(), 5);
    assert_eq!(seen.iter().map(|o| o.ordinal).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert_eq!(seen[0].text, "observation #1");
    assert_eq!(seen[4].text, "observation #5");
    assert!(seen.iter().all(|o| o.generation == 1));

    let snap = rig.telemetry.snapshot();
    assert_eq!(snap.background.appended, 5);
    assert_eq!(snap.background.skipped + snap.background.busy, 0);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn capture_failures_do_not_stop_the_loop() {
    let rig = Rig::new();
    let frames = StaticFrames::failing_first(3);
    let (sink, mut rx) = channel_sink();
    let handle = rig.annotator(frames.clone(), sink).start(INTERVAL).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.ordinal, 1);
    assert_eq!(frames.captures(), 4);
    assert_eq!(rig.telemetry.snapshot().background.capture_failures, 3);
    assert_eq!(rig.factory.latest().unwrap().append_calls(), 1, "failed captures never reach the session");

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn append_failures_drop_the_frame_and_continue() {
    let rig = Rig::new();
    let session = rig.factory.latest().unwrap();
    session.fail_next_append(SessionError::Network("connection refused".into()));
    session.fail_next_append(SessionError::EmptyResponse);

    let (sink, mut rx) = channel_sink();
    let handle = rig.annotator(StaticFrames::new(), sink).start(INTERVAL).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.ordinal, 1);
    assert_eq!(first.text, "observation #1");
    assert_eq!(session.append_calls(), 3, "failed frames are not retried");
    assert_eq!(rig.lifecycle.usage_count(), 1);
    assert_eq!(rig.lifecycle.generation(), 1, "ordinary failures keep the session");
    assert_eq!(rig.telemetry.snapshot().background.failures, 2);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn capacity_exceeded_resets_the_session() {
    let rig = Rig::new();
    rig.factory
        .latest()
        .unwrap()
        .fail_next_append(SessionError::CapacityExceeded("context full".into()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn ObservationSink> = Arc::new(RecordingSink { tx });
    let handle = rig.annotator(StaticFrames::new(), sink).start(INTERVAL).unwrap();

    assert!(matches!(rx.recv().await.unwrap(), SinkEvent::Cleared));
    assert_eq!(rig.lifecycle.generation(), 2);
    assert_eq!(rig.factory.opened().len(), 2);

    match rx.recv().await.unwrap() {
        SinkEvent::Observed(observation) => {
            assert_eq!(observation.generation, 2);
            assert_eq!(observation.text, "observation #1", "fresh session starts from nothing");
        }
        other => panic!("expected an observation, got {:?}", other),
    }
    assert_eq!(rig.lifecycle.usage_count(), 1);
    assert_eq!(rig.telemetry.snapshot().resets, 1);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn capacity_error_from_a_replaced_session_leaves_the_new_one_alone() {
    let factory = ScriptedFactory::new(Script {
        append_delay: Duration::from_secs(5),
        ..Script::default()
    });
    let lifecycle = Arc::new(SessionLifecycle::new(factory.clone()));
    factory
        .latest()
        .unwrap()
        .fail_next_append(SessionError::CapacityExceeded("context full".into()));
    let arbiter = Arc::new(Arbiter::new(Duration::from_secs(30)));
    let telemetry = SharedTelemetry::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn ObservationSink> = Arc::new(RecordingSink { tx });
    let handle = Annotator::new(arbiter, lifecycle.clone(), StaticFrames::new(), sink)
        .with_telemetry(telemetry.clone())
        .start(INTERVAL)
        .unwrap();

    // The first append runs from t=1s to t=6s; replace the session halfway.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let replacement = lifecycle.reset();
    assert_eq!(replacement.generation(), 2);

    match rx.recv().await.unwrap() {
        SinkEvent::Observed(observation) => {
            assert_eq!(observation.generation, 2);
            assert_eq!(observation.text, "observation #1");
        }
        SinkEvent::Cleared => panic!("the replacement session must not be cleared"),
    }

    assert_eq!(lifecycle.generation(), 2);
    assert_eq!(lifecycle.current().id(), replacement.id());
    assert_eq!(factory.opened().len(), 2);

    let snap = telemetry.snapshot();
    assert_eq!(snap.background.failures, 1);
    assert_eq!(snap.resets, 0);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn pending_query_makes_the_annotator_back_off() {
    let rig = Rig::new();
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let arbiter = rig.arbiter.clone();
    let query = tokio::spawn(async move {
        arbiter
            .run_guaranteed(|| async move {
                let _ = entered_tx.send(());
                let _ = release_rx.await;
                Ok::<_, SessionError>(())
            })
            .await
    });
    entered_rx.await.unwrap();

    let (sink, mut rx) = channel_sink();
    let handle = rig.annotator(StaticFrames::new(), sink).start(INTERVAL).unwrap();

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(rx.try_recv().is_err(), "no observation while the query holds the session");
    assert_eq!(rig.telemetry.snapshot().background.skipped, 3);
    assert_eq!(rig.factory.latest().unwrap().append_calls(), 0);

    release_tx.send(()).unwrap();
    query.await.unwrap().unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.ordinal, 1);
    assert!(handle.is_running());

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn held_gate_reports_busy() {
    let rig = Rig::new();
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let arbiter = rig.arbiter.clone();
    let holder = tokio::spawn(async move {
        arbiter
            .try_best_effort(|| async move {
                let _ = entered_tx.send(());
                let _ = release_rx.await;
                Ok::<_, SessionError>(())
            })
            .await
    });
    entered_rx.await.unwrap();

    let (sink, mut rx) = channel_sink();
    let handle = rig.annotator(StaticFrames::new(), sink).start(INTERVAL).unwrap();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(rig.telemetry.snapshot().background.busy, 2);

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    assert_eq!(rx.recv().await.unwrap().ordinal, 1);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancelling_stops_the_loop() {
    let rig = Rig::new();
    let (sink, mut rx) = channel_sink();
    let handle = rig.annotator(StaticFrames::new(), sink).start(INTERVAL).unwrap();

    rx.recv().await.unwrap();
    rx.recv().await.unwrap();

    handle.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.phase(), AnnotatorPhase::Stopped);
    assert!(!handle.is_running());

    let calls = rig.factory.latest().unwrap().append_calls();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.factory.latest().unwrap().append_calls(), calls);
    assert!(rig.arbiter.is_gate_free());

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_cancels_mid_append() {
    let factory = ScriptedFactory::new(Script {
        append_delay: Duration::from_secs(5),
        ..Script::default()
    });
    let lifecycle = Arc::new(SessionLifecycle::new(factory.clone()));
    let arbiter = Arc::new(Arbiter::new(Duration::from_secs(30)));
    let (sink, _rx) = channel_sink();

    let handle = Annotator::new(arbiter.clone(), lifecycle, StaticFrames::new(), sink)
        .start(INTERVAL)
        .unwrap();

    // 1s wait, then the append is in flight for the next 5s.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(factory.probe().in_flight(), 1);

    drop(handle);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(factory.probe().in_flight(), 0);
    assert!(arbiter.is_gate_free(), "cancellation must release the gate");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(factory.latest().unwrap().append_calls(), 1);
}

#[test]
fn zero_interval_is_rejected() {
    let rig = Rig::new();
    let (sink, _rx) = channel_sink();
    let result = rig.annotator(StaticFrames::new(), sink).start(Duration::ZERO);
    assert!(matches!(result, Err(AnnotatorError::ZeroInterval)));
}
