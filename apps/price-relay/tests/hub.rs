//! Hub fan-out tests: concurrent registration, slow-viewer eviction, and
//! writer shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use price_relay::{
    BroadcastPort, Hub, HubConfig, Payload, Sink, SinkState, WriterExit, write_pump,
};
use tokio_util::sync::CancellationToken;

use common::{Frame, RecordingWriter, eventually};

const WAIT: Duration = Duration::from_secs(5);

fn spawn_hub(config: HubConfig) -> (Arc<Hub>, CancellationToken, tokio::task::JoinHandle<()>) {
    let hub = Arc::new(Hub::new(config));
    let cancel = CancellationToken::new();
    let task = {
        let hub = Arc::clone(&hub);
        let cancel = cancel.clone();
        tokio::spawn(async move { hub.run(cancel).await })
    };
    (hub, cancel, task)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registration() {
    let hub = Arc::new(Hub::with_defaults());

    let sinks: Vec<_> = join_all((0..64).map(|_| {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let (sink, queue) = hub.new_sink();
            assert!(hub.register(&sink));
            (sink, queue)
        })
    }))
    .await
    .into_iter()
    .map(Result::unwrap)
    .collect();
    assert_eq!(hub.count(), 64);

    let removed = join_all(sinks.iter().take(32).map(|(sink, _)| {
        let hub = Arc::clone(&hub);
        let sink = sink.clone();
        tokio::spawn(async move { hub.unregister(&sink) })
    }))
    .await;
    assert!(removed.into_iter().all(|r| r.unwrap()));
    assert_eq!(hub.count(), 32);
}

#[tokio::test]
async fn slow_viewer_is_evicted_without_stalling_others() {
    let (hub, _cancel, _task) = spawn_hub(HubConfig {
        intake_capacity: 16,
        sink_capacity: 16,
    });

    let (healthy, healthy_queue) = hub.new_sink();
    assert!(hub.register(&healthy));
    let (writer, frames) = RecordingWriter::new();
    let healthy_writer = tokio::spawn(write_pump(healthy_queue, writer));

    // Room for one payload and nobody reading it.
    let (slow, mut slow_queue) = Sink::new(1);
    assert!(hub.register(&slow));
    assert_eq!(hub.count(), 2);

    let intake = hub.intake();
    for n in 0..3 {
        intake.try_broadcast(Payload::from(format!("m{n}"))).unwrap();
    }

    eventually(WAIT, || hub.count() == 1).await;
    eventually(WAIT, || frames.lock().len() == 3).await;

    assert!(hub.contains(&healthy));
    assert!(!hub.contains(&slow));
    assert_eq!(slow.state(), SinkState::Closed);
    assert_eq!(
        *frames.lock(),
        vec![
            Frame::Text("m0".to_string()),
            Frame::Text("m1".to_string()),
            Frame::Text("m2".to_string()),
        ]
    );

    // What was queued before eviction is still readable, then the queue ends.
    assert_eq!(slow_queue.next().await.as_deref(), Some("m0"));
    assert_eq!(slow_queue.next().await, None);

    hub.unregister(&healthy);
    assert_eq!(healthy_writer.await.unwrap(), WriterExit::QueueClosed);
}

#[tokio::test]
async fn fan_out_never_waits_when_every_queue_is_full() {
    let hub = Arc::new(Hub::with_defaults());

    // Capacity one, nobody reading.
    let stuck: Vec<_> = (0..8)
        .map(|_| {
            let (sink, queue) = Sink::new(1);
            assert!(hub.register(&sink));
            (sink, queue)
        })
        .collect();

    let first = hub.broadcast(&Payload::from("fills every queue"));
    assert_eq!(first.delivered, 8);
    assert_eq!(first.evicted, 0);

    let second = hub.broadcast(&Payload::from("finds every queue full"));
    assert_eq!(second.delivered, 0);
    assert_eq!(second.evicted, 8);

    let cancel = CancellationToken::new();
    let task = {
        let hub = Arc::clone(&hub);
        let cancel = cancel.clone();
        tokio::spawn(async move { hub.run(cancel).await })
    };

    eventually(WAIT, || hub.count() == 0).await;
    assert!(stuck.iter().all(|(sink, _)| sink.is_closed()));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn closing_a_sink_sends_one_close_frame() {
    let (hub, _cancel, _task) = spawn_hub(HubConfig::default());

    let (sink, queue) = hub.new_sink();
    assert!(hub.register(&sink));
    let (other, _other_queue) = hub.new_sink();
    assert!(hub.register(&other));

    let (writer, frames) = RecordingWriter::new();
    let pump = tokio::spawn(write_pump(queue, writer));

    hub.intake().try_broadcast(Payload::from("hello")).unwrap();
    eventually(WAIT, || !frames.lock().is_empty()).await;

    assert!(hub.unregister(&sink));
    assert!(!hub.unregister(&sink));
    assert_eq!(hub.count(), 1);
    assert_eq!(pump.await.unwrap(), WriterExit::QueueClosed);

    assert_eq!(
        *frames.lock(),
        vec![Frame::Text("hello".to_string()), Frame::Close]
    );

    // A closed sink cannot come back.
    assert!(!hub.register(&sink));
    assert_eq!(hub.count(), 1);
}

#[tokio::test]
async fn write_failure_removes_the_viewer() {
    let (hub, _cancel, _task) = spawn_hub(HubConfig::default());

    let (sink, queue) = hub.new_sink();
    assert!(hub.register(&sink));
    let (writer, frames) = RecordingWriter::failing_after(1);
    let pump = tokio::spawn(write_pump(queue, writer));

    let intake = hub.intake();
    intake.try_broadcast(Payload::from("first")).unwrap();
    intake.try_broadcast(Payload::from("second")).unwrap();

    assert_eq!(pump.await.unwrap(), WriterExit::WriteFailed);
    assert_eq!(*frames.lock(), vec![Frame::Text("first".to_string())]);

    // The next fan-out finds the writer gone and drops the sink.
    intake.try_broadcast(Payload::from("third")).unwrap();
    eventually(WAIT, || hub.count() == 0).await;
    assert!(sink.is_closed());
}

#[tokio::test]
async fn hub_shutdown_closes_every_sink() {
    let (hub, cancel, task) = spawn_hub(HubConfig::default());

    let mut pumps = Vec::new();
    let mut recordings = Vec::new();
    for _ in 0..3 {
        let (sink, queue) = hub.new_sink();
        assert!(hub.register(&sink));
        let (writer, frames) = RecordingWriter::new();
        pumps.push(tokio::spawn(write_pump(queue, writer)));
        recordings.push(frames);
    }

    hub.intake().try_broadcast(Payload::from("last")).unwrap();
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(hub.count(), 0);
    for pump in pumps {
        assert_eq!(pump.await.unwrap(), WriterExit::QueueClosed);
    }
    for frames in recordings {
        assert_eq!(
            *frames.lock(),
            vec![Frame::Text("last".to_string()), Frame::Close]
        );
    }

    let (late, _queue) = hub.new_sink();
    assert!(!hub.register(&late));
    assert!(late.is_closed());
}
