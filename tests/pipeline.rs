//! End-to-end pipeline test: several producer threads aligned on the segment
//! barrier, one consumer cutting recordings and publishing progress.

use std::sync::Arc;

use session2rrd::barrier::SegmentBarrier;
use session2rrd::consumer::{ConsumerOptions, SegmentedEventConsumer};
use session2rrd::event::{Event, QueueMessage};
use session2rrd::progress::{MemoryPublisher, ProgressMessage};

const SEGMENT_US: i64 = 60_000_000;
const EVENT_SPACING_US: i64 = 10_000_000;
const EVENTS_PER_WORKER: i64 = 10;

/// Produce signal events every 10 s of session time, holding at the barrier
/// before crossing each 60 s window boundary.
fn producer(
    worker_id: String,
    barrier: Arc<SegmentBarrier>,
    queue: flume::Sender<QueueMessage>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut segment_index: i64 = 0;
        for k in 0..EVENTS_PER_WORKER {
            let timestamp_us = k * EVENT_SPACING_US;
            while timestamp_us >= (segment_index + 1) * SEGMENT_US {
                barrier.wait(&worker_id);
                segment_index += 1;
            }
            queue
                .send(QueueMessage::Event(Event::Signal {
                    entity: worker_id.clone(),
                    timestamp_us,
                    name: format!("{worker_id}_value"),
                    value: k as f64,
                }))
                .unwrap();
        }
        barrier.deregister(&worker_id);
        queue
            .send(QueueMessage::Finished { entity: worker_id })
            .unwrap();
    })
}

#[test]
fn three_workers_two_segments_then_complete() {
    let dir = tempfile::tempdir().unwrap();
    let barrier = Arc::new(SegmentBarrier::new());
    let (tx, rx) = flume::bounded(8);

    let worker_ids = ["w0", "w1", "w2"];
    for id in worker_ids {
        barrier.register(id);
    }
    let handles: Vec<_> = worker_ids
        .iter()
        .map(|id| producer(id.to_string(), Arc::clone(&barrier), tx.clone()))
        .collect();
    drop(tx);

    let mut consumer = SegmentedEventConsumer::new(ConsumerOptions {
        save_dir: dir.path().to_path_buf(),
        session_key: "u1/p1".to_string(),
        user_id: "u1".to_string(),
        project_id: "p1".to_string(),
        server_url: "https://viz.example.com".to_string(),
        segment_duration_us: SEGMENT_US,
        worker_count: worker_ids.len(),
        show_progress: false,
    });
    let mut publisher = MemoryPublisher::new();
    consumer.run(&rx, &mut publisher).unwrap();

    for handle in handles {
        handle.join().unwrap();
    }

    // 3 workers x 10 events; timestamps reach 90 s, so one full 60 s segment
    // plus the final partial one.
    assert_eq!(consumer.stats.events, 30);
    assert_eq!(consumer.stats.segments, 2);
    assert!(dir.path().join("0.rrd").exists());
    assert!(dir.path().join("1.rrd").exists());

    let messages = publisher.messages();
    assert_eq!(messages.len(), 3);

    match &messages[0].1 {
        ProgressMessage::Progressing {
            segment_index,
            artifact_url,
            segment_label,
        } => {
            assert_eq!(*segment_index, 0);
            assert_eq!(artifact_url, "https://viz.example.com/rrd/u1/p1/0.rrd");
            assert_eq!(segment_label, "00:00 ~ 01:00");
        }
        other => panic!("expected PROGRESSING, got {other:?}"),
    }
    assert_eq!(messages[0].0, "visualization/backend/progress/u1/p1");

    match &messages[1].1 {
        ProgressMessage::Progressing {
            segment_index,
            segment_label,
            ..
        } => {
            assert_eq!(*segment_index, 1);
            // Final segment ends at the last observed event time (90 s).
            assert_eq!(segment_label, "01:00 ~ 01:30");
        }
        other => panic!("expected PROGRESSING, got {other:?}"),
    }

    assert_eq!(messages[2].1, ProgressMessage::Complete);
    assert_eq!(messages[2].0, "visualization/backend/complete/u1/p1");
    assert!(publisher.is_disconnected());
}

#[test]
fn uneven_streams_do_not_deadlock() {
    // One worker ends inside the first segment; the other two must still be
    // released at every boundary.
    let dir = tempfile::tempdir().unwrap();
    let barrier = Arc::new(SegmentBarrier::new());
    let (tx, rx) = flume::bounded(8);

    for id in ["short", "long0", "long1"] {
        barrier.register(id);
    }

    let short = {
        let barrier = Arc::clone(&barrier);
        let tx = tx.clone();
        std::thread::spawn(move || {
            tx.send(QueueMessage::Event(Event::Signal {
                entity: "short".to_string(),
                timestamp_us: 5_000_000,
                name: "short_value".to_string(),
                value: 1.0,
            }))
            .unwrap();
            barrier.deregister("short");
            tx.send(QueueMessage::Finished { entity: "short".to_string() }).unwrap();
        })
    };
    let longs: Vec<_> = ["long0", "long1"]
        .iter()
        .map(|id| producer(id.to_string(), Arc::clone(&barrier), tx.clone()))
        .collect();
    drop(tx);

    let mut consumer = SegmentedEventConsumer::new(ConsumerOptions {
        save_dir: dir.path().to_path_buf(),
        session_key: "u1/p1".to_string(),
        user_id: "u1".to_string(),
        project_id: "p1".to_string(),
        server_url: "https://viz.example.com".to_string(),
        segment_duration_us: SEGMENT_US,
        worker_count: 3,
        show_progress: false,
    });
    let mut publisher = MemoryPublisher::new();
    consumer.run(&rx, &mut publisher).unwrap();

    short.join().unwrap();
    for handle in longs {
        handle.join().unwrap();
    }

    assert_eq!(consumer.stats.events, 21);
    assert_eq!(
        publisher.messages().last().map(|(_, m)| m.clone()),
        Some(ProgressMessage::Complete)
    );
}
