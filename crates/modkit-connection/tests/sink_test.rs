// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Producer/consumer behaviour of sinks across threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use modkit_connection::{
    JsonMessage, JsonPayload, Reader, ReaderSink, SinkError, Writer, WriterSink,
};
use modkit_protocol::envelope;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Sample {
    n: u32,
}

impl JsonPayload for Sample {
    const TYPE_NAME: &'static str = "modkit.test.Sample";
}

#[test]
fn test_blocking_push_returns_once_consumed() {
    let sink = Arc::new(WriterSink::new());
    let consumer = {
        let sink = sink.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let envelope = sink.get(Some(Duration::from_secs(5))).unwrap();
            sink.pop();
            envelope
        })
    };

    let started = Instant::now();
    Writer::<JsonMessage<Sample>>::new(sink.clone(), true)
        .write(&JsonMessage::new(Sample { n: 1 }))
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(sink.is_empty());

    let envelope = consumer.join().unwrap();
    assert_eq!(
        envelope::format_and_name(&envelope),
        ("JSON".to_string(), "modkit.test.Sample".to_string())
    );
}

#[test]
fn test_drain_releases_blocked_writer() {
    let sink = Arc::new(WriterSink::new());
    let released = Arc::new(AtomicBool::new(false));
    let producer = {
        let sink = sink.clone();
        let released = released.clone();
        thread::spawn(move || {
            let result = Writer::<JsonMessage<Sample>>::new(sink, true)
                .write(&JsonMessage::new(Sample { n: 2 }));
            released.store(true, Ordering::SeqCst);
            result
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!released.load(Ordering::SeqCst));
    sink.drain();
    assert!(producer.join().unwrap().is_ok());

    assert!(matches!(
        sink.push(envelope::create(&JsonMessage::new(Sample { n: 3 })).unwrap(), false),
        Err(SinkError::Drained)
    ));
    assert!(matches!(sink.get(None), Err(SinkError::Drained)));
}

#[test]
fn test_reader_waits_for_producer() {
    let sink = Arc::new(ReaderSink::new());
    let producer = {
        let sink = sink.clone();
        thread::spawn(move || {
            for n in 0..10 {
                sink.put(envelope::create(&JsonMessage::new(Sample { n })).unwrap())
                    .unwrap();
            }
        })
    };

    let mut reader = Reader::<JsonMessage<Sample>>::new(sink, true)
        .with_timeout(Duration::from_secs(5));
    for n in 0..10 {
        assert_eq!(reader.read().unwrap().into_inner().n, n);
    }
    producer.join().unwrap();
}

#[test]
fn test_drain_wakes_blocked_reader() {
    let sink = Arc::new(ReaderSink::new());
    let reader = {
        let sink = sink.clone();
        thread::spawn(move || sink.get(None))
    };
    thread::sleep(Duration::from_millis(30));
    sink.drain();
    assert!(matches!(reader.join().unwrap(), Err(SinkError::Drained)));
}
