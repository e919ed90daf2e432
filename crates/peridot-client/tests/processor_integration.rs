//! Processor integration tests against in-process mock proxies.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use peridot_client::{ClientError, Processor, ProcessorConfig, ServiceEndpoint};
use peridot_wire::{OpCode, OpStatus, OperationalMessage};

/// Proxy that answers every request with `NoError`, echoing the correlation
/// fields.
async fn spawn_echo_proxy() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_echo(stream));
        }
    });

    addr
}

async fn serve_echo(mut stream: TcpStream) {
    let mut buf = BytesMut::new();
    loop {
        loop {
            match OperationalMessage::decode(&mut buf) {
                Ok(Some(request)) => {
                    let response = OperationalMessage::response_to(&request, OpStatus::NoError);
                    let encoded = response.encode_to_bytes().unwrap();
                    if stream.write_all(&encoded).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Proxy that accepts connections and reads requests but never answers.
async fn spawn_silent_proxy() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut sink = [0u8; 4096];
                while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
            });
        }
    });

    addr
}

fn processor_for(addr: &str, config: ProcessorConfig) -> Processor {
    Processor::new(ServiceEndpoint::new(addr), "itest", config)
}

#[tokio::test]
async fn happy_path_roundtrip() {
    let addr = spawn_echo_proxy().await;
    let processor = processor_for(&addr, ProcessorConfig::default());
    processor.start();

    let op = OperationalMessage::request(OpCode::Set, "itest", "user:1").with_payload("v1");
    let request_id = op.request_id;

    let response = processor.process_request(op).await.unwrap();

    assert!(response.is_response());
    assert_eq!(response.status, OpStatus::NoError);
    assert_eq!(response.request_id, request_id);
    assert_ne!(response.opaque, 0, "coordinator must stamp a sequence");

    let stats = processor.stats();
    assert_eq!(stats.requests_sent, 1);
    assert_eq!(stats.responses_matched, 1);
    assert_eq!(stats.timeouts, 0);

    processor.close();
}

#[tokio::test]
async fn sequences_increase_per_request() {
    let addr = spawn_echo_proxy().await;
    let processor = processor_for(&addr, ProcessorConfig::default());
    processor.start();

    let mut previous = 0;
    for i in 0..3 {
        let op = OperationalMessage::request(OpCode::Get, "itest", format!("key-{i}"));
        let response = processor.process_request(op).await.unwrap();
        assert!(response.opaque > previous);
        previous = response.opaque;
    }

    processor.close();
}

#[tokio::test]
async fn concurrent_requests_are_demultiplexed() {
    let addr = spawn_echo_proxy().await;
    let processor = Arc::new(processor_for(&addr, ProcessorConfig::default()));
    processor.start();

    let mut handles = Vec::new();
    for i in 0..10 {
        let processor = Arc::clone(&processor);
        handles.push(tokio::spawn(async move {
            let op = OperationalMessage::request(OpCode::Get, "itest", format!("key-{i}"));
            let request_id = op.request_id;
            let key = op.key.clone();
            let response = processor.process_request(op).await.unwrap();
            (request_id, key, response)
        }));
    }

    for handle in handles {
        let (request_id, key, response) = handle.await.unwrap();
        assert_eq!(response.request_id, request_id);
        assert_eq!(response.key, key);
    }

    processor.close();
}

#[tokio::test]
async fn empty_namespace_is_stamped() {
    let addr = spawn_echo_proxy().await;
    let processor = processor_for(&addr, ProcessorConfig::default());
    processor.start();

    let op = OperationalMessage::request(OpCode::Set, "", "key").with_payload("v");
    let response = processor.process_request(op).await.unwrap();

    // The echo proxy reflects the namespace the frame carried.
    assert_eq!(&response.namespace[..], b"itest");

    processor.close();
}

#[tokio::test]
async fn silent_server_times_out_the_request() {
    let addr = spawn_silent_proxy().await;
    let config = ProcessorConfig {
        request_timeout: Duration::from_millis(50),
        ..ProcessorConfig::default()
    };
    let processor = processor_for(&addr, config);
    processor.start();

    let started = Instant::now();
    let op = OperationalMessage::request(OpCode::Set, "itest", "key").with_payload("v");
    let err = processor.process_request(op).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ClientError::RequestTimeout));
    assert!(elapsed >= Duration::from_millis(50), "expired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "expired late: {elapsed:?}");
    assert_eq!(processor.stats().timeouts, 1);

    processor.close();
}

#[tokio::test]
async fn unreachable_endpoint_fails_fast() {
    // Bind and drop a listener so the port actively refuses.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let processor = processor_for(&addr, ProcessorConfig::default());
    processor.start();

    let op = OperationalMessage::request(OpCode::Set, "itest", "key");
    let err = processor.process_request(op).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectFailed { .. }));

    processor.close();
}

#[tokio::test]
async fn close_fails_pending_requests() {
    let addr = spawn_silent_proxy().await;
    let config = ProcessorConfig {
        request_timeout: Duration::from_secs(10),
        ..ProcessorConfig::default()
    };
    let processor = Arc::new(processor_for(&addr, config));
    processor.start();

    let pending = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            let op = OperationalMessage::request(OpCode::Set, "itest", "key");
            processor.process_request(op).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    processor.close();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::ShuttingDown));
}

#[tokio::test]
async fn recycle_fails_inflight_and_reconnects() {
    let addr = spawn_silent_proxy().await;
    let config = ProcessorConfig {
        request_timeout: Duration::from_secs(10),
        connect_recycle_timeout: Duration::from_millis(100),
        ..ProcessorConfig::default()
    };
    let processor = processor_for(&addr, config);
    processor.start();

    let started = Instant::now();
    let op = OperationalMessage::request(OpCode::Set, "itest", "key");
    let err = processor.process_request(op).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ClientError::ReaderClosed));
    assert!(elapsed < Duration::from_secs(1), "recycle did not fire: {elapsed:?}");
    assert!(processor.stats().recycles >= 1);

    processor.close();
}

#[tokio::test]
async fn process_request_after_close_is_rejected() {
    let addr = spawn_echo_proxy().await;
    let processor = processor_for(&addr, ProcessorConfig::default());
    processor.start();
    processor.close();

    // Give the coordinator a beat to observe the signal and drop its
    // receiver half.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let op = OperationalMessage::request(OpCode::Set, "itest", "key");
    let err = processor.process_request(op).await.unwrap_err();
    assert!(matches!(err, ClientError::ShuttingDown));
}
