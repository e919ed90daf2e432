//! Replicator integration tests against in-process mock proxies.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use peridot_replication::{ReplicationConfig, Replicator};
use peridot_wire::{OpCode, OpStatus, OperationalMessage};

/// Proxy that answers every request with the status `pick` chooses for it.
async fn spawn_proxy(pick: fn(&OperationalMessage) -> OpStatus) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve(stream, pick));
        }
    });

    addr
}

async fn serve(mut stream: TcpStream, pick: fn(&OperationalMessage) -> OpStatus) {
    let mut buf = BytesMut::new();
    loop {
        loop {
            match OperationalMessage::decode(&mut buf) {
                Ok(Some(request)) => {
                    let response = OperationalMessage::response_to(&request, pick(&request));
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

fn record(key: &str) -> OperationalMessage {
    OperationalMessage::request(OpCode::Set, "", key.to_string()).with_payload("payload")
}

fn fast_config() -> ReplicationConfig {
    ReplicationConfig {
        request_timeout_ms: 200,
        ..ReplicationConfig::default()
    }
}

#[tokio::test]
async fn happy_path_replicates_in_order() {
    let addr = spawn_proxy(|_| OpStatus::NoError).await;
    let replicator = Replicator::builder()
        .proxy_addr(addr)
        .num_connections(1)
        .config(fast_config())
        .build();

    for i in 0..10 {
        assert!(replicator.replicate(record(&format!("key-{i}"))).await);
    }

    replicator.shutdown().await;
}

#[tokio::test]
async fn version_conflict_counts_as_success() {
    let addr = spawn_proxy(|_| OpStatus::VersionConflict).await;
    let replicator = Replicator::builder()
        .proxy_addr(addr)
        .config(fast_config())
        .build();

    assert!(replicator.replicate(record("conflicted")).await);

    replicator.shutdown().await;
}

#[tokio::test]
async fn rejected_status_fails_after_retries() {
    let addr = spawn_proxy(|_| OpStatus::Internal).await;
    let replicator = Replicator::builder()
        .proxy_addr(addr)
        .config(fast_config())
        .build();

    let started = Instant::now();
    assert!(!replicator.replicate(record("rejected")).await);
    let elapsed = started.elapsed();

    // Three attempts with two 10ms backoffs between them.
    assert!(elapsed >= Duration::from_millis(20), "retried too fast: {elapsed:?}");

    replicator.shutdown().await;
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    // The connection carrying each of the first two requests is closed
    // without a response; the third request is served.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let served = Arc::new(AtomicUsize::new(0));

    tokio::spawn({
        let served = Arc::clone(&served);
        async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    let mut buf = BytesMut::new();
                    loop {
                        loop {
                            match OperationalMessage::decode(&mut buf) {
                                Ok(Some(request)) => {
                                    if served.fetch_add(1, Ordering::SeqCst) < 2 {
                                        return; // close without responding
                                    }
                                    let response = OperationalMessage::response_to(
                                        &request,
                                        OpStatus::NoError,
                                    );
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
                });
            }
        }
    });

    let replicator = Replicator::builder()
        .proxy_addr(addr)
        .config(fast_config())
        .build();

    let started = Instant::now();
    assert!(replicator.replicate(record("eventually")).await);
    let elapsed = started.elapsed();

    // Two failed attempts, each followed by a 10ms backoff.
    assert!(elapsed >= Duration::from_millis(20), "backoff skipped: {elapsed:?}");
    assert_eq!(served.load(Ordering::SeqCst), 3);

    replicator.shutdown().await;
}

#[tokio::test]
async fn silent_proxy_times_out_to_failure() {
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

    let config = ReplicationConfig {
        request_timeout_ms: 50,
        ..ReplicationConfig::default()
    };
    let replicator = Replicator::builder().proxy_addr(addr).config(config).build();

    let started = Instant::now();
    assert!(!replicator.replicate(record("stuck")).await);
    let elapsed = started.elapsed();

    // Three 50ms request timeouts plus two 10ms backoffs.
    assert!(elapsed >= Duration::from_millis(150), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "gave up late: {elapsed:?}");

    replicator.shutdown().await;
}

#[tokio::test]
async fn concurrent_callers_get_their_own_verdicts() {
    // Success or failure depends on the record key, so every caller can
    // check it received the verdict for its own record.
    let addr = spawn_proxy(|request| {
        if request.key.starts_with(b"good-") {
            OpStatus::NoError
        } else {
            OpStatus::Internal
        }
    })
    .await;

    let replicator = Arc::new(
        Replicator::builder()
            .proxy_addr(addr)
            .num_connections(4)
            .config(fast_config())
            .build(),
    );

    let mut handles = Vec::new();
    for i in 0..20 {
        let replicator = Arc::clone(&replicator);
        let good = i % 2 == 0;
        let key = if good { format!("good-{i}") } else { format!("bad-{i}") };
        handles.push(tokio::spawn(async move {
            (good, replicator.replicate(record(&key)).await)
        }));
    }

    for handle in handles {
        let (expected, verdict) = handle.await.unwrap();
        assert_eq!(verdict, expected);
    }

    let replicator = Arc::try_unwrap(replicator).unwrap_or_else(|_| unreachable!());
    replicator.shutdown().await;
}
