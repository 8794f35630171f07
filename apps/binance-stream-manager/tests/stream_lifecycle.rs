//! Stream Lifecycle Integration Tests
//!
//! Drives real socket loops against an in-process WebSocket server bound
//! on an ephemeral port: frame ordering, crash-on-disconnect, generation
//! safety, outbound pacing, and idempotent stop.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use binance_stream_manager::{
    BinanceNormalizer, ChannelName, CrashReason, EndpointOverrides, Endpoints, FrameCodec,
    LifecycleState, LoopOutcome, OutputFormat, SendThrottle, SocketLoop, StreamConnection,
    StreamDescriptor, StreamRegistry, StreamSupervisor, WebSocketSettings,
};

const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Bind an ephemeral port and hand back its ws:// base URL plus the
/// listener for the test's server task.
async fn bind_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}"))
}

fn market_descriptor(output_format: OutputFormat) -> StreamDescriptor {
    StreamDescriptor::market_data(
        vec![ChannelName::market("trade")],
        vec!["btcusdt".to_string()],
        output_format,
    )
}

/// Assemble a socket loop for one registered stream against a test server.
fn make_loop(
    registry: &Arc<StreamRegistry>,
    descriptor: &StreamDescriptor,
    ws_base: &str,
    cap_per_sec: u32,
    safety_margin: u32,
) -> SocketLoop {
    let stream_id = descriptor.stream_id;
    let generation = registry.next_generation(stream_id).unwrap();
    let endpoints = Endpoints::resolve(descriptor.account_type, descriptor.environment)
        .with_overrides(&EndpointOverrides {
            ws_base: Some(ws_base.to_string()),
            rest_base: None,
        });

    SocketLoop::new(
        stream_id,
        generation,
        Arc::clone(registry),
        StreamConnection::new(descriptor.clone(), endpoints),
        FrameCodec::new(descriptor.output_format, Arc::new(BinanceNormalizer::new())),
        SendThrottle::new(cap_per_sec, safety_margin),
        RECEIVE_TIMEOUT,
    )
}

// =============================================================================
// Ordering and Crash-on-Disconnect
// =============================================================================

#[tokio::test]
async fn frames_are_buffered_in_arrival_order_and_abrupt_drop_crashes() {
    let (listener, ws_base) = bind_server().await;

    // One trade frame, one subscribe ack, one exchange error, then an
    // abrupt TCP drop without a closing handshake.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            r#"{"e":"trade","E":1,"s":"BTCUSDT","p":"50000.1","q":"0.5","T":2,"m":false}"#.into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(r#"{"result":null,"id":1}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"error":{"code":2,"msg":"Invalid request"},"id":2}"#.into(),
        ))
        .await
        .unwrap();
        // Drop without close frame: the client sees an abnormal closure.
    });

    let registry = Arc::new(StreamRegistry::new());
    let descriptor = market_descriptor(OutputFormat::RawText);
    let stream_id = registry.register(descriptor.clone());

    let socket_loop = make_loop(&registry, &descriptor, &ws_base, 5, 1);
    let outcome = timeout(Duration::from_secs(5), socket_loop.run())
        .await
        .expect("loop should finish after the server drops");

    assert!(matches!(
        outcome,
        LoopOutcome::Crashed(CrashReason::AbnormalClosure(_))
    ));
    assert_eq!(registry.lifecycle(stream_id), Some(LifecycleState::Crashed));
    assert!(registry.restart_requested(stream_id));

    let events = registry.drain_events(stream_id, 10);
    assert_eq!(events.len(), 3);

    assert!(events[0].raw_payload.contains(r#""e":"trade""#));
    assert!(!events[0].is_error && !events[0].is_control_result);

    assert!(events[1].is_control_result);
    assert!(events[2].is_error);

    server.await.unwrap();
}

#[tokio::test]
async fn many_frames_preserve_order_exactly() {
    let (listener, ws_base) = bind_server().await;

    const FRAMES: u64 = 50;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        for i in 0..FRAMES {
            let frame = format!(r#"{{"e":"ping","seq":{i}}}"#);
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        drop(ws);
    });

    let registry = Arc::new(StreamRegistry::new());
    let descriptor = market_descriptor(OutputFormat::NormalizedMap);
    let stream_id = registry.register(descriptor.clone());

    let socket_loop = make_loop(&registry, &descriptor, &ws_base, 5, 1);
    let _ = timeout(Duration::from_secs(10), socket_loop.run())
        .await
        .expect("loop should finish");

    let events = registry.drain_events(stream_id, usize::MAX);
    assert_eq!(events.len() as u64, FRAMES);
    for (i, event) in events.iter().enumerate() {
        assert!(
            event.raw_payload.contains(&format!(r#""seq":{i}"#)),
            "event {i} out of order: {}",
            event.raw_payload
        );
    }

    server.await.unwrap();
}

// =============================================================================
// Generation Safety
// =============================================================================

#[tokio::test]
async fn superseded_loop_exits_without_touching_state() {
    let (listener, ws_base) = bind_server().await;

    // The server holds the connection open silently; the loop only cycles
    // on its receive timeout.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        // Keep the socket alive until the test is done.
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(ws);
    });

    let registry = Arc::new(StreamRegistry::new());
    let descriptor = market_descriptor(OutputFormat::RawText);
    let stream_id = registry.register(descriptor.clone());

    let socket_loop = make_loop(&registry, &descriptor, &ws_base, 5, 1);
    let handle = tokio::spawn(socket_loop.run());

    // Wait until the loop has connected.
    timeout(Duration::from_secs(5), async {
        while registry.lifecycle(stream_id) != Some(LifecycleState::Running) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("loop should connect");

    let buffered_before = registry.buffered_events(stream_id);

    // Mint a newer generation: the running instance is now stale.
    registry.next_generation(stream_id).unwrap();

    let outcome = timeout(Duration::from_secs(5), handle)
        .await
        .expect("superseded loop should exit within one iteration")
        .unwrap();

    assert_eq!(outcome, LoopOutcome::Superseded);
    // Zero further state mutations: still Running (set by the loop before
    // it was superseded), no crash, no restart request, no new events.
    assert_eq!(registry.lifecycle(stream_id), Some(LifecycleState::Running));
    assert!(!registry.restart_requested(stream_id));
    assert!(registry.crash_reason(stream_id).is_none());
    assert_eq!(registry.buffered_events(stream_id), buffered_before);

    server.abort();
}

// =============================================================================
// Outbound Pacing
// =============================================================================

#[tokio::test]
async fn queued_payloads_are_paced_below_the_cap() {
    let (listener, ws_base) = bind_server().await;

    const PAYLOADS: usize = 10;
    let (times_tx, mut times_rx) = tokio::sync::mpsc::unbounded_channel::<Duration>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let started = Instant::now();
        let mut seen = 0;
        while seen < PAYLOADS {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    assert!(text.as_str().contains(r#""method":"SUBSCRIBE""#));
                    times_tx.send(started.elapsed()).unwrap();
                    seen += 1;
                }
                Some(Ok(_)) => {}
                other => panic!("server read failed: {other:?}"),
            }
        }
        drop(ws);
    });

    let registry = Arc::new(StreamRegistry::new());
    let descriptor = market_descriptor(OutputFormat::RawText);
    let stream_id = registry.register(descriptor.clone());

    for i in 0..PAYLOADS {
        registry.enqueue_control(
            stream_id,
            binance_stream_manager::ControlRequest::subscribe(
                vec![format!("sym{i}@trade")],
                i as u64,
            ),
        );
    }

    // Cap 5/s with a safety margin of 1: effective 4 sends per second.
    let socket_loop = make_loop(&registry, &descriptor, &ws_base, 5, 1);
    let _ = timeout(Duration::from_secs(15), socket_loop.run())
        .await
        .expect("loop should finish after the server drops");

    server.await.unwrap();

    let mut send_times = Vec::new();
    while let Ok(t) = times_rx.try_recv() {
        send_times.push(t);
    }
    assert_eq!(send_times.len(), PAYLOADS);

    // No more than 4 sends inside the first second (50ms of slack absorbs
    // local receive jitter), and the full burst takes at least the nine
    // pacing intervals the effective rate implies.
    let first = send_times[0];
    let in_first_second = send_times
        .iter()
        .filter(|t| **t < first + Duration::from_millis(950))
        .count();
    assert!(
        in_first_second <= 4,
        "{in_first_second} sends inside the first second"
    );

    let spread = *send_times.last().unwrap() - first;
    assert!(
        spread >= Duration::from_millis(9 * 250 - 100),
        "burst finished too fast: {spread:?}"
    );
}

// =============================================================================
// Cooperative and Idempotent Stop
// =============================================================================

#[tokio::test]
async fn stop_request_is_observed_and_idempotent() {
    let (listener, ws_base) = bind_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Answer the client's close handshake, then finish.
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let registry = Arc::new(StreamRegistry::new());
    let descriptor = market_descriptor(OutputFormat::RawText);
    let stream_id = registry.register(descriptor.clone());

    let socket_loop = make_loop(&registry, &descriptor, &ws_base, 5, 1);
    let handle = tokio::spawn(socket_loop.run());

    timeout(Duration::from_secs(5), async {
        while registry.lifecycle(stream_id) != Some(LifecycleState::Running) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("loop should connect");

    assert!(registry.request_stop(stream_id));
    // A second stop request on an already-stopping stream is a no-op.
    assert!(!registry.request_stop(stream_id));

    let outcome = timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should observe the stop flag within one iteration")
        .unwrap();

    assert_eq!(outcome, LoopOutcome::Normal);
    assert_eq!(registry.lifecycle(stream_id), Some(LifecycleState::Stopped));
    assert!(!registry.restart_requested(stream_id));

    server.await.unwrap();
}

// =============================================================================
// Supervisor Restart
// =============================================================================

#[tokio::test]
async fn supervisor_restarts_crashed_stream_with_new_generation() {
    let (listener, ws_base) = bind_server().await;

    // First connection is dropped immediately; the second stays up.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let registry = Arc::new(StreamRegistry::new());
    let cancel = CancellationToken::new();
    let settings = WebSocketSettings {
        receive_timeout: RECEIVE_TIMEOUT,
        reconnect_delay_initial: Duration::from_millis(50),
        reconnect_delay_max: Duration::from_millis(200),
        max_reconnect_attempts: 0,
        ..WebSocketSettings::default()
    };
    let supervisor = Arc::new(StreamSupervisor::new(
        Arc::clone(&registry),
        None,
        Arc::new(BinanceNormalizer::new()),
        settings,
        EndpointOverrides {
            ws_base: Some(ws_base),
            rest_base: None,
        },
        cancel.clone(),
    ));

    let stream_id = Arc::clone(&supervisor)
        .start_stream(market_descriptor(OutputFormat::RawText))
        .unwrap();

    // The second generation must come up Running after the first crashes.
    timeout(Duration::from_secs(10), async {
        loop {
            let running = registry.lifecycle(stream_id) == Some(LifecycleState::Running);
            let regenerated = registry.current_generation(stream_id) == Some(2);
            if running && regenerated {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("supervisor should restart the stream on a fresh generation");

    assert!(supervisor.stop_stream(stream_id).await);
    timeout(Duration::from_secs(5), async {
        while registry.lifecycle(stream_id) != Some(LifecycleState::Stopped) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stream should stop cleanly");

    server.await.unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn crash_request_forces_reconnect() {
    let (listener, ws_base) = bind_server().await;

    let server = tokio::spawn(async move {
        // Serve two connections; both held open until the client acts.
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        }
    });

    let registry = Arc::new(StreamRegistry::new());
    let cancel = CancellationToken::new();
    let settings = WebSocketSettings {
        receive_timeout: RECEIVE_TIMEOUT,
        reconnect_delay_initial: Duration::from_millis(50),
        ..WebSocketSettings::default()
    };
    let supervisor = Arc::new(StreamSupervisor::new(
        Arc::clone(&registry),
        None,
        Arc::new(BinanceNormalizer::new()),
        settings,
        EndpointOverrides {
            ws_base: Some(ws_base),
            rest_base: None,
        },
        cancel.clone(),
    ));

    let stream_id = Arc::clone(&supervisor)
        .start_stream(market_descriptor(OutputFormat::RawText))
        .unwrap();

    timeout(Duration::from_secs(5), async {
        while registry.lifecycle(stream_id) != Some(LifecycleState::Running) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stream should connect");

    // Force a crash-and-restart of the healthy connection.
    assert!(registry.request_crash(stream_id));

    timeout(Duration::from_secs(10), async {
        loop {
            let running = registry.lifecycle(stream_id) == Some(LifecycleState::Running);
            let regenerated = registry.current_generation(stream_id) == Some(2);
            if running && regenerated {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stream should reconnect after the forced crash");

    supervisor.stop_stream(stream_id).await;
    let _ = timeout(Duration::from_secs(5), server).await;
    cancel.cancel();
}
