//! Connection-level wire tests against a loopback mock broker:
//! negotiation observables, per-version ACK/NACK shapes, subscription
//! preconditions, transactions, disconnect and the closed-check guard.

mod support;

use std::sync::Arc;

use stomp_core::{Config, Connection, StompError, Version};
use support::*;

// ============================================================================
// CONNECT negotiation
// ============================================================================

#[tokio::test]
async fn stomp_12_negotiation_sets_observables() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        accept_and_connect(
            &listener,
            "CONNECTED\nversion:1.2\nsession:S-1\nheart-beat:0,20000\n\n\0",
        )
        .await
    });

    let config = config_for(addr)
        .with_stompconn(true)
        .with_connect_header("host", "mq")
        .with_connect_header("heart-beat", "10000,10000");
    let conn = Connection::open(config).await.unwrap();
    let (_stream, connect) = broker.await.unwrap();

    assert_eq!(
        connect,
        "STOMP\naccept-version:1.0,1.1,1.2\nhost:mq\nlogin:u\npasscode:p\nheart-beat:10000,10000\n\n"
    );
    assert_eq!(conn.protocol(), Version::V1_2);
    assert_eq!(conn.session().as_deref(), Some("S-1"));
    // send side: max(10000, 20000); receive side: disabled because sx = 0
    assert_eq!(
        conn.hbsend_interval(),
        Some(std::time::Duration::from_millis(20_000))
    );
    assert_eq!(conn.hbrecv_interval(), None);
    assert!(conn.is_open());
    assert!(conn
        .connection_frame()
        .is_some_and(|f| f.command == "CONNECTED"));
}

#[tokio::test]
async fn broker_error_during_connect_surfaces_headers_and_body() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_frame(&mut stream).await;
        send_raw(&mut stream, b"ERROR\nmessage:bad credentials\n\ndenied\0").await;
        // hold the socket open so the client sees the reply, not EOF
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    match Connection::open(config_for(addr)).await {
        Err(StompError::Broker { message, body, .. }) => {
            assert_eq!(message, "bad credentials");
            assert_eq!(body, b"denied");
        }
        other => panic!("expected broker error, got {:?}", other.map(|_| ())),
    }
}

// ============================================================================
// ACK / NACK header shapes per version
// ============================================================================

#[tokio::test]
async fn ack_12_uses_the_ack_id() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        read_frame(&mut stream).await.unwrap()
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    conn.ack("a-7", Vec::new()).await.unwrap();

    assert_eq!(broker.await.unwrap(), "ACK\nid:a-7\n\n");
}

#[tokio::test]
async fn ack_11_without_subscription_writes_nothing() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_11).await;
        read_frame(&mut stream).await.unwrap()
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    assert!(matches!(
        conn.ack("m-3", Vec::new()).await,
        Err(StompError::SubscriptionRequired)
    ));

    // the next frame on the wire is this BEGIN: the failed ack emitted
    // nothing
    conn.begin("tx-guard", Vec::new()).await.unwrap();
    assert_eq!(broker.await.unwrap(), "BEGIN\ntransaction:tx-guard\n\n");
}

#[tokio::test]
async fn ack_11_carries_message_id_and_subscription() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_11).await;
        read_frame(&mut stream).await.unwrap()
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    conn.ack(
        "m-3",
        vec![("subscription".to_string(), "sub-1".to_string())],
    )
    .await
    .unwrap();

    assert_eq!(
        broker.await.unwrap(),
        "ACK\nmessage-id:m-3\nsubscription:sub-1\n\n"
    );
}

#[tokio::test]
async fn ack_10_uses_message_id_and_nack_is_unsupported() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_10).await;
        read_frame(&mut stream).await.unwrap()
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    assert_eq!(conn.protocol(), Version::V1_0);

    assert!(matches!(
        conn.nack("m-1", Vec::new()).await,
        Err(StompError::UnsupportedProtocol(Version::V1_0))
    ));

    conn.ack("m-1", Vec::new()).await.unwrap();
    assert_eq!(broker.await.unwrap(), "ACK\nmessage-id:m-1\n\n");
}

#[tokio::test]
async fn nack_12_uses_the_ack_id() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        read_frame(&mut stream).await.unwrap()
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    conn.nack("a-9", Vec::new()).await.unwrap();
    assert_eq!(broker.await.unwrap(), "NACK\nid:a-9\n\n");
}

#[tokio::test]
async fn empty_message_id_is_rejected() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move { accept_and_connect(&listener, CONNECTED_12).await });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    assert!(matches!(
        conn.ack("", Vec::new()).await,
        Err(StompError::MessageIdRequired("ACK"))
    ));
}

// ============================================================================
// SUBSCRIBE preconditions
// ============================================================================

#[tokio::test]
async fn subscribe_without_id_fails_under_11() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move { accept_and_connect(&listener, CONNECTED_11).await });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    assert!(matches!(
        conn.subscribe("/queue/x", Vec::new(), None).await,
        Err(StompError::SubscriptionRequired)
    ));
}

#[tokio::test]
async fn subscribe_without_id_allowed_under_10() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_10).await;
        read_frame(&mut stream).await.unwrap()
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    conn.subscribe("/queue/x", Vec::new(), None).await.unwrap();
    assert_eq!(broker.await.unwrap(), "SUBSCRIBE\ndestination:/queue/x\n\n");
}

#[tokio::test]
async fn duplicate_subscription_rejected_in_reliable_mode() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        read_frame(&mut stream).await;
        // park so the transport stays up for the duration of the test
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    });

    let conn = Connection::open(config_for(addr).with_reliable(true))
        .await
        .unwrap();
    conn.subscribe("/queue/a", Vec::new(), Some("s1"))
        .await
        .unwrap();
    match conn.subscribe("/queue/b", Vec::new(), Some("s1")).await {
        Err(StompError::DuplicateSubscription(id)) => assert_eq!(id, "s1"),
        other => panic!("expected duplicate subscription, got {:?}", other),
    }
}

#[tokio::test]
async fn unsubscribe_removes_the_stored_subscription() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.push(read_frame(&mut stream).await.unwrap());
        }
        frames
    });

    let conn = Connection::open(config_for(addr).with_reliable(true))
        .await
        .unwrap();
    conn.subscribe("/queue/a", Vec::new(), Some("s1"))
        .await
        .unwrap();
    conn.unsubscribe("/queue/a", Vec::new(), Some("s1"))
        .await
        .unwrap();
    // the id is free again
    conn.subscribe("/queue/a", Vec::new(), Some("s1"))
        .await
        .unwrap();

    let frames = broker.await.unwrap();
    assert_eq!(frames[0], "SUBSCRIBE\ndestination:/queue/a\nid:s1\n\n");
    assert_eq!(frames[1], "UNSUBSCRIBE\ndestination:/queue/a\nid:s1\n\n");
    assert_eq!(frames[2], "SUBSCRIBE\ndestination:/queue/a\nid:s1\n\n");
}

// ============================================================================
// SEND, transactions, RECEIPT, closed-check
// ============================================================================

#[tokio::test]
async fn publish_injects_destination_and_content_length() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        read_frame(&mut stream).await.unwrap()
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    conn.publish(
        "/queue/test",
        b"hello".to_vec(),
        vec![("custom".to_string(), "1".to_string())],
    )
    .await
    .unwrap();

    assert_eq!(
        broker.await.unwrap(),
        "SEND\ndestination:/queue/test\ncustom:1\ncontent-length:5\n\nhello"
    );
}

#[tokio::test]
async fn transaction_trio_emits_transaction_header() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.push(read_frame(&mut stream).await.unwrap());
        }
        frames
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    conn.begin("tx1", Vec::new()).await.unwrap();
    conn.commit("tx1", Vec::new()).await.unwrap();
    conn.begin("tx2", Vec::new()).await.unwrap();

    let frames = broker.await.unwrap();
    assert_eq!(frames[0], "BEGIN\ntransaction:tx1\n\n");
    assert_eq!(frames[1], "COMMIT\ntransaction:tx1\n\n");
    assert_eq!(frames[2], "BEGIN\ntransaction:tx2\n\n");
}

#[tokio::test]
async fn receive_returns_broker_frames() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        send_raw(
            &mut stream,
            b"MESSAGE\ndestination:/queue/a\nmessage-id:m-5\nsubscription:s1\n\npayload\0",
        )
        .await;
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    let frame = conn.receive().await.unwrap();
    assert_eq!(frame.command, "MESSAGE");
    assert_eq!(frame.get_header("message-id"), Some("m-5"));
    assert_eq!(frame.body, b"payload");
}

#[tokio::test]
async fn poll_returns_none_when_idle() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        send_raw(&mut stream, b"RECEIPT\nreceipt-id:r-2\n\n\0").await;
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    assert!(conn.poll().await.unwrap().is_none());

    // once bytes are on the wire, poll picks the frame up
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    let frame = conn.poll().await.unwrap().expect("frame should be ready");
    assert_eq!(frame.command, "RECEIPT");
}

#[tokio::test]
async fn disconnect_with_receipt_stores_the_receipt() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        let disconnect = read_frame(&mut stream).await.unwrap();
        send_raw(&mut stream, b"RECEIPT\nreceipt-id:r-1\n\n\0").await;
        disconnect
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    conn.disconnect(vec![("receipt".to_string(), "r-1".to_string())])
        .await
        .unwrap();

    assert_eq!(broker.await.unwrap(), "DISCONNECT\nreceipt:r-1\n\n");
    let receipt = conn.disconnect_receipt().expect("receipt stored");
    assert_eq!(receipt.get_header("receipt-id"), Some("r-1"));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn operations_fail_after_disconnect() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        read_frame(&mut stream).await;
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    conn.disconnect(Vec::new()).await.unwrap();

    assert!(conn.is_closed());
    assert!(matches!(
        conn.publish("/queue/x", b"x".to_vec(), Vec::new()).await,
        Err(StompError::NoCurrentConnection)
    ));
    assert!(matches!(
        conn.receive().await,
        Err(StompError::NoCurrentConnection)
    ));
    assert!(matches!(
        conn.disconnect(Vec::new()).await,
        Err(StompError::NoCurrentConnection)
    ));
}

#[tokio::test]
async fn listener_sees_lifecycle_events() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        connected: AtomicUsize,
        published: AtomicUsize,
        disconnected: AtomicUsize,
    }
    impl stomp_core::ConnectionListener for Counting {
        fn on_connected(&self, _session: Option<&str>) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
        fn on_publish(&self, _headers: &[(String, String)]) {
            self.published.fetch_add(1, Ordering::SeqCst);
        }
        fn on_disconnect(&self) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        read_frame(&mut stream).await;
        read_frame(&mut stream).await;
    });

    let events = Arc::new(Counting::default());
    let conn = Connection::open_with_listener(config_for(addr), events.clone())
        .await
        .unwrap();
    conn.publish("/queue/x", b"x".to_vec(), Vec::new())
        .await
        .unwrap();
    conn.disconnect(Vec::new()).await.unwrap();

    assert_eq!(events.connected.load(Ordering::SeqCst), 1);
    assert_eq!(events.published.load(Ordering::SeqCst), 1);
    assert_eq!(events.disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_listener_is_suppressed() {
    struct Grumpy;
    impl stomp_core::ConnectionListener for Grumpy {
        fn on_publish(&self, _headers: &[(String, String)]) {
            panic!("listener bug");
        }
        fn on_hbfire(&self) {
            panic!("listener bug");
        }
    }

    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(
            &listener,
            "CONNECTED\nversion:1.2\nheart-beat:0,100\n\n\0",
        )
        .await;
        let send = read_frame(&mut stream).await.unwrap();
        let pulses = count_heartbeats(&mut stream, std::time::Duration::from_millis(450)).await;
        (send, pulses)
    });

    let config = config_for(addr).with_connect_header("heart-beat", "100,0");
    let conn = Connection::open_with_listener(config, Arc::new(Grumpy))
        .await
        .unwrap();

    // on_publish panics; the publish itself must still go through
    conn.publish("/queue/x", b"ok".to_vec(), Vec::new())
        .await
        .unwrap();

    let (send, pulses) = broker.await.unwrap();
    assert!(send.starts_with("SEND\ndestination:/queue/x\n"));
    // on_hbfire panics on every pulse; the sender task must keep ticking
    assert!(
        pulses >= 2,
        "heartbeats must survive a panicking listener, saw {}",
        pulses
    );
    assert!(conn.hbsend_count() >= 2);
}

#[tokio::test]
async fn concurrent_senders_never_interleave_frames() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_and_connect(&listener, CONNECTED_12).await;
        let mut frames = Vec::new();
        for _ in 0..40 {
            frames.push(read_frame(&mut stream).await.unwrap());
        }
        frames
    });

    let conn = Connection::open(config_for(addr)).await.unwrap();
    let a = conn.clone();
    let b = conn.clone();
    let writer_a = tokio::spawn(async move {
        for i in 0..20 {
            a.publish("/queue/a", format!("payload-a-{}", i).into_bytes(), Vec::new())
                .await
                .unwrap();
        }
    });
    let writer_b = tokio::spawn(async move {
        for i in 0..20 {
            b.publish("/queue/b", format!("payload-b-{}", i).into_bytes(), Vec::new())
                .await
                .unwrap();
        }
    });
    writer_a.await.unwrap();
    writer_b.await.unwrap();

    let frames = broker.await.unwrap();
    assert_eq!(frames.len(), 40);
    let mut a_count = 0;
    let mut b_count = 0;
    for frame in &frames {
        // every frame is whole: command, its own destination, and the body
        // tagged for that destination
        if let Some(rest) = frame.strip_prefix("SEND\ndestination:/queue/a\n") {
            assert!(rest.contains("\n\npayload-a-"), "mangled frame: {:?}", frame);
            a_count += 1;
        } else if let Some(rest) = frame.strip_prefix("SEND\ndestination:/queue/b\n") {
            assert!(rest.contains("\n\npayload-b-"), "mangled frame: {:?}", frame);
            b_count += 1;
        } else {
            panic!("byte-interleaved frame on the wire: {:?}", frame);
        }
    }
    assert_eq!(a_count, 20);
    assert_eq!(b_count, 20);
}

#[tokio::test]
async fn config_requires_hosts() {
    match Connection::open(Config::new(Vec::new())).await {
        Err(StompError::Protocol(msg)) => assert!(msg.contains("no hosts")),
        other => panic!("expected protocol error, got {:?}", other.map(|_| ())),
    }
}
