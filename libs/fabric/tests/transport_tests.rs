use futures::StreamExt;
use hostlink_core::Envelope;
use hostlink_fabric::{
    channel::Channel,
    codec::{BincodeCodec, Codec},
    error::Error,
    transport::{
        MemoryTransport, TcpTransport, TcpTransportListener, Transport, TransportListener,
        UnixTransport, UnixTransportListener,
    },
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Helper to get a free port
async fn get_listener() -> (TcpTransportListener, std::net::SocketAddr) {
    let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[tokio::test]
async fn tcp_send_receive_single_message() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut transport, _addr) = listener.accept().await.unwrap();
        let received = transport.receive().await.unwrap();
        transport.send(&received).await.unwrap(); // Echo back
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();
    let msg = b"hello world";
    client.send(msg).await.unwrap();
    let response = client.receive().await.unwrap();

    assert_eq!(response, msg);
}

#[tokio::test]
async fn tcp_multiple_messages_preserve_boundaries() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut transport, _addr) = listener.accept().await.unwrap();
        for _ in 0..3 {
            let msg = transport.receive().await.unwrap();
            transport.send(&msg).await.unwrap();
        }
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();
    let messages = vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()];

    for msg in &messages {
        client.send(msg).await.unwrap();
        let response = client.receive().await.unwrap();
        assert_eq!(&response, msg);
    }
}

#[tokio::test]
async fn tcp_receive_timeout_fires() {
    let (listener, addr) = get_listener().await;

    // Server that never responds
    tokio::spawn(async move {
        let (_transport, _addr) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut client = TcpTransport::builder()
        .address(addr)
        .receive_timeout(Some(Duration::from_millis(100)))
        .connect()
        .await
        .unwrap();

    client.send(b"hello").await.unwrap();

    match client.receive().await {
        Err(Error::Custom(msg)) => assert!(msg.contains("timeout")),
        other => panic!("Expected timeout error, got {:?}", other),
    }
}

#[tokio::test]
async fn tcp_rejects_oversized_frame() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    // Server that sends a frame header claiming 200MB
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_u32(200 * 1024 * 1024).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();

    match client.receive().await {
        Err(Error::InvalidFrame(msg)) => assert!(msg.contains("too large")),
        other => panic!("Expected InvalidFrame error, got {:?}", other),
    }
}

#[tokio::test]
async fn connection_closed_error() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut transport, _addr) = listener.accept().await.unwrap();
        transport.close().await.unwrap();
    });

    let mut client = TcpTransport::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    match client.receive().await {
        Err(Error::ConnectionClosed) => {}
        other => panic!("Expected ConnectionClosed, got {:?}", other),
    }
}

#[tokio::test]
async fn transport_listener_trait_usage() {
    let (mut listener, addr) = get_listener().await;

    async fn accept_generic<L: TransportListener>(listener: &L) -> Result<L::Transport, Error> {
        listener.accept().await
    }

    tokio::spawn(async move {
        let mut client = TcpTransport::connect(addr).await.unwrap();
        client.send(b"test").await.unwrap();
    });

    let mut transport = accept_generic(&listener).await.unwrap();
    let msg = transport.receive().await.unwrap();
    assert_eq!(msg, b"test");

    TransportListener::close(&mut listener).await.unwrap();
}

#[tokio::test]
async fn split_halves_work_concurrently() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut transport, _addr) = listener.accept().await.unwrap();
        for _ in 0..2 {
            let msg = transport.receive().await.unwrap();
            transport.send(&msg).await.unwrap();
        }
    });

    let client = TcpTransport::connect(addr).await.unwrap();
    let (mut reader, mut writer) = Box::new(client).into_split();

    let read_task = tokio::spawn(async move {
        let a = reader.receive().await.unwrap();
        let b = reader.receive().await.unwrap();
        (a, b)
    });

    writer.send(b"ping").await.unwrap();
    writer.send(b"pong").await.unwrap();

    let (a, b) = read_task.await.unwrap();
    assert_eq!(a, b"ping");
    assert_eq!(b, b"pong");
}

// Channel tests

#[tokio::test]
async fn channel_delivers_envelopes_in_order() {
    let (client_side, mut hub_side) = MemoryTransport::pair();
    let channel = Channel::from_transport(client_side, BincodeCodec);
    let mut inbound = channel.receive().unwrap();

    let first = Envelope::new("hostsvc-sensor", "app-test", "SensorData", vec![1]);
    let second = Envelope::new("hostsvc-sensor", "app-test", "SensorData", vec![2]);
    for envelope in [&first, &second] {
        let bytes = BincodeCodec.encode(envelope).unwrap();
        hub_side.send(&bytes).await.unwrap();
    }

    assert_eq!(inbound.next().await.unwrap().unwrap(), first);
    assert_eq!(inbound.next().await.unwrap().unwrap(), second);
}

#[tokio::test]
async fn channel_send_reaches_peer() {
    let (client_side, mut hub_side) = MemoryTransport::pair();
    let channel = Channel::from_transport(client_side, BincodeCodec);

    let envelope = Envelope::new("app-test", "hostsvc-link", "LinkSend", b"data".to_vec());
    channel.send(&envelope).await.unwrap();

    let bytes = hub_side.receive().await.unwrap();
    let received: Envelope = BincodeCodec.decode(&bytes).unwrap();
    assert_eq!(received, envelope);
}

#[tokio::test]
async fn channel_writes_whole_frames_when_sender_gives_up() {
    let (client_side, mut hub_side) = MemoryTransport::pair();
    let channel = Channel::from_transport(client_side, BincodeCodec);

    let large = Envelope::new("app-test", "hostsvc-link", "LinkSend", vec![1; 256 * 1024]);
    let gave_up = tokio::time::timeout(Duration::from_millis(20), channel.send(&large)).await;
    assert!(gave_up.is_err());

    let small = Envelope::new("app-test", "hostsvc-link", "LinkSend", b"next".to_vec());
    let (sent, received) = tokio::join!(channel.send(&small), async {
        let first: Envelope = BincodeCodec.decode(&hub_side.receive().await.unwrap()).unwrap();
        let second: Envelope = BincodeCodec.decode(&hub_side.receive().await.unwrap()).unwrap();
        (first, second)
    });

    sent.unwrap();
    assert_eq!(received.0, large);
    assert_eq!(received.1, small);
}

#[tokio::test]
async fn channel_inbound_stream_can_only_be_taken_once() {
    let (client_side, _hub_side) = MemoryTransport::pair();
    let channel = Channel::from_transport(client_side, BincodeCodec);

    assert!(channel.receive().is_ok());
    assert!(matches!(channel.receive(), Err(Error::Custom(_))));
}

#[tokio::test]
async fn channel_skips_undecodable_frames() {
    let (client_side, mut hub_side) = MemoryTransport::pair();
    let channel = Channel::from_transport(client_side, BincodeCodec);
    let mut inbound = channel.receive().unwrap();

    hub_side.send(b"\xff\xff garbage").await.unwrap();
    let envelope = Envelope::new("hostsvc-sensor", "app-test", "SensorData", vec![7]);
    hub_side
        .send(&BincodeCodec.encode(&envelope).unwrap())
        .await
        .unwrap();

    assert_eq!(inbound.next().await.unwrap().unwrap(), envelope);
}

#[tokio::test]
async fn channel_surfaces_stream_end_as_transport_error() {
    let (client_side, hub_side) = MemoryTransport::pair();
    let channel = Channel::from_transport(client_side, BincodeCodec);
    let mut inbound = channel.receive().unwrap();

    drop(hub_side);

    match inbound.next().await {
        Some(Err(Error::Transport(_))) => {}
        other => panic!("Expected Transport error, got {:?}", other),
    }
    assert!(inbound.next().await.is_none());
}

// Unix Socket Tests

#[tokio::test]
async fn unix_send_receive_single_message() {
    let socket_path = "/tmp/hostlink_test_unix_single.sock";
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixTransportListener::bind(socket_path).await.unwrap();

    tokio::spawn(async move {
        let mut transport = listener.accept().await.unwrap();
        let received = transport.receive().await.unwrap();
        transport.send(&received).await.unwrap(); // Echo back
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = UnixTransport::connect(socket_path).await.unwrap();
    let msg = b"hello unix";
    client.send(msg).await.unwrap();
    let response = client.receive().await.unwrap();

    assert_eq!(response, msg);

    let _ = std::fs::remove_file(socket_path);
}

#[tokio::test]
async fn unix_listener_cleans_up_socket() {
    let socket_path = "/tmp/hostlink_test_unix_cleanup.sock";
    let _ = std::fs::remove_file(socket_path);

    {
        let mut listener = UnixTransportListener::bind(socket_path).await.unwrap();
        assert!(std::path::Path::new(socket_path).exists());

        listener.close().await.unwrap();
    }

    assert!(!std::path::Path::new(socket_path).exists());
}
