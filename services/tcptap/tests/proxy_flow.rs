//! End-to-end proxy tests with real filter subprocesses.


use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use harness::{spawn_proxy, SlammingBackend, TcpEchoBackend};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn hello_roundtrip_through_identity_filters() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = spawn_proxy(backend.addr, "cat", "cat").await.unwrap();

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(b"hello\n").await.unwrap();

    let mut buf = [0u8; 6];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hello\n");

    assert_eq!(backend.connection_count(), 1);
    assert_eq!(backend.bytes_received.load(Ordering::Relaxed), 6);
}

#[tokio::test]
async fn large_transfer_preserves_bytes_and_order() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = spawn_proxy(backend.addr, "cat", "cat").await.unwrap();

    let payload: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let client = TcpStream::connect(proxy.addr).await.unwrap();
    let (mut rd, mut wr) = client.into_split();

    let write = async move {
        wr.write_all(&payload).await.unwrap();
        wr
    };
    let read = async move {
        let mut got = vec![0u8; expected.len()];
        rd.read_exact(&mut got).await.unwrap();
        (got, expected)
    };

    let (_wr, (got, expected)) = timeout(WAIT, async { tokio::join!(write, read) })
        .await
        .unwrap();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn in_filter_rewrites_upstream_traffic() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    // sed -u keeps the rewrite streaming, no buffering until EOF.
    let proxy = spawn_proxy(backend.addr, "sed -u s/hello/HELLO/", "cat")
        .await
        .unwrap();

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(b"hello\n").await.unwrap();

    let mut buf = [0u8; 6];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"HELLO\n");
}

#[tokio::test]
async fn out_filter_rewrites_downstream_traffic() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = spawn_proxy(backend.addr, "cat", "sed -u s/ping/pong/")
        .await
        .unwrap();

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(b"ping\n").await.unwrap();

    let mut buf = [0u8; 5];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"pong\n");
}

#[tokio::test]
async fn server_disconnect_drains_and_closes_client() {
    let backend = SlammingBackend::spawn().await.unwrap();
    let proxy = spawn_proxy(backend.addr, "cat", "cat").await.unwrap();

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    let _ = client.write_all(b"ping\n").await;

    // Server side slams shut -> inner pair dies -> out-filter stdin closes
    // -> cat exits -> hop 3 reaches EOF -> the client sees a clean close.
    let mut buf = [0u8; 64];
    let n = loop {
        match timeout(WAIT, client.read(&mut buf)).await.unwrap() {
            Ok(0) => break 0,
            Ok(_) => continue,
            Err(_) => break 0,
        }
    };
    assert_eq!(n, 0);
}

#[tokio::test]
async fn concurrent_connections_are_isolated() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = spawn_proxy(backend.addr, "cat", "cat").await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..4u8 {
        let addr = proxy.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let msg = format!("client {i}\n");
            client.write_all(msg.as_bytes()).await.unwrap();

            let mut buf = vec![0u8; msg.len()];
            timeout(WAIT, client.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(buf, msg.as_bytes());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(backend.connection_count(), 4);
}

#[tokio::test]
async fn client_disconnect_tears_the_connection_down() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let proxy = spawn_proxy(backend.addr, "cat", "cat").await.unwrap();

    {
        let mut client = TcpStream::connect(proxy.addr).await.unwrap();
        client.write_all(b"bye\n").await.unwrap();
        let mut buf = [0u8; 4];
        timeout(WAIT, client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
    }

    // The proxy keeps serving new connections afterwards.
    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(b"again\n").await.unwrap();
    let mut buf = [0u8; 6];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"again\n");
}
