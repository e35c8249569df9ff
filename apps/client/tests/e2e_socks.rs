//! End-to-end: SOCKS5 CONNECT through the overlay to an echo server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bethrou_client::ProxyDriver;
use bethrou_config::NodeDescriptor;
use bethrou_host::{Host, NodeHostConfig};
use bethrou_proxy::{Client, Pool, PoolStrategy, Server as ExitServer};
use bethrou_socks::Server as SocksServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const KEY: &str = "/key/swarm/psk/1.0.0/\n/base16/\nb014416087025d9e34862cedb87468f2a2e0b24788467ecd4d1b4005d9d5211d\n";

fn write_key(dir: &Path) -> PathBuf {
    let path = dir.join("network.key");
    std::fs::write(&path, KEY).unwrap();
    path
}

async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn socks_connect_relays_through_the_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = write_key(dir.path());

    // Exit node.
    let node = Host::node(NodeHostConfig {
        listen_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
        keypair: bethrou_identity::generate(),
        relay_mode: false,
        connect_relay: None,
        key_path: key_path.clone(),
    })
    .await
    .unwrap();
    let _exit = ExitServer::new(node.clone()).unwrap();

    // Wait for the node's listen address.
    let mut node_addr = None;
    for _ in 0..50 {
        node_addr = node
            .addrs()
            .await
            .into_iter()
            .find(|a| a.to_string().starts_with("/ip4/127.0.0.1"));
        if node_addr.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let node_addr = node_addr.expect("node never reported a listen address");

    // Client side: host, pool, dialer.
    let client_host = Host::client(&key_path).await.unwrap();
    let pool = Arc::new(Pool::new(PoolStrategy::Random));
    let client = Client::new(client_host.clone(), pool);

    let descriptor = NodeDescriptor {
        id: node.peer_id().to_string(),
        addrs: vec![format!("{node_addr}/p2p/{}", node.peer_id())],
        relay: None,
    };
    tokio::time::timeout(Duration::from_secs(20), client.connect(&[descriptor]))
        .await
        .expect("connect timed out")
        .expect("connect failed");

    // Local SOCKS5 listener backed by the overlay driver.
    let socks = SocksServer::new(Arc::new(ProxyDriver::new(client)), "127.0.0.1:0")
        .bind()
        .await
        .unwrap();
    let socks_addr = socks.local_addr().unwrap();

    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = socks.serve(serve_cancel).await;
    });

    let echo = spawn_echo_server().await;

    // Raw SOCKS5 CONNECT.
    let mut stream = TcpStream::connect(socks_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&echo.port().to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    tokio::time::timeout(Duration::from_secs(10), stream.read_exact(&mut reply))
        .await
        .expect("CONNECT reply timed out")
        .unwrap();
    assert_eq!(reply[1], 0x00, "CONNECT should succeed");

    stream.write_all(b"ping\n").await.unwrap();
    let mut echoed = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(10), stream.read_exact(&mut echoed))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(&echoed, b"ping\n");

    cancel.cancel();
    client_host.close();
    node.close();
}
