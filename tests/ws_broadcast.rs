//! End-to-end tests: real file, real server, real WebSocket clients.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use logcast::error::{Error, TailError};
use logcast::{Config, Running};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn test_config(file: PathBuf) -> Config {
    let mut config = Config::new(file);
    config.addr = "127.0.0.1:0".parse().unwrap();
    config.tail.poll_interval = Duration::from_millis(10);
    config
}

async fn start(dir: &TempDir) -> (Running, PathBuf) {
    let path = dir.path().join("app.log");
    std::fs::File::create(&path).unwrap();
    let running = logcast::start(test_config(path.clone())).await.unwrap();
    (running, path)
}

fn append_line(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .unwrap();
    writeln!(file, "{line}").unwrap();
}

async fn connect(running: &Running) -> Client {
    let url = format!("ws://{}/logs", running.local_addr());
    let (client, _) = connect_async(url).await.expect("WebSocket connect");
    client
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_clients(running: &Running, count: usize) {
    wait_until(|| running.registry().len() == count).await;
}

async fn next_text(client: &mut Client) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            let message = client
                .next()
                .await
                .expect("stream ended")
                .expect("read error");
            if message.is_text() {
                return message.to_text().unwrap().to_string();
            }
        }
    })
    .await
    .expect("timed out waiting for a line")
}

#[tokio::test]
async fn test_subscriber_receives_lines_in_order() {
    let dir = TempDir::new().unwrap();
    let (running, path) = start(&dir).await;

    let mut client = connect(&running).await;
    wait_for_clients(&running, 1).await;

    append_line(&path, "hello");
    append_line(&path, "world");

    assert_eq!(next_text(&mut client).await, "hello");
    assert_eq!(next_text(&mut client).await, "world");

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnected_subscriber_stops_receiving() {
    let dir = TempDir::new().unwrap();
    let (running, path) = start(&dir).await;

    let mut first = connect(&running).await;
    let mut second = connect(&running).await;
    wait_for_clients(&running, 2).await;

    append_line(&path, "x");
    assert_eq!(next_text(&mut first).await, "x");
    assert_eq!(next_text(&mut second).await, "x");

    first.close(None).await.unwrap();
    wait_for_clients(&running, 1).await;

    append_line(&path, "y");
    assert_eq!(next_text(&mut second).await, "y");
    assert_eq!(running.registry().len(), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_late_subscriber_gets_no_backfill() {
    let dir = TempDir::new().unwrap();
    let (running, path) = start(&dir).await;

    append_line(&path, "before");
    wait_until(|| running.lines_broadcast() == 1).await;

    let mut client = connect(&running).await;
    wait_for_clients(&running, 1).await;
    append_line(&path, "after");

    assert_eq!(next_text(&mut client).await, "after");

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inbound_frames_are_ignored() {
    let dir = TempDir::new().unwrap();
    let (running, path) = start(&dir).await;

    let mut client = connect(&running).await;
    wait_for_clients(&running, 1).await;

    client.send("ignored".into()).await.unwrap();
    append_line(&path, "still here");

    assert_eq!(next_text(&mut client).await, "still here");
    assert_eq!(running.registry().len(), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_plain_http_request_is_rejected_and_serving_continues() {
    let dir = TempDir::new().unwrap();
    let (running, path) = start(&dir).await;

    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /logs HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut response))
        .await
        .expect("no response to plain request")
        .unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 4"), "unexpected response: {response}");
    assert!(running.registry().is_empty());

    let mut client = connect(&running).await;
    wait_for_clients(&running, 1).await;
    append_line(&path, "after rejection");
    assert_eq!(next_text(&mut client).await, "after rejection");

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_subscribers() {
    let dir = TempDir::new().unwrap();
    let (running, _path) = start(&dir).await;

    let mut client = connect(&running).await;
    wait_for_clients(&running, 1).await;

    let registry = running.registry().clone();
    tokio::time::timeout(WAIT, running.shutdown())
        .await
        .expect("shutdown did not finish")
        .unwrap();
    assert!(registry.is_empty());

    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) => break,
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "client was not disconnected");
}

#[tokio::test]
async fn test_missing_file_fails_startup() {
    let dir = TempDir::new().unwrap();
    let result = logcast::start(test_config(dir.path().join("missing.log"))).await;

    assert!(matches!(result, Err(Error::Tail(TailError::Open { .. }))));
}
