// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! End-to-end tests over real TCP: lifecycle, streaming endpoints and the
//! access log, driven by a raw HTTP/1.1 client.

use async_trait::async_trait;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use std::sync::Arc;
use std::time::Duration;

use varco::{
    Action,
    ActionValue,
    Engine,
    Event,
    ListeningHost,
    ListeningPrefix,
    LogStream,
    Message,
    Method,
    MethodSet,
    RequestContext,
    Route,
    Router,
    Server,
    Settings,
};

use varco_web_sockets::frame::{read_frame, write_masked_frame, Frame, OpCode};

struct Hello;

#[async_trait]
impl Action for Hello {
    async fn invoke(&self, _context: &mut RequestContext<'_>) -> Result<ActionValue, anyhow::Error> {
        Ok(Box::new("Hello, world!"))
    }
}

struct Ticker;

#[async_trait]
impl Action for Ticker {
    async fn invoke(&self, context: &mut RequestContext<'_>) -> Result<ActionValue, anyhow::Error> {
        let mut source = context.event_source().await?;
        source.send_data("one").await?;
        source
            .send(Event {
                event: Some("tick"),
                data: "two",
                id: Some("2"),
                retry_ms: None,
            })
            .await?;
        source.ping().await?;
        source.close().await?;
        Ok(Box::new(()))
    }
}

struct EchoSocket;

#[async_trait]
impl Action for EchoSocket {
    async fn invoke(&self, context: &mut RequestContext<'_>) -> Result<ActionValue, anyhow::Error> {
        let mut socket = context.accept_web_socket().await?;
        while let Some(message) = socket.receive_message().await? {
            match message {
                Message::Text(text) => socket.send_text(&format!("echo: {text}")).await?,
                Message::Binary(data) => socket.send_binary(&data).await?,
            }
        }
        Ok(Box::new(()))
    }
}

fn test_router() -> Router {
    let mut router = Router::new();
    router.map(Route::new("hello", MethodSet::single(Method::Get), "/hello", Arc::new(Hello)).unwrap()).unwrap();
    router.map(Route::new("events", MethodSet::single(Method::Get), "/events", Arc::new(Ticker)).unwrap()).unwrap();
    router.map(Route::new("socket", MethodSet::single(Method::Get), "/socket", Arc::new(EchoSocket)).unwrap()).unwrap();
    router
}

async fn start_server(engine: Engine) -> (Server, std::net::SocketAddr) {
    let mut server = Server::new(engine);
    server.add_host(ListeningHost::new(
        "test",
        vec![ListeningPrefix::parse("http://127.0.0.1:0/").unwrap()],
    ));
    server.bind().await.unwrap();
    let addr = server.local_addrs()[0];
    server.start();
    (server, addr)
}

#[tokio::test]
async fn serves_requests_over_tcp() {
    let (mut server, addr) = start_server(Engine::new(test_router(), Settings::default())).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("Hello, world!"));

    server.stop().await;
}

#[tokio::test]
async fn event_stream_frames_arrive_in_order() {
    let (mut server, addr) = start_server(Engine::new(test_router(), Settings::default())).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /events HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: text/event-stream\r\n"));
    assert!(text.contains("Transfer-Encoding: chunked\r\n"));

    // The frames arrive in send order, each inside its own chunk.
    let data_one = text.find("data: one\n\n").expect("first frame missing");
    let tick = text.find("event: tick\nid: 2\ndata: two\n\n").expect("named frame missing");
    let ping = text.find(": ping\n\n").expect("ping comment missing");
    assert!(data_one < tick && tick < ping);
    assert!(text.ends_with("0\r\n\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn web_socket_upgrade_echoes_messages() {
    let (mut server, addr) = start_server(Engine::new(test_router(), Settings::default())).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(
            b"GET /socket HTTP/1.1\r\n\
              Host: h\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    // Read the 101 head up to its terminating blank line.
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        client.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    write_masked_frame(&mut client, &Frame::text("ahoy"), [1, 2, 3, 4]).await.unwrap();
    let reply = read_frame(&mut client, false, 1 << 20).await.unwrap();
    assert_eq!(reply, Frame::text("echo: ahoy"));

    write_masked_frame(&mut client, &Frame::close(1000), [5, 6, 7, 8]).await.unwrap();
    let close_echo = read_frame(&mut client, false, 1 << 20).await.unwrap();
    assert_eq!(close_echo.opcode, OpCode::Close);

    server.stop().await;
}

#[tokio::test]
async fn access_log_records_finished_exchanges() {
    let mut engine = Engine::new(test_router(), Settings::default());
    let access_log = Arc::new(LogStream::new());
    access_log.start_buffering(8);
    engine.access_log = Some(Arc::clone(&access_log));
    engine.access_log_format = "%rm %rz -> %sc (%ls)".to_string();

    let (mut server, addr) = start_server(engine).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();

    access_log.flush().await;
    assert_eq!(access_log.peek().unwrap(), "GET /hello -> 200 (Executed)");

    server.stop().await;
}

#[tokio::test]
async fn metrics_count_exchanges() {
    let (mut server, addr) = start_server(Engine::new(test_router(), Settings::default())).await;

    for _ in 0..3 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /hello HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
    }

    // Connections wind down asynchronously after the client saw the
    // response; give them a beat.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = server.engine().metrics.snapshot();
    assert_eq!(snapshot.total_requests, 3);
    assert!(snapshot.bytes_in > 0);
    assert!(snapshot.bytes_out > 0);
    assert_eq!(snapshot.active_connections, 0);

    server.stop().await;
}

#[tokio::test]
async fn stop_refuses_new_connections() {
    let (mut server, addr) = start_server(Engine::new(test_router(), Settings::default())).await;
    server.stop().await;

    let refused = TcpStream::connect(addr).await;
    assert!(refused.is_err(), "listener should be gone after stop()");
}

#[tokio::test]
async fn frozen_router_rejects_late_routes() {
    let (mut server, _addr) = start_server(Engine::new(test_router(), Settings::default())).await;
    assert!(server.engine().router.is_frozen());
    server.stop().await;
}
