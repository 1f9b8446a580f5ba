//! Black-box byte-level tests: connect a raw `TcpStream`, write request bytes,
//! assert on the exact response bytes. Grounded on the teacher's
//! `tests/server.rs` style (a real socket round-trip rather than a mocked
//! transport), scaled down from the teacher's thread-per-test harness to
//! `tokio::test` since this core is async end to end.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use gatewayrt::{lifespan, service_fn, Application, Config, Error, ReceiveEvent, Scope, SendEvent};

/// Bind on an ephemeral port, run `app` in the background, and return the
/// address a test can connect to. The server task is abandoned (not joined)
/// when the test ends; each test binds its own fresh listener.
async fn spawn<A: Application>(app: A) -> SocketAddr {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    // Bind up front on the test's own listener so we can learn the ephemeral
    // port before the server starts accepting, then hand the bound socket's
    // address to `Config` — `Config::serve` binds its own listener, so
    // instead we probe for a free port by binding and immediately dropping.
    let probe = std::net::TcpListener::bind(addr).unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    tokio::spawn(async move {
        let _ = Config::bind(addr).serve(app, std::future::pending()).await;
    });

    // Give the background task a chance to bind before the test connects.
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    addr
}

async fn roundtrip(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.ok();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    response
}

fn echo_app() -> impl Application {
    service_fn(|scope, mut receive, mut send| async move {
        if let Scope::Http { .. } = scope {
            let body = match receive.receive().await {
                ReceiveEvent::HttpRequest { body, .. } => body,
                _ => Default::default(),
            };
            send.send(SendEvent::HttpResponseStart {
                status: 200,
                headers: vec![(
                    bytes::Bytes::from_static(b"content-length"),
                    bytes::Bytes::from(body.len().to_string()),
                )],
                trailers: false,
            })
            .await?;
            send.send(SendEvent::HttpResponseBody { body, more: false }).await?;
        }
        Ok(())
    })
}

#[tokio::test]
async fn http_request_is_echoed_back_with_a_matching_content_length() {
    let addr = spawn(echo_app()).await;
    let response = roundtrip(
        addr,
        b"POST / HTTP/1.1\r\nHost: example.test\r\nContent-Length: 5\r\n\r\nhello",
    )
    .await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.contains("content-length: 5"));
    assert!(text.ends_with("hello"));
}

#[tokio::test]
async fn chunked_response_is_framed_with_exact_byte_sequences() {
    let app = service_fn(|scope, mut receive, mut send| async move {
        if let Scope::Http { .. } = scope {
            let _ = receive.receive().await;
            send.send(SendEvent::HttpResponseStart {
                status: 200,
                headers: Vec::new(),
                trailers: false,
            })
            .await?;
            send.send(SendEvent::HttpResponseBody {
                body: bytes::Bytes::from_static(b"abc"),
                more: true,
            })
            .await?;
            send.send(SendEvent::HttpResponseBody {
                body: bytes::Bytes::from_static(b"de"),
                more: false,
            })
            .await?;
        }
        Ok(())
    });
    let addr = spawn(app).await;
    let response = roundtrip(addr, b"GET / HTTP/1.1\r\nHost: example.test\r\n\r\n").await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.contains("Transfer-Encoding: chunked"));
    assert!(text.ends_with("3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n"));
}

#[tokio::test]
async fn sse_stream_renders_multi_line_data_as_one_field_per_line() {
    let app = service_fn(|scope, mut receive, mut send| async move {
        if let Scope::Http { .. } = scope {
            let _ = receive.receive().await;
            send.send(SendEvent::SseStart {
                status: 200,
                headers: Vec::new(),
            })
            .await?;
            send.send(SendEvent::SseSend {
                data: "line one\nline two".into(),
                event: Some("update".into()),
                id: None,
                retry: None,
            })
            .await?;
            send.send(SendEvent::SseClose).await?;
        }
        Ok(())
    });
    let addr = spawn(app).await;
    let response = roundtrip(addr, b"GET /stream HTTP/1.1\r\nHost: example.test\r\n\r\n").await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.contains("content-type: text/event-stream"));
    assert!(text.contains("event: update\ndata: line one\ndata: line two\n\n"));
}

#[tokio::test]
async fn websocket_upgrade_completes_the_rfc_6455_handshake() {
    let app = service_fn(|scope, mut receive, mut send| async move {
        if let Scope::WebSocket { .. } = scope {
            match receive.receive().await {
                ReceiveEvent::WebSocketConnect => {}
                _ => return Ok(()),
            }
            send.send(SendEvent::WebSocketAccept {
                subprotocol: None,
                headers: Vec::new(),
            })
            .await?;
        }
        Ok(())
    });
    let addr = spawn(app).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = b"GET /ws HTTP/1.1\r\n\
        Host: example.test\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";
    stream.write_all(request).await.unwrap();

    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 101"));
    // RFC 6455 §1.3's own worked example.
    assert!(response.contains("sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
}

#[tokio::test]
async fn on_error_callback_receives_uncaught_application_errors() {
    let seen = Arc::new(std::sync::Mutex::new(None));
    let seen_clone = seen.clone();

    let app = service_fn(|scope, mut receive, _send| async move {
        if let Scope::Http { .. } = scope {
            let _ = receive.receive().await;
            return Err(Error::Application(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "handler blew up",
            ))));
        }
        Ok(())
    });

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let probe = std::net::TcpListener::bind(addr).unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    tokio::spawn(async move {
        let _ = Config::bind(addr)
            .on_error(move |err| {
                *seen_clone.lock().unwrap() = Some(err.to_string());
            })
            .serve(app, std::future::pending())
            .await;
    });

    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let response = roundtrip(addr, b"GET / HTTP/1.1\r\nHost: example.test\r\n\r\n").await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 500"));

    // Give the on_error callback a moment to run after the response is sent.
    for _ in 0..100 {
        if seen.lock().unwrap().is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(seen.lock().unwrap().as_ref().unwrap().contains("handler blew up"));
}

#[tokio::test]
async fn lifespan_startup_failure_is_reported_before_the_listener_is_reused() {
    let ran_inner_startup = Arc::new(AtomicBool::new(false));
    let inner_flag = ran_inner_startup.clone();

    let app = lifespan::wrap(
        lifespan::bare(service_fn(|_scope, _receive, _send| async { Ok(()) })),
        Some(Arc::new(move |_state| {
            let inner_flag = inner_flag.clone();
            Box::pin(async move {
                inner_flag.store(true, Ordering::SeqCst);
                Err(gatewayrt::Error::Application(Box::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "seed data unavailable",
                ))))
            })
        })),
        None,
    );

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let probe = std::net::TcpListener::bind(addr).unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let result = Config::bind(addr).serve(app, std::future::pending()).await;
    assert!(result.is_err());
    assert!(ran_inner_startup.load(Ordering::SeqCst));
}
