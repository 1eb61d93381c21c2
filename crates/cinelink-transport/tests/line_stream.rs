//! Integration tests for the line transport.
//!
//! These tests spin up a real TCP listener on `127.0.0.1:0` (the OS picks a
//! free port) and push raw bytes through it, so framing is verified exactly
//! as it will happen against a unit.

use std::time::Duration;

use cinelink_transport::{LineConnection, TransportError, connect};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(2);

/// Helper: binds a listener and returns it with its address.
async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
    let port = listener.local_addr().expect("has addr").port();
    (listener, port)
}

#[tokio::test]
async fn test_read_line_splits_frames_and_strips_separators() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"01/1/000:/89\n01/!/000:NAME:a:/1\r\n\n").await.unwrap();
        sock
    });

    let (mut reader, _writer) = connect("127.0.0.1", port, TIMEOUT).await.unwrap().split();
    let _sock = server.await.unwrap();

    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("01/1/000:/89"));
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("01/!/000:NAME:a:/1"));
}

#[tokio::test]
async fn test_read_line_joins_escaped_newline() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"01/!/000:TITLE_NAME:one\\\ntwo:/1\n").await.unwrap();
        sock
    });

    let (mut reader, _writer) = connect("127.0.0.1", port, TIMEOUT).await.unwrap().split();
    let _sock = server.await.unwrap();

    let line = reader.read_line().await.unwrap().unwrap();
    assert_eq!(line, "01/!/000:TITLE_NAME:one\\\ntwo:/1");
}

#[tokio::test]
async fn test_read_line_decodes_latin1() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"01/!/000:TITLE_NAME:caf\xe9:/1\n").await.unwrap();
        sock
    });

    let (mut reader, _writer) = connect("127.0.0.1", port, TIMEOUT).await.unwrap().split();
    let _sock = server.await.unwrap();

    let line = reader.read_line().await.unwrap().unwrap();
    assert!(line.ends_with("caf\u{e9}:/1"));
}

#[tokio::test]
async fn test_read_line_returns_none_on_close() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"01/1/000:/89\npartial").await.unwrap();
        // Dropping the socket closes the connection.
    });

    let (mut reader, _writer) = connect("127.0.0.1", port, TIMEOUT).await.unwrap().split();
    server.await.unwrap();

    assert!(reader.read_line().await.unwrap().is_some());
    assert!(reader.read_line().await.unwrap().is_none());
}

#[tokio::test]
async fn test_write_line_appends_separator_and_encodes_latin1() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 64];
        let mut read = 0;
        while !buf[..read].ends_with(b"\n") {
            read += sock.read(&mut buf[read..]).await.unwrap();
        }
        buf.truncate(read);
        buf
    });

    let (_reader, mut writer) = connect("127.0.0.1", port, TIMEOUT).await.unwrap().split();
    writer.write_line("01/0/X:\u{e9}\u{263a}:").await.unwrap();

    let bytes = server.await.unwrap();
    assert_eq!(bytes, b"01/0/X:\xe9?:\n");
}

#[tokio::test]
async fn test_connect_refused_is_connect_failed() {
    // Bind then drop to get a port nobody is listening on.
    let (listener, port) = listener().await;
    drop(listener);

    let err = connect("127.0.0.1", port, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_from_stream_assigns_unique_ids() {
    let (listener, port) = listener().await;
    let accept = tokio::spawn(async move {
        let (a, _) = listener.accept().await.unwrap();
        let (b, _) = listener.accept().await.unwrap();
        (a, b)
    });

    let c1 = connect("127.0.0.1", port, TIMEOUT).await.unwrap();
    let c2 = connect("127.0.0.1", port, TIMEOUT).await.unwrap();
    let (a, b) = accept.await.unwrap();
    let s1 = LineConnection::from_stream(a).unwrap();
    let s2 = LineConnection::from_stream(b).unwrap();

    let ids = [c1.id(), c2.id(), s1.id(), s2.id()];
    for (i, x) in ids.iter().enumerate() {
        for y in &ids[i + 1..] {
            assert_ne!(x, y);
        }
    }
    assert_eq!(c1.peer().port(), port);
}

#[tokio::test]
async fn test_read_line_without_separator_stops_at_limit() {
    use cinelink_transport::MAX_FRAME_LEN;

    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // Past the limit, no newline, socket stays open.
        sock.write_all(&vec![b'a'; MAX_FRAME_LEN + 100]).await.unwrap();
        sock
    });

    let (mut reader, _writer) = connect("127.0.0.1", port, TIMEOUT).await.unwrap().split();
    let err = tokio::time::timeout(TIMEOUT, reader.read_line())
        .await
        .expect("reader should give up without waiting for a separator")
        .unwrap_err();
    assert!(matches!(err, TransportError::FrameTooLong(MAX_FRAME_LEN)), "got {err:?}");
    let _sock = server.await.unwrap();
}
