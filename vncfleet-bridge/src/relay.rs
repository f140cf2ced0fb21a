//! Byte relay loops
//!
//! Two variants over the same session accounting: a generic stream-to-stream
//! relay used for raw pipes and in-memory tests, and the WebSocket-to-TCP
//! relay the HTTP surface mounts. Both preserve byte order per direction and
//! tear down as soon as either side closes.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::session::BridgeSession;

const RELAY_BUF_SIZE: usize = 16 * 1024;

/// Relay opaque bytes between two duplex streams until either side closes.
///
/// The payload is never inspected; each chunk is forwarded whole so ordering
/// within a direction is preserved.
pub async fn relay_streams<C, B>(session: &BridgeSession, client: C, backend: B)
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);
    let mut client_buf = vec![0u8; RELAY_BUF_SIZE];
    let mut backend_buf = vec![0u8; RELAY_BUF_SIZE];

    loop {
        tokio::select! {
            read = client_read.read(&mut client_buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if backend_write.write_all(&client_buf[..n]).await.is_err() {
                            break;
                        }
                        session.record_client_to_backend(n);
                    }
                }
            }
            read = backend_read.read(&mut backend_buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if client_write.write_all(&backend_buf[..n]).await.is_err() {
                            break;
                        }
                        session.record_backend_to_client(n);
                    }
                }
            }
        }
    }

    let _ = backend_write.shutdown().await;
    let _ = client_write.shutdown().await;
    session.close();
}

/// Relay between a WebSocket client (binary messages) and a raw TCP backend.
pub async fn relay_websocket(session: &BridgeSession, socket: WebSocket, backend: TcpStream) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (mut backend_read, mut backend_write) = backend.into_split();
    let mut backend_buf = vec![0u8; RELAY_BUF_SIZE];

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let len = data.len();
                        if backend_write.write_all(&data).await.is_err() {
                            break;
                        }
                        session.record_client_to_backend(len);
                    }
                    // Pings are answered by the socket itself; text frames
                    // have no meaning on an opaque byte pipe.
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
            read = backend_read.read(&mut backend_buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&backend_buf[..n]);
                        if ws_sink.send(Message::Binary(chunk)).await.is_err() {
                            break;
                        }
                        session.record_backend_to_client(n);
                    }
                }
            }
        }
    }

    let _ = backend_write.shutdown().await;
    let _ = ws_sink.send(Message::Close(None)).await;
    session.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::test_support::GAUGE_LOCK;
    use vncfleet_core::metrics::bridge as bridge_metrics;

    #[tokio::test]
    async fn test_relay_counts_both_directions() {
        let _guard = GAUGE_LOCK.lock().expect("gauge lock");
        let session = BridgeSession::new("instance-0", 1024);
        let (client_local, client_remote) = tokio::io::duplex(64 * 1024);
        let (backend_local, backend_remote) = tokio::io::duplex(64 * 1024);

        let relay = tokio::spawn(async move {
            relay_streams(&session, client_remote, backend_remote).await;
            session
        });

        let (mut client_read, mut client_write) = tokio::io::split(client_local);
        let (mut backend_read, mut backend_write) = tokio::io::split(backend_local);

        // Client sends a small control message, backend answers with a
        // framebuffer-sized chunk.
        client_write.write_all(&[1u8; 20]).await.expect("write");
        let mut received = [0u8; 20];
        backend_read.read_exact(&mut received).await.expect("read");
        assert_eq!(received, [1u8; 20]);

        backend_write.write_all(&[2u8; 4096]).await.expect("write");
        let mut frame = vec![0u8; 4096];
        client_read.read_exact(&mut frame).await.expect("read");

        // Closing the client side ends the relay.
        client_write.shutdown().await.expect("shutdown");
        let session = relay.await.expect("join");

        assert_eq!(session.bytes_client_to_backend(), 20);
        assert_eq!(session.bytes_backend_to_client(), 4096);
        assert_eq!(session.frames(), 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_small_chunks_do_not_count_as_frames() {
        let _guard = GAUGE_LOCK.lock().expect("gauge lock");
        let session = BridgeSession::new("instance-1", 1024);
        let (client_local, client_remote) = tokio::io::duplex(64 * 1024);
        let (backend_local, backend_remote) = tokio::io::duplex(64 * 1024);

        let relay = tokio::spawn(async move {
            relay_streams(&session, client_remote, backend_remote).await;
            session
        });

        let (mut client_read, mut client_write) = tokio::io::split(client_local);
        let (_backend_read, mut backend_write) = tokio::io::split(backend_local);

        backend_write.write_all(&[3u8; 100]).await.expect("write");
        let mut buf = [0u8; 100];
        client_read.read_exact(&mut buf).await.expect("read");

        client_write.shutdown().await.expect("shutdown");
        let session = relay.await.expect("join");

        assert_eq!(session.frames(), 0);
        assert_eq!(session.bytes_backend_to_client(), 100);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_count_independently() {
        let _guard = GAUGE_LOCK.lock().expect("gauge lock");
        let before = bridge_metrics::ACTIVE_SESSIONS.get();

        let mut handles = Vec::new();
        for i in 0..3u8 {
            handles.push(tokio::spawn(async move {
                let session = BridgeSession::new(&format!("instance-{i}"), 1024);
                let (client_local, client_remote) = tokio::io::duplex(64 * 1024);
                let (backend_local, backend_remote) = tokio::io::duplex(64 * 1024);

                let relay = tokio::spawn(async move {
                    relay_streams(&session, client_remote, backend_remote).await;
                    session
                });

                let (mut backend_read, _backend_write) = tokio::io::split(backend_local);
                let (_client_read, mut client_write) = tokio::io::split(client_local);

                // Each session pushes a distinct volume through.
                let payload = vec![i; (usize::from(i) + 1) * 10];
                client_write.write_all(&payload).await.expect("write");
                let mut buf = vec![0u8; payload.len()];
                backend_read.read_exact(&mut buf).await.expect("read");
                assert_eq!(buf, payload);

                client_write.shutdown().await.expect("shutdown");
                let session = relay.await.expect("join");
                assert_eq!(
                    session.bytes_client_to_backend(),
                    ((usize::from(i) + 1) * 10) as u64
                );
            }));
        }
        for handle in handles {
            handle.await.expect("session task");
        }

        assert_eq!(bridge_metrics::ACTIVE_SESSIONS.get(), before);
    }

    #[tokio::test]
    async fn test_backend_close_tears_down_relay() {
        let _guard = GAUGE_LOCK.lock().expect("gauge lock");
        let session = BridgeSession::new("instance-2", 1024);
        let (_client_local, client_remote) = tokio::io::duplex(64 * 1024);
        let (backend_local, backend_remote) = tokio::io::duplex(64 * 1024);

        let relay = tokio::spawn(async move {
            relay_streams(&session, client_remote, backend_remote).await;
            session
        });

        // Dropping the backend end closes the pipe.
        drop(backend_local);
        let session = relay.await.expect("join");
        assert!(session.is_closed());
    }
}
