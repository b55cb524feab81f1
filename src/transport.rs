//! TCP transport to the data-logging stick
//!
//! Owns the socket, a mutex-guarded write path, and a spawned read loop
//! that runs received bytes through the streaming decoder and hands each
//! complete frame to the response gate. Any decode error terminates the
//! connection — over TCP a desynchronized stream means a protocol bug or a
//! hostile peer, and heuristic recovery would break the invariant that
//! delivered frames are structurally sound.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::decoder::FrameDecoder;
use crate::error::{Result, SolarmanError};
use crate::gate::ResponseGate;

/// Snapshot of transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub frames_discarded: u64,
    pub errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
struct StatsCells {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    frames_discarded: AtomicU64,
    errors: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl StatsCells {
    fn snapshot(&self) -> TransportStats {
        TransportStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// One live TCP connection to a stick
#[derive(Debug)]
pub struct V5Transport {
    writer: Mutex<OwnedWriteHalf>,
    gate: Arc<ResponseGate>,
    reader: JoinHandle<()>,
    active: Arc<AtomicBool>,
    stats: Arc<StatsCells>,
    peer: String,
}

impl V5Transport {
    /// Open a TCP connection with a connect timeout
    pub async fn connect(host: &str, port: u16, timeout_duration: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        let stream = match timeout(timeout_duration, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                stream
            }
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                return Err(SolarmanError::ConnectionFailed(format!(
                    "Failed to connect to {addr}: {e}"
                )));
            }
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                return Err(SolarmanError::ConnectionFailed(format!(
                    "Connection to {addr} timed out"
                )));
            }
        };

        let (read_half, write_half) = stream.into_split();
        let gate = Arc::new(ResponseGate::new());
        let active = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(StatsCells::default());

        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&gate),
            Arc::clone(&active),
            Arc::clone(&stats),
        ));

        Ok(Self {
            writer: Mutex::new(write_half),
            gate,
            reader,
            active,
            stats,
            peer: addr,
        })
    }

    /// The response gate fed by this transport's read loop
    pub fn gate(&self) -> &ResponseGate {
        &self.gate
    }

    /// Write one complete frame
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await.map_err(|e| {
            error!("TCP TX: {}", e);
            SolarmanError::Io(format!("TCP send error: {e}"))
        })?;

        self.stats.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_sent
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        debug!("TCP TX: {}B", data.len());
        Ok(())
    }

    /// Whether the read loop is still running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Remote address this transport was opened against
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Counter snapshot
    pub fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }

    /// Tear the connection down, waking any awaiter with `ChannelClosed`
    pub async fn close(&self) {
        self.reader.abort();
        self.active.store(false, Ordering::Relaxed);

        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        self.gate.close();
        debug!("Transport closed: {}", self.peer);
    }
}

impl Drop for V5Transport {
    fn drop(&mut self) {
        self.reader.abort();
        self.active.store(false, Ordering::Relaxed);
        self.gate.close();
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    gate: Arc<ResponseGate>,
    active: Arc<AtomicBool>,
    stats: Arc<StatsCells>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("TCP peer closed");
                match decoder.finish() {
                    Ok(()) => gate.close(),
                    Err(e) => {
                        stats.errors.fetch_add(1, Ordering::Relaxed);
                        gate.fail(e);
                    }
                }
                break;
            }
            Ok(n) => {
                stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                decoder.feed(&buf[..n]);

                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => {
                            debug!("TCP RX: {}B frame", frame.len());
                            if gate.complete(frame) {
                                stats.responses_received.fetch_add(1, Ordering::Relaxed);
                            } else {
                                stats.frames_discarded.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("Frame decode error: {}", e);
                            stats.errors.fetch_add(1, Ordering::Relaxed);
                            gate.fail(e);
                            active.store(false, Ordering::Relaxed);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                error!("TCP RX: {}", e);
                stats.errors.fetch_add(1, Ordering::Relaxed);
                gate.fail(SolarmanError::Io(format!("TCP receive error: {e}")));
                break;
            }
        }
    }

    active.store(false, Ordering::Relaxed);
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::frame;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, "127.0.0.1".to_string(), port)
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let (listener, host, port) = listener().await;
        drop(listener);

        let result = V5Transport::connect(&host, port, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(SolarmanError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (listener, host, port) = listener().await;
        let transport = V5Transport::connect(&host, port, Duration::from_secs(2))
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        transport.send(&[0xA5, 0x01, 0x02]).await.unwrap();

        let mut received = [0u8; 3];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [0xA5, 0x01, 0x02]);

        let stats = transport.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.bytes_sent, 3);
    }

    #[tokio::test]
    async fn test_inbound_frame_reaches_awaiter() {
        let (listener, host, port) = listener().await;
        let transport = V5Transport::connect(&host, port, Duration::from_secs(2))
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let pending = transport.gate().register();

        let v5 = frame::build_request(0x1234, 0x0001, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
        server.write_all(&v5).await.unwrap();

        let received = timeout(Duration::from_secs(2), pending.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, v5);
        assert_eq!(transport.stats().responses_received, 1);
    }

    #[tokio::test]
    async fn test_unsolicited_frame_discarded() {
        let (listener, host, port) = listener().await;
        let transport = V5Transport::connect(&host, port, Duration::from_secs(2))
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let v5 = frame::build_request(0x1234, 0x0001, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
        server.write_all(&v5).await.unwrap();

        // Wait for the read loop to swallow it
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.stats().frames_discarded, 1);
        assert_eq!(transport.stats().responses_received, 0);
    }

    #[tokio::test]
    async fn test_peer_close_yields_channel_closed() {
        let (listener, host, port) = listener().await;
        let transport = V5Transport::connect(&host, port, Duration::from_secs(2))
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let pending = transport.gate().register();
        drop(server);

        assert!(matches!(
            timeout(Duration::from_secs(2), pending.wait()).await.unwrap(),
            Err(SolarmanError::ChannelClosed)
        ));

        // Read loop has exited
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!transport.is_active());
    }

    #[tokio::test]
    async fn test_garbage_terminates_connection() {
        let (listener, host, port) = listener().await;
        let transport = V5Transport::connect(&host, port, Duration::from_secs(2))
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let pending = transport.gate().register();
        server.write_all(&[0x00, 0xFF, 0x13]).await.unwrap();

        match timeout(Duration::from_secs(2), pending.wait()).await.unwrap() {
            Err(SolarmanError::V5Frame(FrameError::InvalidStartByte(0x00))) => {}
            other => panic!("expected InvalidStartByte, got {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!transport.is_active());
        assert_eq!(transport.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_peer_close_mid_frame_reports_incomplete() {
        let (listener, host, port) = listener().await;
        let transport = V5Transport::connect(&host, port, Duration::from_secs(2))
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let pending = transport.gate().register();

        let v5 = frame::build_request(0x1234, 0x0001, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
        server.write_all(&v5[..10]).await.unwrap();
        drop(server);

        match timeout(Duration::from_secs(2), pending.wait()).await.unwrap() {
            Err(SolarmanError::V5Frame(FrameError::IncompleteFrame(10))) => {}
            other => panic!("expected IncompleteFrame(10), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_wakes_awaiter() {
        let (listener, host, port) = listener().await;
        let transport = V5Transport::connect(&host, port, Duration::from_secs(2))
            .await
            .unwrap();
        let (_server, _) = listener.accept().await.unwrap();

        let pending = transport.gate().register();
        transport.close().await;

        assert!(matches!(
            pending.wait().await,
            Err(SolarmanError::ChannelClosed)
        ));
        assert!(!transport.is_active());
    }
}
