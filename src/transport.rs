//! Compression and the fire-and-forget datagram transport.
//!
//! One flush is one datagram: the packet buffer is snappy-compressed in
//! a single shot and handed to the OS. No acknowledgement, no retry, no
//! fragmentation; callers keep `max_packet_size` well under the
//! transport's maximum message size so a flush always fits.

use log::{debug, trace};
use tokio::net::UdpSocket;

use crate::error::{ReporterError, Result};

/// Compress a whole packet in one shot (raw snappy, no framing).
pub fn compress(payload: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(payload)
        .map_err(|e| ReporterError::Compress(e.to_string()))
}

/// Uncompressed length over compressed length. Defined as 1 when the
/// compressed length is zero.
pub fn compression_ratio(uncompressed: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        1.0
    } else {
        uncompressed as f64 / compressed as f64
    }
}

/// A one-shot compress-and-send sink for packet buffers. `send` takes
/// the uncompressed packet and returns the achieved compression ratio.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying socket. Idempotent.
    async fn open(&mut self) -> Result<()>;

    /// Compress and transmit one packet as a single message; returns the
    /// compression ratio achieved.
    async fn send(&mut self, payload: &[u8]) -> Result<f64>;

    /// Close the underlying socket. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// UDP implementation of [`Transport`]. The destination is re-resolved
/// by the OS on each send; a resolution failure surfaces as a transport
/// error on that flush and the next tick tries again.
pub struct UdpTransport {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket: None,
        }
    }

    async fn ensure_socket(&mut self) -> Result<&UdpSocket> {
        if self.socket.is_none() {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            debug!("Opened UDP socket for {}:{}", self.host, self.port);
            self.socket = Some(socket);
        }
        Ok(self.socket.as_ref().unwrap())
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn open(&mut self) -> Result<()> {
        self.ensure_socket().await?;
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> Result<f64> {
        let compressed = compress(payload)?;
        let ratio = compression_ratio(payload.len(), compressed.len());

        let (host, port) = (self.host.clone(), self.port);
        let socket = self.ensure_socket().await?;
        let sent = socket
            .send_to(&compressed, (host.as_str(), port))
            .await
            .map_err(|e| ReporterError::Transport(format!("{host}:{port}: {e}")))?;

        trace!(
            "Sent {} compressed bytes ({} uncompressed, ratio {:.2}) to {}:{}",
            sent,
            payload.len(),
            ratio,
            host,
            port
        );
        Ok(ratio)
    }

    async fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            debug!("Closed UDP socket for {}:{}", self.host, self.port);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_guards_division_by_zero() {
        assert_eq!(compression_ratio(100, 0), 1.0);
        assert_eq!(compression_ratio(100, 50), 2.0);
        assert_eq!(compression_ratio(100, 100), 1.0);
    }

    #[test]
    fn compress_round_trips() {
        let payload: Vec<u8> = b"abcabcabcabcabcabcabcabc".repeat(40);
        let compressed = compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());

        let decompressed = snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .unwrap();
        assert_eq!(decompressed, payload);
    }

    #[tokio::test]
    async fn sends_one_datagram_per_flush() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut transport = UdpTransport::new("127.0.0.1", port);
        transport.open().await.unwrap();

        let payload: Vec<u8> = b"metric".repeat(100);
        let ratio = transport.send(&payload).await.unwrap();
        assert!(ratio >= 1.0);

        let mut buf = vec![0u8; 65536];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        let decompressed = snap::raw::Decoder::new()
            .decompress_vec(&buf[..len])
            .unwrap();
        assert_eq!(decompressed, payload);

        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }
}
