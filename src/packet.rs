//! The outgoing packet buffer and its flush threshold.
//!
//! Encoded records are appended to one growable buffer between flushes.
//! The flush threshold is either a plain byte cap or, in adaptive mode,
//! the cap scaled by the last observed compression ratio so the
//! post-compression datagram stays near the cap despite variable
//! compressibility.

use log::debug;
use serde::Deserialize;

/// Safety margin on the adaptive threshold; compensates for
/// compression-ratio drift between the previous flush and this one.
const ADAPTIVE_MARGIN: f64 = 0.9;

/// How the flush threshold is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdPolicy {
    /// Flush when the buffer exceeds `max_packet_size` bytes.
    Fixed,
    /// Flush when the buffer exceeds `max_packet_size` scaled by the
    /// last observed compression ratio, with a 0.9 margin. Falls back to
    /// the plain cap until a ratio has been observed.
    #[default]
    Adaptive,
}

/// Append-only byte buffer for encoded records, plus the compression
/// state the adaptive policy feeds on. Reset (not destroyed) on flush.
pub struct PacketBuilder {
    buf: Vec<u8>,
    max_packet_size: usize,
    policy: ThresholdPolicy,
    last_ratio: Option<f64>,
}

impl PacketBuilder {
    pub fn new(max_packet_size: usize, policy: ThresholdPolicy) -> Self {
        Self {
            buf: Vec::new(),
            max_packet_size,
            policy,
            last_ratio: None,
        }
    }

    /// Append one encoded record.
    pub fn append(&mut self, encoded: &[u8]) {
        self.buf.extend_from_slice(encoded);
    }

    /// Whether the buffer has crossed the flush threshold. Checked after
    /// every append; an empty buffer never wants flushing.
    pub fn should_flush(&self) -> bool {
        !self.buf.is_empty() && self.buf.len() > self.threshold()
    }

    /// The effective flush threshold in (pre-compression) bytes.
    pub fn threshold(&self) -> usize {
        match (self.policy, self.last_ratio) {
            (ThresholdPolicy::Adaptive, Some(ratio)) => {
                (self.max_packet_size as f64 * ratio * ADAPTIVE_MARGIN) as usize
            }
            _ => self.max_packet_size,
        }
    }

    /// Record the compression ratio achieved by the flush that just
    /// completed. Callers only report ratios from successful sends.
    pub fn record_ratio(&mut self, ratio: f64) {
        self.last_ratio = Some(ratio);
        debug!(
            "Compression ratio {:.2}, flush threshold now {} bytes",
            ratio,
            self.threshold()
        );
    }

    pub fn last_ratio(&self) -> Option<f64> {
        self.last_ratio
    }

    pub fn policy(&self) -> ThresholdPolicy {
        self.policy
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Reset the buffer to empty after a flush, keeping its allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
