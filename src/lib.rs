//! A library for exporting metric registry samples to a remote collector
//! over UDP.
//!
//! A [`Reporter`](reporter::Reporter) periodically walks a [`Registry`]
//! of named instruments, encodes one msgpack record per instrument,
//! batches records into a size-bounded packet, snappy-compresses the
//! packet and fires it at the collector as a single datagram. Delivery is
//! best effort: no acknowledgement, no retry, the next tick naturally
//! resends current state.

pub mod config;
pub mod error;
pub mod extract;
pub mod instrument;
pub mod packet;
pub mod record;
pub mod reporter;
pub mod schedule;
pub mod transport;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::config::{ReporterConfig, ReporterConfigBuilder};
    pub use crate::error::{ReporterError, Result};
    pub use crate::instrument::{FieldSource, Instrument, InstrumentKind, Registry};
    pub use crate::record::{Record, Value};
    pub use crate::reporter::Reporter;
    pub use crate::transport::{Transport, UdpTransport};
}

pub use instrument::Registry;
pub use reporter::Reporter;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
