//! Instrument kinds, their field tables, and the registry handle.
//!
//! The registry and the instruments themselves are collaborators owned by
//! the host process; the exporter only needs an enumerable name →
//! instrument mapping and a way to read named accessors off each
//! instrument. Which accessors exist for which kind is a static lookup
//! table, so sampling is data driven rather than branching per kind.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::trace;

use crate::error::{ReporterError, Result};
use crate::record::Value;

const COUNTER_FIELDS: &[&str] = &["count"];

const METER_FIELDS: &[&str] = &["count", "1m_rate", "5m_rate", "15m_rate", "mean_rate"];

const TIMER_FIELDS: &[&str] = &[
    "count", "1m_rate", "5m_rate", "15m_rate", "mean_rate", "min", "max", "mean", "stddev",
];

const UTILIZATION_TIMER_FIELDS: &[&str] = &[
    "count", "1m_rate", "5m_rate", "15m_rate", "mean_rate", "min", "max", "mean", "stddev",
    "1m_util", "5m_util", "15m_util", "mean_util",
];

const HISTOGRAM_FIELDS: &[&str] = &["count", "min", "max", "mean", "stddev"];

// The `get_` read prefix is stripped before the name goes on the wire.
const SNAPSHOT_FIELDS: &[&str] = &["median", "get_95th_percentile"];

/// The fixed set of instrument kinds the exporter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Counter,
    Meter,
    Timer,
    UtilizationTimer,
    Histogram,
}

impl InstrumentKind {
    /// The kind string carried in every record's `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::Meter => "meter",
            InstrumentKind::Timer => "timer",
            InstrumentKind::UtilizationTimer => "utilization_timer",
            InstrumentKind::Histogram => "histogram",
        }
    }

    /// Accessors read directly off the live instrument, in wire order.
    pub fn base_accessors(&self) -> &'static [&'static str] {
        match self {
            InstrumentKind::Counter => COUNTER_FIELDS,
            InstrumentKind::Meter => METER_FIELDS,
            InstrumentKind::Timer => TIMER_FIELDS,
            InstrumentKind::UtilizationTimer => UTILIZATION_TIMER_FIELDS,
            InstrumentKind::Histogram => HISTOGRAM_FIELDS,
        }
    }

    /// Accessors read off an immutable snapshot of the instrument's
    /// distribution; empty for kinds without one.
    pub fn snapshot_accessors(&self) -> &'static [&'static str] {
        match self {
            InstrumentKind::Counter | InstrumentKind::Meter => &[],
            InstrumentKind::Timer | InstrumentKind::UtilizationTimer | InstrumentKind::Histogram => {
                SNAPSHOT_FIELDS
            }
        }
    }
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything with named numeric accessors: a live instrument or a
/// snapshot of one.
pub trait FieldSource {
    /// Read one named accessor. An error here aborts the whole tick; the
    /// exporter never papers over a partially read instrument.
    fn read(&self, accessor: &str) -> Result<Value>;
}

/// A single named metric object held by the registry.
pub trait Instrument: FieldSource + Send + Sync {
    fn kind(&self) -> InstrumentKind;

    /// Take an immutable point-in-time view of the instrument's
    /// distribution. Only called for kinds with snapshot accessors, and
    /// only once per record: the registry may mutate concurrently with
    /// sampling, so percentiles must come from one consistent view.
    fn snapshot(&self) -> Result<Box<dyn FieldSource + Send + '_>> {
        Err(ReporterError::Extraction(format!(
            "{} instrument has no snapshot",
            self.kind()
        )))
    }
}

/// An enumerable mapping from instrument name to instrument. Always
/// passed to the reporter explicitly; there is no process-wide default.
pub struct Registry {
    instruments: RwLock<HashMap<String, Arc<dyn Instrument>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            instruments: RwLock::new(HashMap::new()),
        }
    }

    /// Register an instrument under a name, replacing any existing one.
    pub fn register(&self, name: impl Into<String>, instrument: Arc<dyn Instrument>) -> Result<()> {
        let name = name.into();
        let mut instruments = self
            .instruments
            .write()
            .map_err(|_| ReporterError::Registry("Lock poisoned".to_string()))?;

        trace!("Registered {} instrument '{}'", instrument.kind(), name);
        instruments.insert(name, instrument);
        Ok(())
    }

    /// Remove an instrument by name; no-op if absent.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut instruments = self
            .instruments
            .write()
            .map_err(|_| ReporterError::Registry("Lock poisoned".to_string()))?;
        instruments.remove(name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<Arc<dyn Instrument>>> {
        let instruments = self
            .instruments
            .read()
            .map_err(|_| ReporterError::Registry("Lock poisoned".to_string()))?;
        Ok(instruments.get(name).cloned())
    }

    /// Snapshot the current name → instrument entries, sorted by name so
    /// a tick walks the registry in a stable order. The lock is released
    /// before sampling starts.
    pub fn entries(&self) -> Result<Vec<(String, Arc<dyn Instrument>)>> {
        let instruments = self
            .instruments
            .read()
            .map_err(|_| ReporterError::Registry("Lock poisoned".to_string()))?;

        let mut entries: Vec<_> = instruments
            .iter()
            .map(|(name, instrument)| (name.clone(), Arc::clone(instrument)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize> {
        let instruments = self
            .instruments
            .read()
            .map_err(|_| ReporterError::Registry("Lock poisoned".to_string()))?;
        Ok(instruments.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
