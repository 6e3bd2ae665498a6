//! Table-driven extraction of field values from instruments.
//!
//! For each accessor in the kind's field table, read the value and store
//! it under the accessor name with any `get_` read prefix stripped. A
//! failing accessor fails the whole record; partially read instruments
//! never reach the packet.

use chrono::Utc;
use log::trace;

use crate::error::Result;
use crate::instrument::{FieldSource, Instrument, InstrumentKind};
use crate::record::{Record, Value};

/// Keys every record carries besides the extracted field values. Extras
/// must never shadow these.
const RESERVED_KEYS: &[&str] = &["client_id", "time", "name", "type"];

/// Strip the `get_` read prefix from an accessor to produce the wire
/// field name (`get_95th_percentile` → `95th_percentile`).
pub fn field_name(accessor: &str) -> &str {
    accessor.strip_prefix("get_").unwrap_or(accessor)
}

/// Whether an extra's key collides with a reserved key or with one of
/// the kind's own field names. Colliding extras are dropped so the wire
/// map never carries duplicate keys and the reserved value always wins.
fn shadows_record_field(key: &str, kind: InstrumentKind) -> bool {
    RESERVED_KEYS.contains(&key)
        || kind.base_accessors().iter().any(|a| field_name(a) == key)
        || kind.snapshot_accessors().iter().any(|a| field_name(a) == key)
}

/// Read every accessor off a source, appending each value to the record
/// under the stripped field name.
pub fn extract_into<S: FieldSource + ?Sized>(
    record: &mut Record,
    source: &S,
    accessors: &[&str],
) -> Result<()> {
    for accessor in accessors {
        let value = source.read(accessor)?;
        record.push(field_name(accessor), value);
    }
    Ok(())
}

/// Identity and extras stamped onto every record.
#[derive(Debug, Clone)]
pub struct SampleContext {
    pub client_id: String,
    /// Extra key/value pairs merged into every record, in a fixed order.
    pub extras: Vec<(String, Value)>,
}

impl SampleContext {
    pub fn new(client_id: impl Into<String>, mut extras: Vec<(String, Value)>) -> Self {
        extras.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            client_id: client_id.into(),
            extras,
        }
    }
}

/// Build the record for one instrument: extras, identity, name, kind,
/// then the kind's base fields and, where the kind has one, the snapshot
/// fields read from a single immutable snapshot.
pub fn sample(name: &str, instrument: &dyn Instrument, ctx: &SampleContext) -> Result<Record> {
    let kind = instrument.kind();
    let base = kind.base_accessors();
    let snapshot_accessors = kind.snapshot_accessors();

    let mut record =
        Record::with_capacity(ctx.extras.len() + 4 + base.len() + snapshot_accessors.len());

    for (key, value) in &ctx.extras {
        if shadows_record_field(key, kind) {
            trace!("Dropping extra '{}' shadowing a {} record field", key, kind);
            continue;
        }
        record.push(key.clone(), value.clone());
    }
    record.push("client_id", ctx.client_id.as_str());
    record.push("time", Utc::now().timestamp());
    record.push("name", name);
    record.push("type", kind.as_str());

    extract_into(&mut record, instrument, base)?;

    if !snapshot_accessors.is_empty() {
        let snapshot = instrument.snapshot()?;
        extract_into(&mut record, snapshot.as_ref(), snapshot_accessors)?;
    }

    trace!("Sampled {} '{}' ({} fields)", kind, name, record.len());
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReporterError;
    use crate::instrument::InstrumentKind;

    struct FixedTimer;

    impl FieldSource for FixedTimer {
        fn read(&self, accessor: &str) -> Result<Value> {
            match accessor {
                "count" => Ok(Value::Int(3)),
                "min" | "max" | "mean" | "stddev" => Ok(Value::Float(1.0)),
                a if a.ends_with("_rate") => Ok(Value::Float(0.5)),
                other => Err(ReporterError::extraction("timer", other, "unknown accessor")),
            }
        }
    }

    struct FixedSnapshot;

    impl FieldSource for FixedSnapshot {
        fn read(&self, accessor: &str) -> Result<Value> {
            match accessor {
                "median" => Ok(Value::Float(2.0)),
                "get_95th_percentile" => Ok(Value::Float(9.5)),
                other => Err(ReporterError::extraction("snapshot", other, "unknown accessor")),
            }
        }
    }

    impl Instrument for FixedTimer {
        fn kind(&self) -> InstrumentKind {
            InstrumentKind::Timer
        }

        fn snapshot(&self) -> Result<Box<dyn FieldSource + Send + '_>> {
            Ok(Box::new(FixedSnapshot))
        }
    }

    #[test]
    fn strips_the_read_prefix_only() {
        assert_eq!(field_name("get_95th_percentile"), "95th_percentile");
        assert_eq!(field_name("median"), "median");
        assert_eq!(field_name("mean_rate"), "mean_rate");
    }

    #[test]
    fn timer_record_has_exactly_the_table_fields() {
        let ctx = SampleContext::new("host:1", vec![("env".to_string(), Value::from("prod"))]);
        let record = sample("latency", &FixedTimer, &ctx).unwrap();

        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(
            keys,
            vec![
                "env", "client_id", "time", "name", "type", "count", "1m_rate", "5m_rate",
                "15m_rate", "mean_rate", "min", "max", "mean", "stddev", "median",
                "95th_percentile",
            ]
        );
        assert_eq!(record.get("type"), Some(&Value::Str("timer".to_string())));
        assert_eq!(record.get("95th_percentile"), Some(&Value::Float(9.5)));
        assert!(matches!(record.get("time"), Some(Value::Int(t)) if *t > 0));
    }

    #[test]
    fn extras_are_sorted_for_deterministic_order() {
        let ctx = SampleContext::new(
            "host:1",
            vec![
                ("zone".to_string(), Value::from("b")),
                ("app".to_string(), Value::from("api")),
            ],
        );
        assert_eq!(ctx.extras[0].0, "app");
        assert_eq!(ctx.extras[1].0, "zone");
    }

    #[test]
    fn extras_never_shadow_reserved_or_field_keys() {
        struct FixedCounter;

        impl FieldSource for FixedCounter {
            fn read(&self, accessor: &str) -> Result<Value> {
                match accessor {
                    "count" => Ok(Value::Int(7)),
                    other => Err(ReporterError::extraction("counter", other, "unknown accessor")),
                }
            }
        }

        impl Instrument for FixedCounter {
            fn kind(&self) -> InstrumentKind {
                InstrumentKind::Counter
            }
        }

        let ctx = SampleContext::new(
            "host:1",
            vec![
                ("time".to_string(), Value::from("bogus")),
                ("name".to_string(), Value::from("shadow")),
                ("count".to_string(), Value::Int(-1)),
                ("env".to_string(), Value::from("prod")),
            ],
        );
        let record = sample("requests", &FixedCounter, &ctx).unwrap();

        // Exactly one entry per key, with the reserved values winning.
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(keys, vec!["env", "client_id", "time", "name", "type", "count"]);
        assert_eq!(record.get("name"), Some(&Value::Str("requests".to_string())));
        assert_eq!(record.get("count"), Some(&Value::Int(7)));
        assert!(matches!(record.get("time"), Some(Value::Int(_))));
    }

    #[test]
    fn timer_field_names_also_shield_against_extras() {
        assert!(shadows_record_field("95th_percentile", InstrumentKind::Timer));
        assert!(shadows_record_field("median", InstrumentKind::Histogram));
        assert!(!shadows_record_field("median", InstrumentKind::Counter));
        assert!(!shadows_record_field("env", InstrumentKind::Timer));
    }

    #[test]
    fn failing_accessor_fails_the_record() {
        struct BrokenCounter;

        impl FieldSource for BrokenCounter {
            fn read(&self, accessor: &str) -> Result<Value> {
                Err(ReporterError::extraction("broken", accessor, "io down"))
            }
        }

        impl Instrument for BrokenCounter {
            fn kind(&self) -> InstrumentKind {
                InstrumentKind::Counter
            }
        }

        let ctx = SampleContext::new("host:1", Vec::new());
        assert!(matches!(
            sample("broken", &BrokenCounter, &ctx),
            Err(ReporterError::Extraction(_))
        ));
    }
}
