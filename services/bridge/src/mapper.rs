//! Mapping stage: frame validation, rule lookup, value coercion.
//!
//! All three drop paths are non-fatal and only increment counters; the input
//! was ill-formed or unknown, so there is nothing to retry.

use crate::catalog::MappingCatalog;
use crate::counters::PipelineCounters;
use bridge_protocol::{CoercedValue, IngressEvent, MappedEvent, ValueType, payload_fields};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why an ingress event was dropped by the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapDrop {
    InvalidPayload,
    Unmapped,
    CoercionFailed,
}

pub struct Mapper {
    catalog: Arc<MappingCatalog>,
    counters: Arc<PipelineCounters>,
    /// Rule keys whose coercion failure has already been logged.
    warned_rules: HashSet<(String, String)>,
}

impl Mapper {
    pub fn new(catalog: Arc<MappingCatalog>, counters: Arc<PipelineCounters>) -> Self {
        Mapper { catalog, counters, warned_rules: HashSet::new() }
    }

    /// Map one ingress event to its canonical (object, value) tuple.
    pub fn map(&mut self, event: &IngressEvent) -> Result<MappedEvent, MapDrop> {
        let Some((equip_tag, message_id, value)) = payload_fields(&event.raw) else {
            self.counters.incr_invalid_payload();
            debug!(trace_id = %event.trace_id, "frame missing Equip.Tag / Message.ID / VALUE");
            return Err(MapDrop::InvalidPayload);
        };

        let Some(rule) = self.catalog.lookup(equip_tag, message_id) else {
            self.counters.incr_unmapped();
            debug!(trace_id = %event.trace_id, equip_tag, message_id, "no mapping rule");
            return Err(MapDrop::Unmapped);
        };

        let Some(coerced) = coerce(value, rule.value_type) else {
            self.counters.incr_coercion_failed();
            let key = (equip_tag.to_owned(), message_id.to_owned());
            if self.warned_rules.insert(key) {
                warn!(
                    equip_tag,
                    message_id,
                    value_type = %rule.value_type,
                    raw_value = %value,
                    "value coercion failed (logged once per rule)"
                );
            }
            return Err(MapDrop::CoercionFailed);
        };

        Ok(MappedEvent {
            trace_id: event.trace_id.clone(),
            object: rule.object.clone(),
            value: coerced,
            value_type: rule.value_type,
        })
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

const TRUE_WORDS: [&str; 4] = ["true", "1", "yes", "on"];
const FALSE_WORDS: [&str; 4] = ["false", "0", "no", "off"];

/// Coerce a raw scalar to a declared type. `None` means coercion failure.
pub fn coerce(value: &Value, value_type: ValueType) -> Option<CoercedValue> {
    match value_type {
        ValueType::Integer => coerce_integer(value).map(CoercedValue::Integer),
        ValueType::Float => coerce_float(value).map(CoercedValue::Float),
        ValueType::Text => coerce_text(value).map(CoercedValue::Text),
        ValueType::Boolean => coerce_boolean(value).map(CoercedValue::Boolean),
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            // A float-typed number is acceptable only with a zero fraction.
            let f = n.as_f64()?;
            whole_f64_to_i64(f)
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(i);
            }
            let f: f64 = s.parse().ok()?;
            whole_f64_to_i64(f)
        }
        _ => None,
    }
}

fn whole_f64_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let lowered = s.trim().to_ascii_lowercase();
            if TRUE_WORDS.contains(&lowered.as_str()) {
                Some(true)
            } else if FALSE_WORDS.contains(&lowered.as_str()) {
                Some(false)
            } else {
                // Numeric strings outside "0"/"1" (e.g. "2") do not coerce.
                None
            }
        }
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}
