//! Plain data carried between the loop, the store and the bus.

use chrono::{DateTime, Utc};
use reactor_traits::{CompartmentId, Direction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The fixed compartment set, in processing order.
pub const COMPARTMENTS: [CompartmentId; 3] = [1, 2, 3];

/// One cycle's converted readings. Serializes as `{"1": 7.01, "3": 6.88}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorReading(BTreeMap<CompartmentId, f64>);

impl SensorReading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, compartment: CompartmentId, ph: f64) {
        self.0.insert(compartment, ph);
    }

    pub fn get(&self, compartment: CompartmentId) -> Option<f64> {
        self.0.get(&compartment).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Readings in compartment order.
    pub fn iter(&self) -> impl Iterator<Item = (CompartmentId, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

impl FromIterator<(CompartmentId, f64)> for SensorReading {
    fn from_iter<T: IntoIterator<Item = (CompartmentId, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

/// Operator-facing event, published on the bus and kept by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub level: EventLevel,
    pub message: String,
    pub compartment: Option<CompartmentId>,
    pub timestamp: DateTime<Utc>,
}

/// Who asked for a dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseOrigin {
    Auto,
    Manual,
}

/// A completed pump run, as written to the pump-action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpAction {
    pub pump_id: CompartmentId,
    #[serde(with = "direction_str")]
    pub direction: Direction,
    pub steps: u32,
    pub origin: DoseOrigin,
    pub timestamp: DateTime<Utc>,
}

pub(crate) mod direction_str {
    use reactor_traits::Direction;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Direction, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(d.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Direction, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_serializes_with_string_keys() {
        let r: SensorReading = [(3, 6.88), (1, 7.01)].into_iter().collect();
        assert_eq!(
            serde_json::to_string(&r).unwrap(),
            r#"{"1":7.01,"3":6.88}"#
        );
        assert_eq!(r.iter().map(|(c, _)| c).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn event_level_is_uppercase_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&EventLevel::Warning).unwrap(),
            "\"WARNING\""
        );
    }
}
