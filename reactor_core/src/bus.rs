//! Outbound messaging seam.
//!
//! Topics and payload shapes are fixed here; a transport only has to move
//! `(topic, retained, json)` triples. [`JsonlBus`] writes one JSON object per
//! line to any `Write`, which is what `reactor run` uses on stdout.

use chrono::{DateTime, Utc};
use reactor_traits::CompartmentId;
use serde::Serialize;
use serde_json::{Value, json};
use std::io::Write;

use crate::error::ReactorError;
use crate::status::StatusReport;
use crate::types::{EventRecord, SensorReading};

pub const TOPIC_PUMP_MANUAL: &str = "reactor/control/pump/manual";
pub const TOPIC_PUMP_AUTO: &str = "reactor/control/pump/auto";
pub const TOPIC_EXPERIMENT: &str = "reactor/control/experiment";
pub const TOPIC_CALIBRATION: &str = "reactor/control/calibration";

pub const TOPIC_TELEMETRY_PH: &str = "reactor/telemetry/ph";
pub const TOPIC_TELEMETRY_LOGGED: &str = "reactor/telemetry/logged";
pub const TOPIC_STATUS: &str = "reactor/status";
pub const TOPIC_CALIBRATION_RAW: &str = "reactor/calibration/raw";
pub const TOPIC_EVENTS: &str = "reactor/events";
pub const TOPIC_PRESENCE: &str = "reactor/server/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// Every message the controller publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// This cycle's readings, every cycle.
    Telemetry(SensorReading),
    /// Readings that were just persisted.
    LoggedTelemetry(SensorReading),
    Status(StatusReport),
    RawVoltage {
        compartment: CompartmentId,
        raw_voltage: f64,
        timestamp: DateTime<Utc>,
    },
    Event(EventRecord),
    Presence(Presence),
}

impl Outbound {
    pub fn topic(&self) -> &'static str {
        match self {
            Outbound::Telemetry(_) => TOPIC_TELEMETRY_PH,
            Outbound::LoggedTelemetry(_) => TOPIC_TELEMETRY_LOGGED,
            Outbound::Status(_) => TOPIC_STATUS,
            Outbound::RawVoltage { .. } => TOPIC_CALIBRATION_RAW,
            Outbound::Event(_) => TOPIC_EVENTS,
            Outbound::Presence(_) => TOPIC_PRESENCE,
        }
    }

    /// Presence is the only retained message.
    pub fn retained(&self) -> bool {
        matches!(self, Outbound::Presence(_))
    }

    pub fn payload(&self) -> Result<Value, ReactorError> {
        let v = match self {
            Outbound::Telemetry(r) | Outbound::LoggedTelemetry(r) => serde_json::to_value(r),
            Outbound::Status(s) => serde_json::to_value(s),
            Outbound::RawVoltage {
                compartment,
                raw_voltage,
                timestamp,
            } => Ok(json!({
                "compartment": compartment,
                "raw_voltage": raw_voltage,
                "timestamp": timestamp,
            })),
            Outbound::Event(e) => serde_json::to_value(e),
            Outbound::Presence(p) => Ok(json!({ "status": p })),
        };
        v.map_err(|e| ReactorError::Bus(format!("encode {}: {e}", self.topic())))
    }
}

pub trait Bus: Send {
    /// Connect and register `last_will` with the transport, if it supports one.
    fn connect(&mut self, last_will: &Outbound) -> Result<(), ReactorError>;
    fn publish(&mut self, msg: &Outbound) -> Result<(), ReactorError>;
    fn disconnect(&mut self) -> Result<(), ReactorError>;
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn connect(&mut self, last_will: &Outbound) -> Result<(), ReactorError> {
        (**self).connect(last_will)
    }
    fn publish(&mut self, msg: &Outbound) -> Result<(), ReactorError> {
        (**self).publish(msg)
    }
    fn disconnect(&mut self) -> Result<(), ReactorError> {
        (**self).disconnect()
    }
}

/// Writes `{"topic", "retained", "payload"}` lines.
///
/// A line stream has no broker to hold a last-will, so `connect` only
/// remembers it; the owning `Reactor` publishes offline itself on shutdown.
pub struct JsonlBus<W: Write + Send> {
    out: W,
    connected: bool,
}

impl<W: Write + Send> JsonlBus<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            connected: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Bus for JsonlBus<W> {
    fn connect(&mut self, last_will: &Outbound) -> Result<(), ReactorError> {
        tracing::debug!(will = last_will.topic(), "jsonl bus connected");
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, msg: &Outbound) -> Result<(), ReactorError> {
        if !self.connected {
            return Err(ReactorError::Bus("not connected".into()));
        }
        let line = json!({
            "topic": msg.topic(),
            "retained": msg.retained(),
            "payload": msg.payload()?,
        });
        writeln!(self.out, "{line}")
            .and_then(|()| self.out.flush())
            .map_err(|e| ReactorError::Bus(format!("write: {e}")))
    }

    fn disconnect(&mut self) -> Result<(), ReactorError> {
        self.connected = false;
        self.out
            .flush()
            .map_err(|e| ReactorError::Bus(format!("flush: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventLevel;

    #[test]
    fn presence_payload_and_retain() {
        let m = Outbound::Presence(Presence::Online);
        assert_eq!(m.topic(), TOPIC_PRESENCE);
        assert!(m.retained());
        assert_eq!(m.payload().unwrap(), json!({"status": "online"}));
        assert!(!Outbound::Telemetry(SensorReading::new()).retained());
    }

    #[test]
    fn event_payload_shape() {
        let ts = Utc::now();
        let m = Outbound::Event(EventRecord {
            level: EventLevel::Warning,
            message: "cutoff".into(),
            compartment: None,
            timestamp: ts,
        });
        let v = m.payload().unwrap();
        assert_eq!(v["level"], "WARNING");
        assert!(v["compartment"].is_null());
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn jsonl_bus_requires_connect() {
        let mut bus = JsonlBus::new(Vec::new());
        let msg = Outbound::Presence(Presence::Online);
        assert!(matches!(bus.publish(&msg), Err(ReactorError::Bus(_))));
        bus.connect(&Outbound::Presence(Presence::Offline)).unwrap();
        bus.publish(&msg).unwrap();
        let text = String::from_utf8(bus.into_inner()).unwrap();
        let v: Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(v["topic"], TOPIC_PRESENCE);
        assert_eq!(v["retained"], true);
    }
}
