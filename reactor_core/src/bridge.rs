//! Command bridge: hands inbound commands from producer threads to the loop.
//!
//! Producers (a bus subscriber, the stdin reader in `reactor run`, tests) hold
//! a cloneable [`CommandSender`]. Payloads are parsed on the producer side, so
//! only well-formed [`Command`]s ever cross the channel; malformed ones are
//! logged and dropped there. The loop owns the single [`CommandReceiver`] and
//! applies every effect on its own thread. The channel is FIFO per sender.

use crossbeam_channel as xch;
use reactor_traits::{CompartmentId, Direction};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::bus::{TOPIC_CALIBRATION, TOPIC_EXPERIMENT, TOPIC_PUMP_AUTO, TOPIC_PUMP_MANUAL};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Immediate dose; `steps: None` means "use the default size".
    ManualDose {
        pump_id: CompartmentId,
        direction: Direction,
        steps: Option<u32>,
    },
    /// Thresholds changed somewhere; refresh the active experiment.
    AutoUpdate,
    /// An experiment was edited; refresh only if it is the active one.
    ExperimentChanged { experiment_id: String },
    CalibrationStart { compartment: CompartmentId },
    CalibrationStop,
    ReloadCalibration,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown topic {0:?}")]
    UnknownTopic(String),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("invalid field {field:?}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("controller is no longer accepting commands")]
    Disconnected,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> CommandError {
    CommandError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn as_u32(v: &Value, field: &'static str) -> Result<u32, CommandError> {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| invalid(field, format!("expected a non-negative integer, got {v}")))
}

fn as_compartment(v: &Value, field: &'static str) -> Result<CompartmentId, CommandError> {
    let n = as_u32(v, field)?;
    CompartmentId::try_from(n).map_err(|_| invalid(field, format!("{n} is out of range")))
}

/// Parse one inbound message.
pub fn parse(topic: &str, payload: &str) -> Result<Command, CommandError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| CommandError::InvalidJson(e.to_string()))?;
    match topic {
        TOPIC_PUMP_MANUAL => parse_manual(&value),
        // the auto topic carries no required fields; any JSON body triggers a refresh
        TOPIC_PUMP_AUTO => Ok(Command::AutoUpdate),
        TOPIC_EXPERIMENT => parse_experiment(&value),
        TOPIC_CALIBRATION => parse_calibration(&value),
        other => Err(CommandError::UnknownTopic(other.to_owned())),
    }
}

fn parse_manual(v: &Value) -> Result<Command, CommandError> {
    let obj = v.as_object().ok_or(CommandError::NotAnObject)?;
    let pump_id = obj
        .get("pump_id")
        .ok_or(CommandError::MissingField("pump_id"))
        .and_then(|v| as_compartment(v, "pump_id"))?;
    let direction = match obj.get("direction") {
        None | Some(Value::Null) => Direction::Forward,
        Some(Value::String(s)) => s.parse().map_err(|e: String| invalid("direction", e))?,
        Some(other) => return Err(invalid("direction", format!("expected a string, got {other}"))),
    };
    let steps = match obj.get("steps") {
        None | Some(Value::Null) => None,
        Some(v) => match as_u32(v, "steps")? {
            0 => return Err(invalid("steps", "must be at least 1")),
            n => Some(n),
        },
    };
    Ok(Command::ManualDose {
        pump_id,
        direction,
        steps,
    })
}

fn parse_experiment(v: &Value) -> Result<Command, CommandError> {
    let obj = v.as_object().ok_or(CommandError::NotAnObject)?;
    let experiment_id = match obj.get("experiment_id") {
        None | Some(Value::Null) => return Err(CommandError::MissingField("experiment_id")),
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(invalid("experiment_id", format!("unexpected value {other}"))),
    };
    Ok(Command::ExperimentChanged { experiment_id })
}

fn parse_calibration(v: &Value) -> Result<Command, CommandError> {
    let obj = v.as_object().ok_or(CommandError::NotAnObject)?;
    if let Some(action) = obj.get("action") {
        return match action.as_str() {
            Some("reload_calibration") => Ok(Command::ReloadCalibration),
            _ => Err(invalid("action", format!("unsupported action {action}"))),
        };
    }
    let command = obj
        .get("command")
        .ok_or(CommandError::MissingField("command"))?;
    match command.as_str() {
        Some("start") => {
            let compartment = obj
                .get("compartment")
                .ok_or(CommandError::MissingField("compartment"))
                .and_then(|v| as_compartment(v, "compartment"))?;
            Ok(Command::CalibrationStart { compartment })
        }
        Some("stop") => Ok(Command::CalibrationStop),
        _ => Err(invalid("command", format!("expected start or stop, got {command}"))),
    }
}

/// Producer half. Cheap to clone and `Send`.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: xch::Sender<Command>,
}

impl CommandSender {
    pub fn send(&self, cmd: Command) -> Result<(), CommandError> {
        self.tx.send(cmd).map_err(|_| CommandError::Disconnected)
    }

    /// Parse and forward a raw bus message. Malformed messages are logged and
    /// returned as errors; they never reach the loop.
    pub fn submit(&self, topic: &str, payload: &str) -> Result<(), CommandError> {
        match parse(topic, payload) {
            Ok(cmd) => {
                tracing::debug!(topic, ?cmd, "command queued");
                self.send(cmd)
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "dropping malformed command");
                Err(e)
            }
        }
    }
}

/// Consumer half, owned by the loop.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: xch::Receiver<Command>,
}

impl CommandReceiver {
    /// Everything queued right now, in arrival order.
    pub fn drain(&self) -> Vec<Command> {
        self.rx.try_iter().collect()
    }

    pub(crate) fn channel(&self) -> &xch::Receiver<Command> {
        &self.rx
    }
}

pub fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = xch::unbounded();
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Requests loop shutdown from any thread and wakes a sleeping loop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    wake: xch::Sender<()>,
}

#[derive(Debug)]
pub(crate) struct StopSignal {
    stopped: Arc<AtomicBool>,
    wake: xch::Receiver<()>,
}

pub(crate) fn stop_pair() -> (StopHandle, StopSignal) {
    let stopped = Arc::new(AtomicBool::new(false));
    let (tx, rx) = xch::bounded(1);
    (
        StopHandle {
            stopped: Arc::clone(&stopped),
            wake: tx,
        },
        StopSignal { stopped, wake: rx },
    )
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // full means a wake-up is already pending
        let _ = self.wake.try_send(());
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl StopSignal {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn wake(&self) -> &xch::Receiver<()> {
        &self.wake
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"pump_id": 2, "direction": "reverse", "steps": 30}"#, 2, Direction::Reverse, Some(30))]
    #[case(r#"{"pump_id": 1}"#, 1, Direction::Forward, None)]
    #[case(r#"{"pump_id": 3, "steps": null}"#, 3, Direction::Forward, None)]
    fn manual_dose_parses(
        #[case] payload: &str,
        #[case] pump_id: CompartmentId,
        #[case] direction: Direction,
        #[case] steps: Option<u32>,
    ) {
        assert_eq!(
            parse(TOPIC_PUMP_MANUAL, payload).unwrap(),
            Command::ManualDose {
                pump_id,
                direction,
                steps
            }
        );
    }

    #[rstest]
    #[case(TOPIC_PUMP_MANUAL, "not json")]
    #[case(TOPIC_PUMP_MANUAL, r#"{"direction": "forward"}"#)]
    #[case(TOPIC_PUMP_MANUAL, r#"{"pump_id": -1}"#)]
    #[case(TOPIC_PUMP_MANUAL, r#"{"pump_id": 700}"#)]
    #[case(TOPIC_PUMP_MANUAL, r#"{"pump_id": 1, "direction": "sideways"}"#)]
    #[case(TOPIC_PUMP_MANUAL, r#"{"pump_id": 1, "steps": 0}"#)]
    #[case(TOPIC_PUMP_MANUAL, r#"[1, 2]"#)]
    #[case(TOPIC_EXPERIMENT, r#"{}"#)]
    #[case(TOPIC_EXPERIMENT, r#"{"experiment_id": ""}"#)]
    #[case(TOPIC_CALIBRATION, r#"{"command": "pause"}"#)]
    #[case(TOPIC_CALIBRATION, r#"{"command": "start"}"#)]
    #[case(TOPIC_CALIBRATION, r#"{"action": "recalibrate"}"#)]
    #[case("reactor/control/unknown", r#"{}"#)]
    fn malformed_commands_are_rejected(#[case] topic: &str, #[case] payload: &str) {
        assert!(parse(topic, payload).is_err());
    }

    #[test]
    fn calibration_and_experiment_commands() {
        assert_eq!(
            parse(TOPIC_CALIBRATION, r#"{"command": "start", "compartment": 2}"#).unwrap(),
            Command::CalibrationStart { compartment: 2 }
        );
        assert_eq!(
            parse(TOPIC_CALIBRATION, r#"{"command": "stop", "compartment": 2}"#).unwrap(),
            Command::CalibrationStop
        );
        assert_eq!(
            parse(TOPIC_CALIBRATION, r#"{"action": "reload_calibration"}"#).unwrap(),
            Command::ReloadCalibration
        );
        assert_eq!(
            parse(TOPIC_EXPERIMENT, r#"{"experiment_id": 42}"#).unwrap(),
            Command::ExperimentChanged {
                experiment_id: "42".into()
            }
        );
        assert_eq!(parse(TOPIC_PUMP_AUTO, "{}").unwrap(), Command::AutoUpdate);
    }

    #[test]
    fn sender_preserves_order_and_drops_malformed() {
        let (tx, rx) = channel();
        let producer = {
            let tx = tx.clone();
            std::thread::spawn(move || {
                for i in 1..=3u8 {
                    tx.submit(TOPIC_PUMP_MANUAL, &format!(r#"{{"pump_id": {i}}}"#))
                        .unwrap();
                }
                assert!(tx.submit(TOPIC_PUMP_MANUAL, "{").is_err());
            })
        };
        producer.join().unwrap();
        let ids: Vec<_> = rx
            .drain()
            .into_iter()
            .map(|c| match c {
                Command::ManualDose { pump_id, .. } => pump_id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn send_after_receiver_dropped_is_disconnected() {
        let (tx, rx) = channel();
        drop(rx);
        assert_eq!(tx.send(Command::AutoUpdate), Err(CommandError::Disconnected));
    }

    #[test]
    fn stop_handle_wakes_once() {
        let (handle, signal) = stop_pair();
        assert!(!signal.is_stopped());
        handle.stop();
        handle.stop();
        assert!(signal.is_stopped() && handle.is_stopped());
        assert!(signal.wake().try_recv().is_ok());
        assert!(signal.wake().try_recv().is_err());
    }
}
