#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::float_cmp
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! pH control loop for a three-compartment bioreactor (hardware-agnostic).
//!
//! All hardware goes through `reactor_traits::Adc` and `reactor_traits::Pump`;
//! persistence through [`store::Store`]; messaging through [`bus::Bus`].
//!
//! ## Architecture
//!
//! - **Conversion**: probe voltage to pH with 25→37 °C slope compensation (`ph`)
//! - **Dosing**: proportional step count bounded by the pump time budget (`dosing`)
//! - **State**: cached active experiment and calibration mode (`experiment`)
//! - **Commands**: producer-side parsing, single-consumer hand-off (`bridge`)
//! - **Actuation**: one worker thread serializing every pump (`pump_worker`)
//! - **Loop**: the cycle, cooldowns, telemetry cadence, presence (`scheduler`)

pub mod atomic;
pub mod bridge;
pub mod builder;
pub mod bus;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod dosing;
pub mod error;
pub mod experiment;
pub mod hw_error;
pub mod mocks;
pub mod ph;
pub mod pump_worker;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod types;
pub mod util;

pub use bridge::{Command, CommandError, CommandSender, StopHandle};
pub use builder::ReactorBuilder;
pub use bus::{Bus, JsonlBus, Outbound, Presence};
pub use calibration::{Calibration, CalibrationSet};
pub use config::ControllerCfg;
pub use dosing::DosingAlgorithm;
pub use error::{ReactorError, Report, Result};
pub use experiment::{CompartmentBands, ExperimentConfig, ExperimentState, PhBand};
pub use ph::{PhEngine, voltage_to_ph};
pub use scheduler::{CyclePhase, Reactor};
pub use status::{Health, StatusReport};
pub use store::{FileStore, MemoryStore, Store};
pub use types::{COMPARTMENTS, DoseOrigin, EventLevel, EventRecord, PumpAction, SensorReading};
