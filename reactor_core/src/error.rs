use reactor_traits::CompartmentId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReactorError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware timeout: {0}")]
    HardwareTimeout(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("message bus error: {0}")]
    Bus(String),
    #[error("unknown compartment {0}")]
    UnknownCompartment(CompartmentId),
    #[error("invalid state: {0}")]
    State(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
