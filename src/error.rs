//! Error types for the Modbus TCP engine.

use thiserror::Error;

use crate::types::{ExceptionCode, FunctionCode};

/// Errors produced by the codec, the register store, and both engines.
///
/// The variants fall into four families: caller-argument errors (never
/// retried), framing errors (fatal to the affected frame only), protocol
/// exceptions reported by the remote peer, and transport failures that
/// the client answers with a reconnect cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Caller-supplied address, count, or object type out of bounds
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed frame: bad protocol id, length mismatch, nonzero padding
    #[error("Framing error: {0}")]
    Framing(String),

    /// The remote peer answered with a Modbus exception code
    #[error("Modbus exception from device {device_id} ({function}): {exception}")]
    Exception {
        device_id: u8,
        function: FunctionCode,
        exception: ExceptionCode,
    },

    /// Socket failure, stream closed, or response correlation lost
    #[error("Transport error: {0}")]
    Transport(String),

    /// A send or receive deadline elapsed
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation attempted while the link is down
    #[error("Not connected")]
    NotConnected,

    /// Operation attempted after the engine was shut down
    #[error("Engine is closed")]
    Closed,
}

impl ModbusError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        ModbusError::InvalidArgument(msg.into())
    }

    pub fn framing<S: Into<String>>(msg: S) -> Self {
        ModbusError::Framing(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        ModbusError::Transport(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        ModbusError::Timeout(msg.into())
    }

    /// True for failures the client maps to a null result plus a
    /// reconnect trigger rather than an error return.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ModbusError::Transport(_) | ModbusError::Timeout(_) | ModbusError::NotConnected
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Transport(err.to_string())
    }
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, ModbusError>;
