//! Session error types

use thiserror::Error;

use sensebridge_transport::TransportError;

/// Errors surfaced by session operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("transport error")]
    Transport(#[from] TransportError),

    /// The expected response did not arrive within the operation's budget.
    #[error("command 0x{cmd:04X} timed out")]
    Timeout { cmd: u16 },

    /// The dongle answered, but not with what the protocol promises.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// One of the startup steps failed; no usable session exists.
    #[error("dongle startup failed")]
    StartFailed(#[source] Box<GatewayError>),
}
