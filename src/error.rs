use std::io;

use thiserror::Error;

/// Setup failures. Anything that goes wrong once the simulation is running
/// is an invariant violation and panics instead.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad argument: {0}")]
    Args(#[from] pico_args::Error),

    #[error("unrecognized replacement policy: {0}")]
    UnknownPolicy(String),

    #[error("cannot switch cache '{name}' to {policy}: {reason}")]
    PolicySwitch {
        name: String,
        policy: crate::replace::ReplPolicy,
        reason: String,
    },

    #[error("invalid geometry for cache '{name}': {reason}")]
    InvalidGeometry { name: String, reason: String },
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
