use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Result alias for client operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while configuring, launching or driving the engine.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to spawn engine: {0}")]
    EngineStart(String),
    #[error("engine terminated early with status {0}")]
    EngineExited(ExitStatus),
    #[error("failed to parse listen address from output: {0}")]
    ListenParse(String),
    #[error("engine did not report a listen address within {0:?}")]
    StartupTimeout(Duration),

    #[error(
        "invalid range {spec}: {reason} (sim data spans {data_start} to {data_end}; \
         formats: [start_time, end_time], [+time, \"start\"], [-time, \"end\"])"
    )]
    InvalidRange {
        data_start: f64,
        data_end: f64,
        spec: String,
        reason: String,
    },
    #[error("invalid operation '{received}', expected one of {supported:?}")]
    UnknownOperation {
        received: String,
        supported: Vec<&'static str>,
    },
    #[error("invalid keys {invalid:?} for {target}, available keys: {valid:?}")]
    InvalidKeys {
        target: String,
        invalid: Vec<String>,
        valid: Vec<String>,
    },
    #[error("unknown switch type '{0}', expected mosfet, igbt or diode")]
    UnknownSwitchType(String),
    #[error("components {missing:?} do not exist in the circuit")]
    UnknownComponents { missing: Vec<String> },
    #[error("simulation file {0} must be an existing .ipes file")]
    InvalidSimulationFile(PathBuf),
    #[error("loss file {0} does not exist")]
    MissingLossFile(PathBuf),

    #[error("engine error: {0}")]
    Engine(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected engine response: {0}")]
    UnexpectedResponse(String),
    #[error("engine connection closed")]
    ConnectionClosed,

    #[error("scope column {signal} has {len} samples but the time array has {expected}")]
    RaggedScope {
        signal: String,
        len: usize,
        expected: usize,
    },
}

impl RemoteError {
    pub(crate) fn engine_start(err: impl Into<String>) -> Self {
        RemoteError::EngineStart(err.into())
    }

    pub(crate) fn unexpected(message: impl Into<String>) -> Self {
        RemoteError::UnexpectedResponse(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        RemoteError::Configuration(message.into())
    }

    /// True when the engine itself rejected a single call.
    ///
    /// The connection is still usable afterwards, unlike the other transport
    /// variants.
    pub fn is_engine_rejection(&self) -> bool {
        matches!(self, RemoteError::Engine(_))
    }
}
