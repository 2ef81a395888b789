use thiserror::Error;

/// Errors produced by the measurement engine.
///
/// `UnknownEvent` and `Platform` failures during arming/starting are absorbed
/// at the session/multiplexer boundary: the affected pass degrades to
/// elapsed-time-only and the experiment keeps running. `State` and `Protocol`
/// indicate a programming-contract violation and abort the current repetition.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was invoked in the wrong session state.
    #[error("invalid session state: {0}")]
    State(&'static str),

    /// A requested counter name cannot be resolved on this platform.
    #[error("unknown event name `{0}`")]
    UnknownEvent(String),

    /// The hardware counter facility is unavailable or rejected an operation.
    #[error("counter facility unavailable: {0}")]
    Platform(String),

    /// Mismatched or nested `enter`/`leave` calls from the workload.
    #[error("region protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    /// True for the error kinds that degrade a pass instead of aborting the
    /// repetition.
    pub fn is_degradation(&self) -> bool {
        matches!(self, Error::UnknownEvent(_) | Error::Platform(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
