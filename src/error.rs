//! Error types of every stage of a display cycle

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use embedded_hal::{digital, spi};
use thiserror::Error;

use crate::session::PanelState;

/// Errors of the physical connection between host and panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HardwareError {
    /// Encountered an SPI error
    #[error("spi error: {0:?}")]
    SpiError(spi::ErrorKind),

    /// Encountered an error on Busy GPIO
    #[error("busy gpio error: {0:?}")]
    BusyError(digital::ErrorKind),

    /// Encountered an error on DC GPIO
    #[error("dc gpio error: {0:?}")]
    DcError(digital::ErrorKind),

    /// Encountered an error on RST GPIO
    #[error("rst gpio error: {0:?}")]
    RstError(digital::ErrorKind),

    /// Encountered an error on the power enable GPIO
    #[error("pwr gpio error: {0:?}")]
    PwrError(digital::ErrorKind),

    /// The busy line did not deassert within the allowed time
    #[error("panel stayed busy for more than {timeout:?}")]
    BusyTimeout {
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// The SPI and GPIO handles were already given back
    #[error("hardware handles have been released")]
    Released,
}

/// Errors raised by [`PanelSession`](crate::session::PanelSession)
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation is not legal in the current state
    #[error("`{operation}` is not allowed while the panel is {state:?}")]
    State {
        /// Requested operation
        operation: &'static str,
        /// State the session was in
        state: PanelState,
    },

    /// Buffer handed to `display` does not match the panel
    #[error("buffer is {actual} bytes, the panel expects {expected}")]
    BufferSize {
        /// Byte count of the panel mode
        expected: usize,
        /// Byte count that was handed in
        actual: usize,
    },

    /// Refresh did not finish within the busy wait bound
    #[error("`{operation}` timed out after {timeout:?} waiting for the panel")]
    HardwareTimeout {
        /// Operation during which the wait expired
        operation: &'static str,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// Any other I/O failure while talking to the controller
    #[error("`{operation}` failed")]
    Hardware {
        /// Operation during which the error occurred
        operation: &'static str,
        /// Underlying error
        #[source]
        source: HardwareError,
    },
}

impl SessionError {
    pub(crate) fn from_hardware(operation: &'static str, err: HardwareError) -> Self {
        match err {
            HardwareError::BusyTimeout { timeout } => {
                SessionError::HardwareTimeout { operation, timeout }
            }
            source => SessionError::Hardware { operation, source },
        }
    }
}

/// Errors of the pixel codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The source could not be decoded at all
    #[error("unsupported image: {0}")]
    UnsupportedFormat(String),

    /// Produced or supplied buffer does not match the panel
    #[error("buffer is {actual} bytes, the panel expects {expected}")]
    BufferSize {
        /// Byte count of the panel mode
        expected: usize,
        /// Byte count that was produced or supplied
        actual: usize,
    },
}

/// Errors while obtaining the source bytes
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Connection could not be established or broke down
    #[error("transport error for {url}: {reason}")]
    Transport {
        /// Requested URL
        url: String,
        /// What went wrong
        reason: String,
    },

    /// Server answered with a non-success status
    #[error("{url} answered with http status {status}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Status code of the response
        status: u16,
    },

    /// No response within the configured timeout
    #[error("no response from {url} within {timeout:?}")]
    Timeout {
        /// Requested URL
        url: String,
        /// Configured request timeout
        timeout: Duration,
    },

    /// Response or file content is not usable
    #[error("malformed data from {origin}: {reason}")]
    MalformedData {
        /// URL or path the data came from
        origin: String,
        /// What is wrong with it
        reason: String,
    },

    /// Local resource does not exist
    #[error("{} not found", path.display())]
    NotFound {
        /// Missing path
        path: PathBuf,
    },

    /// Local resource exists but could not be read
    #[error("failed to read {}", path.display())]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl AcquireError {
    /// Whether a later attempt has a realistic chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            AcquireError::Transport { .. } | AcquireError::Timeout { .. } => true,
            AcquireError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            AcquireError::MalformedData { .. }
            | AcquireError::NotFound { .. }
            | AcquireError::Io { .. } => false,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            AcquireError::Transport { .. } => "transport",
            AcquireError::HttpStatus { .. } => "http_status",
            AcquireError::Timeout { .. } => "timeout",
            AcquireError::MalformedData { .. } => "malformed_data",
            AcquireError::NotFound { .. } => "not_found",
            AcquireError::Io { .. } => "io",
        }
    }
}

/// Stage of a display cycle, used to tag failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Fetching the source bytes
    Acquire,
    /// Converting into the panel buffer
    Encode,
    /// Talking to the panel
    Panel,
    /// Operator interrupt
    Interrupt,
}

impl Stage {
    /// Lowercase stage name for logs
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Encode => "encode",
            Stage::Panel => "panel",
            Stage::Interrupt => "interrupt",
        }
    }
}

/// Outcome of a failed pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source bytes could not be obtained
    #[error("acquisition failed")]
    Acquire(#[from] AcquireError),

    /// Source bytes could not be converted
    #[error("encoding failed")]
    Codec(#[from] CodecError),

    /// The panel reported a failure or was driven out of order
    #[error("panel operation failed")]
    Session(#[from] SessionError),

    /// The operator asked to stop
    #[error("interrupted")]
    Interrupted,
}

impl PipelineError {
    /// Stage the failure belongs to
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Acquire(_) => Stage::Acquire,
            PipelineError::Codec(_) => Stage::Encode,
            PipelineError::Session(_) => Stage::Panel,
            PipelineError::Interrupted => Stage::Interrupt,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Acquire(_) => 2,
            PipelineError::Codec(_) => 3,
            PipelineError::Session(_) => 4,
            PipelineError::Interrupted => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_timeout_maps_to_hardware_timeout() {
        let timeout = Duration::from_secs(3);
        let err = SessionError::from_hardware("clear", HardwareError::BusyTimeout { timeout });
        assert!(matches!(
            err,
            SessionError::HardwareTimeout { operation: "clear", timeout: t } if t == timeout
        ));

        let err = SessionError::from_hardware(
            "display",
            HardwareError::SpiError(spi::ErrorKind::Other),
        );
        assert!(matches!(err, SessionError::Hardware { operation: "display", .. }));
    }

    #[test]
    fn transient_acquire_errors() {
        let url = String::from("http://localhost:3000/bmp");
        let refused = AcquireError::Transport {
            url: url.clone(),
            reason: "refused".into(),
        };
        assert!(refused.is_transient());
        assert!(AcquireError::HttpStatus { url: url.clone(), status: 503 }.is_transient());
        assert!(AcquireError::HttpStatus { url: url.clone(), status: 429 }.is_transient());
        assert!(!AcquireError::HttpStatus { url, status: 404 }.is_transient());
        assert!(!AcquireError::NotFound { path: "frame.bmp".into() }.is_transient());
    }

    #[test]
    fn exit_codes_are_non_zero_and_distinct() {
        let errors = [
            PipelineError::Acquire(AcquireError::NotFound { path: "x".into() }),
            PipelineError::Codec(CodecError::UnsupportedFormat("x".into())),
            PipelineError::Session(SessionError::BufferSize { expected: 1, actual: 2 }),
            PipelineError::Interrupted,
        ];
        let codes: Vec<u8> = errors.iter().map(PipelineError::exit_code).collect();
        assert_eq!(codes, vec![2, 3, 4, 130]);
        assert_eq!(errors[0].stage(), Stage::Acquire);
        assert_eq!(errors[3].stage().as_str(), "interrupt");
    }
}
