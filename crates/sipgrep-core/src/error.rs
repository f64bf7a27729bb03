use thiserror::Error;

/// A type alias for handling `Result`s with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced across the sipgrep workspace.
///
/// `DecodeSkip` and `CrossLinkPending` are deliberately *not* propagated out
/// of the dissector chain or the storage append path — they are represented
/// here only so callers that count or log them have a single vocabulary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Could not open a device/file, compile a filter, or bind a socket.
    /// Fatal for the input/output that raised it, not for the process.
    #[error("init failure: {0}")]
    InitFailure(String),

    /// A dissector rejected or could not parse a byte slice. Never returned
    /// to a caller outside the dissector chain; logged at debug and counted.
    #[error("decode skip at {layer}: {reason}")]
    DecodeSkip {
        /// Name of the dissector that gave up (e.g. "sip", "sdp", "tcp").
        layer: &'static str,
        reason: String,
    },

    /// The memory cap was reached and no terminal call was available to
    /// evict.
    #[error("resource exhausted: memory cap reached with no terminal calls")]
    ResourceExhausted,

    /// The capture filter string was rejected by the filter compiler.
    #[error("invalid filter expression: {0}")]
    InvalidFilter(String),

    /// A capture file could not be read as pcap/pcap-ng.
    #[error("capture file error: {0}")]
    CaptureFile(String),
}

impl Error {
    pub fn decode_skip(layer: &'static str, reason: impl Into<String>) -> Self {
        Error::DecodeSkip {
            layer,
            reason: reason.into(),
        }
    }
}
