use std::io;

use thiserror::Error;

use crate::transport::TransportProtocol;

/// Everything that can go wrong while talking to a Source server.
///
/// Internal layers return this through `?`; the public query methods in
/// [crate::query] fold it into a [crate::query::QueryResult::Failure] message.
#[derive(Debug, Error)]
pub enum SourceQueryError {
    #[error("host name or IP address is empty or invalid")]
    InvalidHost,
    #[error("host name exceeds hostname limit of {limit} characters (got {len})")]
    HostTooLong { len: usize, limit: usize },
    #[error("only TCP and UDP protocols are supported (got {0})")]
    UnsupportedProtocol(TransportProtocol),
    #[error("no address records found for host `{0}`")]
    NoAddressRecords(String),
    #[error("failed to resolve host `{host}`: {source}")]
    ResolveFailed { host: String, source: io::Error },
    #[error("failed to bind local socket: {0}")]
    FailedPortBind(io::Error),
    #[error("unable to reach host: {0}")]
    UnreachableHost(io::Error),
    #[error("{0} timed out after {1} ms")]
    Timeout(&'static str, u128),

    #[error("not connected to a server")]
    NotConnected,
    #[error("connection was closed by the remote host")]
    ConnectionClosed,
    #[error("failed to send packet: {0}")]
    SendError(io::Error),
    #[error("failed to receive packet: {0}")]
    ReceiveError(io::Error),

    #[error("payload truncated: needed {needed} byte(s) at offset {offset}, only {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("string is not valid UTF-8: {0}")]
    InvalidString(#[from] std::str::Utf8Error),

    #[error("unknown packet header {0}")]
    UnknownPacketHeader(i32),
    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),
    #[error("unexpected response type {got:#04x} (expected {expected:#04x})")]
    UnexpectedResponse { expected: u8, got: u8 },
    #[error("compressed split packets are not supported")]
    CompressedSplitPacket,
    #[error("malformed split packet: {0}")]
    InvalidSplitPacket(String),
    #[error("server kept answering with a new challenge after {0} attempts")]
    ChallengeLoop(usize),
}

impl SourceQueryError {
    /// `true` when a read ran past the end of a received payload.
    pub fn is_truncation(&self) -> bool {
        matches!(self, SourceQueryError::Truncated { .. })
    }
}
