use std::io;

use thiserror::Error;

/// Errors produced while driving a request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The URL scheme is not `http`, or is `https` with no TLS config installed.
    #[error("unsupported url protocol")]
    UnsupportedProtocol,

    /// The hostname filter rejected the host.
    #[error("hostname blocked")]
    BlockedHostname,

    /// Name resolution failed.
    #[error("resolve failed: {0}")]
    Resolve(io::Error),

    /// No resolved endpoint matched the bind address family.
    #[error("address family not supported")]
    AddressFamilyNotSupported,

    /// Connecting failed on the last remaining endpoint.
    #[error("connect failed: {0}")]
    Connect(io::Error),

    /// The completion deadline elapsed with no endpoints left to try.
    #[error("timed out")]
    TimedOut,

    /// The response bytes did not parse as HTTP/1.1.
    #[error("http parse error")]
    Parse,

    /// A redirect response carried no `Location` header.
    #[error("missing location header")]
    MissingLocation,

    /// The buffered response exceeded the maximum buffer size.
    #[error("response too large")]
    TooLarge,

    /// Gzip decompression failed. The still-compressed body is delivered
    /// alongside this error for diagnostics.
    #[error("gzip inflate error: {0}")]
    Inflate(String),

    /// Transport end-of-stream. Cleared before delivery when the parser
    /// already saw a complete response.
    #[error("unexpected end of stream")]
    Eof,

    /// Transport I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
