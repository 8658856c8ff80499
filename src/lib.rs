//! wireget — single-request HTTP/1.1 GET client.
//!
//! One [`HttpConnection`] issues one logical GET and drives it through name
//! resolution, multi-endpoint connect with retry, plain or TLS (or SOCKS5)
//! transport, redirect chasing, chunked and gzip decoding, download pacing
//! and an overall completion deadline. The outcome is reported through a
//! response handler: once with the whole body in *bottled* mode, or per
//! body chunk plus a terminal call in streaming mode.
//!
//! # Architecture
//!
//! The request life cycle is a sequential state machine inside the future
//! returned by [`HttpConnection::get`] — resolve, connect (fanning out over
//! shuffled endpoints), write, read, redirect — with the deadline and the
//! rate limiter raced against each suspension point. Dropping the future
//! cancels all pending I/O. Cross-task control (close, rate changes) goes
//! through the shared [`ConnControl`] handle.
//!
//! The transport is a closed variant set ([`stream::HttpStream`]): direct
//! TCP, TCP through a SOCKS5 proxy, TLS over either. A plain HTTP proxy
//! instead rewrites the request to the absolute form; an HTTP proxy in
//! front of TLS gets a `CONNECT` tunnel.
//!
//! # Example
//!
//! ```rust,ignore
//! use wireget::{HttpConnection, RequestOptions, SystemResolver};
//!
//! let mut conn = HttpConnection::new(
//!     SystemResolver,
//!     |err, parser, body, _ctl| {
//!         if err.is_none() {
//!             println!("{} ({} bytes)", parser.status_code(), body.len());
//!         }
//!     },
//!     true,          // bottled: deliver the whole body at once
//!     2 * 1024 * 1024,
//! );
//! conn.get("http://example.com/", &RequestOptions::default()).await;
//! ```

pub mod connection;
pub mod error;
pub mod gzip;
pub mod limiter;
pub mod parser;
pub mod proxy;
pub(crate) mod request;
pub mod resolver;
pub mod stream;
pub mod url;

/// Shared control handle: close and rate-limit a connection from any task.
pub use connection::ConnControl;
/// The single-request connection state machine.
pub use connection::HttpConnection;
/// Per-request parameters, carried across redirects.
pub use connection::RequestOptions;
/// Errors produced while driving a request.
pub use error::HttpError;
/// Incremental HTTP/1.1 response parser.
pub use parser::HttpParser;
/// Proxy protocol selector.
pub use proxy::ProxyKind;
/// Proxy snapshot for one request.
pub use proxy::ProxySettings;
/// Flags forwarded to the resolver.
pub use resolver::ResolveFlags;
/// Hostname resolution seam.
pub use resolver::Resolver;
/// Resolver backed by the operating system.
pub use resolver::SystemResolver;
