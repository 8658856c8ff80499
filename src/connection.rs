//! The request state machine.
//!
//! One [`HttpConnection`] drives one logical GET at a time: parse the URL,
//! resolve the host, fan out over the shuffled endpoints, write the request,
//! consume the response, chase redirects, and deliver the outcome through the
//! response handler. The whole life cycle runs inside the future returned by
//! [`HttpConnection::get`]; dropping that future cancels all pending I/O.
//!
//! Cross-task control goes through the shared [`ConnControl`] handle: it can
//! abort the request ([`ConnControl::close`]) or change the download rate
//! ([`ConnControl::rate_limit`]) while the driver is suspended on I/O. The
//! driver re-checks the handle at every suspension point, so a close from a
//! handler or another task is observed before the next operation starts.
//!
//! In bottled mode the whole body is buffered (chunk framing collapsed,
//! gzip inflated) and the handler fires exactly once per logical request.
//! In streaming mode the handler fires for every body chunk as it arrives,
//! raw, and one final time with the terminal result.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rand::seq::SliceRandom;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_rustls::rustls::ClientConfig;
use tracing::{debug, trace};

use crate::error::HttpError;
use crate::gzip::inflate_gzip;
use crate::limiter::{Grant, RateLimiter};
use crate::parser::HttpParser;
use crate::proxy::ProxySettings;
use crate::request::build_get_request;
use crate::resolver::{ResolveFlags, Resolver, SystemResolver};
use crate::stream::{HttpStream, StreamConnector};
use crate::url::{is_redirect, parse_url, resolve_redirect_location};

/// Completion deadline when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Redirect budget when the caller does not pick one.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

const RECV_BUFFER_INITIAL: usize = 4096;

/// Response delivery. Fires once per bottled request, or per chunk plus a
/// terminal call when streaming.
pub type ResponseHandler =
    Box<dyn FnMut(Option<&HttpError>, &HttpParser, &[u8], &ConnControl) + Send>;
/// Fires after the transport (TCP, SOCKS5, TLS) is fully established,
/// before the request is written.
pub type ConnectHandler = Box<dyn FnMut(&ConnControl) + Send>;
/// May prune the resolved endpoint list before connecting.
pub type EndpointFilter = Box<dyn FnMut(&mut Vec<SocketAddr>) + Send>;
/// Returns `false` to block a hostname before any I/O happens.
pub type HostnameFilter = Box<dyn FnMut(&str) -> bool + Send>;

/// Shared control handle for a connection.
///
/// Cheap to clone (it is handed to handlers by reference and available via
/// [`HttpConnection::control`]); all methods are callable from any task.
pub struct ConnControl {
    abort: AtomicBool,
    force: AtomicBool,
    rate: AtomicI64,
    notify: Notify,
}

impl ConnControl {
    fn new() -> Arc<Self> {
        Arc::new(ConnControl {
            abort: AtomicBool::new(false),
            force: AtomicBool::new(false),
            rate: AtomicI64::new(0),
            notify: Notify::new(),
        })
    }

    /// Abort the connection. With `force` the transport is dropped as-is;
    /// otherwise a graceful (TLS close_notify) shutdown is attempted before
    /// the driver finishes.
    pub fn close(&self, force: bool) {
        if force {
            self.force.store(true, Ordering::SeqCst);
        }
        self.abort.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether the connection has been closed.
    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Set the download rate in bytes per second; zero disables pacing.
    /// Takes effect at the next quota decision of a live read loop.
    pub fn rate_limit(&self, bytes_per_second: i64) {
        self.rate.store(bytes_per_second, Ordering::Relaxed);
    }

    pub(crate) fn rate(&self) -> i64 {
        self.rate.load(Ordering::Relaxed)
    }

    fn forced(&self) -> bool {
        self.force.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_abort(&self) {
        while !self.aborted() {
            self.notify.notified().await;
        }
    }
}

/// Per-request parameters. Everything here is carried unchanged across
/// redirect hops.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Completion deadline for each request leg, measured from the leg start
    /// and re-armed after every connect retry. Name resolution is granted up
    /// to twice this budget.
    pub timeout: Duration,
    /// Scheduling priority, 0..=2. Recorded but not acted upon.
    pub priority: u8,
    /// Proxy snapshot for this request.
    pub proxy: Option<ProxySettings>,
    /// Redirect budget. The window closes at the first non-redirect status.
    pub max_redirects: u32,
    /// `User-Agent` header value; omitted when empty.
    pub user_agent: String,
    /// Local address to bind; also restricts endpoints to its family.
    pub bind_addr: Option<IpAddr>,
    /// Flags forwarded to the resolver.
    pub resolve_flags: ResolveFlags,
    /// `user:pass` for Basic authorization. Userinfo in the URL wins.
    pub auth: String,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            timeout: DEFAULT_TIMEOUT,
            priority: 0,
            proxy: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: String::new(),
            bind_addr: None,
            resolve_flags: ResolveFlags::default(),
            auth: String::new(),
        }
    }
}

/// Outcome of one request leg.
enum Leg {
    Done,
    Redirect(String),
}

/// Outcome of one write-and-read exchange on a connected stream.
enum Exchange {
    Complete(Leg),
    Retry,
}

/// A single-request HTTP/1.1 client connection.
pub struct HttpConnection<R: Resolver = SystemResolver> {
    resolver: R,
    handler: Option<ResponseHandler>,
    connect_handler: Option<ConnectHandler>,
    endpoint_filter: Option<EndpointFilter>,
    hostname_filter: Option<HostnameFilter>,
    tls_config: Option<Arc<ClientConfig>>,
    bottled: bool,
    max_bottled_buffer_size: usize,
    ctl: Arc<ConnControl>,

    stream: Option<HttpStream>,
    parser: HttpParser,
    limiter: RateLimiter,
    url: String,
    send_buffer: String,
    recv_buffer: BytesMut,
    read_pos: usize,
    endpoints: Vec<SocketAddr>,
    next_ep: usize,
    host: String,
    port: u16,
    ssl: bool,
    bind_addr: Option<IpAddr>,
    proxy: ProxySettings,
    priority: u8,
    user_agent: String,
    auth: String,
    resolve_flags: ResolveFlags,
    redirects_left: u32,
    completion_timeout: Duration,
    start_time: Instant,
    last_receive: Instant,
    called: bool,
}

impl<R: Resolver> HttpConnection<R> {
    /// Create a connection. `bottled` buffers the whole body and delivers it
    /// in one callback; the buffer never grows past
    /// `max_bottled_buffer_size`.
    pub fn new(
        resolver: R,
        response_handler: impl FnMut(Option<&HttpError>, &HttpParser, &[u8], &ConnControl)
            + Send
            + 'static,
        bottled: bool,
        max_bottled_buffer_size: usize,
    ) -> Self {
        let now = Instant::now();
        HttpConnection {
            resolver,
            handler: Some(Box::new(response_handler)),
            connect_handler: None,
            endpoint_filter: None,
            hostname_filter: None,
            tls_config: None,
            bottled,
            max_bottled_buffer_size,
            ctl: ConnControl::new(),
            stream: None,
            parser: HttpParser::new(),
            limiter: RateLimiter::new(),
            url: String::new(),
            send_buffer: String::new(),
            recv_buffer: BytesMut::new(),
            read_pos: 0,
            endpoints: Vec::new(),
            next_ep: 0,
            host: String::new(),
            port: 0,
            ssl: false,
            bind_addr: None,
            proxy: ProxySettings::default(),
            priority: 0,
            user_agent: String::new(),
            auth: String::new(),
            resolve_flags: ResolveFlags::default(),
            redirects_left: DEFAULT_MAX_REDIRECTS,
            completion_timeout: DEFAULT_TIMEOUT,
            start_time: now,
            last_receive: now,
            called: false,
        }
    }

    /// Install the TLS client configuration; required for `https` URLs.
    pub fn with_tls(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Fires after the transport handshake, before the request is written.
    pub fn with_connect_handler(mut self, f: impl FnMut(&ConnControl) + Send + 'static) -> Self {
        self.connect_handler = Some(Box::new(f));
        self
    }

    /// May prune resolved endpoints before connecting. Emptying the list
    /// closes the connection without a callback.
    pub fn with_endpoint_filter(
        mut self,
        f: impl FnMut(&mut Vec<SocketAddr>) + Send + 'static,
    ) -> Self {
        self.endpoint_filter = Some(Box::new(f));
        self
    }

    /// Blocks hostnames before any I/O. Returning `false` delivers
    /// [`HttpError::BlockedHostname`].
    pub fn with_hostname_filter(
        mut self,
        f: impl FnMut(&str) -> bool + Send + 'static,
    ) -> Self {
        self.hostname_filter = Some(Box::new(f));
        self
    }

    /// Shared control handle for this connection.
    pub fn control(&self) -> Arc<ConnControl> {
        Arc::clone(&self.ctl)
    }

    /// Set the download rate in bytes per second; zero disables pacing.
    pub fn rate_limit(&self, bytes_per_second: i64) {
        self.ctl.rate_limit(bytes_per_second);
    }

    /// Scheduling priority recorded for the current request.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Instant of the most recent transport activity.
    pub fn last_receive(&self) -> Instant {
        self.last_receive
    }

    /// Issue a GET for `url` and drive it to its terminal callback.
    ///
    /// Input errors (unparsable URL, blocked hostname, unsupported scheme)
    /// are delivered through the handler after yielding to the scheduler, so
    /// the handler never runs before this future is first polled.
    pub async fn get(&mut self, url: &str, options: &RequestOptions) {
        debug_assert!(options.priority < 3);
        self.called = false;
        self.url = url.to_string();
        self.user_agent = options.user_agent.clone();
        self.resolve_flags = options.resolve_flags;
        self.auth = options.auth.clone();
        self.redirects_left = options.max_redirects;
        debug!(url = %self.url, "get");
        self.drive(None, options).await;
    }

    /// Drive a request to an already-known host and port, writing whatever
    /// request is currently buffered (normally set up by [`get`](Self::get),
    /// which is the primary entry point).
    pub async fn start(&mut self, host: &str, port: u16, ssl: bool, options: &RequestOptions) {
        debug_assert!(options.priority < 3);
        self.called = false;
        self.resolve_flags = options.resolve_flags;
        self.redirects_left = options.max_redirects;
        self.drive(Some((host.to_string(), port, ssl)), options).await;
    }

    /// Close the connection. Safe to call repeatedly. With `force` the
    /// transport is dropped immediately; otherwise a graceful TLS shutdown
    /// is attempted first. Either way the handler is released and any
    /// in-flight request ends silently.
    pub async fn close(&mut self, force: bool) {
        if self.ctl.aborted() {
            return;
        }
        self.ctl.close(force);
        self.teardown().await;
    }

    async fn drive(&mut self, mut direct: Option<(String, u16, bool)>, options: &RequestOptions) {
        loop {
            if self.ctl.aborted() {
                break;
            }
            let (host, port, ssl) = match direct.take() {
                Some(target) => target,
                None => match self.prepare(options) {
                    Ok(target) => target,
                    Err(e) => {
                        self.post_error(e).await;
                        return;
                    }
                },
            };
            match self.run_leg(&host, port, ssl, options).await {
                Leg::Done => break,
                Leg::Redirect(next) => {
                    self.redirects_left = self.redirects_left.saturating_sub(1);
                    self.url = next;
                }
            }
        }
        if self.ctl.aborted() {
            self.teardown().await;
        }
    }

    /// Synchronous prefix of a leg: parse, filter, build the request.
    fn prepare(&mut self, options: &RequestOptions) -> Result<(String, u16, bool), HttpError> {
        let parsed = parse_url(&self.url)?;
        if !parsed.auth.is_empty() {
            self.auth = parsed.auth.clone();
        }
        if let Some(filter) = self.hostname_filter.as_mut() {
            if !filter(&parsed.host) {
                return Err(HttpError::BlockedHostname);
            }
        }
        match parsed.scheme.as_str() {
            "http" => {}
            "https" if self.tls_config.is_some() => {}
            _ => return Err(HttpError::UnsupportedProtocol),
        }
        let built = build_get_request(
            &self.url,
            &parsed,
            options.proxy.as_ref(),
            &self.user_agent,
            &self.auth,
            self.bottled,
        );
        self.send_buffer = built.text;
        Ok((built.host, built.port, built.ssl))
    }

    async fn run_leg(
        &mut self,
        host: &str,
        port: u16,
        ssl: bool,
        options: &RequestOptions,
    ) -> Leg {
        let ctl = Arc::clone(&self.ctl);
        self.completion_timeout = options.timeout;
        self.start_time = Instant::now();
        self.last_receive = self.start_time;
        self.called = false;
        self.parser.reset();
        self.recv_buffer.clear();
        self.read_pos = 0;
        self.priority = options.priority;
        if let Some(p) = options.proxy.as_ref() {
            self.proxy = p.clone();
        }

        let reuse = self.stream.is_some()
            && self.host == host
            && self.port == port
            && self.ssl == ssl
            && self.bind_addr == options.bind_addr;

        if !reuse {
            self.stream = None;
            self.ssl = ssl;
            self.bind_addr = options.bind_addr;
            self.host = host.to_string();
            self.port = port;
            self.endpoints.clear();
            self.next_ep = 0;

            if self.proxy.is_socks5() && self.proxy.proxy_hostnames {
                // the SOCKS5 peer resolves the name; a placeholder endpoint
                // keeps the attempt accounting uniform
                self.endpoints
                    .push(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
            } else {
                // resolution may be queued behind other lookups, so it gets
                // up to twice the completion budget
                let resolve_deadline = self.start_time + self.completion_timeout * 2;
                debug!(host = %self.host, "resolving");
                let resolved = tokio::select! {
                    r = self.resolver.resolve(host, self.resolve_flags) => Some(r),
                    _ = sleep_until(resolve_deadline) => None,
                    _ = ctl.wait_abort() => return Leg::Done,
                };
                let addrs = match resolved {
                    None => return self.finish(Some(HttpError::TimedOut)),
                    Some(Err(e)) => return self.finish(Some(HttpError::Resolve(e))),
                    Some(Ok(addrs)) => addrs,
                };
                if ctl.aborted() {
                    return Leg::Done;
                }

                self.start_time = Instant::now();
                self.last_receive = self.start_time;
                self.endpoints = addrs
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, port))
                    .collect();
                if let Some(filter) = self.endpoint_filter.as_mut() {
                    filter(&mut self.endpoints);
                }
                if self.endpoints.is_empty() {
                    self.close(false).await;
                    return Leg::Done;
                }
                self.endpoints.shuffle(&mut rand::thread_rng());
                if let Some(bind) = self.bind_addr {
                    self.endpoints.retain(|ep| ep.is_ipv4() == bind.is_ipv4());
                    if self.endpoints.is_empty() {
                        let leg = self.finish(Some(HttpError::AddressFamilyNotSupported));
                        self.close(false).await;
                        return leg;
                    }
                }
            }
        }

        loop {
            if ctl.aborted() {
                return Leg::Done;
            }
            if self.stream.is_none() {
                match self.connect_next().await {
                    Ok(true) => {}
                    Ok(false) => return Leg::Done,
                    Err(e) => return self.finish(Some(e)),
                }
            }
            match self.exchange().await {
                Exchange::Complete(leg) => return leg,
                Exchange::Retry => {
                    self.stream = None;
                    self.parser.reset();
                    self.read_pos = 0;
                    self.recv_buffer.clear();
                    self.start_time = Instant::now();
                    self.last_receive = self.start_time;
                }
            }
        }
    }

    /// Try endpoints starting at `next_ep` until one connects.
    ///
    /// Returns `Ok(false)` when the connection was aborted mid-dial. A dial
    /// failure moves on to the next endpoint; the last failure (or the
    /// deadline, when no endpoints remain) is the reported error.
    async fn connect_next(&mut self) -> Result<bool, HttpError> {
        let ctl = Arc::clone(&self.ctl);
        loop {
            if ctl.aborted() {
                return Ok(false);
            }
            debug_assert!(self.next_ep < self.endpoints.len());
            if self.next_ep >= self.endpoints.len() {
                return Err(HttpError::TimedOut);
            }

            let mut dst_name = None;
            if self.proxy.is_socks5() && self.proxy.proxy_hostnames {
                // an IP-literal "hostname" skips remote naming entirely
                match self.host.parse::<IpAddr>() {
                    Ok(ip) => self.endpoints[self.next_ep] = SocketAddr::new(ip, self.port),
                    Err(_) => dst_name = Some(self.host.clone()),
                }
            }
            let target = self.endpoints[self.next_ep];
            self.next_ep += 1;

            let tls = if self.ssl {
                match self.tls_config.as_ref() {
                    Some(config) => Some((Arc::clone(config), self.host.clone())),
                    None => return Err(HttpError::UnsupportedProtocol),
                }
            } else {
                None
            };
            let connector = StreamConnector {
                proxy: self.proxy.clone(),
                tls,
                bind_addr: self.bind_addr,
                socks5_dst_name: dst_name,
                origin_host: self.host.clone(),
                origin_port: self.port,
            };

            let deadline = self.start_time + self.completion_timeout;
            debug!(endpoint = %target, attempt = self.next_ep, "connecting");
            let attempt = tokio::select! {
                r = connector.connect(target) => Some(r),
                _ = sleep_until(deadline) => None,
                _ = ctl.wait_abort() => return Ok(false),
            };
            match attempt {
                Some(Ok(stream)) => {
                    self.stream = Some(stream);
                    self.last_receive = Instant::now();
                    self.start_time = self.last_receive;
                    if let Some(handler) = self.connect_handler.as_mut() {
                        handler(&ctl);
                    }
                    return Ok(true);
                }
                Some(Err(e)) => {
                    debug!(endpoint = %target, error = %e, "connect failed");
                    if self.next_ep < self.endpoints.len() && !ctl.aborted() {
                        continue;
                    }
                    return Err(HttpError::Connect(e));
                }
                None => {
                    if self.next_ep < self.endpoints.len() {
                        self.start_time = Instant::now();
                        self.last_receive = self.start_time;
                        continue;
                    }
                    return Err(HttpError::TimedOut);
                }
            }
        }
    }

    /// Write the request and consume the response on the connected stream.
    async fn exchange(&mut self) -> Exchange {
        let ctl = Arc::clone(&self.ctl);
        let deadline = self.start_time + self.completion_timeout;

        {
            let Some(stream) = self.stream.as_mut() else {
                return Exchange::Complete(Leg::Done);
            };
            let data = self.send_buffer.as_bytes();
            let written = tokio::select! {
                r = stream.write_all(data) => Some(r),
                _ = sleep_until(deadline) => None,
                _ = ctl.wait_abort() => return Exchange::Complete(Leg::Done),
            };
            match written {
                Some(Ok(())) => {}
                Some(Err(e)) => return Exchange::Complete(self.finish(Some(HttpError::Io(e)))),
                None => return self.deadline_fired(),
            }
        }
        if ctl.aborted() {
            return Exchange::Complete(Leg::Done);
        }

        self.recv_buffer
            .resize(RECV_BUFFER_INITIAL.min(self.max_bottled_buffer_size.max(1)), 0);

        loop {
            if ctl.aborted() {
                return Exchange::Complete(Leg::Done);
            }

            let room = self.recv_buffer.len() - self.read_pos;
            let rate = ctl.rate();
            let amount = match self.limiter.grant(room, rate) {
                Grant::Allow(n) => n,
                Grant::Starved(at) => {
                    trace!("download quota exhausted");
                    tokio::select! {
                        _ = sleep_until(at) => {
                            self.limiter.refill(ctl.rate());
                            continue;
                        }
                        _ = sleep_until(deadline) => return self.deadline_fired(),
                        _ = ctl.wait_abort() => return Exchange::Complete(Leg::Done),
                    }
                }
            };

            let read = {
                let read_pos = self.read_pos;
                let Some(stream) = self.stream.as_mut() else {
                    return Exchange::Complete(Leg::Done);
                };
                let buf = &mut self.recv_buffer[read_pos..read_pos + amount];
                tokio::select! {
                    r = stream.read_some(buf) => Some(r),
                    _ = sleep_until(deadline) => None,
                    _ = ctl.wait_abort() => return Exchange::Complete(Leg::Done),
                }
            };

            let n = match read {
                None => return self.deadline_fired(),
                // TLS truncation surfaces as UnexpectedEof; treat both as eof
                Some(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
                Some(Err(e)) => return Exchange::Complete(self.finish(Some(HttpError::Io(e)))),
                Some(Ok(n)) => n,
            };

            if n == 0 {
                self.parser.eof();
                let leg = if self.bottled && self.parser.header_finished() {
                    self.finish_with_body(Some(HttpError::Eof))
                } else {
                    self.finish(Some(HttpError::Eof))
                };
                return Exchange::Complete(leg);
            }

            self.limiter.consume(n, rate);
            self.read_pos += n;

            if self.bottled || !self.parser.header_finished() {
                if self
                    .parser
                    .incoming(&self.recv_buffer[..self.read_pos])
                    .is_err()
                {
                    return Exchange::Complete(self.finish(Some(HttpError::Parse)));
                }

                if self.redirects_left > 0 && self.parser.header_finished() {
                    if is_redirect(self.parser.status_code()) {
                        let location =
                            self.parser.header("location").unwrap_or("").to_string();
                        if location.is_empty() {
                            return Exchange::Complete(
                                self.finish(Some(HttpError::MissingLocation)),
                            );
                        }
                        // hard close; no graceful TLS shutdown before the
                        // next leg reconnects
                        self.stream = None;
                        let next = resolve_redirect_location(&self.url, &location);
                        debug!(location = %next, left = self.redirects_left, "redirect");
                        return Exchange::Complete(Leg::Redirect(next));
                    }
                    self.redirects_left = 0;
                }

                if !self.bottled && self.parser.header_finished() {
                    if self.read_pos > self.parser.body_start() {
                        let span = (self.parser.body_start(), self.read_pos);
                        self.deliver(None, Some(span));
                    }
                    self.read_pos = 0;
                    self.last_receive = Instant::now();
                } else if self.bottled && self.parser.finished() {
                    return Exchange::Complete(self.finish_with_body(None));
                }
            } else {
                let span = (0, self.read_pos);
                self.deliver(None, Some(span));
                self.read_pos = 0;
                self.last_receive = Instant::now();
            }

            if self.read_pos == self.recv_buffer.len() {
                let grown = (self.read_pos * 2).min(self.max_bottled_buffer_size);
                self.recv_buffer.resize(grown, 0);
            }
            if self.read_pos == self.max_bottled_buffer_size {
                return Exchange::Complete(self.finish(Some(HttpError::TooLarge)));
            }
        }
    }

    /// Deadline handling shared by the write and read phases: retry the next
    /// endpoint when one remains, otherwise report the timeout.
    fn deadline_fired(&mut self) -> Exchange {
        if self.next_ep < self.endpoints.len() {
            debug!("deadline passed, trying next endpoint");
            Exchange::Retry
        } else {
            self.stream = None;
            Exchange::Complete(self.finish(Some(HttpError::TimedOut)))
        }
    }

    fn finish(&mut self, err: Option<HttpError>) -> Leg {
        self.deliver(err, None);
        Leg::Done
    }

    fn finish_with_body(&mut self, err: Option<HttpError>) -> Leg {
        let span = (self.parser.body_start(), self.read_pos);
        self.deliver(err, Some(span));
        Leg::Done
    }

    /// The single funnel every outcome passes through.
    ///
    /// For a buffered body this collapses chunk framing in place, inflates a
    /// gzip content encoding (the inflate error, if any, is delivered with
    /// the still-compressed payload), and clears the error when the parser
    /// saw a complete response.
    fn deliver(&mut self, mut err: Option<HttpError>, body: Option<(usize, usize)>) {
        if self.bottled && self.called {
            return;
        }

        if let Some((start, end)) = body {
            if end > start && self.bottled && self.parser.header_finished() {
                let (body_start, body_len) = {
                    let collapsed = self
                        .parser
                        .collapse_chunk_headers(&mut self.recv_buffer[..end]);
                    (self.parser.body_start(), collapsed.len())
                };
                let encoding = self.parser.header("content-encoding").unwrap_or("");
                if encoding == "gzip" || encoding == "x-gzip" {
                    match inflate_gzip(
                        &self.recv_buffer[body_start..body_start + body_len],
                        self.max_bottled_buffer_size,
                    ) {
                        Ok(inflated) => {
                            if self.parser.finished() {
                                err = None;
                            }
                            self.called = true;
                            self.invoke(err.as_ref(), 0, 0, Some(&inflated));
                        }
                        Err(inflate_err) => {
                            // `called` stays clear; a later terminal
                            // delivery can still fire
                            self.invoke(
                                Some(&inflate_err),
                                body_start,
                                body_start + body_len,
                                None,
                            );
                        }
                    }
                    return;
                }
                if self.parser.finished() {
                    err = None;
                }
                self.called = true;
                self.invoke(err.as_ref(), body_start, body_start + body_len, None);
                return;
            }
            self.called = true;
            self.invoke(err.as_ref(), start, end, None);
            return;
        }

        self.called = true;
        self.invoke(err.as_ref(), 0, 0, None);
    }

    fn invoke(&mut self, err: Option<&HttpError>, start: usize, end: usize, alt: Option<&[u8]>) {
        let Some(mut handler) = self.handler.take() else {
            return;
        };
        let ctl = Arc::clone(&self.ctl);
        {
            let data: &[u8] = match alt {
                Some(bytes) => bytes,
                None => {
                    let len = self.recv_buffer.len();
                    &self.recv_buffer[start.min(len)..end.min(len)]
                }
            };
            handler(err, &self.parser, data, &ctl);
        }
        if !ctl.aborted() {
            self.handler = Some(handler);
        }
    }

    /// Deliver a pre-I/O error through the scheduler rather than from the
    /// caller's synchronous frame.
    async fn post_error(&mut self, err: HttpError) {
        tokio::task::yield_now().await;
        self.deliver(Some(err), None);
    }

    async fn teardown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if !self.ctl.forced() {
                let _ = stream.shutdown().await;
            }
        }
        self.host.clear();
        self.port = 0;
        self.handler = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counting_conn(bottled: bool) -> (HttpConnection, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let conn = HttpConnection::new(
            SystemResolver,
            move |_err, _parser, _data, _ctl| {
                calls2.fetch_add(1, Ordering::SeqCst);
            },
            bottled,
            1 << 20,
        );
        (conn, calls)
    }

    #[test]
    fn bottled_delivery_fires_once() {
        let (mut conn, calls) = counting_conn(true);
        conn.deliver(Some(HttpError::Eof), None);
        conn.deliver(None, None);
        conn.deliver(Some(HttpError::TimedOut), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn streaming_delivery_fires_per_chunk() {
        let (mut conn, calls) = counting_conn(false);
        conn.deliver(None, None);
        conn.deliver(None, None);
        conn.deliver(Some(HttpError::Eof), None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn close_releases_the_handler() {
        let (mut conn, calls) = counting_conn(false);
        conn.ctl.close(true);
        conn.deliver(None, None);
        assert!(conn.handler.is_none());
        // the in-flight delivery still reached the handler once
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn control_flags() {
        let ctl = ConnControl::new();
        assert!(!ctl.aborted());
        assert_eq!(ctl.rate(), 0);
        ctl.rate_limit(4096);
        assert_eq!(ctl.rate(), 4096);
        ctl.close(false);
        assert!(ctl.aborted());
        assert!(!ctl.forced());
        ctl.close(true);
        assert!(ctl.forced());
    }

    #[test]
    fn default_options() {
        let options = RequestOptions::default();
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert_eq!(options.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(options.priority, 0);
        assert!(options.proxy.is_none());
    }
}
